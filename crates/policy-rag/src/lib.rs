//! # Policy RAG
//!
//! **Ask questions of a private policy-document corpus and get cited,
//! streamed answers.**
//!
//! This crate is the application layer around [`policy_rag_core`]. The core
//! owns chunking, retrieval, context assembly and the answer state machine;
//! this crate supplies everything that touches the outside world.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ scan+extract │──▶│  RagService  │──▶│ memory/chroma  │
//! │ PDF DOCX TXT │   │ chunk+embed  │   │  vector index  │
//! └──────────────┘   └──────┬───────┘   └────────────────┘
//!                           │ ask / search
//!                           ▼
//!                 ┌───────────────────┐
//!                 │ OpenAI-compatible │
//!                 │ chat completions  │
//!                 └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and validation |
//! | [`telemetry`] | `tracing` subscriber setup |
//! | [`embedding`] | OpenAI, Ollama, and local (fastembed) embedders |
//! | [`generation`] | OpenAI-compatible chat completion with SSE streaming |
//! | [`chroma`] | Chroma REST vector index |
//! | [`extract`] | PDF, DOCX, and text extraction |
//! | [`scan`] | File discovery with include/exclude globs |
//! | [`app`] | Builds the service from config |
//! | [`ingest`] | `ingest` command |
//! | [`ask`] | `ask` command, JSON or NDJSON |
//! | [`search`] | `search` command |
//! | [`stats`] | `stats`, `show`, `remove`, and `clear` commands |
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! policy-rag ingest ./policies
//! policy-rag ask "How many vacation days carry over?"
//! policy-rag ask "What is the client entertainment budget?" --stream
//! policy-rag stats
//! ```

pub mod app;
pub mod ask;
pub mod chroma;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
mod http;
pub mod ingest;
pub mod scan;
pub mod search;
pub mod stats;
pub mod telemetry;
