//! # Policy RAG Core
//!
//! Retrieval-augmented answering over a private corpus of policy documents.
//!
//! This crate holds the pure pipeline: chunking, the vector index contract,
//! retrieval and reranking, context assembly, and answer generation. Every
//! external capability (embedding model, generation service, vector index
//! engine) is consumed through a trait, so the crate carries no HTTP client,
//! no async runtime, and no storage engine of its own.
//!
//! ## Data Flow
//!
//! ```text
//! text ──▶ chunk ──▶ embed ──▶ VectorIndex::add
//!
//! query ──▶ retrieval ──▶ context ──▶ generation ──▶ answer / event stream
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Recursive separator chunker with overlap and header detection |
//! | [`context`] | Budget-bounded, citation-annotated context window |
//! | [`embedding`] | Embedding capability trait and vector helpers |
//! | [`error`] | Error kinds surfaced at the orchestrator boundary |
//! | [`generation`] | Generation capability, prompt, events, and answers |
//! | [`index`] | Vector index contract and the in-memory adapter |
//! | [`models`] | Documents, chunks, and retrieval results |
//! | [`retrieval`] | Semantic search, threshold, boost, expansion, dedup |
//! | [`service`] | The request state machine and ingest path |

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod retrieval;
pub mod service;

pub use error::{ErrorKind, RagError, Result};
pub use service::{RagService, ServiceConfig};
