//! Generation capability, prompt construction, and response shapes.
//!
//! The generation service is consumed through [`Generator`]: one blocking
//! `complete` call, or a `stream` of text fragments. The prompt is always a
//! fixed system instruction followed by a single user message carrying the
//! rendered context and the question.
//!
//! Streaming callers receive [`GenerationEvent`]s. On the wire each event is
//! one JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"sources","sources":[...],"confidence":0.71}
//! {"type":"token","content":"Employees "}
//! {"type":"token","content":"may ..."}
//! {"type":"complete","answer":"Employees may ...","sources":[...],"confidence":0.71}
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::context::{ContextEntry, ContextWindow};
use crate::error::{ErrorKind, RagError, Result};

/// Answer used when retrieval finds nothing. The generation service is not
/// called on this path.
pub const NOT_FOUND_ANSWER: &str =
    "I couldn't find relevant information in the policy documents to answer your question.";

pub const SYSTEM_PROMPT: &str = "\
You are a helpful assistant that answers questions based on policy documents.
Use the provided context to answer questions accurately and cite specific sources.

Guidelines:
1. Carefully read ALL the provided context - it contains relevant policy information
2. Look for specific policies, procedures, amounts, and approval requirements
3. Always cite the source document and section when possible
4. Be specific about amounts, approval processes, and requirements
5. If multiple sources are relevant, mention all of them
6. If you find relevant information in the context, use it to provide a comprehensive answer

Format your response with clear citations using the reference information provided.";

const SOURCE_PREVIEW_CHARS: usize = 300;
const SENTENCE_CUT_MIN_CHARS: usize = 200;

/// A stream of generated text fragments.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Build the two-message prompt for `question` over `context`.
pub fn build_messages(context: &ContextWindow, question: &str) -> Vec<ChatMessage> {
    let user = format!(
        "Context from policy documents:\n{}\n\
         Question: {}\n\n\
         IMPORTANT: Look carefully at the context above. If you find specific policies that \
         directly relate to the question, use those policies to provide a detailed answer. \
         Pay special attention to any budget amounts, approval requirements, and specific \
         procedures mentioned in the context.\n\n\
         Please provide a comprehensive answer based on the context above, including proper \
         citations to the source documents.",
        context.rendered, question
    );
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// A language-generation service.
///
/// Failures must be reported as [`RagError::GenerationFailure`].
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a complete answer in one call.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Start generating and yield text fragments as they are produced.
    ///
    /// The returned stream must be `'static` so it can outlive the borrow of
    /// `messages`. Dropping it should stop generation.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}

/// A cited source as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_name: String,
    pub file_path: String,
    pub section_headers: Vec<String>,
    pub chunk_index: usize,
    pub relevance_score: f64,
    /// Up to 300 characters, cut at a sentence end when one is close enough.
    pub preview: String,
    pub full_content: String,
}

impl SourceRef {
    pub fn from_entry(entry: &ContextEntry) -> Self {
        Self {
            file_name: entry.source_info.file_name.clone(),
            file_path: entry.source_info.file_path.clone(),
            section_headers: entry.source_info.section_headers.clone(),
            chunk_index: entry.source_info.chunk_index,
            relevance_score: entry.score,
            preview: source_preview(&entry.text),
            full_content: entry.text.clone(),
        }
    }
}

/// Sources for every entry in the context window, in citation order.
pub fn sources_for(context: &ContextWindow) -> Vec<SourceRef> {
    context.entries.iter().map(SourceRef::from_entry).collect()
}

/// First 300 chars of `text`. A truncated preview ends at the last period
/// when that period lies past char 200, otherwise it gets an ellipsis.
pub fn source_preview(text: &str) -> String {
    let cut = match text.char_indices().nth(SOURCE_PREVIEW_CHARS) {
        Some((byte, _)) => byte,
        None => return text.to_string(),
    };
    let head = &text[..cut];

    let last_period = head
        .chars()
        .enumerate()
        .filter(|(_, c)| *c == '.')
        .map(|(i, _)| i)
        .last();

    match last_period {
        Some(pos) if pos > SENTENCE_CUT_MIN_CHARS => head.chars().take(pos + 1).collect(),
        _ => format!("{}...", head),
    }
}

/// Structured failure carried by error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&RagError> for FailureInfo {
    fn from(err: &RagError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Text placed in the answer field when a request fails.
pub fn error_answer(err: &RagError) -> String {
    format!("Error generating response: {}", err)
}

/// Result of a non-streaming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
    pub total_sources_found: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl AnswerResponse {
    pub fn not_found() -> Self {
        Self {
            answer: NOT_FOUND_ANSWER.to_string(),
            sources: Vec::new(),
            confidence: 0.0,
            total_sources_found: 0,
            error: None,
        }
    }

    pub fn failed(err: &RagError) -> Self {
        Self {
            answer: error_answer(err),
            sources: Vec::new(),
            confidence: 0.0,
            total_sources_found: 0,
            error: Some(FailureInfo::from(err)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One event of a streamed answer.
///
/// Order is fixed per request: one `Sources`, any number of `Token`, then
/// exactly one of `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    Sources {
        sources: Vec<SourceRef>,
        confidence: f64,
    },
    #[serde(alias = "chunk")]
    Token { content: String },
    Complete {
        answer: String,
        sources: Vec<SourceRef>,
        confidence: f64,
    },
    Error {
        kind: ErrorKind,
        error: String,
        answer: String,
        sources: Vec<SourceRef>,
    },
}

impl GenerationEvent {
    pub fn failed(err: &RagError) -> Self {
        Self::Error {
            kind: err.kind(),
            error: err.to_string(),
            answer: error_answer(err),
            sources: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Wire name of this event's `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sources { .. } => "sources",
            Self::Token { .. } => "token",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize as a single NDJSON line, newline included.
    pub fn to_ndjson_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| RagError::GenerationFailure(format!("event encode: {}", e)))?;
        line.push('\n');
        Ok(line)
    }
}
