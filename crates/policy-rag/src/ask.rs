//! `policy-rag ask`: answer a question from the indexed policies.
//!
//! Without `--stream` the full [`AnswerResponse`] is printed as one JSON
//! document. With `--stream` every [`GenerationEvent`] is written as one
//! NDJSON line as soon as it is produced:
//!
//! ```text
//! {"type":"sources","sources":[...],"confidence":0.72}
//! {"type":"token","content":"Employees"}
//! {"type":"token","content":" may carry over"}
//! {"type":"complete","answer":"Employees may carry over...","sources":[...],"confidence":0.72}
//! ```
//!
//! The command exits non-zero when the answer ends in an error, after the
//! output has been written.
//!
//! [`AnswerResponse`]: policy_rag_core::generation::AnswerResponse

use std::io::Write;

use anyhow::{bail, Result};
use futures::StreamExt;
use policy_rag_core::generation::GenerationEvent;
use policy_rag_core::RagService;

pub async fn run_ask<W: Write>(
    service: &RagService,
    question: &str,
    k: Option<usize>,
    stream: bool,
    out: &mut W,
) -> Result<()> {
    if stream {
        return stream_answer(service, question, k, out).await;
    }

    let response = service.answer(question, k).await;
    writeln!(out, "{}", serde_json::to_string_pretty(&response)?)?;
    if let Some(failure) = &response.error {
        bail!("{}", failure.message);
    }
    Ok(())
}

async fn stream_answer<W: Write>(
    service: &RagService,
    question: &str,
    k: Option<usize>,
    out: &mut W,
) -> Result<()> {
    let mut events = service.answer_stream(question, k);
    let mut failure = None;

    while let Some(event) = events.next().await {
        out.write_all(event.to_ndjson_line()?.as_bytes())?;
        out.flush()?;
        if let GenerationEvent::Error { error, .. } = &event {
            failure = Some(error.clone());
        }
    }

    if let Some(message) = failure {
        bail!("{}", message);
    }
    Ok(())
}
