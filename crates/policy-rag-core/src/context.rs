//! Context assembly: ranked results → a size-bounded, cited prompt block.
//!
//! Each included result renders as
//!
//! ```text
//! [Source 1: Travel.txt - TRAVEL POLICY:, Section 2] (Relevance: 0.812)
//! <chunk text>
//!
//! ```
//!
//! Results are taken in their incoming order. Assembly stops at the first
//! result whose rendering would push the total past the budget; chunks are
//! never truncated.

use serde::Serialize;

use crate::models::{RetrievalResult, SourceInfo};

/// One rendered entry of a [`ContextWindow`].
#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    /// 1-based sequence number used in the citation header.
    pub index: usize,
    pub source_info: SourceInfo,
    pub score: f64,
    pub text: String,
}

/// The context passed to the generation service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextWindow {
    pub entries: Vec<ContextEntry>,
    pub rendered: String,
}

impl ContextWindow {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Mean score of the included entries, `0.0` when empty.
    pub fn confidence(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().map(|e| e.score).sum::<f64>() / self.entries.len() as f64
    }

    /// Character count of the rendered block.
    pub fn char_len(&self) -> usize {
        self.rendered.chars().count()
    }
}

/// Build a [`ContextWindow`] whose rendered form is at most `budget` chars.
pub fn assemble(results: &[RetrievalResult], budget: usize) -> ContextWindow {
    let mut window = ContextWindow::default();
    let mut used = 0usize;

    for result in results {
        let index = window.entries.len() + 1;
        let block = render_entry(index, &result.source_info, result.similarity_score, result.text());
        let block_len = block.chars().count();
        if used + block_len > budget {
            break;
        }
        used += block_len;
        window.rendered.push_str(&block);
        window.entries.push(ContextEntry {
            index,
            source_info: result.source_info.clone(),
            score: result.similarity_score,
            text: result.chunk.text.clone(),
        });
    }

    window
}

fn render_entry(index: usize, source: &SourceInfo, score: f64, text: &str) -> String {
    let mut header = format!("[Source {}: {}", index, source.file_name);
    if !source.section_headers.is_empty() {
        header.push_str(" - ");
        header.push_str(&source.section_headers.join(", "));
    }
    format!("{}] (Relevance: {:.3})\n{}\n\n", header, score, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn result(file: &str, headers: &[&str], text: &str, score: f64) -> RetrievalResult {
        let chunk = Chunk {
            id: format!("{file}-0"),
            document_hash: file.to_string(),
            file_name: file.to_string(),
            source_path: format!("/docs/{file}"),
            chunk_index: 0,
            total_chunks: 1,
            text: text.to_string(),
            section_headers: headers.iter().map(|h| h.to_string()).collect(),
            preview: String::new(),
        };
        RetrievalResult::new(chunk, score)
    }

    #[test]
    fn test_render_format() {
        let results = vec![
            result("Travel.txt", &["TRAVEL POLICY:", "Section 2"], "Economy only.", 0.8123),
            result("Leave.txt", &[], "Ten days.", 0.5),
        ];
        let window = assemble(&results, 10_000);
        assert_eq!(
            window.rendered,
            "[Source 1: Travel.txt - TRAVEL POLICY:, Section 2] (Relevance: 0.812)\nEconomy only.\n\n\
             [Source 2: Leave.txt] (Relevance: 0.500)\nTen days.\n\n"
        );
        assert_eq!(window.len(), 2);
        assert_eq!(window.entries[1].index, 2);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let results: Vec<_> = (0..10)
            .map(|i| result(&format!("f{i}.txt"), &[], &"x".repeat(90), 0.5))
            .collect();
        for budget in [0, 50, 130, 500, 1000] {
            let window = assemble(&results, budget);
            assert!(window.char_len() <= budget, "budget {budget}");
        }
    }

    #[test]
    fn test_overflowing_entry_omitted_whole() {
        let results = vec![
            result("a.txt", &[], "short", 0.9),
            result("b.txt", &[], &"y".repeat(500), 0.8),
            result("c.txt", &[], "tiny", 0.7),
        ];
        let window = assemble(&results, 100);
        assert_eq!(window.len(), 1);
        assert!(!window.rendered.contains('y'));
        // Assembly stops at the first overflow rather than skipping ahead.
        assert!(!window.rendered.contains("c.txt"));
    }

    #[test]
    fn test_confidence_is_mean_of_included() {
        let results = vec![
            result("a.txt", &[], "one", 0.9),
            result("b.txt", &[], "two", 0.5),
            result("c.txt", &[], &"z".repeat(1000), 0.1),
        ];
        let window = assemble(&results, 200);
        assert_eq!(window.len(), 2);
        assert!((window.confidence() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_empty_results() {
        let window = assemble(&[], 100);
        assert!(window.is_empty());
        assert_eq!(window.confidence(), 0.0);
        assert_eq!(window.rendered, "");
    }

    #[test]
    fn test_deterministic() {
        let results = vec![result("a.txt", &["H"], "text", 0.42)];
        assert_eq!(assemble(&results, 500).rendered, assemble(&results, 500).rendered);
    }
}
