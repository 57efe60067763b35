//! Retrieval engine: semantic search with optional threshold filtering,
//! keyword-boost reranking, query expansion, and must-include phrases.
//!
//! One engine covers every ranking policy; behaviour is chosen by a
//! [`RetrievalStrategy`] value. The default strategy is plain top-k semantic
//! search.
//!
//! # Pipeline
//!
//! For the user query and for every fired expansion query, a *search pass*:
//!
//! 1. Embed the query and call [`VectorIndex::search_with_score`].
//! 2. Threshold filter (optional): keep `score >= cutoff`. If fewer than
//!    `min_results` survive, relax once to `fallback_cutoff`.
//! 3. Keyword boost (optional): `score += matches / |terms| × weight`, capped
//!    at `1.0`, where `terms` is the lower-cased token set of the user query.
//!
//! Then, over the merged passes:
//!
//! 4. Must-include phrases (optional): for each fired rule, find a chunk
//!    containing the literal phrase and inject it at a fixed score if its text
//!    is not already present. A rule whose score falls below the threshold's
//!    fallback cutoff never injects.
//! 5. Deduplicate by byte-identical chunk text, keeping the highest score.
//! 6. Sort by score (desc), document hash (asc), chunk index (asc); truncate
//!    to `k`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::index::{ScoredChunk, VectorIndex};
use crate::models::RetrievalResult;

/// Ranking policy for a retrieval call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrievalStrategy {
    /// Candidates fetched by the primary pass before filtering and boosting.
    /// Values below `k` are raised to `k`.
    pub fetch_k: Option<usize>,
    pub threshold: Option<ThresholdPolicy>,
    pub keyword_boost: Option<KeywordBoost>,
    pub expansions: Vec<ExpansionRule>,
    pub must_include: Vec<PhraseRule>,
}

/// Two-step similarity cutoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicy {
    pub cutoff: f64,
    /// Used once when fewer than `min_results` pass `cutoff`.
    pub fallback_cutoff: f64,
    pub min_results: usize,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            cutoff: 0.4,
            fallback_cutoff: 0.3,
            min_results: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeywordBoost {
    pub weight: f64,
}

impl Default for KeywordBoost {
    fn default() -> Self {
        Self { weight: 0.2 }
    }
}

/// Extra queries issued when a trigger word appears in the user query.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpansionRule {
    pub triggers: Vec<String>,
    pub queries: Vec<String>,
    #[serde(default = "default_expansion_k")]
    pub k: usize,
}

fn default_expansion_k() -> usize {
    10
}

/// Force a chunk containing a literal phrase into the results when a trigger
/// word appears in the user query.
#[derive(Debug, Clone, Deserialize)]
pub struct PhraseRule {
    pub triggers: Vec<String>,
    /// Query used to locate candidate chunks.
    pub search_query: String,
    /// Literal text the injected chunk must contain.
    pub phrase: String,
    /// Only consider chunks whose file name contains this string.
    #[serde(default)]
    pub file_filter: Option<String>,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_injected_score")]
    pub injected_score: f64,
}

fn default_candidate_k() -> usize {
    50
}
fn default_injected_score() -> f64 {
    0.8
}

/// Issues queries against a [`VectorIndex`] and ranks the results.
#[derive(Clone)]
pub struct RetrievalEngine {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalEngine {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    /// Retrieve up to `k` results for `query`, ordered by descending score.
    ///
    /// Embedding and index failures are returned as-is; nothing is retried.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        strategy: &RetrievalStrategy,
    ) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidQuery("query is empty".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let terms = tokenize(query);
        let fetch_k = strategy.fetch_k.map_or(k, |f| f.max(k));

        let mut merged = self.search_pass(query, fetch_k, &terms, strategy).await?;
        debug!(query, candidates = merged.len(), "primary pass");

        let lowered = query.to_lowercase();
        for rule in strategy.expansions.iter().filter(|r| fires(&r.triggers, &lowered)) {
            for expansion in &rule.queries {
                let pass = self.search_pass(expansion, rule.k, &terms, strategy).await?;
                debug!(expansion = %expansion, candidates = pass.len(), "expansion pass");
                merged.extend(pass);
            }
        }

        let floor = strategy.threshold.as_ref().map(|t| t.fallback_cutoff);
        for rule in strategy.must_include.iter().filter(|r| fires(&r.triggers, &lowered)) {
            if floor.is_some_and(|floor| rule.injected_score < floor) {
                warn!(
                    phrase = %rule.phrase,
                    injected_score = rule.injected_score,
                    "must_include score below threshold, rule skipped"
                );
                continue;
            }
            if merged.iter().any(|r| r.chunk.text.contains(&rule.phrase)) {
                continue;
            }
            if let Some(hit) = self.find_phrase(rule).await? {
                debug!(phrase = %rule.phrase, file = %hit.chunk.file_name, "injected phrase match");
                merged.push(hit);
            }
        }

        let mut results = dedup_by_text(merged);
        sort_by_score(&mut results);
        results.truncate(k);
        Ok(results)
    }

    /// Steps 1–3 for a single query string.
    async fn search_pass(
        &self,
        query: &str,
        k: usize,
        terms: &BTreeSet<String>,
        strategy: &RetrievalStrategy,
    ) -> Result<Vec<RetrievalResult>> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.search_with_score(&embedding, k).await?;

        let hits = match &strategy.threshold {
            Some(policy) => apply_threshold(hits, policy),
            None => hits,
        };

        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = match &strategy.keyword_boost {
                    Some(boost) => keyword_boost(hit.score, terms, &hit.chunk.text, boost.weight),
                    None => hit.score,
                };
                RetrievalResult::new(hit.chunk, score)
            })
            .collect())
    }

    async fn find_phrase(&self, rule: &PhraseRule) -> Result<Option<RetrievalResult>> {
        let embedding = self.embedder.embed(&rule.search_query).await?;
        let candidates = self
            .index
            .search_with_score(&embedding, rule.candidate_k)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|c| match &rule.file_filter {
                Some(filter) => c.chunk.file_name.contains(filter.as_str()),
                None => true,
            })
            .find(|c| c.chunk.text.contains(&rule.phrase))
            .map(|c| RetrievalResult::new(c.chunk, rule.injected_score.clamp(0.0, 1.0))))
    }
}

/// Keep hits at or above the cutoff, relaxing once to the fallback cutoff when
/// too few survive.
pub fn apply_threshold(hits: Vec<ScoredChunk>, policy: &ThresholdPolicy) -> Vec<ScoredChunk> {
    let passing = hits.iter().filter(|h| h.score >= policy.cutoff).count();
    let cutoff = if passing < policy.min_results {
        warn!(
            passing,
            min_results = policy.min_results,
            fallback = policy.fallback_cutoff,
            "relaxing similarity cutoff"
        );
        policy.fallback_cutoff
    } else {
        policy.cutoff
    };
    hits.into_iter().filter(|h| h.score >= cutoff).collect()
}

/// Raise `score` by the fraction of query terms present in `text`.
pub fn keyword_boost(score: f64, terms: &BTreeSet<String>, text: &str, weight: f64) -> f64 {
    if terms.is_empty() {
        return score;
    }
    let tokens = tokenize(text);
    let matches = terms.iter().filter(|t| tokens.contains(*t)).count();
    (score + (matches as f64 / terms.len() as f64) * weight).min(1.0)
}

/// Lower-cased alphanumeric tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fires(triggers: &[String], lowered_query: &str) -> bool {
    triggers
        .iter()
        .any(|t| !t.is_empty() && lowered_query.contains(&t.to_lowercase()))
}

/// Collapse results with identical text, keeping the highest-scoring one at
/// the position of its first occurrence.
pub fn dedup_by_text(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<RetrievalResult> = Vec::with_capacity(results.len());

    for result in results {
        match positions.get(&result.chunk.text) {
            Some(&pos) => {
                if result.similarity_score > unique[pos].similarity_score {
                    unique[pos] = result;
                }
            }
            None => {
                positions.insert(result.chunk.text.clone(), unique.len());
                unique.push(result);
            }
        }
    }
    unique
}

pub fn sort_by_score(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.document_hash.cmp(&b.chunk.document_hash))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
}
