//! Hybrid search engine
//!
//! Combines a lexical signal (IDF-weighted query-term coverage) with cosine
//! similarity over cached embeddings. Records without a vector still compete
//! on the lexical signal alone.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::SearchDefaults;
use crate::embedding::cosine_similarity;
use crate::error::{MemoryError, Result};
use crate::index::IndexSnapshot;
use crate::node::{MemoryId, MemoryRecord, MemoryType};
use crate::scope::{logical_key, Scope};

/// Weight of a query term found in the title or tags
const STRONG_HIT: f32 = 1.0;
/// Weight of a query term found only in the content
const CONTENT_HIT: f32 = 0.7;

/// Per-call search options; unset fields fall back to [`SearchDefaults`]
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    /// Only these types (empty = all)
    pub types: Vec<MemoryType>,
    /// Records carrying at least one of these tags (empty = all)
    pub tags: Vec<String>,
    /// Ids removed before ranking
    pub avoid: HashSet<MemoryId>,
    pub min_score: Option<f32>,
    pub lexical_weight: Option<f32>,
    pub semantic_weight: Option<f32>,
    /// Drop lower-precedence records whose logical key collides with a
    /// higher-precedence result
    pub shadow: bool,
    pub timeout: Option<Duration>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.types.push(memory_type);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn avoid(mut self, id: MemoryId) -> Self {
        self.avoid.insert(id);
        self
    }

    pub fn avoid_all(mut self, ids: impl IntoIterator<Item = MemoryId>) -> Self {
        self.avoid.extend(ids);
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn weights(mut self, lexical: f32, semantic: f32) -> Self {
        self.lexical_weight = Some(lexical);
        self.semantic_weight = Some(semantic);
        self
    }

    pub fn shadow(mut self, shadow: bool) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Why a memory matched the search
#[derive(Debug, Clone, PartialEq)]
pub enum MatchReason {
    TextMatch { score: f32 },
    SemanticSimilarity { score: f32 },
}

/// Search result with scores
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub record: Arc<MemoryRecord>,
    pub relative_path: String,
    /// Combined score
    pub score: f32,
    pub lexical: f32,
    pub semantic: f32,
    pub match_reasons: Vec<MatchReason>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Scopes searched, in precedence order
    pub scopes: Vec<Scope>,
    /// Query embedding was unavailable; ranking is lexical-only
    pub degraded: bool,
    /// Candidates scored after filtering
    pub considered: usize,
}

/// Inverted index for the lexical signal
#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    /// term -> [(doc, hit weight)]
    postings: HashMap<String, Vec<(usize, f32)>>,
    num_docs: usize,
}

impl LexicalIndex {
    /// Build from records; document numbers are positions in `records`
    pub fn build(records: &[Arc<MemoryRecord>]) -> Self {
        let mut postings: HashMap<String, Vec<(usize, f32)>> = HashMap::new();

        for (doc, record) in records.iter().enumerate() {
            let mut strong: BTreeSet<String> = tokenize(&record.title).into_iter().collect();
            for tag in &record.tags {
                strong.extend(tokenize(tag));
            }
            let content: BTreeSet<String> = tokenize(&record.content)
                .into_iter()
                .filter(|t| !strong.contains(t))
                .collect();

            for term in strong {
                postings.entry(term).or_default().push((doc, STRONG_HIT));
            }
            for term in content {
                postings.entry(term).or_default().push((doc, CONTENT_HIT));
            }
        }

        Self {
            postings,
            num_docs: records.len(),
        }
    }

    /// Calculate IDF
    fn idf(&self, doc_freq: usize) -> f32 {
        let n = self.num_docs as f32;
        let df = doc_freq as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every document containing at least one query term.
    ///
    /// Each score is the IDF mass of the query terms the document covers
    /// divided by the IDF mass of all query terms, so it lies in `[0, 1]`.
    /// Terms unknown to the corpus still count in the denominator.
    pub fn score(&self, query: &str) -> HashMap<usize, f32> {
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        let mut scores: HashMap<usize, f32> = HashMap::new();

        let mut total = 0.0_f32;
        for term in &terms {
            let postings = self.postings.get(term);
            let idf = self.idf(postings.map_or(0, Vec::len));
            total += idf;

            for (doc, weight) in postings.into_iter().flatten() {
                *scores.entry(*doc).or_insert(0.0) += idf * weight;
            }
        }

        if total <= 0.0 {
            return HashMap::new();
        }
        for score in scores.values_mut() {
            *score = (*score / total).min(1.0);
        }
        scores
    }
}

/// Tokenize text into terms
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(String::from)
        .collect()
}

/// Hybrid search over one index snapshot
pub struct HybridSearch<'a> {
    snapshot: &'a IndexSnapshot,
    defaults: &'a SearchDefaults,
}

impl<'a> HybridSearch<'a> {
    pub fn new(snapshot: &'a IndexSnapshot, defaults: &'a SearchDefaults) -> Self {
        Self { snapshot, defaults }
    }

    /// Rank records in `scopes` against `query`.
    ///
    /// `query_vector` is `None` when the embedder is unavailable; ranking
    /// then uses the lexical score alone. `scopes` must already be in
    /// precedence order. The cancellation token is checked between batches
    /// of `batch_size` candidates.
    pub async fn search(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
        scopes: &[Scope],
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        let limit = options.limit.unwrap_or(self.defaults.limit);
        let min_score = options.min_score.unwrap_or(self.defaults.min_score);
        let lexical_weight = options
            .lexical_weight
            .unwrap_or(self.defaults.lexical_weight);
        let semantic_weight = options
            .semantic_weight
            .unwrap_or(self.defaults.semantic_weight);
        let batch_size = self.defaults.batch_size.max(1);
        let degraded = query_vector.is_none();

        let candidates = self.candidates(scopes, options);
        let lexical_scores = self.snapshot.lexical().score(query);

        let mut results = Vec::new();
        for batch in candidates.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Err(MemoryError::Cancelled);
            }

            for &doc in batch {
                let entry = self.snapshot.entry_at(doc);
                let lexical = lexical_scores.get(&doc).copied().unwrap_or(0.0);
                let semantic = match (query_vector, entry.embedding.as_deref()) {
                    (Some(q), Some(v)) => cosine_similarity(q, v).max(0.0),
                    _ => 0.0,
                };
                let score = if degraded {
                    lexical
                } else {
                    lexical * lexical_weight + semantic * semantic_weight
                };
                // a record with no vector yet is held to its lexical score
                let gate = if entry.embedding.is_none() {
                    lexical
                } else {
                    score
                };
                if score <= 0.0 || gate < min_score {
                    continue;
                }

                let mut match_reasons = Vec::new();
                if lexical > 0.0 {
                    match_reasons.push(MatchReason::TextMatch { score: lexical });
                }
                if semantic > 0.0 {
                    match_reasons.push(MatchReason::SemanticSimilarity { score: semantic });
                }

                results.push(SearchResult {
                    record: self.snapshot.record_at(doc).clone(),
                    relative_path: entry.relative_path.clone(),
                    score,
                    lexical,
                    semantic,
                    match_reasons,
                });
            }

            tokio::task::yield_now().await;
        }

        results.sort_by(rank_order);
        let mut results = apply_precedence(results, options.shadow);
        results.truncate(limit);

        Ok(SearchResponse {
            results,
            scopes: scopes.to_vec(),
            degraded,
            considered: candidates.len(),
        })
    }

    /// Visible, filtered, id-deduplicated documents. The first scope in
    /// `scopes` that holds an id wins.
    fn candidates(&self, scopes: &[Scope], options: &SearchOptions) -> Vec<usize> {
        let wanted_tags: HashSet<String> =
            options.tags.iter().map(|t| t.to_lowercase()).collect();
        let mut seen: HashSet<&MemoryId> = HashSet::new();
        let mut candidates = Vec::new();

        for &scope in scopes {
            for doc in self.snapshot.docs_in(scope) {
                let entry = self.snapshot.entry_at(doc);
                if !seen.insert(&entry.id) {
                    continue;
                }
                if options.avoid.contains(&entry.id) {
                    continue;
                }
                if !options.types.is_empty() && !options.types.contains(&entry.memory_type) {
                    continue;
                }
                if !wanted_tags.is_empty()
                    && !entry
                        .tags
                        .iter()
                        .any(|t| wanted_tags.contains(&t.to_lowercase()))
                {
                    continue;
                }
                candidates.push(doc);
            }
        }
        candidates
    }
}

/// Score desc, then scope precedence, then most recently updated, then id
fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.record.scope.rank().cmp(&b.record.scope.rank()))
        .then_with(|| {
            b.record
                .timestamps
                .updated_at
                .cmp(&a.record.timestamps.updated_at)
        })
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Reorder records sharing a logical key so the highest-precedence one
/// takes the best slot the group earned. With `shadow`, the rest of the
/// group is dropped instead.
fn apply_precedence(results: Vec<SearchResult>, shadow: bool) -> Vec<SearchResult> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (pos, result) in results.iter().enumerate() {
        groups
            .entry(logical_key(&result.record.title))
            .or_default()
            .push(pos);
    }
    if groups.values().all(|positions| positions.len() == 1) {
        return results;
    }

    let mut slots: Vec<Option<SearchResult>> = results.into_iter().map(Some).collect();
    for positions in groups.values().filter(|p| p.len() > 1) {
        let mut members: Vec<SearchResult> =
            positions.iter().filter_map(|&p| slots[p].take()).collect();
        // stable: keeps score order within a scope
        members.sort_by_key(|m| m.record.scope.rank());
        let best_rank = members[0].record.scope.rank();

        for (&pos, member) in positions.iter().zip(members) {
            if shadow && member.record.scope.rank() > best_rank {
                continue;
            }
            slots[pos] = Some(member);
        }
    }
    slots.into_iter().flatten().collect()
}
