//! JSON views printed by the maintenance commands.

use serde::Serialize;

use recall_memory::{ContextItem, Edge, MatchReason, MemoryId, SearchResponse, SearchResult};

// ==========================================
// Search
// ==========================================

/// A single search hit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultView {
    pub id: String,
    /// hub, decision, gotcha, learning or artifact
    #[serde(rename = "type")]
    pub memory_type: String,
    pub scope: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Relative to the scope root
    pub relative_path: String,
    /// Combined score
    pub score: f32,
    pub lexical: f32,
    pub semantic: f32,
    pub reasons: Vec<String>,
}

impl From<SearchResult> for SearchResultView {
    fn from(result: SearchResult) -> Self {
        let record = &result.record;
        Self {
            id: record.id.to_string(),
            memory_type: record.memory_type.to_string(),
            scope: record.scope.to_string(),
            title: record.title.clone(),
            content: record.content.clone(),
            tags: record.tags.iter().cloned().collect(),
            relative_path: result.relative_path.clone(),
            score: result.score,
            lexical: result.lexical,
            semantic: result.semantic,
            reasons: result.match_reasons.iter().map(describe_reason).collect(),
        }
    }
}

fn describe_reason(reason: &MatchReason) -> String {
    match reason {
        MatchReason::TextMatch { score } => format!("text match ({:.2})", score),
        MatchReason::SemanticSimilarity { score } => format!("semantic similarity ({:.2})", score),
    }
}

/// Response for `recall search`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutput {
    pub results: Vec<SearchResultView>,
    pub scopes: Vec<String>,
    /// Ranked lexically because no query embedding was available
    pub degraded: bool,
    /// Candidates scored before the limit
    pub considered: usize,
}

impl From<SearchResponse> for SearchOutput {
    fn from(response: SearchResponse) -> Self {
        Self {
            scopes: response.scopes.iter().map(|s| s.to_string()).collect(),
            degraded: response.degraded,
            considered: response.considered,
            results: response.results.into_iter().map(Into::into).collect(),
        }
    }
}

// ==========================================
// Graph
// ==========================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeView {
    pub from: String,
    pub to: String,
}

impl From<Edge> for EdgeView {
    fn from(edge: Edge) -> Self {
        Self {
            from: edge.from.to_string(),
            to: edge.to.to_string(),
        }
    }
}

/// Response for `recall cohesion`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohesionOutput {
    pub orphans: Vec<String>,
    pub count: usize,
}

impl From<Vec<MemoryId>> for CohesionOutput {
    fn from(orphans: Vec<MemoryId>) -> Self {
        Self {
            count: orphans.len(),
            orphans: orphans.into_iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// Response for `recall link` and `recall prune`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgesOutput {
    pub edges: Vec<EdgeView>,
    /// Orphans left after the pass
    pub remaining_orphans: Vec<String>,
}

// ==========================================
// Injection
// ==========================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItemView {
    #[serde(flatten)]
    pub result: SearchResultView,
    pub weight: f32,
    pub weighted_score: f32,
}

impl From<ContextItem> for ContextItemView {
    fn from(item: ContextItem) -> Self {
        Self {
            weight: item.weight,
            weighted_score: item.weighted_score,
            result: item.result.into(),
        }
    }
}

/// Response for `recall inject`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOutput {
    pub hook: String,
    pub items: Vec<ContextItemView>,
}
