//! Memory engine
//!
//! Public API over the store, index, search and linker. Writes are
//! serialized per scope; reads work on whatever snapshot is current.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::embedding::{VectorCache, VectorEngine};
use crate::error::{MemoryError, Result};
use crate::graph::Edge;
use crate::index::{IndexReport, IndexSnapshot, MemoryIndex};
use crate::node::{MemoryId, MemoryRecord};
use crate::scope::{Scope, ScopeResolver};
use crate::search::{HybridSearch, SearchOptions, SearchResponse, SearchResult};
use crate::storage::RecordStore;
use crate::weighting::HookKind;

/// A search result weighted for injection into a hook
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub result: SearchResult,
    pub weight: f32,
    pub weighted_score: f32,
}

/// Outcome of an embedding pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingReport {
    /// Records that lacked a vector before the pass
    pub pending: usize,
    pub embedded: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub records: usize,
    pub by_scope: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub with_vectors: usize,
    pub edges: usize,
    pub orphans: usize,
    pub dangling_links: usize,
    pub generation: u64,
    pub embedding_available: bool,
    pub embedding_dimension: usize,
}

pub struct MemoryEngine {
    config: EngineConfig,
    index: Arc<MemoryIndex>,
    vectors: Arc<VectorEngine>,
    resolver: ScopeResolver,
    /// One writer lock per scope, indexed by precedence rank
    scope_locks: [Mutex<()>; 4],
    /// Ids claimed by an ingest that has not reached the index yet
    pending_ids: parking_lot::Mutex<HashSet<MemoryId>>,
}

/// Claim on a new id, released when dropped
struct IdReservation<'a> {
    pending: &'a parking_lot::Mutex<HashSet<MemoryId>>,
    id: MemoryId,
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl MemoryEngine {
    /// Create an engine over `config`. Nothing is read until [`load`](Self::load).
    pub fn new(config: EngineConfig, vectors: VectorEngine) -> Self {
        let store = RecordStore::new(config.scopes.clone());
        let cache = Arc::new(VectorCache::open(config.vectors_path()));
        let index = MemoryIndex::new(store, config.index_path(), cache);

        Self {
            config,
            index: Arc::new(index),
            vectors: Arc::new(vectors),
            resolver: ScopeResolver,
            scope_locks: std::array::from_fn(|_| Mutex::new(())),
            pending_ids: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.index.snapshot()
    }

    fn scope_lock(&self, scope: Scope) -> &Mutex<()> {
        &self.scope_locks[scope.rank()]
    }

    /// Claim `id` across every scope. Fails when the id is indexed or
    /// another ingest holds it.
    fn reserve_id(&self, id: &MemoryId) -> Result<IdReservation<'_>> {
        let mut pending = self.pending_ids.lock();
        if pending.contains(id) || self.index.snapshot().contains_id(id.as_str()) {
            return Err(MemoryError::validation(format!(
                "a record with id {} already exists",
                id
            )));
        }
        pending.insert(id.clone());
        Ok(IdReservation {
            pending: &self.pending_ids,
            id: id.clone(),
        })
    }

    /// Load the persisted index, rebuilding when it is missing
    pub async fn load(&self) -> Result<IndexReport> {
        let index = self.index.clone();
        run_blocking(self.config.timeouts.rebuild(), move |cancel| index.load(&cancel)).await
    }

    /// Re-scan every scope root
    pub async fn rebuild_index(&self) -> Result<IndexReport> {
        let index = self.index.clone();
        run_blocking(self.config.timeouts.rebuild(), move |cancel| {
            index.rebuild(&cancel)
        })
        .await
    }

    /// Store a new record.
    ///
    /// Rejects invalid records, duplicate ids and links to unknown ids.
    /// Embedding failures are logged and leave the record without a vector,
    /// and a failed index write is logged: the record file is already
    /// stored and the next rebuild picks it up.
    pub async fn ingest(&self, record: MemoryRecord) -> Result<MemoryId> {
        record.validate()?;
        self.index.store().root(record.scope)?;

        let _reservation = self.reserve_id(&record.id)?;
        let _guard = self.scope_lock(record.scope).lock().await;
        let snapshot = self.index.snapshot();
        check_links(&snapshot, &record)?;

        let relative_path = self.index.store().write(&record)?;
        self.embed_record(&record).await;

        let id = record.id.clone();
        log::info!("Ingested {} {} into {}", record.memory_type, id, record.scope);
        self.index.upsert(record, relative_path);
        if let Err(e) = self.index.persist() {
            log::warn!("Failed to persist index after ingesting {}: {}", id, e);
        }
        Ok(id)
    }

    /// Replace an existing record.
    ///
    /// Scope cannot change. `created_at` is kept; `updated_at` moves only
    /// when title, content, tags, type or severity change.
    pub async fn update(&self, mut record: MemoryRecord) -> Result<()> {
        record.validate()?;

        let _guard = self.scope_lock(record.scope).lock().await;
        let snapshot = self.index.snapshot();
        let existing = match snapshot.get_in(record.scope, record.id.as_str()) {
            Some((_, existing)) => existing.clone(),
            None => {
                return Err(match snapshot.get(record.id.as_str()) {
                    Some((entry, _)) => MemoryError::validation(format!(
                        "scope is immutable: {} belongs to {}, not {}",
                        record.id, entry.scope, record.scope
                    )),
                    None => MemoryError::not_found(record.id.as_str()),
                });
            }
        };
        check_links(&snapshot, &record)?;

        record.timestamps.created_at = existing.timestamps.created_at;
        record.timestamps.updated_at = existing.timestamps.updated_at;
        let edited = record.content_differs(&existing)
            || record.tags != existing.tags
            || record.memory_type != existing.memory_type
            || record.severity != existing.severity;
        if edited {
            record.timestamps.touch();
        }

        let store = self.index.store();
        let relative_path = store.write(&record)?;
        if record.memory_type != existing.memory_type {
            let old = store.absolute_path(existing.scope, &RecordStore::relative_path_for(&existing))?;
            std::fs::remove_file(&old)?;
        }
        if edited {
            self.embed_record(&record).await;
        }

        log::info!("Updated {}", record.id);
        self.index.upsert(record, relative_path);
        self.index.persist()?;
        Ok(())
    }

    /// Highest-precedence record with this id
    pub fn get(&self, id: &str) -> Result<Arc<MemoryRecord>> {
        self.index
            .snapshot()
            .get(id)
            .map(|(_, record)| record.clone())
            .ok_or_else(|| MemoryError::not_found(id))
    }

    /// Search the scopes named by `scope` (`"user"`, `"user,project"`, `"all"`...)
    pub async fn search(
        &self,
        query: &str,
        scope: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let scopes = self.resolver.resolve(scope)?;
        self.search_scopes(query, &scopes, options).await
    }

    /// Search an already-resolved scope list, under the configured timeout
    pub async fn search_scopes(
        &self,
        query: &str,
        scopes: &[Scope],
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let scopes = self.resolver.resolve_scopes(scopes);
        let timeout = options.timeout.unwrap_or(self.config.timeouts.search());
        let cancel = CancellationToken::new();

        with_timeout(timeout, &cancel, async {
            let query_vector = self.embed_query(query).await?;
            let snapshot = self.index.snapshot();
            HybridSearch::new(&snapshot, &self.config.search)
                .search(query, query_vector.as_deref(), &scopes, options, &cancel)
                .await
        })
        .await
    }

    /// Link `id` to its closest neighbours.
    ///
    /// Returns the edges added; existing links and the record itself are
    /// never candidates. `updated_at` is left untouched.
    pub async fn auto_link(&self, id: &str) -> Result<Vec<Edge>> {
        let scope = match self.index.snapshot().get(id) {
            Some((entry, _)) => entry.scope,
            None => return Err(MemoryError::not_found(id)),
        };

        let _guard = self.scope_lock(scope).lock().await;
        let snapshot = self.index.snapshot();
        let (entry, record) = snapshot
            .get_in(scope, id)
            .map(|(e, r)| (e.clone(), r.clone()))
            .ok_or_else(|| MemoryError::not_found(id))?;

        let linker = &self.config.linker;
        let scopes = if linker.cross_scope {
            Scope::ALL.to_vec()
        } else {
            vec![record.scope]
        };
        let query = record.embedding_text();
        let options = SearchOptions::new()
            .limit(linker.top_k)
            .min_score(linker.threshold)
            .avoid(record.id.clone())
            .avoid_all(record.links.iter().cloned());

        let timeout = self.config.timeouts.search();
        let cancel = CancellationToken::new();
        let response = with_timeout(timeout, &cancel, async {
            let query_vector = match &entry.embedding {
                Some(vector) => Some(vector.to_vec()),
                None => self.embed_query(&query).await?,
            };
            HybridSearch::new(&snapshot, &self.config.search)
                .search(&query, query_vector.as_deref(), &scopes, &options, &cancel)
                .await
        })
        .await?;

        let mut updated = (*record).clone();
        let mut added = Vec::new();
        for result in response.results {
            let target = &result.record.id;
            if *target == updated.id || updated.links.contains(target) {
                continue;
            }
            updated.links.push(target.clone());
            added.push(Edge::new(updated.id.clone(), target.clone()));
        }
        if added.is_empty() {
            log::debug!("No link candidates for {}", id);
            return Ok(added);
        }

        let relative_path = self.index.store().write(&updated)?;
        self.index.upsert(updated, relative_path);
        self.index.persist()?;
        log::info!("Linked {} to {} record(s)", id, added.len());
        Ok(added)
    }

    /// Ids with no incoming and no outgoing links, sorted
    pub fn check_cohesion(&self) -> Vec<MemoryId> {
        self.index.snapshot().graph().orphans()
    }

    /// Remove links to ids that are no longer indexed
    pub async fn prune_dangling(&self) -> Result<Vec<Edge>> {
        let snapshot = self.index.snapshot();
        let mut removed = Vec::new();

        for record in snapshot.records() {
            if record.links.iter().all(|l| snapshot.contains_id(l.as_str())) {
                continue;
            }

            let _guard = self.scope_lock(record.scope).lock().await;
            let current = self.index.snapshot();
            let Some((_, fresh)) = current.get_in(record.scope, record.id.as_str()) else {
                continue;
            };

            let mut updated = (**fresh).clone();
            let (keep, dangling): (Vec<MemoryId>, Vec<MemoryId>) = updated
                .links
                .iter()
                .cloned()
                .partition(|l| current.contains_id(l.as_str()));
            if dangling.is_empty() {
                continue;
            }
            updated.links = keep;

            let relative_path = self.index.store().write(&updated)?;
            removed.extend(
                dangling
                    .into_iter()
                    .map(|to| Edge::new(updated.id.clone(), to)),
            );
            self.index.upsert(updated, relative_path);
        }

        if !removed.is_empty() {
            self.index.persist()?;
            log::info!("Pruned {} dangling link(s)", removed.len());
        }
        Ok(removed)
    }

    /// Compute vectors for records that have none
    pub async fn index_embeddings(&self) -> Result<EmbeddingReport> {
        if !self.vectors.is_available() {
            return Err(MemoryError::embedding("no embedding model configured"));
        }

        let snapshot = self.index.snapshot();
        let mut seen = HashSet::new();
        let pending: Vec<(String, chrono::DateTime<chrono::Utc>, String)> = snapshot
            .entries()
            .iter()
            .zip(snapshot.records())
            .filter(|(entry, _)| entry.embedding.is_none())
            .filter(|(entry, _)| seen.insert(entry.id.as_str()))
            .map(|(entry, record)| {
                (
                    entry.id.to_string(),
                    entry.updated_at,
                    record.embedding_text(),
                )
            })
            .collect();

        let mut report = EmbeddingReport {
            pending: pending.len(),
            embedded: 0,
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let vectors = self.vectors.clone();
        let cache = self.index.vectors().clone();
        let batch_size = self.config.search.batch_size.max(1);
        report.embedded = run_blocking(self.config.timeouts.embed(), move |cancel| {
            let mut embedded = 0;
            for batch in pending.chunks(batch_size) {
                if cancel.is_cancelled() {
                    return Err(MemoryError::Cancelled);
                }
                let texts: Vec<&str> = batch.iter().map(|(_, _, text)| text.as_str()).collect();
                let computed = vectors.embed_batch(&texts)?;
                for ((id, updated_at, _), vector) in batch.iter().zip(computed) {
                    cache.insert(id, *updated_at, vector);
                    embedded += 1;
                }
            }
            Ok(embedded)
        })
        .await?;

        self.index.refresh();
        self.index.vectors().save()?;
        log::info!("Embedded {} record(s)", report.embedded);
        Ok(report)
    }

    /// Search for `hook` and re-rank by `score * weight(type, hook)`
    pub async fn context_for(
        &self,
        hook: HookKind,
        query: &str,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<ContextItem>> {
        // over-fetch so re-ranking can promote weighted types
        let options = SearchOptions::new().limit(limit.saturating_mul(3));
        let response = self.search(query, scope, &options).await?;

        let table = &self.config.injection;
        let mut items: Vec<ContextItem> = response
            .results
            .into_iter()
            .map(|result| {
                let weight = table.weight(result.record.memory_type, hook);
                ContextItem {
                    weighted_score: result.score * weight,
                    weight,
                    result,
                }
            })
            .filter(|item| item.weighted_score > 0.0)
            .collect();

        items.sort_by(|a, b| {
            b.weighted_score
                .partial_cmp(&a.weighted_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items.truncate(limit);
        Ok(items)
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.index.snapshot();
        let graph = snapshot.graph();
        let mut stats = EngineStats {
            records: snapshot.len(),
            edges: graph.edge_count(),
            orphans: graph.orphans().len(),
            dangling_links: graph.dangling().len(),
            generation: snapshot.generation(),
            embedding_available: self.vectors.is_available(),
            embedding_dimension: self.vectors.dimension(),
            ..Default::default()
        };
        for entry in snapshot.entries() {
            *stats.by_scope.entry(entry.scope.to_string()).or_insert(0) += 1;
            *stats
                .by_type
                .entry(entry.memory_type.to_string())
                .or_insert(0) += 1;
            if entry.embedding.is_some() {
                stats.with_vectors += 1;
            }
        }
        stats
    }

    /// Persist everything and drop the in-memory index
    pub async fn teardown(&self) -> Result<()> {
        let index = self.index.clone();
        tokio::task::spawn_blocking(move || index.teardown()).await?
    }

    /// Query vector, or `None` when the embedder is missing or failing
    async fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>> {
        if !self.vectors.is_available() {
            return Ok(None);
        }
        let vectors = self.vectors.clone();
        let query = query.to_string();
        match tokio::task::spawn_blocking(move || vectors.embed(&query)).await? {
            Ok(vector) => Ok(Some(vector)),
            Err(e) => {
                log::warn!("Query embedding unavailable, ranking lexically: {}", e);
                Ok(None)
            }
        }
    }

    /// Cache a vector for `record`; failures only cost the semantic signal
    async fn embed_record(&self, record: &MemoryRecord) {
        if !self.vectors.is_available() {
            return;
        }
        let vectors = self.vectors.clone();
        let text = record.embedding_text();
        let result = run_blocking(self.config.timeouts.embed(), move |_| {
            vectors
                .embed_batch(&[text.as_str()])?
                .pop()
                .ok_or_else(|| MemoryError::embedding("embedder returned no vector"))
        })
        .await;

        match result {
            Ok(vector) => {
                self.index
                    .vectors()
                    .insert(record.id.as_str(), record.timestamps.updated_at, vector);
            }
            Err(e) => log::warn!("Could not embed {}: {}", record.id, e),
        }
    }
}

fn check_links(snapshot: &IndexSnapshot, record: &MemoryRecord) -> Result<()> {
    match record
        .links
        .iter()
        .find(|target| !snapshot.contains_id(target.as_str()))
    {
        Some(target) => Err(MemoryError::validation(format!(
            "record {} links to unknown id {}",
            record.id, target
        ))),
        None => Ok(()),
    }
}

/// Run `task` on the blocking pool. On expiry the token is cancelled and
/// `Timeout` returned; the task stops at its next cancellation check.
async fn run_blocking<T, F>(limit: Duration, task: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || task(token));

    match tokio::time::timeout(limit, handle).await {
        Ok(joined) => joined?,
        Err(_) => {
            cancel.cancel();
            Err(MemoryError::Timeout(limit))
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            cancel.cancel();
            Err(MemoryError::Timeout(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::node::{MemoryType, Severity};
    use std::path::Path;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    struct SlowEmbedder;

    impl Embedder for SlowEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(texts.iter().map(|_| vec![1.0; 8]).collect())
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(MemoryError::embedding("model crashed"))
        }
    }

    fn config(dir: &Path) -> EngineConfig {
        EngineConfig::new(dir.join("data"))
            .with_scope_root(Scope::User, dir.join("user"))
            .with_scope_root(Scope::Project, dir.join("project"))
    }

    fn hashing() -> VectorEngine {
        VectorEngine::new(Arc::new(HashingEmbedder::default()))
    }

    async fn engine_with(dir: &Path, vectors: VectorEngine) -> MemoryEngine {
        let engine = MemoryEngine::new(config(dir), vectors);
        engine.load().await.unwrap();
        engine
    }

    fn learning(scope: Scope, title: &str, content: &str) -> MemoryRecord {
        MemoryRecord::builder()
            .learning()
            .scope(scope)
            .title(title)
            .content(content)
            .build()
            .unwrap()
    }

    fn ids(response: &SearchResponse) -> Vec<String> {
        response
            .results
            .iter()
            .map(|r| r.record.id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let record = learning(
            Scope::Project,
            "SQLite busy timeout",
            "Retry writes when SQLite reports busy",
        );
        let id = assert_ok!(engine.ingest(record).await);

        let response = engine
            .search("sqlite busy", "project", &SearchOptions::new())
            .await
            .unwrap();
        assert!(!response.degraded);
        assert_eq!(ids(&response), vec![id.to_string()]);
        assert!(tmp
            .path()
            .join(format!("project/learning/{}.json", id))
            .exists());
    }

    #[tokio::test]
    async fn test_user_record_outranks_project_duplicate() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let project = learning(
            Scope::Project,
            "Commit message style",
            "Project uses conventional commit prefixes for every message style",
        );
        let user = learning(Scope::User, "Commit Message Style", "Keep subjects short");
        let project_id = engine.ingest(project).await.unwrap();
        let user_id = engine.ingest(user).await.unwrap();

        let response = engine
            .search("commit message style conventional", "all", &SearchOptions::new())
            .await
            .unwrap();
        let found = ids(&response);
        assert_eq!(found[0], user_id.to_string());
        assert!(found.contains(&project_id.to_string()));

        let shadowed = engine
            .search(
                "commit message style conventional",
                "all",
                &SearchOptions::new().shadow(true),
            )
            .await
            .unwrap();
        assert_eq!(ids(&shadowed), vec![user_id.to_string()]);
    }

    #[tokio::test]
    async fn test_avoid_list_is_a_hard_filter() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let best = engine
            .ingest(learning(Scope::Project, "cargo build cache", "cargo build cache sccache"))
            .await
            .unwrap();
        engine
            .ingest(learning(Scope::Project, "cargo build flags", "incremental builds"))
            .await
            .unwrap();

        let response = engine
            .search(
                "cargo build cache",
                "project",
                &SearchOptions::new().avoid(best.clone()),
            )
            .await
            .unwrap();
        assert!(!ids(&response).contains(&best.to_string()));
        assert!(!response.results.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_search_without_embedder() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), VectorEngine::disabled()).await;
        let id = engine
            .ingest(learning(Scope::User, "Docker layer caching", "Copy Cargo.lock first"))
            .await
            .unwrap();

        let response = engine
            .search("docker layer caching", "user", &SearchOptions::new())
            .await
            .unwrap();
        assert!(response.degraded);
        assert_eq!(ids(&response), vec![id.to_string()]);
        assert!(response.results[0].lexical > 0.0);
    }

    #[tokio::test]
    async fn test_failing_embedder_degrades() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), VectorEngine::new(Arc::new(BrokenEmbedder))).await;
        engine
            .ingest(learning(Scope::User, "Docker layer caching", "Copy Cargo.lock first"))
            .await
            .unwrap();

        let response = engine
            .search("docker caching", "user", &SearchOptions::new())
            .await
            .unwrap();
        assert!(response.degraded);
        assert_eq!(response.results.len(), 1);
        assert_eq!(engine.stats().with_vectors, 0);
    }

    #[tokio::test]
    async fn test_orphans_reported_then_linked() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let a = engine
            .ingest(learning(
                Scope::Project,
                "SQLite busy timeout",
                "Retry writes when SQLite reports busy",
            ))
            .await
            .unwrap();
        let b = engine
            .ingest(learning(
                Scope::Project,
                "SQLite busy timeout handling",
                "Retry writes with backoff when SQLite reports busy",
            ))
            .await
            .unwrap();
        let c = engine
            .ingest(learning(Scope::Project, "CSS grid gaps", "Safari needs the gap fallback"))
            .await
            .unwrap();

        let mut expected = vec![a.clone(), b.clone(), c.clone()];
        expected.sort();
        assert_eq!(engine.check_cohesion(), expected);

        let before = engine.get(a.as_str()).unwrap();
        let edges = engine.auto_link(a.as_str()).await.unwrap();
        assert_eq!(edges, vec![Edge::new(a.clone(), b.clone())]);

        let after = engine.get(a.as_str()).unwrap();
        assert_eq!(after.links, vec![b.clone()]);
        assert_eq!(after.timestamps, before.timestamps);
        assert_eq!(engine.check_cohesion(), vec![c]);

        // nothing new to add the second time
        assert!(engine.auto_link(a.as_str()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_links_stay_within_scope_by_default() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let a = engine
            .ingest(learning(Scope::Project, "tokio runtime shutdown", "drop the runtime last"))
            .await
            .unwrap();
        engine
            .ingest(learning(Scope::User, "tokio runtime shutdown order", "drop the runtime last"))
            .await
            .unwrap();

        assert!(engine.auto_link(a.as_str()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_rejects_dangling_and_duplicate() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;

        let mut dangling = learning(Scope::Project, "title", "content");
        dangling.links.push(MemoryId::parse("ghost").unwrap());
        let err = assert_err!(engine.ingest(dangling).await);
        assert!(matches!(err, MemoryError::Validation(_)));

        let record = learning(Scope::Project, "title", "content");
        let mut copy = learning(Scope::User, "other", "content");
        copy.id = record.id.clone();
        engine.ingest(record).await.unwrap();
        assert!(matches!(
            engine.ingest(copy).await,
            Err(MemoryError::Validation(_))
        ));
        assert_eq!(engine.stats().records, 1);
    }

    #[tokio::test]
    async fn test_ingest_into_unconfigured_scope() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let record = learning(Scope::Enterprise, "policy", "no GPL");
        assert!(matches!(
            engine.ingest(record).await,
            Err(MemoryError::ScopeNotConfigured(Scope::Enterprise))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_scope_and_touches_on_edit() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let record = learning(Scope::Project, "flaky test", "use a fixed clock");
        let id = engine.ingest(record.clone()).await.unwrap();

        let mut moved = record.clone();
        moved.scope = Scope::User;
        let err = engine.update(moved).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(ref msg) if msg.contains("immutable")));

        let mut edited = record.clone();
        edited.content = "use a fixed clock and a seeded rng".into();
        engine.update(edited).await.unwrap();
        let stored = engine.get(id.as_str()).unwrap();
        assert_eq!(stored.timestamps.created_at, record.timestamps.created_at);
        assert!(stored.timestamps.updated_at >= record.timestamps.updated_at);
        assert_eq!(stored.content, "use a fixed clock and a seeded rng");

        let mut unknown = learning(Scope::Project, "x", "y");
        unknown.id = MemoryId::parse("missing").unwrap();
        assert!(matches!(
            engine.update(unknown).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_type_moves_file() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let record = learning(Scope::Project, "pin toolchain", "rust-toolchain.toml");
        let id = engine.ingest(record.clone()).await.unwrap();

        let mut decision = record;
        decision.memory_type = MemoryType::Decision;
        engine.update(decision).await.unwrap();

        let root = tmp.path().join("project");
        assert!(!root.join(format!("learning/{}.json", id)).exists());
        assert!(root.join(format!("decision/{}.json", id)).exists());
        assert_eq!(engine.stats().records, 1);
    }

    #[tokio::test]
    async fn test_search_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        cfg.timeouts = TimeoutConfig {
            search_ms: 20,
            ..Default::default()
        };
        let engine = MemoryEngine::new(cfg, VectorEngine::new(Arc::new(SlowEmbedder)));
        engine.load().await.unwrap();

        let err = engine
            .search("anything", "all", &SearchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_scope_rejected() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        assert!(matches!(
            engine.search("x", "team", &SearchOptions::new()).await,
            Err(MemoryError::InvalidScope(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_dangling_after_external_delete() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        let target = engine
            .ingest(learning(Scope::Project, "target", "will be deleted"))
            .await
            .unwrap();
        let mut source = learning(Scope::Project, "source", "points at target");
        source.links.push(target.clone());
        let source = engine.ingest(source).await.unwrap();

        std::fs::remove_file(tmp.path().join(format!("project/learning/{}.json", target))).unwrap();
        engine.rebuild_index().await.unwrap();
        assert_eq!(engine.stats().dangling_links, 1);

        let removed = engine.prune_dangling().await.unwrap();
        assert_eq!(removed, vec![Edge::new(source.clone(), target)]);
        assert!(engine.get(source.as_str()).unwrap().links.is_empty());
        assert_eq!(engine.stats().dangling_links, 0);
    }

    #[tokio::test]
    async fn test_index_embeddings_fills_missing_vectors() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = engine_with(tmp.path(), VectorEngine::disabled()).await;
            engine
                .ingest(learning(Scope::User, "first", "alpha beta"))
                .await
                .unwrap();
            engine
                .ingest(learning(Scope::Project, "second", "gamma delta"))
                .await
                .unwrap();
            assert!(engine.index_embeddings().await.is_err());
            engine.teardown().await.unwrap();
        }

        let engine = engine_with(tmp.path(), hashing()).await;
        assert_eq!(engine.stats().with_vectors, 0);
        let report = engine.index_embeddings().await.unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.embedded, 2);
        assert_eq!(engine.stats().with_vectors, 2);
        assert!(tmp.path().join("data/vectors.bin").exists());
    }

    #[tokio::test]
    async fn test_index_embeddings_timeout() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = engine_with(tmp.path(), VectorEngine::disabled()).await;
            engine
                .ingest(learning(Scope::User, "first", "alpha beta"))
                .await
                .unwrap();
            engine.teardown().await.unwrap();
        }

        let mut cfg = config(tmp.path());
        cfg.timeouts.embed_ms = 20;
        let engine = MemoryEngine::new(cfg, VectorEngine::new(Arc::new(SlowEmbedder)));
        engine.load().await.unwrap();
        assert!(matches!(
            engine.index_embeddings().await,
            Err(MemoryError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_context_for_weights_by_hook() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), VectorEngine::disabled()).await;
        let gotcha = MemoryRecord::builder()
            .gotcha(Severity::High)
            .scope(Scope::Project)
            .title("migrations lock tables")
            .content("run schema migrations off peak")
            .build()
            .unwrap();
        let note = learning(
            Scope::Project,
            "schema migrations lock tables",
            "run schema migrations off peak",
        );
        let gotcha_id = engine.ingest(gotcha).await.unwrap();
        engine.ingest(note).await.unwrap();

        let items = engine
            .context_for(HookKind::PreEdit, "schema migrations lock tables", "project", 5)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].result.record.id, gotcha_id);
        for item in &items {
            assert!((item.weighted_score - item.result.score * item.weight).abs() < 1e-6);
        }

        let limited = engine
            .context_for(HookKind::PreEdit, "schema migrations", "project", 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;
        engine
            .ingest(learning(Scope::User, "one", "first record"))
            .await
            .unwrap();
        engine
            .ingest(learning(Scope::Project, "two", "second record"))
            .await
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.by_scope.get("user"), Some(&1));
        assert_eq!(stats.by_type.get("learning"), Some(&2));
        assert_eq!(stats.with_vectors, 2);
        assert_eq!(stats.orphans, 2);
        assert!(stats.embedding_available);
        assert!(stats.embedding_dimension > 0);
    }

    #[tokio::test]
    async fn test_concurrent_ingest_of_one_id_across_scopes() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), hashing()).await;

        let id = MemoryId::parse("dup").unwrap();
        let mut user = learning(Scope::User, "user copy", "written from the user scope");
        user.id = id.clone();
        let mut project = learning(Scope::Project, "project copy", "written from the project scope");
        project.id = id.clone();

        let (first, second) = tokio::join!(engine.ingest(user), engine.ingest(project));
        assert_eq!(first.is_ok() as usize + second.is_ok() as usize, 1);
        let err = first.err().or(second.err()).unwrap();
        assert!(matches!(err, MemoryError::Validation(_)));
        assert_eq!(engine.stats().records, 1);

        // the claim is released once the winner is indexed
        let mut again = learning(Scope::Project, "third", "same id again");
        again.id = id;
        assert_err!(engine.ingest(again).await);
        assert_eq!(engine.stats().records, 1);
    }

    #[tokio::test]
    async fn test_rebuild_timeout_keeps_current_snapshot() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        let store = RecordStore::new(cfg.scopes.clone());
        for i in 0..500 {
            let record = learning(Scope::Project, &format!("note {}", i), "content for the rebuild");
            store.write(&record).unwrap();
        }

        cfg.timeouts = TimeoutConfig {
            rebuild_ms: 0,
            ..Default::default()
        };
        let engine = MemoryEngine::new(cfg, VectorEngine::disabled());
        let before = engine.snapshot();

        let err = assert_err!(engine.rebuild_index().await);
        assert!(matches!(err, MemoryError::Timeout(_)));

        // let the cancelled scan notice its token
        tokio::time::sleep(Duration::from_millis(200)).await;
        let after = engine.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_survives_index_write_failure() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(tmp.path(), VectorEngine::disabled()).await;

        // a non-empty directory where the index file belongs
        let artifact = tmp.path().join("data/index.json");
        std::fs::remove_file(&artifact).ok();
        std::fs::create_dir_all(artifact.join("blocker")).unwrap();

        let id = assert_ok!(
            engine
                .ingest(learning(Scope::Project, "kept", "stored despite the index"))
                .await
        );
        assert!(tmp
            .path()
            .join(format!("project/learning/{}.json", id))
            .exists());
        assert_eq!(assert_ok!(engine.get(id.as_str())).title, "kept");
    }
}
