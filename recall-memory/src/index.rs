//! In-memory index over the record store
//!
//! The index is a rebuildable cache. Every change produces a new immutable
//! [`IndexSnapshot`] which is swapped in under a short lock, so readers see
//! either the old or the new snapshot and never wait on a rebuild.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::embedding::VectorCache;
use crate::error::{MemoryError, Result};
use crate::graph::LinkGraph;
use crate::migration::{
    normalize_entry, read_artifact, write_artifact, ArtifactRead, RawIndexEntry, CURRENT_VERSION,
};
use crate::node::{MemoryId, MemoryRecord, MemoryType};
use crate::scope::Scope;
use crate::search::LexicalIndex;
use crate::storage::RecordStore;

/// One indexed record
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: MemoryId,
    /// Relative to the scope root
    pub relative_path: String,
    pub scope: Scope,
    pub memory_type: MemoryType,
    pub tags: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
    pub embedding: Option<Arc<[f32]>>,
}

impl IndexEntry {
    pub fn new(record: &MemoryRecord, relative_path: String, embedding: Option<Arc<[f32]>>) -> Self {
        Self {
            id: record.id.clone(),
            relative_path,
            scope: record.scope,
            memory_type: record.memory_type,
            tags: record.tags.clone(),
            updated_at: record.timestamps.updated_at,
            embedding,
        }
    }

    /// Entry at the record's canonical location
    pub fn for_record(record: &MemoryRecord, embedding: Option<Arc<[f32]>>) -> Self {
        Self::new(record, RecordStore::relative_path_for(record), embedding)
    }

    fn to_raw(&self) -> RawIndexEntry {
        RawIndexEntry {
            id: Some(self.id.to_string()),
            relative_path: Some(self.relative_path.clone()),
            file: None,
            scope: Some(self.scope.as_str().to_string()),
            memory_type: Some(self.memory_type.as_str().to_string()),
            tags: self.tags.iter().cloned().collect(),
            updated_at: Some(self.updated_at),
        }
    }
}

/// Immutable view of the index.
///
/// Entries are ordered by scope precedence, then id; positions double as
/// lexical document numbers.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    generation: u64,
    entries: Vec<IndexEntry>,
    records: Vec<Arc<MemoryRecord>>,
    /// id -> positions, highest precedence first
    by_id: HashMap<String, Vec<usize>>,
    lexical: LexicalIndex,
    graph: LinkGraph,
}

impl IndexSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from entry/record pairs. A repeated (scope, id) keeps the first.
    pub fn build(mut items: Vec<(IndexEntry, Arc<MemoryRecord>)>, generation: u64) -> Self {
        items.sort_by(|(a, _), (b, _)| {
            a.scope
                .rank()
                .cmp(&b.scope.rank())
                .then_with(|| a.id.cmp(&b.id))
        });
        items.dedup_by(|(a, _), (b, _)| a.scope == b.scope && a.id == b.id);

        let (entries, records): (Vec<_>, Vec<_>) = items.into_iter().unzip();

        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, entry) in entries.iter().enumerate() {
            by_id.entry(entry.id.to_string()).or_default().push(pos);
        }

        let lexical = LexicalIndex::build(&records);
        let graph = LinkGraph::build(records.iter().map(|r| r.as_ref()));

        Self {
            generation,
            entries,
            records,
            by_id,
            lexical,
            graph,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn records(&self) -> &[Arc<MemoryRecord>] {
        &self.records
    }

    pub fn entry_at(&self, pos: usize) -> &IndexEntry {
        &self.entries[pos]
    }

    pub fn record_at(&self, pos: usize) -> &Arc<MemoryRecord> {
        &self.records[pos]
    }

    /// Positions of the entries in one scope
    pub fn docs_in(&self, scope: Scope) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.scope == scope)
            .map(|(pos, _)| pos)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Highest-precedence copy of `id`
    pub fn get(&self, id: &str) -> Option<(&IndexEntry, &Arc<MemoryRecord>)> {
        let pos = *self.by_id.get(id)?.first()?;
        Some((&self.entries[pos], &self.records[pos]))
    }

    pub fn position(&self, scope: Scope, id: &str) -> Option<usize> {
        self.by_id
            .get(id)?
            .iter()
            .copied()
            .find(|&pos| self.entries[pos].scope == scope)
    }

    pub fn get_in(&self, scope: Scope, id: &str) -> Option<(&IndexEntry, &Arc<MemoryRecord>)> {
        let pos = self.position(scope, id)?;
        Some((&self.entries[pos], &self.records[pos]))
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    fn items(&self) -> impl Iterator<Item = (IndexEntry, Arc<MemoryRecord>)> + '_ {
        self.entries.iter().cloned().zip(self.records.iter().cloned())
    }
}

/// Outcome of `load` or `rebuild`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub entries: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// Version of the artifact that was migrated, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<u32>,
    /// The store was re-scanned instead of loading the artifact
    pub rebuilt: bool,
}

impl IndexReport {
    fn skip(&mut self, error: MemoryError) {
        log::warn!("Skipping index entry: {}", error);
        self.skipped += 1;
        self.errors.push(error.to_string());
    }
}

/// The live index
pub struct MemoryIndex {
    store: RecordStore,
    artifact_path: PathBuf,
    vectors: Arc<VectorCache>,
    current: RwLock<Arc<IndexSnapshot>>,
    /// Serializes snapshot producers (rebuild, upsert, refresh)
    update_lock: Mutex<()>,
    persist_lock: Mutex<()>,
    generation: AtomicU64,
}

impl MemoryIndex {
    pub fn new(store: RecordStore, artifact_path: impl Into<PathBuf>, vectors: Arc<VectorCache>) -> Self {
        Self {
            store,
            artifact_path: artifact_path.into(),
            vectors,
            current: RwLock::new(Arc::new(IndexSnapshot::empty())),
            update_lock: Mutex::new(()),
            persist_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn vectors(&self) -> &Arc<VectorCache> {
        &self.vectors
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    fn swap(&self, items: Vec<(IndexEntry, Arc<MemoryRecord>)>) -> Arc<IndexSnapshot> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(IndexSnapshot::build(items, generation));
        *self.current.write() = snapshot.clone();
        snapshot
    }

    fn item(&self, record: MemoryRecord, relative_path: String) -> (IndexEntry, Arc<MemoryRecord>) {
        let embedding = self
            .vectors
            .get(record.id.as_str(), record.timestamps.updated_at);
        (IndexEntry::new(&record, relative_path, embedding), Arc::new(record))
    }

    /// Load the persisted index, migrating older formats.
    ///
    /// A missing or unreadable artifact falls back to a full rebuild. Bad
    /// entries are skipped and reported.
    pub fn load(&self, cancel: &CancellationToken) -> Result<IndexReport> {
        let _guard = self.update_lock.lock();

        let (version, values) = match read_artifact(&self.artifact_path)? {
            ArtifactRead::Entries { version, entries } => (version, entries),
            ArtifactRead::Missing => return self.rebuild_locked(cancel),
            ArtifactRead::Unreadable(reason) => {
                log::warn!(
                    "Index at {} is unreadable ({}), rebuilding",
                    self.artifact_path.display(),
                    reason
                );
                return self.rebuild_locked(cancel);
            }
        };

        let mut report = IndexReport {
            migrated_from: (version < CURRENT_VERSION).then_some(version),
            ..Default::default()
        };
        let mut needs_write = version < CURRENT_VERSION;
        let mut seen: HashSet<(Scope, MemoryId)> = HashSet::new();
        let mut items = Vec::with_capacity(values.len());

        for (position, value) in values.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(MemoryError::Cancelled);
            }

            let raw: RawIndexEntry = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    report.skip(MemoryError::corrupt_entry(format!("#{}", position), e.to_string()));
                    continue;
                }
            };
            needs_write |= raw.file.is_some();

            let normalized = match normalize_entry(&raw, self.store.roots(), position) {
                Ok(normalized) => normalized,
                Err(e) => {
                    report.skip(e);
                    continue;
                }
            };
            let (Some(id), Some(relative_path), Some(scope)) = (
                normalized.id,
                normalized.relative_path,
                normalized.scope.as_deref().and_then(|s| s.parse::<Scope>().ok()),
            ) else {
                report.skip(MemoryError::corrupt_entry(
                    format!("#{}", position),
                    "normalization left required fields unset",
                ));
                continue;
            };

            let record = match self.store.read(scope, &relative_path) {
                Ok(record) => record,
                Err(e) => {
                    report.skip(MemoryError::corrupt_entry(id, e.to_string()));
                    continue;
                }
            };
            if record.id.as_str() != id {
                report.skip(MemoryError::corrupt_entry(
                    id,
                    format!("{} holds record {}", relative_path, record.id),
                ));
                continue;
            }
            if !seen.insert((scope, record.id.clone())) {
                report.skip(MemoryError::corrupt_entry(id, "duplicate entry"));
                continue;
            }

            items.push(self.item(record, relative_path));
        }

        report.entries = items.len();
        self.swap(items);
        log::info!(
            "Loaded index: {} entries, {} skipped",
            report.entries,
            report.skipped
        );

        if needs_write {
            log::info!("Writing index in v{} format", CURRENT_VERSION);
            self.persist()?;
        }
        Ok(report)
    }

    /// Re-scan every scope root and replace the snapshot
    pub fn rebuild(&self, cancel: &CancellationToken) -> Result<IndexReport> {
        let _guard = self.update_lock.lock();
        self.rebuild_locked(cancel)
    }

    fn rebuild_locked(&self, cancel: &CancellationToken) -> Result<IndexReport> {
        let mut report = IndexReport {
            rebuilt: true,
            ..Default::default()
        };
        let mut items = Vec::new();

        for scope in Scope::ALL {
            let outcome = self.store.scan(scope, cancel)?;
            for error in outcome.errors {
                report.skip(error);
            }
            for stored in outcome.records {
                items.push(self.item(stored.record, stored.relative_path));
            }
        }

        report.entries = items.len();
        let live: HashSet<String> = items.iter().map(|(e, _)| e.id.to_string()).collect();
        self.vectors.retain_ids(&live);

        self.swap(items);
        log::info!(
            "Rebuilt index: {} entries, {} skipped",
            report.entries,
            report.skipped
        );
        self.persist()?;
        Ok(report)
    }

    /// Insert or replace the entry for `record`
    pub fn upsert(&self, record: MemoryRecord, relative_path: String) -> Arc<IndexSnapshot> {
        let _guard = self.update_lock.lock();
        let current = self.snapshot();

        let mut items: Vec<_> = current
            .items()
            .filter(|(e, _)| !(e.scope == record.scope && e.id == record.id))
            .collect();
        items.push(self.item(record, relative_path));
        self.swap(items)
    }

    /// Re-attach cached vectors, e.g. after an embedding pass
    pub fn refresh(&self) -> Arc<IndexSnapshot> {
        let _guard = self.update_lock.lock();
        let current = self.snapshot();

        let items = current
            .items()
            .map(|(mut entry, record)| {
                entry.embedding = self.vectors.get(entry.id.as_str(), entry.updated_at);
                (entry, record)
            })
            .collect();
        self.swap(items)
    }

    /// Write the index artifact and vector sidecar
    pub fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        let snapshot = self.snapshot();
        let entries = snapshot.entries().iter().map(IndexEntry::to_raw).collect();
        write_artifact(&self.artifact_path, entries)?;
        self.vectors.save()
    }

    /// Persist, then drop the in-memory snapshot
    pub fn teardown(&self) -> Result<()> {
        let _guard = self.update_lock.lock();
        self.persist()?;
        self.swap(Vec::new());
        Ok(())
    }
}
