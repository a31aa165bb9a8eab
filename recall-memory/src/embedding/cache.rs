//! Persisted record vectors
//!
//! Vectors are stored in `vectors.bin` (bincode), keyed by record id together
//! with the `updated_at` they were computed for. A vector whose timestamp no
//! longer matches the record is stale and never served.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedVector {
    updated_at: DateTime<Utc>,
    vector: Vec<f32>,
}

pub struct VectorCache {
    path: PathBuf,
    vectors: DashMap<String, CachedVector>,
    dirty: AtomicBool,
}

impl VectorCache {
    /// Open the cache file, starting empty when it is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut vectors = DashMap::new();

        match std::fs::read(&path) {
            Ok(bytes) => match bincode::deserialize::<HashMap<String, CachedVector>>(&bytes) {
                Ok(map) => {
                    log::info!("Loaded {} cached vectors from disk", map.len());
                    vectors.extend(map);
                }
                Err(e) => {
                    log::warn!(
                        "Failed to deserialize {}: {}. Starting with an empty vector cache.",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to read {}: {}", path.display(), e),
        }

        Self {
            path,
            vectors,
            dirty: AtomicBool::new(false),
        }
    }

    /// Vector for `id` if it was computed for exactly `updated_at`
    pub fn get(&self, id: &str, updated_at: DateTime<Utc>) -> Option<Arc<[f32]>> {
        self.vectors
            .get(id)
            .filter(|cached| cached.updated_at == updated_at)
            .map(|cached| Arc::from(cached.vector.as_slice()))
    }

    pub fn insert(&self, id: &str, updated_at: DateTime<Utc>, vector: Vec<f32>) {
        self.vectors
            .insert(id.to_string(), CachedVector { updated_at, vector });
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Drop vectors for ids not in `live`
    pub fn retain_ids(&self, live: &std::collections::HashSet<String>) {
        let before = self.vectors.len();
        self.vectors.retain(|id, _| live.contains(id));
        if self.vectors.len() != before {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Write to disk if anything changed since the last save
    pub fn save(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot: HashMap<String, CachedVector> = self
            .vectors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("bin.tmp");
        let result = (|| -> Result<()> {
            let bytes = bincode::serialize(&snapshot)?;
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &self.path)?;
            Ok(())
        })();

        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }
}
