//! Scope-partitioned record store
//!
//! Each configured scope root holds `<type>/<id>.json`, one file per record.
//! The store is the source of truth; the index is derived from it.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::config::ScopeRoots;
use crate::error::{MemoryError, Result};
use crate::node::{MemoryRecord, MemoryType};
use crate::scope::Scope;

/// A record read from disk together with where it lives
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: MemoryRecord,
    /// Relative to the scope root, `/`-separated
    pub relative_path: String,
}

/// Result of scanning a scope root
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub records: Vec<StoredRecord>,
    /// Files that exist but are not valid records
    pub errors: Vec<MemoryError>,
}

/// File-backed record store
#[derive(Debug, Clone)]
pub struct RecordStore {
    roots: ScopeRoots,
}

impl RecordStore {
    pub fn new(roots: ScopeRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &ScopeRoots {
        &self.roots
    }

    pub fn root(&self, scope: Scope) -> Result<&Path> {
        self.roots
            .root(scope)
            .ok_or(MemoryError::ScopeNotConfigured(scope))
    }

    /// Canonical relative path for a record
    pub fn relative_path_for(record: &MemoryRecord) -> String {
        format!("{}/{}.json", record.memory_type, record.id)
    }

    pub fn absolute_path(&self, scope: Scope, relative_path: &str) -> Result<PathBuf> {
        Ok(self.root(scope)?.join(relative_path))
    }

    /// Read and parse a single record
    pub fn read(&self, scope: Scope, relative_path: &str) -> Result<MemoryRecord> {
        let path = self.absolute_path(scope, relative_path)?;
        let bytes = std::fs::read(&path)?;
        let record: MemoryRecord = serde_json::from_slice(&bytes)
            .map_err(|source| MemoryError::RecordParse {
                path: path.clone(),
                source,
            })?;

        if record.scope != scope {
            return Err(MemoryError::validation(format!(
                "{} declares scope {} but lives under the {} root",
                path.display(),
                record.scope,
                scope
            )));
        }
        record.validate()?;
        Ok(record)
    }

    /// Write a record, replacing any previous version atomically.
    ///
    /// Returns the relative path it was written to.
    pub fn write(&self, record: &MemoryRecord) -> Result<String> {
        let relative_path = Self::relative_path_for(record);
        let path = self.absolute_path(record.scope, &relative_path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &path)?;

        log::debug!("Wrote record {} to {}", record.id, path.display());
        Ok(relative_path)
    }

    /// Scan every record file under one scope root.
    ///
    /// Invalid files are collected in `errors`, never fatal. An unconfigured
    /// scope or a root that does not exist yet scans as empty.
    pub fn scan(&self, scope: Scope, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let Some(root) = self.roots.root(scope) else {
            return Ok(outcome);
        };
        if !root.exists() {
            return Ok(outcome);
        }

        for memory_type in MemoryType::ALL {
            let dir = root.join(memory_type.as_str());
            if !dir.is_dir() {
                continue;
            }

            let mut files = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(path);
                }
            }
            files.sort();

            for path in files {
                if cancel.is_cancelled() {
                    return Err(MemoryError::Cancelled);
                }
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let relative_path = format!("{}/{}", memory_type, file_name);

                match self.read(scope, &relative_path) {
                    Ok(record) if record.memory_type != memory_type => {
                        outcome.errors.push(MemoryError::validation(format!(
                            "{} is a {} stored under {}/",
                            record.id, record.memory_type, memory_type
                        )));
                    }
                    Ok(record) if relative_path != Self::relative_path_for(&record) => {
                        outcome.errors.push(MemoryError::validation(format!(
                            "{} holds record {}, file name must match the id",
                            path.display(),
                            record.id
                        )));
                    }
                    Ok(record) => outcome.records.push(StoredRecord {
                        record,
                        relative_path,
                    }),
                    Err(e) => {
                        log::warn!("Skipping {}: {}", path.display(), e);
                        outcome.errors.push(e);
                    }
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Severity;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> RecordStore {
        let mut roots = ScopeRoots::default();
        roots.set(Scope::Project, tmp.path().join("project"));
        RecordStore::new(roots)
    }

    fn gotcha() -> MemoryRecord {
        MemoryRecord::builder()
            .gotcha(Severity::Medium)
            .scope(Scope::Project)
            .title("Flaky timestamp test")
            .content("Use a fixed clock in tests")
            .build()
            .unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let record = gotcha();

        let rel = store.write(&record).unwrap();
        assert_eq!(rel, format!("gotcha/{}.json", record.id));
        assert_eq!(store.read(Scope::Project, &rel).unwrap(), record);
    }

    #[test]
    fn test_unconfigured_scope_write_fails() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let mut record = gotcha();
        record.scope = Scope::Enterprise;
        assert!(matches!(
            store.write(&record),
            Err(MemoryError::ScopeNotConfigured(Scope::Enterprise))
        ));
    }

    #[test]
    fn test_scan_collects_bad_files() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.write(&gotcha()).unwrap();
        std::fs::write(tmp.path().join("project/gotcha/broken.json"), "{not json").unwrap();
        std::fs::write(tmp.path().join("project/gotcha/notes.txt"), "ignored").unwrap();

        let outcome = store.scan(Scope::Project, &CancellationToken::new()).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_scan_rejects_scope_mismatch() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let mut record = gotcha();
        record.scope = Scope::User;
        let dir = tmp.path().join("project/gotcha");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{}.json", record.id)),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

        let outcome = store.scan(Scope::Project, &CancellationToken::new()).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_scan_cancelled() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.write(&gotcha()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            store.scan(Scope::Project, &cancel),
            Err(MemoryError::Cancelled)
        ));
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let outcome = store.scan(Scope::Project, &CancellationToken::new()).unwrap();
        assert!(outcome.records.is_empty());
        let outcome = store.scan(Scope::User, &CancellationToken::new()).unwrap();
        assert!(outcome.records.is_empty());
    }
}
