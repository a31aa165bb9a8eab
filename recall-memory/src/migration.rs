//! Index artifact format migrations
//!
//! Older tooling wrote the index as a bare JSON array whose entries carry an
//! absolute `file` path. Current format is `{"version": 2, "entries": [...]}`
//! with `relativePath` relative to the owning scope root. Both stay readable;
//! only the current format is ever written.

use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScopeRoots;
use crate::error::{MemoryError, Result};
use crate::scope::Scope;

/// Index format version written by this crate
pub const CURRENT_VERSION: u32 = 2;

/// One index entry exactly as found on disk.
///
/// Every field is optional because external writers drift. `file` is read
/// but never written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIndexEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    /// Legacy absolute path
    #[serde(default, alias = "filePath", skip_serializing)]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RawIndexEntry {
    /// Label used in error reports
    fn label(&self, position: usize) -> String {
        match (&self.id, &self.relative_path, &self.file) {
            (Some(id), _, _) => id.clone(),
            (None, Some(path), _) | (None, None, Some(path)) => path.clone(),
            _ => format!("#{}", position),
        }
    }
}

/// Normalize one raw entry.
///
/// Postconditions on success: `relative_path`, `scope` and `id` are set,
/// `file` is `None`. Idempotent: normalizing the output again returns it
/// unchanged.
pub fn normalize_entry(
    raw: &RawIndexEntry,
    roots: &ScopeRoots,
    position: usize,
) -> Result<RawIndexEntry> {
    let label = raw.label(position);
    let corrupt = |reason: &str| MemoryError::corrupt_entry(label.clone(), reason);

    let path = raw
        .relative_path
        .as_deref()
        .or(raw.file.as_deref())
        .map(|p| p.trim().replace('\\', "/"))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| corrupt("neither relativePath nor file is present"))?;
    let as_path = Path::new(&path);

    let scope = match raw.scope.as_deref() {
        Some(name) => name
            .parse::<Scope>()
            .map_err(|_| corrupt(&format!("unknown scope '{}'", name)))?,
        None if as_path.is_absolute() => roots
            .owning_scope(as_path)
            .map(|(scope, _)| scope)
            .ok_or_else(|| corrupt("no scope and path is outside every scope root"))?,
        None => return Err(corrupt("no scope for relative path")),
    };

    let relative = if as_path.is_absolute() {
        let root = roots
            .root(scope)
            .ok_or_else(|| corrupt(&format!("{} root is not configured", scope)))?;
        let stripped = as_path
            .strip_prefix(root)
            .map_err(|_| corrupt(&format!("path is outside the {} root", scope)))?;
        join_components(stripped).map_err(|reason| corrupt(reason))?
    } else {
        join_components(as_path).map_err(|reason| corrupt(reason))?
    };

    let id = match raw.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => Path::new(&relative)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| corrupt("no id and no file stem"))?,
    };

    Ok(RawIndexEntry {
        id: Some(id),
        relative_path: Some(relative),
        file: None,
        scope: Some(scope.as_str().to_string()),
        memory_type: raw.memory_type.clone(),
        tags: raw.tags.clone(),
        updated_at: raw.updated_at,
    })
}

/// Rejoin path components with `/`, dropping `.` and rejecting `..`
fn join_components(path: &Path) -> std::result::Result<String, &'static str> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                parts.push(part.to_str().ok_or("path is not valid UTF-8")?);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err("path escapes the scope root"),
            Component::RootDir | Component::Prefix(_) => {
                return Err("path is still absolute after stripping the root")
            }
        }
    }
    if parts.is_empty() {
        return Err("path is empty");
    }
    Ok(parts.join("/"))
}

/// Current on-disk shape
#[derive(Debug, Serialize, Deserialize)]
struct IndexArtifact<T> {
    version: u32,
    entries: Vec<T>,
}

/// What was found at the index path
#[derive(Debug)]
pub enum ArtifactRead {
    Missing,
    /// Not JSON, or neither known shape; the caller rebuilds
    Unreadable(String),
    /// Entries are left as JSON values so one bad entry cannot sink the rest
    Entries {
        version: u32,
        entries: Vec<serde_json::Value>,
    },
}

/// Read the index artifact without interpreting entries
pub fn read_artifact(path: &Path) -> Result<ArtifactRead> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No index found at {}", path.display());
            return Ok(ArtifactRead::Missing);
        }
        Err(e) => return Err(e.into()),
    };

    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => return Ok(ArtifactRead::Unreadable(e.to_string())),
    };

    let read = match value {
        // v1 had no envelope and no version key
        serde_json::Value::Array(entries) => ArtifactRead::Entries {
            version: 1,
            entries,
        },
        serde_json::Value::Object(mut map) => match map.remove("entries") {
            Some(serde_json::Value::Array(entries)) => {
                let version = map
                    .get("version")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32)
                    .unwrap_or(1);
                ArtifactRead::Entries { version, entries }
            }
            _ => ArtifactRead::Unreadable("object without an entries array".into()),
        },
        _ => ArtifactRead::Unreadable("unexpected top-level JSON value".into()),
    };

    if let ArtifactRead::Entries { version, .. } = &read {
        log::info!(
            "Index version: {} (current: {})",
            version,
            CURRENT_VERSION
        );
        if *version < CURRENT_VERSION {
            log::warn!(
                "Index needs migration from v{} to v{}",
                version,
                CURRENT_VERSION
            );
        }
    }
    Ok(read)
}

/// Write entries in the current format, replacing the file atomically
pub fn write_artifact(path: &Path, entries: Vec<RawIndexEntry>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let artifact = IndexArtifact {
        version: CURRENT_VERSION,
        entries,
    };
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(&artifact)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
