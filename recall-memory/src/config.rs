//! Engine configuration
//!
//! Reads `config.toml` from the data directory. A missing or malformed file
//! falls back to [`EngineConfig::default()`] with a log line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scope::Scope;
use crate::weighting::InjectionTable;

/// Root directory for each scope. Unset scopes hold no records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeRoots {
    pub user: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub local: Option<PathBuf>,
    pub enterprise: Option<PathBuf>,
}

impl ScopeRoots {
    pub fn root(&self, scope: Scope) -> Option<&Path> {
        match scope {
            Scope::User => self.user.as_deref(),
            Scope::Project => self.project.as_deref(),
            Scope::Local => self.local.as_deref(),
            Scope::Enterprise => self.enterprise.as_deref(),
        }
    }

    pub fn set(&mut self, scope: Scope, root: impl Into<PathBuf>) {
        let root = Some(root.into());
        match scope {
            Scope::User => self.user = root,
            Scope::Project => self.project = root,
            Scope::Local => self.local = root,
            Scope::Enterprise => self.enterprise = root,
        }
    }

    /// Configured `(scope, root)` pairs in precedence order
    pub fn configured(&self) -> impl Iterator<Item = (Scope, &Path)> {
        Scope::ALL
            .into_iter()
            .filter_map(move |scope| self.root(scope).map(|root| (scope, root)))
    }

    /// Find the scope whose root contains `path`.
    ///
    /// Nested roots are possible (a local root inside a project root), so the
    /// longest matching root wins.
    pub fn owning_scope(&self, path: &Path) -> Option<(Scope, &Path)> {
        self.configured()
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())
    }
}

/// Ranking defaults, overridable per call through `SearchOptions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDefaults {
    pub limit: usize,
    pub lexical_weight: f32,
    pub semantic_weight: f32,
    /// Combined score a candidate must reach to be returned
    pub min_score: f32,
    /// Candidates scored between cancellation checks
    pub batch_size: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            limit: 10,
            lexical_weight: 0.5,
            semantic_weight: 0.5,
            min_score: 0.1,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Maximum edges added per `auto_link` call
    pub top_k: usize,
    /// Minimum combined score for a link target
    pub threshold: f32,
    /// Allow links into other scopes
    pub cross_scope: bool,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            threshold: 0.25,
            cross_scope: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_ms: u64,
    pub rebuild_ms: u64,
    pub embed_ms: u64,
}

impl TimeoutConfig {
    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    pub fn rebuild(&self) -> Duration {
        Duration::from_millis(self.rebuild_ms)
    }

    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            search_ms: 2_000,
            rebuild_ms: 30_000,
            embed_ms: 60_000,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where `index.json` and `vectors.bin` live
    pub data_dir: PathBuf,
    pub scopes: ScopeRoots,
    pub search: SearchDefaults,
    pub linker: LinkerConfig,
    pub injection: InjectionTable,
    pub timeouts: TimeoutConfig,
}

impl EngineConfig {
    pub const FILE_NAME: &'static str = "config.toml";

    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_scope_root(mut self, scope: Scope, root: impl Into<PathBuf>) -> Self {
        self.scopes.set(scope, root);
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `{data_dir}/config.toml`.
    ///
    /// - Missing file: defaults.
    /// - Unreadable or malformed file: warning, then defaults.
    ///
    /// `data_dir` is always the directory passed in, whatever the file says.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join(Self::FILE_NAME);

        let content = match std::fs::read_to_string(&config_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "No {} found at {}, using defaults",
                    Self::FILE_NAME,
                    config_path.display()
                );
                return Self::new(data_dir);
            }
            Err(err) => {
                log::warn!(
                    "Failed to read {}: {}, using defaults",
                    config_path.display(),
                    err
                );
                return Self::new(data_dir);
            }
        };

        match Self::from_toml_str(&content) {
            Ok(mut config) => {
                config.data_dir = data_dir.to_path_buf();
                config
            }
            Err(err) => {
                log::warn!(
                    "Failed to parse {}: {}, using defaults",
                    config_path.display(),
                    err
                );
                Self::new(data_dir)
            }
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join("vectors.bin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MemoryType;
    use crate::weighting::HookKind;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::load(tmp.path());
        assert_eq!(config.data_dir, tmp.path());
        assert_eq!(config.search, SearchDefaults::default());
        assert_eq!(config.linker.top_k, 3);
    }

    #[test]
    fn test_valid_toml_parsed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            r#"
[scopes]
project = "/work/repo/.recall"

[search]
lexical_weight = 0.7
semantic_weight = 0.3

[linker]
top_k = 5
cross_scope = true

[injection.pre_edit]
gotcha = 3.0
"#,
        )
        .unwrap();

        let config = EngineConfig::load(tmp.path());
        assert_eq!(
            config.scopes.project.as_deref(),
            Some(Path::new("/work/repo/.recall"))
        );
        assert!(config.scopes.user.is_none());
        assert_eq!(config.search.lexical_weight, 0.7);
        assert_eq!(config.search.limit, 10);
        assert_eq!(config.linker.top_k, 5);
        assert!(config.linker.cross_scope);
        assert_eq!(
            config.injection.weight(MemoryType::Gotcha, HookKind::PreEdit),
            3.0
        );
    }

    #[test]
    fn test_malformed_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "search = [[[").unwrap();
        let config = EngineConfig::load(tmp.path());
        assert_eq!(config.search, SearchDefaults::default());
    }

    #[test]
    fn test_owning_scope_prefers_deepest_root() {
        let roots = ScopeRoots {
            project: Some(PathBuf::from("/repo")),
            local: Some(PathBuf::from("/repo/.local")),
            ..Default::default()
        };
        let (scope, root) = roots
            .owning_scope(Path::new("/repo/.local/gotcha/x.json"))
            .unwrap();
        assert_eq!(scope, Scope::Local);
        assert_eq!(root, Path::new("/repo/.local"));
        assert!(roots.owning_scope(Path::new("/elsewhere/x.json")).is_none());
    }
}
