//! Visibility tiers and precedence resolution
//!
//! Precedence is fixed: `user > project > local > enterprise`. The resolver
//! never merges records, it only decides which scopes a query looks at and
//! in which order.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Visibility tier a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Project,
    Local,
    Enterprise,
}

impl Scope {
    /// All scopes, highest precedence first
    pub const ALL: [Scope; 4] = [Scope::User, Scope::Project, Scope::Local, Scope::Enterprise];

    /// Precedence rank, lower wins
    pub fn rank(self) -> usize {
        match self {
            Self::User => 0,
            Self::Project => 1,
            Self::Local => 2,
            Self::Enterprise => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Local => "local",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            "local" => Ok(Self::Local),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(MemoryError::invalid_scope(s)),
        }
    }
}

/// Resolves query scopes into an ordered list of scopes to search
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeResolver;

impl ScopeResolver {
    /// Resolve a query scope expression.
    ///
    /// Accepts a single scope name, a comma-separated list, or `all` / `*`.
    /// The result is always in precedence order with no duplicates.
    pub fn resolve(&self, query_scope: &str) -> Result<Vec<Scope>> {
        let trimmed = query_scope.trim();
        if trimmed.eq_ignore_ascii_case("all") || trimmed == "*" {
            return Ok(Scope::ALL.to_vec());
        }
        if trimmed.is_empty() {
            return Err(MemoryError::invalid_scope(query_scope));
        }

        let mut scopes = trimmed
            .split(',')
            .map(|part| part.parse::<Scope>())
            .collect::<Result<Vec<_>>>()?;
        Self::order(&mut scopes);
        Ok(scopes)
    }

    /// Order an already-parsed scope list by precedence
    pub fn resolve_scopes(&self, scopes: &[Scope]) -> Vec<Scope> {
        let mut scopes = scopes.to_vec();
        Self::order(&mut scopes);
        scopes
    }

    fn order(scopes: &mut Vec<Scope>) {
        scopes.sort_by_key(|s| s.rank());
        scopes.dedup();
    }
}

/// Key under which records in different scopes count as "the same memory"
pub fn logical_key(title: &str) -> String {
    title
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
