//! Memory record types and builders
//!
//! Core types for representing memories on disk and in the index.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::scope::Scope;
use crate::temporal::Timestamps;

/// Unique identifier for memory records
///
/// Ids double as file stems in the record store, so only
/// `[A-Za-z0-9._-]` is accepted and a leading dot is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Create a new random MemoryId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id, validating its shape
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(MemoryError::validation("id must not be empty"));
        }
        if raw.starts_with('.') {
            return Err(MemoryError::validation(format!(
                "id '{}' must not start with '.'",
                raw
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(MemoryError::validation(format!(
                "id '{}' contains invalid character '{}'",
                raw, bad
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for MemoryId {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for MemoryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Severity for gotchas and learnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

/// Types of memories that can be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Architectural hub tying related memories together
    Hub,
    /// A decision with its rationale
    Decision,
    /// A trap to avoid
    Gotcha,
    /// Something learned the hard way
    Learning,
    /// Pointer to a produced artifact
    Artifact,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Hub,
        MemoryType::Decision,
        MemoryType::Gotcha,
        MemoryType::Learning,
        MemoryType::Artifact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::Decision => "decision",
            Self::Gotcha => "gotcha",
            Self::Learning => "learning",
            Self::Artifact => "artifact",
        }
    }

    /// Only gotchas and learnings carry a severity
    pub fn allows_severity(self) -> bool {
        matches!(self, Self::Gotcha | Self::Learning)
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hub" => Ok(Self::Hub),
            "decision" => Ok(Self::Decision),
            "gotcha" => Ok(Self::Gotcha),
            "learning" => Ok(Self::Learning),
            "artifact" => Ok(Self::Artifact),
            other => Err(MemoryError::validation(format!(
                "unknown memory type: {}",
                other
            ))),
        }
    }
}

/// A single persisted memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: MemoryId,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub scope: Scope,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Outgoing links, in insertion order
    #[serde(default)]
    pub links: Vec<MemoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl MemoryRecord {
    /// Create a new builder for MemoryRecord
    pub fn builder() -> MemoryRecordBuilder {
        MemoryRecordBuilder::new()
    }

    /// Text fed to the embedder
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.content)
    }

    /// Check everything that can be checked without looking at the corpus.
    ///
    /// Link targets are checked against the index by the engine.
    pub fn validate(&self) -> Result<()> {
        MemoryId::parse(self.id.as_str())?;

        if self.title.trim().is_empty() {
            return Err(MemoryError::validation(format!(
                "record {} has an empty title",
                self.id
            )));
        }
        if self.content.trim().is_empty() {
            return Err(MemoryError::validation(format!(
                "record {} has empty content",
                self.id
            )));
        }
        if self.severity.is_some() && !self.memory_type.allows_severity() {
            return Err(MemoryError::validation(format!(
                "severity is only allowed on gotcha/learning records, {} is a {}",
                self.id, self.memory_type
            )));
        }
        if !self.timestamps.is_consistent() {
            return Err(MemoryError::validation(format!(
                "record {} has updatedAt before createdAt",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for link in &self.links {
            if link == &self.id {
                return Err(MemoryError::validation(format!(
                    "record {} links to itself",
                    self.id
                )));
            }
            if !seen.insert(link) {
                return Err(MemoryError::validation(format!(
                    "record {} links to {} more than once",
                    self.id, link
                )));
            }
        }
        Ok(())
    }

    /// Whether title/content differ, which invalidates the cached vector
    pub fn content_differs(&self, other: &MemoryRecord) -> bool {
        self.title != other.title || self.content != other.content
    }
}

/// Builder for MemoryRecord with fluent API
#[derive(Debug, Default)]
pub struct MemoryRecordBuilder {
    id: Option<MemoryId>,
    memory_type: Option<MemoryType>,
    scope: Option<Scope>,
    title: Option<String>,
    content: Option<String>,
    tags: BTreeSet<String>,
    severity: Option<Severity>,
}

impl MemoryRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the record id (auto-generated if not set)
    pub fn id(mut self, id: MemoryId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    /// Set as decision
    pub fn decision(self) -> Self {
        self.memory_type(MemoryType::Decision)
    }

    /// Set as gotcha with a severity
    pub fn gotcha(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self.memory_type(MemoryType::Gotcha)
    }

    /// Set as learning
    pub fn learning(self) -> Self {
        self.memory_type(MemoryType::Learning)
    }

    /// Set as hub
    pub fn hub(self) -> Self {
        self.memory_type(MemoryType::Hub)
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the content
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into().trim().to_string();
        if !tag.is_empty() {
            self.tags.insert(tag);
        }
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Build the MemoryRecord
    pub fn build(self) -> std::result::Result<MemoryRecord, MemoryRecordBuilderError> {
        let memory_type = self
            .memory_type
            .ok_or(MemoryRecordBuilderError::MissingType)?;
        let scope = self.scope.ok_or(MemoryRecordBuilderError::MissingScope)?;
        let title = self.title.ok_or(MemoryRecordBuilderError::MissingTitle)?;
        let content = self.content.ok_or(MemoryRecordBuilderError::MissingContent)?;

        Ok(MemoryRecord {
            id: self.id.unwrap_or_default(),
            memory_type,
            scope,
            title,
            content,
            tags: self.tags,
            links: Vec::new(),
            severity: self.severity,
            timestamps: Timestamps::default(),
        })
    }
}

/// Errors that can occur when building a MemoryRecord
#[derive(Debug, thiserror::Error)]
pub enum MemoryRecordBuilderError {
    #[error("Missing required field: type")]
    MissingType,
    #[error("Missing required field: scope")]
    MissingScope,
    #[error("Missing required field: title")]
    MissingTitle,
    #[error("Missing required field: content")]
    MissingContent,
}
