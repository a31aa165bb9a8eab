//! Injection weighting
//!
//! One lookup table serves every hook kind. Rows are hook kinds, columns are
//! memory types. Configured cells overlay the built-in row for their hook;
//! cells nobody sets keep the built-in value.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::node::MemoryType;

/// Session-lifecycle event that asks for context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    SessionStart,
    PreCompact,
    Restore,
    /// Before a code-editing tool call
    PreEdit,
    /// Before a read-only tool call
    PreRead,
    UserPrompt,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::PreCompact => "pre_compact",
            Self::Restore => "restore",
            Self::PreEdit => "pre_edit",
            Self::PreRead => "pre_read",
            Self::UserPrompt => "user_prompt",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HookKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "session_start" => Ok(Self::SessionStart),
            "pre_compact" => Ok(Self::PreCompact),
            "restore" => Ok(Self::Restore),
            "pre_edit" => Ok(Self::PreEdit),
            "pre_read" => Ok(Self::PreRead),
            "user_prompt" => Ok(Self::UserPrompt),
            other => Err(MemoryError::validation(format!("unknown hook kind: {}", other))),
        }
    }
}

/// Multipliers for one hook kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TypeWeights {
    pub hub: f32,
    pub decision: f32,
    pub gotcha: f32,
    pub learning: f32,
    pub artifact: f32,
}

impl TypeWeights {
    const fn new(hub: f32, decision: f32, gotcha: f32, learning: f32, artifact: f32) -> Self {
        Self {
            hub,
            decision,
            gotcha,
            learning,
            artifact,
        }
    }

    pub fn get(&self, memory_type: MemoryType) -> f32 {
        match memory_type {
            MemoryType::Hub => self.hub,
            MemoryType::Decision => self.decision,
            MemoryType::Gotcha => self.gotcha,
            MemoryType::Learning => self.learning,
            MemoryType::Artifact => self.artifact,
        }
    }
}

/// One `[injection.<hook>]` section as written; unset cells are `None`
#[derive(Debug, Default, Deserialize)]
struct RowOverrides {
    hub: Option<f32>,
    decision: Option<f32>,
    gotcha: Option<f32>,
    learning: Option<f32>,
    artifact: Option<f32>,
}

impl RowOverrides {
    fn over(self, base: TypeWeights) -> TypeWeights {
        TypeWeights {
            hub: self.hub.unwrap_or(base.hub),
            decision: self.decision.unwrap_or(base.decision),
            gotcha: self.gotcha.unwrap_or(base.gotcha),
            learning: self.learning.unwrap_or(base.learning),
            artifact: self.artifact.unwrap_or(base.artifact),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TableOverrides {
    session_start: RowOverrides,
    pre_compact: RowOverrides,
    restore: RowOverrides,
    pre_edit: RowOverrides,
    pre_read: RowOverrides,
    user_prompt: RowOverrides,
}

impl From<TableOverrides> for InjectionTable {
    fn from(overrides: TableOverrides) -> Self {
        let base = InjectionTable::default();
        Self {
            session_start: overrides.session_start.over(base.session_start),
            pre_compact: overrides.pre_compact.over(base.pre_compact),
            restore: overrides.restore.over(base.restore),
            pre_edit: overrides.pre_edit.over(base.pre_edit),
            pre_read: overrides.pre_read.over(base.pre_read),
            user_prompt: overrides.user_prompt.over(base.user_prompt),
        }
    }
}

/// The full hook x type table, loaded from `[injection.<hook>]` sections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TableOverrides")]
pub struct InjectionTable {
    pub session_start: TypeWeights,
    pub pre_compact: TypeWeights,
    pub restore: TypeWeights,
    pub pre_edit: TypeWeights,
    pub pre_read: TypeWeights,
    pub user_prompt: TypeWeights,
}

impl Default for InjectionTable {
    fn default() -> Self {
        Self {
            session_start: TypeWeights::new(1.3, 1.1, 1.1, 1.0, 0.8),
            pre_compact: TypeWeights::new(1.2, 1.2, 1.0, 1.0, 0.9),
            restore: TypeWeights::new(1.3, 1.2, 1.1, 1.0, 1.0),
            pre_edit: TypeWeights::new(1.0, 1.4, 1.5, 1.2, 0.8),
            pre_read: TypeWeights::new(1.1, 1.0, 0.9, 1.0, 1.0),
            user_prompt: TypeWeights::new(1.1, 1.0, 1.0, 1.0, 1.0),
        }
    }
}

impl InjectionTable {
    fn row(&self, hook: HookKind) -> &TypeWeights {
        match hook {
            HookKind::SessionStart => &self.session_start,
            HookKind::PreCompact => &self.pre_compact,
            HookKind::Restore => &self.restore,
            HookKind::PreEdit => &self.pre_edit,
            HookKind::PreRead => &self.pre_read,
            HookKind::UserPrompt => &self.user_prompt,
        }
    }

    /// Multiplier applied to a result of `memory_type` surfaced for `hook`.
    /// Negative or non-finite configured values clamp to 0.
    pub fn weight(&self, memory_type: MemoryType, hook: HookKind) -> f32 {
        let w = self.row(hook).get(memory_type);
        if w.is_finite() {
            w.max(0.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_weights_gotchas_above_read() {
        let table = InjectionTable::default();
        assert!(
            table.weight(MemoryType::Gotcha, HookKind::PreEdit)
                > table.weight(MemoryType::Gotcha, HookKind::PreRead)
        );
        assert!(
            table.weight(MemoryType::Decision, HookKind::PreEdit)
                > table.weight(MemoryType::Decision, HookKind::PreRead)
        );
    }

    #[test]
    fn test_configured_cells_overlay_builtin_row() {
        let table: InjectionTable = toml::from_str(
            r#"
[pre_read]
gotcha = 2.5

[pre_edit]
gotcha = 3.0
"#,
        )
        .unwrap();
        assert_eq!(table.weight(MemoryType::Gotcha, HookKind::PreRead), 2.5);
        assert_eq!(table.weight(MemoryType::Hub, HookKind::PreRead), 1.1);
        assert_eq!(table.weight(MemoryType::Gotcha, HookKind::PreEdit), 3.0);
        assert_eq!(table.weight(MemoryType::Decision, HookKind::PreEdit), 1.4);
        // Rows absent from the file keep their defaults
        assert_eq!(table.weight(MemoryType::Hub, HookKind::SessionStart), 1.3);
    }

    #[test]
    fn test_empty_section_is_builtin_table() {
        let table: InjectionTable = toml::from_str("").unwrap();
        assert_eq!(table, InjectionTable::default());
    }

    #[test]
    fn test_negative_weight_clamped() {
        let mut table = InjectionTable::default();
        table.restore.artifact = -3.0;
        assert_eq!(table.weight(MemoryType::Artifact, HookKind::Restore), 0.0);
    }

    #[test]
    fn test_hook_kind_parse() {
        assert_eq!("pre-edit".parse::<HookKind>().unwrap(), HookKind::PreEdit);
        assert_eq!(
            "SESSION_START".parse::<HookKind>().unwrap(),
            HookKind::SessionStart
        );
        assert!("post_tool".parse::<HookKind>().is_err());
    }
}
