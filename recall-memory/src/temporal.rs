//! Record timestamps
//!
//! `updated_at` moves on explicit edits only. Link additions leave it alone so
//! cached embeddings keyed on it stay valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    /// When the record was first ingested
    pub created_at: DateTime<Utc>,
    /// When title/content/tags last changed
    pub updated_at: DateTime<Utc>,
}

impl Timestamps {
    /// Timestamps for a record created now
    pub fn new_current() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new(created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            updated_at,
        }
    }

    /// Mark an explicit edit. Never moves backwards past `created_at`.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now.max(self.created_at).max(self.updated_at);
    }

    /// `updated_at >= created_at`
    pub fn is_consistent(&self) -> bool {
        self.updated_at >= self.created_at
    }
}

impl Default for Timestamps {
    fn default() -> Self {
        Self::new_current()
    }
}
