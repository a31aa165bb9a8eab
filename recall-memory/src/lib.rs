//! Recall Memory Engine
//!
//! Persistent, scoped memory for an AI coding assistant: decisions, gotchas,
//! learnings, hubs and artifacts stored as JSON records under per-scope
//! roots, indexed for hybrid lexical/semantic search and tied together by a
//! link graph whose orphans are reported.
//!
//! ## Features
//!
//! - **Scope precedence** - `user > project > local > enterprise`, with
//!   optional shadowing of lower-precedence duplicates
//! - **Migrating index** - legacy absolute-path entries are normalized on load
//! - **Hybrid search** - IDF-weighted term coverage + cosine similarity,
//!   degrading to lexical-only when no embedder is available
//! - **Graph cohesion** - automatic linking and orphan reports
//! - **Injection weighting** - per-hook multipliers by record type
//!
//! ## Example
//!
//! ```ignore
//! use recall_memory::{global, MemoryRecord, Scope, SearchOptions};
//!
//! let manager = global();
//! manager.initialize_from_dir(&data_dir).await?;
//! let engine = manager.engine().await?;
//!
//! let record = MemoryRecord::builder()
//!     .decision()
//!     .scope(Scope::Project)
//!     .title("Use WAL mode for SQLite")
//!     .content("Readers no longer block the single writer")
//!     .tag("sqlite")
//!     .build()?;
//! let id = engine.ingest(record).await?;
//! engine.auto_link(id.as_str()).await?;
//!
//! let hits = engine.search("sqlite locking", "all", &SearchOptions::new()).await?;
//! ```

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod index;
pub mod manager;
pub mod migration;
pub mod node;
pub mod scope;
pub mod search;
pub mod storage;
pub mod temporal;
pub mod weighting;

// Re-exports for convenience
pub use config::{EngineConfig, LinkerConfig, ScopeRoots, SearchDefaults, TimeoutConfig};
pub use embedding::{Embedder, HashingEmbedder, VectorEngine};
pub use engine::{ContextItem, EmbeddingReport, EngineStats, MemoryEngine};
pub use error::{MemoryError, Result};
pub use graph::{Edge, LinkGraph};
pub use index::{IndexEntry, IndexReport, IndexSnapshot};
pub use manager::{global, MemoryManager};
pub use node::{MemoryId, MemoryRecord, MemoryRecordBuilder, MemoryType, Severity};
pub use scope::{Scope, ScopeResolver};
pub use search::{MatchReason, SearchOptions, SearchResponse, SearchResult};
pub use storage::RecordStore;
pub use temporal::Timestamps;
pub use weighting::{HookKind, InjectionTable};
