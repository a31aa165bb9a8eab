//! Embedding module for semantic search
//!
//! The model is a black box (`text -> vector`). Vectors for records are
//! cached on disk; query vectors are cached in memory.

mod cache;
mod engine;
mod hashing;

pub use cache::VectorCache;
pub use engine::{cosine_similarity, Embedder, VectorEngine};
pub use hashing::{HashingEmbedder, DEFAULT_DIMENSION};
