//! Process-wide engine lifecycle
//!
//! Hooks and the maintenance binary share one engine per process. The
//! manager owns it between `initialize` and `teardown`; using it outside
//! that window is a `NotInitialized` error.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;

use crate::config::EngineConfig;
use crate::embedding::{HashingEmbedder, VectorEngine};
use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result};
use crate::index::IndexReport;

#[derive(Default)]
pub struct MemoryManager {
    engine: RwLock<Option<Arc<MemoryEngine>>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the engine and load its index.
    ///
    /// Re-initializing tears the previous engine down after the new one is
    /// in place.
    pub async fn initialize(&self, config: EngineConfig, vectors: VectorEngine) -> Result<IndexReport> {
        log::info!("Initializing memory engine at {}", config.data_dir.display());
        std::fs::create_dir_all(&config.data_dir)?;

        let engine = Arc::new(MemoryEngine::new(config, vectors));
        let report = engine.load().await?;

        let previous = self.engine.write().await.replace(engine);
        if let Some(previous) = previous {
            if let Err(e) = previous.teardown().await {
                log::warn!("Failed to tear down previous engine: {}", e);
            }
        }

        log::info!(
            "Memory engine ready: {} entries, {} skipped",
            report.entries,
            report.skipped
        );
        Ok(report)
    }

    /// Initialize from `{data_dir}/config.toml` with the built-in embedder
    pub async fn initialize_from_dir(&self, data_dir: &Path) -> Result<IndexReport> {
        let config = EngineConfig::load(data_dir);
        let vectors = VectorEngine::new(Arc::new(HashingEmbedder::default()));
        self.initialize(config, vectors).await
    }

    pub async fn is_initialized(&self) -> bool {
        self.engine.read().await.is_some()
    }

    /// The live engine
    pub async fn engine(&self) -> Result<Arc<MemoryEngine>> {
        self.engine
            .read()
            .await
            .clone()
            .ok_or(MemoryError::NotInitialized)
    }

    /// Persist and drop the engine. A no-op when not initialized.
    pub async fn teardown(&self) -> Result<()> {
        let engine = self.engine.write().await.take();
        if let Some(engine) = engine {
            engine.teardown().await?;
            log::info!("Memory engine torn down");
        }
        Ok(())
    }
}

/// The process-wide manager
pub fn global() -> &'static MemoryManager {
    static GLOBAL: OnceLock<MemoryManager> = OnceLock::new();
    GLOBAL.get_or_init(MemoryManager::new)
}
