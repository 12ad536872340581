use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::manager::IndexManager;
use crate::response::ResultHandleStore;
use crate::watcher::WatcherManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag threaded through every public operation.
/// Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Shared engine state handed to every tool handler.
#[derive(Clone)]
pub struct EngineState {
    pub config: EngineConfig,
    pub index_manager: Arc<IndexManager>,
    pub watcher_manager: Arc<WatcherManager>,
    pub result_handles: Arc<ResultHandleStore>,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        std::fs::create_dir_all(&config.base_dir)?;
        write_base_gitignore(&config)?;

        let index_manager = Arc::new(IndexManager::new(config.clone()));
        let watcher_manager = Arc::new(WatcherManager::new(config.clone(), index_manager.clone()));
        let result_handles = Arc::new(ResultHandleStore::new());

        Ok(Self {
            config,
            index_manager,
            watcher_manager,
            result_handles,
        })
    }

    /// Commit everything and release index locks; called once at shutdown.
    pub async fn shutdown(&self) {
        self.watcher_manager.stop_all();
        self.index_manager.dispose_all().await;
    }
}

/// The base directory ships its own .gitignore so index state never leaks
/// into a user's repository if they point `<base>` inside one.
fn write_base_gitignore(config: &EngineConfig) -> EngineResult<()> {
    let path = config.base_dir.join(".gitignore");
    if !path.exists() {
        std::fs::write(&path, "*\n")?;
    }
    Ok(())
}
