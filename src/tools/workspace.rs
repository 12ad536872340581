use crate::state::{CancelFlag, EngineState};
use crate::tools::{ToolFuture, ToolHandler, parse_params, resolve_read, resolve_write, to_value};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct IndexWorkspaceParams {
    workspace_path: String,
    #[serde(default)]
    force: bool,
    /// Watch for filesystem changes after the pass (on by default).
    #[serde(default = "default_watch")]
    watch: bool,
}

fn default_watch() -> bool {
    true
}

pub struct IndexWorkspace;

impl ToolHandler for IndexWorkspace {
    fn name(&self) -> &'static str {
        "index_workspace"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: IndexWorkspaceParams = parse_params(params)?;
            let ws = resolve_write(state, &params.workspace_path)?;
            let report = state
                .index_manager
                .index_workspace(&ws, params.force, &cancel)
                .await?;
            if params.watch {
                if let Err(e) = state.watcher_manager.start_watching(&ws) {
                    warn!(workspace = %ws.hash, error = %e, "failed to start watcher");
                }
            }
            to_value(report)
        })
    }
}

#[derive(Debug, Deserialize)]
struct IndexStatusParams {
    workspace_path: String,
}

pub struct IndexStatus;

impl ToolHandler for IndexStatus {
    fn name(&self) -> &'static str {
        "index_status"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: IndexStatusParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let stats = state.index_manager.stats(&ws).await?;
            let health = state.index_manager.health(&ws);
            let watching = state.watcher_manager.is_watching(&ws);
            to_value(serde_json::json!({
                "stats": stats,
                "health": health,
                "watching": watching,
            }))
        })
    }
}
