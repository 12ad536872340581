use crate::error::{EngineError, EngineResult};
use crate::paths::WorkspaceId;
use crate::state::{CancelFlag, EngineState};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub mod edit;
pub mod files;
pub mod symbols;
pub mod text_search;
pub mod workspace;

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = EngineResult<serde_json::Value>> + Send + 'a>>;

/// One exposed operation. Implementations are stateless; everything they
/// need arrives through the shared state and the request parameters.
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        cancel: CancelFlag,
    ) -> ToolFuture<'a>;
}

pub struct ToolRegistry {
    handlers: HashMap<&'static str, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn with_builtin() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        for handler in builtin_handlers() {
            registry.handlers.insert(handler.name(), handler);
        }
        registry
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort();
        names
    }

    pub async fn dispatch(
        &self,
        state: &EngineState,
        tool: &str,
        params: serde_json::Value,
        cancel: CancelFlag,
    ) -> EngineResult<serde_json::Value> {
        let Some(handler) = self.handlers.get(tool) else {
            return Err(EngineError::InvalidRequest(format!(
                "unknown tool '{tool}'; available: {}",
                self.tool_names().join(", ")
            )));
        };
        handler.execute(state, params, cancel).await
    }
}

fn builtin_handlers() -> Vec<Box<dyn ToolHandler>> {
    vec![
        Box::new(workspace::IndexWorkspace),
        Box::new(workspace::IndexStatus),
        Box::new(text_search::TextSearch),
        Box::new(files::SearchFiles),
        Box::new(files::RecentFiles),
        Box::new(files::LineSearch),
        Box::new(edit::EditLines),
        Box::new(edit::SearchAndReplace),
        Box::new(symbols::SymbolSearch),
        Box::new(symbols::GotoDefinition),
        Box::new(symbols::FindReferences),
        Box::new(symbols::TraceCallPath),
        Box::new(symbols::SymbolsOverview),
        Box::new(symbols::ReadSymbols),
    ]
}

// ---------------------------------------------------------------------------
// Shared helpers used by every handler.
// ---------------------------------------------------------------------------

pub fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> EngineResult<T> {
    serde_json::from_value(params)
        .map_err(|e| EngineError::InvalidRequest(format!("invalid parameters: {e}")))
}

pub fn to_value<T: serde::Serialize>(value: T) -> EngineResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Workspace resolution for read-only operations (index may outlive the
/// source directory).
pub fn resolve_read(state: &EngineState, workspace_path: &str) -> EngineResult<WorkspaceId> {
    state.index_manager.resolver().resolve_lenient(workspace_path)
}

/// Workspace resolution for mutating operations: the directory must exist.
pub fn resolve_write(state: &EngineState, workspace_path: &str) -> EngineResult<WorkspaceId> {
    state.index_manager.resolver().resolve(workspace_path)
}

/// Normalize a possibly-absolute file path to workspace-relative form.
pub fn workspace_relative(ws: &WorkspaceId, file_path: &str) -> String {
    let normalized = file_path.replace('\\', "/");
    let root = ws.display_path();
    normalized
        .strip_prefix(&format!("{root}/"))
        .map(|s| s.to_string())
        .unwrap_or(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_every_spec_operation() {
        let registry = ToolRegistry::with_builtin();
        let names = registry.tool_names();
        for expected in [
            "index_workspace",
            "index_status",
            "text_search",
            "search_files",
            "line_search",
            "search_and_replace",
            "recent_files",
            "edit_lines",
            "symbol_search",
            "goto_definition",
            "find_references",
            "trace_call_path",
            "get_symbols_overview",
            "read_symbols",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_with_listing() {
        let tmp = tempfile::tempdir().unwrap();
        let state = EngineState::new(crate::config::EngineConfig {
            base_dir: tmp.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let registry = ToolRegistry::with_builtin();
        let err = registry
            .dispatch(&state, "no_such_tool", serde_json::json!({}), CancelFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(err.to_string().contains("text_search"));
    }
}
