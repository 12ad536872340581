use crate::edit;
use crate::error::{EngineError, EngineResult};
use crate::state::{CancelFlag, EngineState};
use crate::tools::{
    ToolFuture, ToolHandler, parse_params, resolve_write, to_value, workspace_relative,
};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct EditLinesParams {
    file_path: String,
    operation: String,
    line: usize,
    #[serde(default)]
    content: Option<String>,
    /// When given, the edited file is re-indexed and committed so the next
    /// search observes the change.
    #[serde(default)]
    workspace_path: Option<String>,
}

pub struct EditLines;

impl ToolHandler for EditLines {
    fn name(&self) -> &'static str {
        "edit_lines"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: EditLinesParams = parse_params(params)?;
            let operation = edit::LineOperation::parse(&params.operation)?;

            let (abs_path, reindex) = resolve_edit_target(state, &params)?;
            let result = edit::edit_lines(
                &abs_path,
                &params.file_path,
                operation,
                params.line,
                params.content.as_deref(),
            )?;

            if let Some((ws, rel)) = reindex {
                if let Err(e) = state.index_manager.index_file(&ws, &rel).await {
                    warn!(file = %rel, error = %e, "post-edit reindex failed");
                } else if let Err(e) = state.index_manager.commit(&ws).await {
                    warn!(workspace = %ws.hash, error = %e, "post-edit commit failed");
                }
            }
            to_value(result)
        })
    }
}

fn resolve_edit_target(
    state: &EngineState,
    params: &EditLinesParams,
) -> EngineResult<(PathBuf, Option<(crate::paths::WorkspaceId, String)>)> {
    if let Some(ws_path) = &params.workspace_path {
        let ws = resolve_write(state, ws_path)?;
        let rel = workspace_relative(&ws, &params.file_path);
        return Ok((ws.canonical.join(&rel), Some((ws, rel))));
    }
    let path = PathBuf::from(&params.file_path);
    if !path.is_absolute() {
        return Err(EngineError::BadPath(format!(
            "{} is relative; pass workspace_path or an absolute file_path",
            params.file_path
        )));
    }
    Ok((path, None))
}

#[derive(Debug, Deserialize)]
struct SearchAndReplaceParams {
    query: String,
    replacement: String,
    workspace_path: String,
    #[serde(default)]
    preview: bool,
    #[serde(default)]
    max_matches: Option<usize>,
}

pub struct SearchAndReplace;

impl ToolHandler for SearchAndReplace {
    fn name(&self) -> &'static str {
        "search_and_replace"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: SearchAndReplaceParams = parse_params(params)?;
            let ws = resolve_write(state, &params.workspace_path)?;
            let max_matches = params.max_matches.unwrap_or(200).clamp(1, 2000);

            let config = state.config.clone();
            let ws_for_scan = ws.clone();
            let query = params.query.clone();
            let replacement = params.replacement.clone();
            let preview = params.preview;
            let result = tokio::task::spawn_blocking(move || {
                edit::search_and_replace(
                    &ws_for_scan,
                    &config,
                    &query,
                    &replacement,
                    preview,
                    max_matches,
                )
            })
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("replace task failed: {e}")))??;

            // Rewritten files re-enter the index in the same call so a
            // follow-up search sees the replacement.
            if !result.changed_files.is_empty() {
                for rel in &result.changed_files {
                    if let Err(e) = state.index_manager.index_file(&ws, rel).await {
                        warn!(file = %rel, error = %e, "post-replace reindex failed");
                    }
                }
                if let Err(e) = state.index_manager.commit(&ws).await {
                    warn!(workspace = %ws.hash, error = %e, "post-replace commit failed");
                }
            }
            to_value(result)
        })
    }
}
