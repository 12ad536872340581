use crate::query::preprocess::{SearchType, prepare_query};
use crate::response::{ResponseMode, shape_search_response};
use crate::state::{CancelFlag, EngineState};
use crate::tools::{ToolFuture, ToolHandler, parse_params, resolve_read, to_value};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TextSearchParams {
    query: String,
    workspace_path: String,
    #[serde(default)]
    search_type: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default = "default_snippets")]
    snippets: bool,
    #[serde(default)]
    response_mode: Option<String>,
    #[serde(default)]
    max_tokens: Option<usize>,
}

fn default_snippets() -> bool {
    true
}

pub struct TextSearch;

impl ToolHandler for TextSearch {
    fn name(&self) -> &'static str {
        "text_search"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: TextSearchParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let ctx = state.index_manager.get_context(&ws, false).await?;

            let search_type = SearchType::parse(params.search_type.as_deref())?;
            let prepared =
                prepare_query(&ctx.schema, &params.query, search_type, params.case_sensitive)?;

            let max_results = params
                .max_results
                .unwrap_or(state.config.default_max_results)
                .clamp(1, 1000);
            let hits = state
                .index_manager
                .search(&ws, prepared, max_results, params.snippets, &cancel)
                .await?;

            let budget = params
                .max_tokens
                .unwrap_or(state.config.default_token_budget);
            let response = shape_search_response(
                &params.query,
                hits,
                ResponseMode::parse(params.response_mode.as_deref()),
                budget,
                &state.result_handles,
                &state.config,
            );
            to_value(response)
        })
    }
}
