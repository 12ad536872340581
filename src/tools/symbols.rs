use crate::error::EngineError;
use crate::state::{CancelFlag, EngineState};
use crate::symbols::resolve::{self, TraceDirection};
use crate::symbols::store::{NameMatch, SymbolRecord};
use crate::tools::{ToolFuture, ToolHandler, parse_params, resolve_read, to_value, workspace_relative};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct SymbolSearchParams {
    query: String,
    workspace_path: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    match_mode: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct SymbolSearch;

impl ToolHandler for SymbolSearch {
    fn name(&self) -> &'static str {
        "symbol_search"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: SymbolSearchParams = parse_params(params)?;
            if params.query.trim().is_empty() {
                return Err(EngineError::InvalidQuery {
                    message: "symbol query is empty".to_string(),
                    hint: "Provide a symbol name or prefix".to_string(),
                });
            }
            let ws = resolve_read(state, &params.workspace_path)?;
            let db = state.index_manager.symbol_db(&ws)?;
            let limit = params.max_results.unwrap_or(50).clamp(1, 500);
            let symbols = db.search_by_name(
                params.query.trim(),
                params.kind.as_deref(),
                NameMatch::from_str(params.match_mode.as_deref()),
                limit,
            )?;
            to_value(serde_json::json!({
                "query": params.query,
                "total": symbols.len(),
                "symbols": symbols,
            }))
        })
    }
}

#[derive(Debug, Deserialize)]
struct GotoDefinitionParams {
    symbol: String,
    workspace_path: String,
}

pub struct GotoDefinition;

impl ToolHandler for GotoDefinition {
    fn name(&self) -> &'static str {
        "goto_definition"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: GotoDefinitionParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let db = state.index_manager.symbol_db(&ws)?;
            let definitions = db.find_definitions(params.symbol.trim())?;
            if definitions.is_empty() {
                return Err(EngineError::NotFound(params.symbol));
            }
            to_value(definitions)
        })
    }
}

#[derive(Debug, Deserialize)]
struct FindReferencesParams {
    symbol: String,
    workspace_path: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct FindReferences;

impl ToolHandler for FindReferences {
    fn name(&self) -> &'static str {
        "find_references"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: FindReferencesParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let db = state.index_manager.symbol_db(&ws)?;
            let limit = params.max_results.unwrap_or(100).clamp(1, 1000);
            let occurrences = resolve::find_references(
                &db,
                &ws.canonical,
                params.symbol.trim(),
                params.kind.as_deref(),
                limit,
            )?;
            to_value(serde_json::json!({
                "symbol": params.symbol,
                "total": occurrences.len(),
                "references": occurrences,
            }))
        })
    }
}

#[derive(Debug, Deserialize)]
struct TraceCallPathParams {
    symbol: String,
    workspace_path: String,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    max_nodes: Option<usize>,
}

pub struct TraceCallPath;

impl ToolHandler for TraceCallPath {
    fn name(&self) -> &'static str {
        "trace_call_path"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: TraceCallPathParams = parse_params(params)?;
            let direction = match params.direction.as_deref() {
                None | Some("down") => TraceDirection::Down,
                Some("up") => TraceDirection::Up,
                Some(other) => {
                    return Err(EngineError::InvalidRequest(format!(
                        "unknown direction '{other}' (expected up or down)"
                    )));
                }
            };
            let ws = resolve_read(state, &params.workspace_path)?;
            let db = state.index_manager.symbol_db(&ws)?;
            let graph = resolve::trace_call_path(
                &db,
                &ws.canonical,
                params.symbol.trim(),
                direction,
                params.max_depth.unwrap_or(5).clamp(1, 20),
                params.max_nodes.unwrap_or(50).clamp(1, 500),
            )?;
            to_value(graph)
        })
    }
}

#[derive(Debug, Deserialize)]
struct SymbolsOverviewParams {
    file_path: String,
    workspace_path: String,
}

#[derive(Debug, Serialize)]
struct FileOverview {
    file_path: String,
    types: Vec<TypeOverview>,
    functions: Vec<SymbolRecord>,
    total_symbols: usize,
}

#[derive(Debug, Serialize)]
struct TypeOverview {
    #[serde(flatten)]
    symbol: SymbolRecord,
    members: Vec<SymbolRecord>,
}

pub struct SymbolsOverview;

impl ToolHandler for SymbolsOverview {
    fn name(&self) -> &'static str {
        "get_symbols_overview"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: SymbolsOverviewParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let db = state.index_manager.symbol_db(&ws)?;
            let rel = workspace_relative(&ws, &params.file_path);
            let symbols = db.symbols_in_file(&rel)?;
            to_value(build_overview(rel, symbols))
        })
    }
}

fn build_overview(file_path: String, symbols: Vec<SymbolRecord>) -> FileOverview {
    let total_symbols = symbols.len();
    let (type_like, rest): (Vec<SymbolRecord>, Vec<SymbolRecord>) = symbols
        .into_iter()
        .partition(|s| crate::symbols::extract::is_type_kind(&s.kind));

    let mut types: Vec<TypeOverview> = type_like
        .into_iter()
        .map(|symbol| TypeOverview {
            symbol,
            members: Vec::new(),
        })
        .collect();

    let mut functions = Vec::new();
    for sym in rest {
        let container = sym.containing_type.as_deref().and_then(|ct| {
            types
                .iter_mut()
                .find(|t| t.symbol.name == ct)
        });
        match container {
            Some(t) => t.members.push(sym),
            None => functions.push(sym),
        }
    }

    FileOverview {
        file_path,
        types,
        functions,
        total_symbols,
    }
}

#[derive(Debug, Deserialize)]
struct ReadSymbolsParams {
    file_path: String,
    workspace_path: String,
    names: Vec<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReadSymbolsResult {
    symbols: Vec<ReadSymbol>,
    not_found: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReadSymbol {
    #[serde(flatten)]
    record: SymbolRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

pub struct ReadSymbols;

impl ToolHandler for ReadSymbols {
    fn name(&self) -> &'static str {
        "read_symbols"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: ReadSymbolsParams = parse_params(params)?;
            let full_detail = match params.detail.as_deref() {
                None | Some("signature") => false,
                Some("full") => true,
                Some(other) => {
                    return Err(EngineError::InvalidRequest(format!(
                        "unknown detail '{other}' (expected signature or full)"
                    )));
                }
            };
            let ws = resolve_read(state, &params.workspace_path)?;
            let db = state.index_manager.symbol_db(&ws)?;
            let rel = workspace_relative(&ws, &params.file_path);
            let in_file = db.symbols_in_file(&rel)?;

            let file_lines: Option<Vec<String>> = if full_detail {
                std::fs::read_to_string(ws.canonical.join(&rel))
                    .ok()
                    .map(|c| c.lines().map(|l| l.to_string()).collect())
            } else {
                None
            };

            let mut symbols = Vec::new();
            let mut not_found = Vec::new();
            for name in &params.names {
                let matched: Vec<&SymbolRecord> =
                    in_file.iter().filter(|s| &s.name == name).collect();
                if matched.is_empty() {
                    not_found.push(name.clone());
                    continue;
                }
                for record in matched {
                    let body = file_lines
                        .as_ref()
                        .map(|lines| slice_body(lines, record.start_line, record.end_line));
                    symbols.push(ReadSymbol {
                        record: record.clone(),
                        body,
                    });
                }
            }
            to_value(ReadSymbolsResult { symbols, not_found })
        })
    }
}

fn slice_body(lines: &[String], start_line: u32, end_line: u32) -> String {
    let start = (start_line.saturating_sub(1) as usize).min(lines.len());
    let end = (end_line as usize).clamp(start, lines.len());
    lines[start..end].join("\n")
}
