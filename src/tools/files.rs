use crate::edit;
use crate::error::{EngineError, EngineResult};
use crate::query::search;
use crate::state::{CancelFlag, EngineState};
use crate::tools::{ToolFuture, ToolHandler, parse_params, resolve_read, to_value};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct SearchFilesParams {
    pattern: String,
    workspace_path: String,
    #[serde(default)]
    extension_filter: Option<Vec<String>>,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSearchResult {
    pub files: Vec<FileSearchHit>,
    pub total_matched: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSearchHit {
    pub path: String,
    pub relative_path: String,
    pub filename: String,
    pub size: u64,
    pub last_modified: u64,
}

enum PathPattern {
    Glob(Box<GlobMatcher>),
    Regex(regex::Regex),
}

impl PathPattern {
    /// Patterns carrying regex-only syntax compile as regexes; everything
    /// else is treated as a glob first, regex as the fallback.
    fn compile(pattern: &str) -> EngineResult<Self> {
        let regex_markers = pattern.contains(['^', '$', '(', ')', '|', '+'])
            || pattern.contains(".*")
            || pattern.contains('\\');
        if regex_markers {
            if let Ok(re) = regex::Regex::new(pattern) {
                return Ok(PathPattern::Regex(re));
            }
        }
        if let Ok(glob) = Glob::new(pattern) {
            return Ok(PathPattern::Glob(Box::new(glob.compile_matcher())));
        }
        regex::Regex::new(pattern)
            .map(PathPattern::Regex)
            .map_err(|e| EngineError::InvalidQuery {
                message: format!("pattern is neither a valid glob nor a valid regex: {e}"),
                hint: "Use a glob like 'src/**/*.rs' or a regular expression".to_string(),
            })
    }

    fn matches(&self, relative_path: &str, filename: &str) -> bool {
        match self {
            PathPattern::Glob(g) => g.is_match(relative_path) || g.is_match(filename),
            PathPattern::Regex(r) => r.is_match(relative_path) || r.is_match(filename),
        }
    }
}

pub struct SearchFiles;

impl ToolHandler for SearchFiles {
    fn name(&self) -> &'static str {
        "search_files"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: SearchFilesParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let pattern = PathPattern::compile(&params.pattern)?;
            let max_results = params.max_results.unwrap_or(200).clamp(1, 5000);

            let ctx = state.index_manager.get_context(&ws, false).await?;
            let all = search::all_documents(&ctx, 100_000, state.index_manager.reader_max_age())?;

            let ext_filter: Option<Vec<String>> = params
                .extension_filter
                .map(|v| v.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect());

            let mut files = Vec::new();
            let mut total = 0usize;
            for hit in all {
                if let Some(exts) = &ext_filter {
                    if !exts.contains(&hit.extension) {
                        continue;
                    }
                }
                if !pattern.matches(&hit.relative_path, &hit.filename) {
                    continue;
                }
                total += 1;
                if files.len() < max_results {
                    files.push(FileSearchHit {
                        path: hit.path,
                        relative_path: hit.relative_path,
                        filename: hit.filename,
                        size: hit.size,
                        last_modified: hit.last_modified,
                    });
                }
            }
            to_value(FileSearchResult {
                truncated: total > files.len(),
                total_matched: total,
                files,
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecentFilesParams {
    workspace_path: String,
    /// Human time frame: `30m`, `2h`, `7d` (or a bare number of hours).
    time_frame: String,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct RecentFiles;

impl ToolHandler for RecentFiles {
    fn name(&self) -> &'static str {
        "recent_files"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: RecentFilesParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let seconds = parse_time_frame(&params.time_frame)?;
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let cutoff = now.saturating_sub(seconds);
            let limit = params.max_results.unwrap_or(50).clamp(1, 500);

            let hits = state.index_manager.recent_files(&ws, cutoff, limit).await?;
            to_value(serde_json::json!({
                "time_frame": params.time_frame,
                "cutoff": cutoff,
                "files": hits,
            }))
        })
    }
}

fn parse_time_frame(frame: &str) -> EngineResult<u64> {
    let frame = frame.trim();
    let (digits, unit) = frame.split_at(
        frame
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(frame.len()),
    );
    let value: u64 = digits.parse().map_err(|_| EngineError::InvalidRequest(
        format!("invalid time_frame '{frame}' (expected forms: 30m, 2h, 7d)"),
    ))?;
    let multiplier = match unit.trim() {
        "m" | "min" => 60,
        "" | "h" | "hr" => 3600,
        "d" | "day" | "days" => 86_400,
        "w" => 7 * 86_400,
        other => {
            return Err(EngineError::InvalidRequest(format!(
                "unknown time unit '{other}' in time_frame"
            )));
        }
    };
    Ok(value * multiplier)
}

#[derive(Debug, Deserialize)]
struct LineSearchParams {
    query: String,
    workspace_path: String,
    #[serde(default)]
    context_lines: Option<usize>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct LineSearch;

impl ToolHandler for LineSearch {
    fn name(&self) -> &'static str {
        "line_search"
    }

    fn execute<'a>(
        &'a self,
        state: &'a EngineState,
        params: serde_json::Value,
        _cancel: CancelFlag,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let params: LineSearchParams = parse_params(params)?;
            let ws = resolve_read(state, &params.workspace_path)?;
            let context_lines = params.context_lines.unwrap_or(2).min(10);
            let max_results = params.max_results.unwrap_or(100).clamp(1, 1000);
            let config = state.config.clone();
            let result = tokio::task::spawn_blocking(move || {
                edit::line_search(&ws, &config, &params.query, context_lines, max_results)
            })
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("line_search task failed: {e}")))??;
            to_value(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_frames_parse() {
        assert_eq!(parse_time_frame("30m").unwrap(), 1800);
        assert_eq!(parse_time_frame("2h").unwrap(), 7200);
        assert_eq!(parse_time_frame("7d").unwrap(), 7 * 86_400);
        assert_eq!(parse_time_frame("3").unwrap(), 3 * 3600);
        assert!(parse_time_frame("soon").is_err());
    }

    #[test]
    fn glob_and_regex_patterns_compile() {
        let glob = PathPattern::compile("src/**/*.rs").unwrap();
        assert!(glob.matches("src/index/manager.rs", "manager.rs"));
        assert!(!glob.matches("tests/e2e.rs", "e2e.rs"));

        let regex = PathPattern::compile(r"^tests/.*\.rs$").unwrap();
        assert!(regex.matches("tests/e2e.rs", "e2e.rs"));
    }
}
