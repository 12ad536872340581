use crate::config::EngineConfig;
use crate::query::search::SearchHit;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Instant;

/// Budget split: the bulk goes to result data, the rest to insights and
/// follow-up actions.
const DATA_SHARE: f32 = 0.70;
const INSIGHT_SHARE: f32 = 0.15;

const MAX_STORED_HANDLES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Full,
    Summary,
}

impl ResponseMode {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("summary") => ResponseMode::Summary,
            _ => ResponseMode::Full,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestedAction {
    pub tool: String,
    pub params: serde_json::Value,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMeta {
    pub total_results: usize,
    pub returned_results: usize,
    pub estimated_tokens: usize,
    pub token_budget: usize,
    pub response_mode: ResponseMode,
    pub auto_mode_switch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_handle: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub insights: Vec<String>,
    pub actions: Vec<SuggestedAction>,
    pub meta: ResponseMeta,
}

/// In-memory store of full, unreduced result sets, keyed by a
/// content-addressed URI so a later call can retrieve what the reducer cut.
pub struct ResultHandleStore {
    entries: DashMap<String, (serde_json::Value, Instant)>,
}

impl Default for ResultHandleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultHandleStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store a payload and return its `codesearch://results/<digest>` URI.
    /// Storing identical content twice yields the same handle.
    pub fn store(&self, payload: &serde_json::Value) -> String {
        let serialized = payload.to_string();
        let digest = Sha256::digest(serialized.as_bytes());
        let short: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        let handle = format!("codesearch://results/{short}");
        self.entries
            .insert(handle.clone(), (payload.clone(), Instant::now()));
        self.evict_over_limit();
        handle
    }

    pub fn get(&self, handle: &str) -> Option<serde_json::Value> {
        self.entries.get(handle).map(|e| e.value().0.clone())
    }

    fn evict_over_limit(&self) {
        while self.entries.len() > MAX_STORED_HANDLES {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().1)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Rough token estimate: one token per four characters of serialized JSON.
pub fn estimate_tokens(value: &impl Serialize) -> usize {
    serde_json::to_string(value).map(|s| s.len().div_ceil(4)).unwrap_or(0)
}

fn estimate_hit_tokens(hit: &SearchHit, config: &EngineConfig) -> usize {
    let measured = hit.path.len() / 4 + hit.relative_path.len() / 4 + 16;
    match &hit.snippet {
        Some(s) => (measured + s.text.len() / 4).max(config.tokens_per_hit_snippet / 2),
        None => measured.max(config.tokens_per_hit_bare / 2),
    }
}

/// Shape a search result under a token budget.
///
/// Hits arrive priority-ordered (score-sorted). The reducer keeps hits
/// while they fit the data share of the budget; when anything is cut, the
/// full list is stored under a content-addressed handle, the response
/// switches to summary mode, and the switch is recorded in the metadata.
pub fn shape_search_response(
    query: &str,
    mut hits: Vec<SearchHit>,
    requested_mode: ResponseMode,
    budget: usize,
    handles: &ResultHandleStore,
    config: &EngineConfig,
) -> SearchResponse {
    let total = hits.len();
    let budget = budget.max(200);
    let data_budget = (budget as f32 * DATA_SHARE) as usize;
    let insight_budget = (budget as f32 * INSIGHT_SHARE) as usize;

    let mut mode = if total == 0 {
        ResponseMode::Summary
    } else {
        requested_mode
    };

    if mode == ResponseMode::Summary {
        for hit in &mut hits {
            hit.snippet = None;
        }
    }

    let mut spent = 0usize;
    let mut kept = Vec::with_capacity(hits.len());
    let mut dropped = Vec::new();
    for hit in hits {
        let cost = estimate_hit_tokens(&hit, config);
        if spent + cost <= data_budget {
            spent += cost;
            kept.push(hit);
        } else {
            dropped.push(hit);
        }
    }

    let mut auto_mode_switch = false;
    let mut result_handle = None;
    if !dropped.is_empty() {
        // Retry in summary mode before giving up on the overflow.
        if mode == ResponseMode::Full {
            mode = ResponseMode::Summary;
            auto_mode_switch = true;
            let mut all: Vec<SearchHit> = kept.drain(..).chain(dropped.drain(..)).collect();
            let full_payload = serde_json::to_value(&all).unwrap_or_default();
            result_handle = Some(handles.store(&full_payload));
            for hit in &mut all {
                hit.snippet = None;
            }
            spent = 0;
            for hit in all {
                let cost = estimate_hit_tokens(&hit, config);
                if spent + cost <= data_budget {
                    spent += cost;
                    kept.push(hit);
                } else {
                    dropped.push(hit);
                }
            }
        } else {
            let full_payload = serde_json::to_value(
                kept.iter().chain(dropped.iter()).collect::<Vec<_>>(),
            )
            .unwrap_or_default();
            result_handle = Some(handles.store(&full_payload));
        }
    }

    let mut insights = build_insights(&kept, total);
    while estimate_tokens(&insights) > insight_budget && !insights.is_empty() {
        insights.pop();
    }
    let actions = build_actions(query, &kept, total);

    let mut response = SearchResponse {
        hits: kept,
        insights,
        actions,
        meta: ResponseMeta {
            total_results: total,
            returned_results: 0,
            estimated_tokens: 0,
            token_budget: budget,
            response_mode: mode,
            auto_mode_switch,
            result_handle,
        },
    };

    // Hard invariant: the final serialized estimate never exceeds the
    // budget. Trim lowest-priority hits until it holds.
    loop {
        response.meta.returned_results = response.hits.len();
        response.meta.estimated_tokens = estimate_tokens(&response);
        if response.meta.estimated_tokens <= budget {
            break;
        }
        if response.hits.pop().is_none() {
            response.insights.clear();
            response.actions.clear();
            response.meta.returned_results = 0;
            response.meta.estimated_tokens = estimate_tokens(&response);
            break;
        }
    }
    response
}

/// Deterministic aggregates over the result set; no model calls, ever.
fn build_insights(hits: &[SearchHit], total: usize) -> Vec<String> {
    let mut insights = Vec::new();
    if hits.is_empty() {
        if total == 0 {
            insights.push("No results matched the query".to_string());
        }
        return insights;
    }

    let mut by_ext: Vec<(String, usize)> = Vec::new();
    for hit in hits {
        let key = if hit.extension.is_empty() {
            "(none)".to_string()
        } else {
            hit.extension.clone()
        };
        match by_ext.iter_mut().find(|(e, _)| *e == key) {
            Some((_, n)) => *n += 1,
            None => by_ext.push((key, 1)),
        }
    }
    by_ext.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let summary = by_ext
        .iter()
        .take(4)
        .map(|(e, n)| format!("{e} ({n})"))
        .collect::<Vec<_>>()
        .join(", ");
    insights.push(format!(
        "{total} result(s) across {} file type(s): {summary}",
        by_ext.len()
    ));

    let mut by_dir: Vec<(String, usize)> = Vec::new();
    for hit in hits {
        let dir = hit
            .relative_path
            .rsplit_once('/')
            .map(|(d, _)| d.to_string())
            .unwrap_or_else(|| ".".to_string());
        match by_dir.iter_mut().find(|(d, _)| *d == dir) {
            Some((_, n)) => *n += 1,
            None => by_dir.push((dir, 1)),
        }
    }
    by_dir.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if let Some((dir, count)) = by_dir.first() {
        if *count > 1 {
            insights.push(format!(
                "Results concentrate in {dir}/ ({count} of {})",
                hits.len()
            ));
        }
    }

    let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
    let max = hits.iter().map(|h| h.score).fold(f32::NEG_INFINITY, f32::max);
    if hits.len() > 1 && max.is_finite() {
        insights.push(format!("Score spread {min:.2} to {max:.2}"));
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let week = 7 * 86_400;
    let recent = hits
        .iter()
        .filter(|h| now.saturating_sub(h.last_modified) < week)
        .count();
    if recent > 0 {
        insights.push(format!(
            "{recent} of {} result(s) modified within the last 7 days",
            hits.len()
        ));
    }
    insights
}

fn build_actions(query: &str, hits: &[SearchHit], total: usize) -> Vec<SuggestedAction> {
    let mut actions = Vec::new();
    if total == 0 {
        actions.push(SuggestedAction {
            tool: "text_search".to_string(),
            params: serde_json::json!({ "query": query, "search_type": "fuzzy" }),
            reason: "No exact matches; a fuzzy pass may recover near-misses".to_string(),
        });
        return actions;
    }
    if let Some(top) = hits.first() {
        actions.push(SuggestedAction {
            tool: "get_symbols_overview".to_string(),
            params: serde_json::json!({ "file_path": top.relative_path }),
            reason: "Outline the highest-ranked file".to_string(),
        });
    }
    if query
        .chars()
        .next()
        .is_some_and(|c| c.is_uppercase())
        && query.chars().all(|c| c.is_alphanumeric())
    {
        actions.push(SuggestedAction {
            tool: "find_references".to_string(),
            params: serde_json::json!({ "symbol": query }),
            reason: "The query looks like a symbol name".to_string(),
        });
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::search::SnippetInfo;

    fn hit(rel: &str, score: f32, snippet: bool) -> SearchHit {
        SearchHit {
            path: format!("/ws/{rel}"),
            relative_path: rel.to_string(),
            filename: rel.rsplit('/').next().unwrap_or(rel).to_string(),
            extension: rel.rsplit('.').next().unwrap_or("").to_string(),
            language: "rust".to_string(),
            size: 100,
            last_modified: 0,
            score,
            base_score: score,
            snippet: snippet.then(|| SnippetInfo {
                line: 1,
                text: "fn example() {} // some representative line of code".to_string(),
            }),
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn zero_hits_use_summary_mode() {
        let store = ResultHandleStore::new();
        let resp = shape_search_response("x", vec![], ResponseMode::Full, 20_000, &store, &config());
        assert_eq!(resp.meta.response_mode, ResponseMode::Summary);
        assert_eq!(resp.meta.total_results, 0);
        assert!(!resp.actions.is_empty());
    }

    #[test]
    fn budget_is_never_exceeded() {
        let store = ResultHandleStore::new();
        let hits: Vec<SearchHit> = (0..200)
            .map(|i| hit(&format!("src/module_{i}/file_{i}.rs"), 1.0 - i as f32 / 300.0, true))
            .collect();
        let resp = shape_search_response("query", hits, ResponseMode::Full, 2000, &store, &config());
        assert!(resp.meta.estimated_tokens <= resp.meta.token_budget);
        assert!(resp.meta.returned_results < resp.meta.total_results);
        assert!(resp.meta.auto_mode_switch);
        assert!(resp.meta.result_handle.is_some());
    }

    #[test]
    fn stored_handle_retrieves_full_list() {
        let store = ResultHandleStore::new();
        let hits: Vec<SearchHit> = (0..100)
            .map(|i| hit(&format!("src/f{i}.rs"), 0.9, true))
            .collect();
        let resp = shape_search_response("q", hits, ResponseMode::Full, 1000, &store, &config());
        let handle = resp.meta.result_handle.unwrap();
        let full = store.get(&handle).unwrap();
        assert_eq!(full.as_array().unwrap().len(), 100);
    }

    #[test]
    fn small_result_set_passes_through_untouched() {
        let store = ResultHandleStore::new();
        let hits = vec![hit("src/a.rs", 0.9, true), hit("src/b.rs", 0.5, true)];
        let resp =
            shape_search_response("q", hits, ResponseMode::Full, 20_000, &store, &config());
        assert_eq!(resp.meta.returned_results, 2);
        assert!(!resp.meta.auto_mode_switch);
        assert!(resp.meta.result_handle.is_none());
        assert!(resp.hits[0].snippet.is_some());
    }

    #[test]
    fn insights_are_deterministic() {
        let store = ResultHandleStore::new();
        let hits = vec![hit("src/a.rs", 0.9, false), hit("src/b.rs", 0.5, false)];
        let a = shape_search_response("q", hits.clone(), ResponseMode::Full, 20_000, &store, &config());
        let b = shape_search_response("q", hits, ResponseMode::Full, 20_000, &store, &config());
        assert_eq!(a.insights, b.insights);
    }

    #[test]
    fn handle_store_is_content_addressed_and_bounded() {
        let store = ResultHandleStore::new();
        let payload = serde_json::json!({"a": 1});
        let h1 = store.store(&payload);
        let h2 = store.store(&payload);
        assert_eq!(h1, h2);
        for i in 0..(MAX_STORED_HANDLES + 10) {
            store.store(&serde_json::json!({ "i": i }));
        }
        assert!(store.entries.len() <= MAX_STORED_HANDLES);
    }
}
