use codesearch_engine::config::EngineConfig;
use codesearch_engine::error::EngineError;
use codesearch_engine::state::{CancelFlag, EngineState};
use codesearch_engine::tools::ToolRegistry;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

struct Harness {
    _base: tempfile::TempDir,
    ws: tempfile::TempDir,
    state: EngineState,
    registry: ToolRegistry,
}

impl Harness {
    fn new() -> Self {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            base_dir: base.path().to_path_buf(),
            // Short watcher windows keep the incremental tests fast; the
            // debounce-relative guarantees are what's under test.
            watcher_debounce_ms: 250,
            autocommit_secs: 1,
            ..Default::default()
        };
        let state = EngineState::new(config).unwrap();
        Self {
            _base: base,
            ws,
            state,
            registry: ToolRegistry::with_builtin(),
        }
    }

    fn ws_path(&self) -> &str {
        self.ws.path().to_str().unwrap()
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.ws.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    async fn call(&self, tool: &str, params: serde_json::Value) -> Result<serde_json::Value, EngineError> {
        self.registry
            .dispatch(&self.state, tool, params, CancelFlag::new())
            .await
    }

    async fn index(&self) -> serde_json::Value {
        self.call(
            "index_workspace",
            json!({ "workspace_path": self.ws_path(), "watch": false }),
        )
        .await
        .unwrap()
    }

    async fn search(&self, query: &str) -> serde_json::Value {
        self.call(
            "text_search",
            json!({ "query": query, "workspace_path": self.ws_path() }),
        )
        .await
        .unwrap()
    }
}

const FOO_CS: &str =
    "public class HttpClientFactory {\n    public void Build() {\n        // TODO wire defaults\n    }\n}\n";
const BAR_CS: &str =
    "public class Bar {\n    public void Run() {\n        new HttpClientFactory().Build();\n    }\n}\n";

#[tokio::test(flavor = "multi_thread")]
async fn empty_workspace_indexes_and_searches_clean() {
    let h = Harness::new();
    let report = h.index().await;
    assert_eq!(report["new"], true);
    assert_eq!(report["doc_count"], 0);

    let response = h.search("x").await;
    assert_eq!(response["meta"]["total_results"], 0);
    assert_eq!(response["meta"]["response_mode"], "summary");
}

#[tokio::test(flavor = "multi_thread")]
async fn single_file_search_returns_snippet() {
    let h = Harness::new();
    h.write("src/Foo.cs", FOO_CS);
    h.index().await;

    let response = h.search("HttpClient").await;
    let hits = response["hits"].as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["relative_path"], "src/Foo.cs");
    assert!(
        hits[0]["snippet"]["text"]
            .as_str()
            .unwrap()
            .contains("HttpClientFactory")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn camel_case_split_gives_multi_word_recall() {
    let h = Harness::new();
    h.write("src/Foo.cs", FOO_CS);
    h.index().await;

    let response = h.search("client factory").await;
    let hits = response["hits"].as_array().unwrap();
    assert!(hits.iter().any(|hit| hit["relative_path"] == "src/Foo.cs"));
}

#[tokio::test(flavor = "multi_thread")]
async fn leading_wildcard_rejected_with_hint() {
    let h = Harness::new();
    h.write("src/util.rs", "pub fn util() {}");
    h.index().await;

    let err = h
        .call(
            "text_search",
            json!({ "query": "*util", "workspace_path": h.ws_path() }),
        )
        .await
        .unwrap_err();
    let info = err.to_error_info();
    assert_eq!(info.code, "INVALID_QUERY");
    assert!(!info.hint.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn watcher_picks_up_appended_marker() {
    let h = Harness::new();
    h.write("src/Foo.cs", FOO_CS);
    h.call(
        "index_workspace",
        json!({ "workspace_path": h.ws_path(), "watch": true }),
    )
    .await
    .unwrap();

    // Append on disk without any explicit re-index call.
    let appended = format!("{FOO_CS}// marker-xyz\n");
    h.write("src/Foo.cs", &appended);

    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        let response = h.search("marker-xyz").await;
        if response["meta"]["total_results"].as_u64().unwrap() >= 1 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "watcher never surfaced the appended marker"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn symbol_search_and_references_across_files() {
    let h = Harness::new();
    h.write("src/Foo.cs", FOO_CS);
    h.write("src/Bar.cs", BAR_CS);
    h.index().await;

    let result = h
        .call(
            "symbol_search",
            json!({
                "query": "HttpClientFactory",
                "workspace_path": h.ws_path(),
                "kind": "class",
            }),
        )
        .await
        .unwrap();
    let symbols = result["symbols"].as_array().unwrap();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0]["file_path"], "src/Foo.cs");

    let refs = h
        .call(
            "find_references",
            json!({ "symbol": "HttpClientFactory", "workspace_path": h.ws_path() }),
        )
        .await
        .unwrap();
    let occurrences = refs["references"].as_array().unwrap();
    assert!(
        occurrences
            .iter()
            .any(|o| o["file_path"] == "src/Bar.cs"),
        "expected a reference from Bar.cs, got {occurrences:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn goto_definition_edit_reindex_round_trip() {
    let h = Harness::new();
    h.write("src/Foo.cs", FOO_CS);
    h.write("src/Bar.cs", BAR_CS);
    h.index().await;

    let defs = h
        .call(
            "goto_definition",
            json!({ "symbol": "Build", "workspace_path": h.ws_path() }),
        )
        .await
        .unwrap();
    assert_eq!(defs[0]["file_path"], "src/Foo.cs");
    let line = defs[0]["start_line"].as_u64().unwrap() as usize;

    // Replace the definition line through the edit tool, then confirm the
    // re-index shows the new name and drops the old one.
    h.call(
        "edit_lines",
        json!({
            "file_path": "src/Foo.cs",
            "workspace_path": h.ws_path(),
            "operation": "replace",
            "line": line,
            "content": "    public void Assemble() {",
        }),
    )
    .await
    .unwrap();

    let defs = h
        .call(
            "goto_definition",
            json!({ "symbol": "Assemble", "workspace_path": h.ws_path() }),
        )
        .await
        .unwrap();
    assert_eq!(defs[0]["file_path"], "src/Foo.cs");

    let err = h
        .call(
            "goto_definition",
            json!({ "symbol": "Build", "workspace_path": h.ws_path() }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let response = h.search("Assemble").await;
    assert!(response["meta"]["total_results"].as_u64().unwrap() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn search_and_replace_preview_then_apply() {
    let h = Harness::new();
    h.write("src/a.rs", "fn legacyxyz() {}\nfn caller() { legacyxyz(); }\n");
    h.index().await;

    let preview = h
        .call(
            "search_and_replace",
            json!({
                "query": "legacyxyz",
                "replacement": "modernabc",
                "workspace_path": h.ws_path(),
                "preview": true,
            }),
        )
        .await
        .unwrap();
    assert_eq!(preview["preview"], true);
    assert_eq!(preview["total_replacements"], 2);

    let applied = h
        .call(
            "search_and_replace",
            json!({
                "query": "legacyxyz",
                "replacement": "modernabc",
                "workspace_path": h.ws_path(),
                "preview": false,
            }),
        )
        .await
        .unwrap();
    assert_eq!(applied["files_changed"], 1);

    let response = h.search("modernabc").await;
    assert!(response["meta"]["total_results"].as_u64().unwrap() >= 1);
    let stale = h.search("legacyxyz").await;
    assert_eq!(stale["meta"]["total_results"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn recent_files_and_file_pattern_search() {
    let h = Harness::new();
    h.write("src/main.rs", "fn main() {}");
    h.write("src/lib.rs", "pub fn lib() {}");
    h.write("docs/notes.md", "# notes");
    h.index().await;

    let recent = h
        .call(
            "recent_files",
            json!({ "workspace_path": h.ws_path(), "time_frame": "1h" }),
        )
        .await
        .unwrap();
    assert_eq!(recent["files"].as_array().unwrap().len(), 3);

    let files = h
        .call(
            "search_files",
            json!({ "pattern": "src/**/*.rs", "workspace_path": h.ws_path() }),
        )
        .await
        .unwrap();
    assert_eq!(files["total_matched"], 2);

    let filtered = h
        .call(
            "search_files",
            json!({
                "pattern": "**/*",
                "workspace_path": h.ws_path(),
                "extension_filter": ["md"],
            }),
        )
        .await
        .unwrap();
    assert_eq!(filtered["total_matched"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn trace_call_path_follows_calls_down() {
    let h = Harness::new();
    h.write("src/Foo.cs", FOO_CS);
    h.write("src/Bar.cs", BAR_CS);
    h.index().await;

    let graph = h
        .call(
            "trace_call_path",
            json!({
                "symbol": "Run",
                "workspace_path": h.ws_path(),
                "direction": "down",
            }),
        )
        .await
        .unwrap();
    let children = graph["root"]["children"].as_array().unwrap();
    assert!(children.iter().any(|c| c["symbol"] == "Build"));
}

#[tokio::test(flavor = "multi_thread")]
async fn overview_and_read_symbols() {
    let h = Harness::new();
    h.write("src/Foo.cs", FOO_CS);
    h.index().await;

    let overview = h
        .call(
            "get_symbols_overview",
            json!({ "file_path": "src/Foo.cs", "workspace_path": h.ws_path() }),
        )
        .await
        .unwrap();
    let types = overview["types"].as_array().unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0]["name"], "HttpClientFactory");
    assert_eq!(types[0]["members"].as_array().unwrap().len(), 1);

    let read = h
        .call(
            "read_symbols",
            json!({
                "file_path": "src/Foo.cs",
                "workspace_path": h.ws_path(),
                "names": ["Build", "Nonexistent"],
                "detail": "full",
            }),
        )
        .await
        .unwrap();
    assert_eq!(read["not_found"], json!(["Nonexistent"]));
    let body = read["symbols"][0]["body"].as_str().unwrap();
    assert!(body.contains("public void Build()"));
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_reconciler_completes_after_unclean_state() {
    let h = Harness::new();
    h.write("src/a.rs", "fn a() {}");
    h.index().await;

    // Simulate a crashed writer: stale lock + dead-pid sidecar.
    let resolver = h.state.index_manager.resolver().clone();
    let ws = resolver.resolve(h.ws_path()).unwrap();
    let index_dir = resolver.index_dir(&ws);
    std::fs::write(index_dir.join(".tantivy-writer.lock"), "").unwrap();
    std::fs::write(index_dir.join("writer.pid"), "3999999").unwrap();

    let report = codesearch_engine::index::reconcile::reconcile_on_startup(
        &h.state.config,
        &resolver,
    );
    assert!(report.swept_locks.contains(&ws.hash));
    assert!(report.corrupt.is_empty());

    // The workspace still answers searches afterwards.
    let response = h.search("fn").await;
    assert!(response["meta"]["total_results"].as_u64().unwrap() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn hash_stability_and_try_reverse(){
    let h = Harness::new();
    h.index().await;
    let resolver = h.state.index_manager.resolver();
    let a = resolver.resolve(h.ws_path()).unwrap();
    let b = resolver
        .resolve(a.canonical.to_str().unwrap())
        .unwrap();
    assert_eq!(a.hash, b.hash);

    let recovered =
        codesearch_engine::paths::WorkspaceResolver::try_reverse(&resolver.index_dir(&a))
            .unwrap();
    assert_eq!(
        Path::new(&recovered).to_string_lossy().replace('\\', "/"),
        a.display_path()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn score_ordering_is_deterministic_across_runs() {
    let h = Harness::new();
    for i in 0..8 {
        h.write(
            &format!("src/mod{i}.rs"),
            &format!("pub fn handler_{i}() {{ process_request(); }}"),
        );
    }
    h.index().await;

    let ordering = |response: &serde_json::Value| -> Vec<String> {
        response["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["relative_path"].as_str().unwrap().to_string())
            .collect()
    };
    let first = ordering(&h.search("process request").await);
    assert!(!first.is_empty());
    for _ in 0..3 {
        assert_eq!(first, ordering(&h.search("process request").await));
    }
}
