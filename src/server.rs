use crate::error::{EngineError, ErrorInfo};
use crate::state::{CancelFlag, EngineState};
use crate::tools::ToolRegistry;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upper bound on requests processed concurrently; excess requests queue on
/// the semaphore rather than piling up unbounded tasks.
const MAX_IN_FLIGHT: usize = 32;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: serde_json::Value,
    tool: String,
    #[serde(default)]
    params: serde_json::Value,
}

fn ok_response(id: &serde_json::Value, result: serde_json::Value) -> String {
    serde_json::json!({ "id": id, "result": result }).to_string()
}

fn err_response(id: &serde_json::Value, info: ErrorInfo) -> String {
    serde_json::json!({ "id": id, "error": info }).to_string()
}

/// Serve the request/response protocol on stdin/stdout: one JSON request
/// per line in, one JSON response per line out, ids echoed. Requests run
/// concurrently; a writer task serializes output lines.
pub async fn serve_stdio(state: EngineState, registry: Arc<ToolRegistry>) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_lines(state, registry, stdin, stdout).await
}

/// Transport-generic protocol loop, split into a reader (dispatching) side
/// and a writer task, so tests can drive it over an in-memory duplex pipe.
pub async fn serve_lines<R, W>(
    state: EngineState,
    registry: Arc<ToolRegistry>,
    reader: R,
    mut writer: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let writer_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    // Cancellation flags for requests still running, so shutdown can abort
    // them cooperatively.
    let in_flight: Arc<DashMap<u64, CancelFlag>> = Arc::new(DashMap::new());
    let mut next_seq: u64 = 0;

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let info = EngineError::InvalidRequest(format!("malformed request line: {e}"))
                    .to_error_info();
                let _ = out_tx.send(err_response(&serde_json::Value::Null, info)).await;
                continue;
            }
        };

        let seq = next_seq;
        next_seq += 1;
        let cancel = CancelFlag::new();
        in_flight.insert(seq, cancel.clone());

        let state = state.clone();
        let registry = registry.clone();
        let out_tx = out_tx.clone();
        let in_flight_task = in_flight.clone();
        tokio::spawn(async move {
            debug!(tool = %request.tool, "request received");
            let line = match registry
                .dispatch(&state, &request.tool, request.params, cancel)
                .await
            {
                Ok(result) => ok_response(&request.id, result),
                Err(e) => {
                    if !e.is_client_fixable() {
                        warn!(tool = %request.tool, error = %e, "tool failed");
                    }
                    err_response(&request.id, e.to_error_info())
                }
            };
            let _ = out_tx.send(line).await;
            in_flight_task.remove(&seq);
        });

        // Soft back-pressure: stop reading while too many requests run.
        while in_flight.len() >= MAX_IN_FLIGHT {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    info!("input stream closed, draining in-flight requests");
    let drain_deadline = std::time::Instant::now() + std::time::Duration::from_secs(60);
    while !in_flight.is_empty() {
        if std::time::Instant::now() > drain_deadline {
            // Cooperatively abort whatever is still running.
            for entry in in_flight.iter() {
                entry.value().cancel();
            }
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tokio::io::AsyncReadExt;

    async fn run_session(
        base: &std::path::Path,
        requests: &[serde_json::Value],
    ) -> Vec<serde_json::Value> {
        let state = EngineState::new(EngineConfig {
            base_dir: base.to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let registry = Arc::new(ToolRegistry::with_builtin());

        let input = requests
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        let reader = tokio::io::BufReader::new(std::io::Cursor::new(input.into_bytes()));
        let (write_half, mut read_half) = tokio::io::duplex(1 << 20);

        let server = tokio::spawn(serve_lines(state, registry, reader, write_half));
        server.await.unwrap().unwrap();

        let mut output = String::new();
        read_half.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn malformed_line_yields_null_id_error() {
        let base = tempfile::tempdir().unwrap();
        let responses = run_session(base.path(), &[serde_json::json!("not an object")]).await;
        assert_eq!(responses.len(), 1);
        assert!(responses[0]["id"].is_null());
        assert_eq!(responses[0]["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn index_then_search_across_sessions_echoes_ids() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("a.rs"), "fn hello_marker() {}").unwrap();

        let responses = run_session(
            base.path(),
            &[serde_json::json!({
                "id": 7,
                "tool": "index_workspace",
                "params": { "workspace_path": ws.path().to_str().unwrap(), "watch": false },
            })],
        )
        .await;
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[0]["result"]["doc_count"], 1);

        // A fresh session over the same base dir sees the persisted index.
        let responses = run_session(
            base.path(),
            &[serde_json::json!({
                "id": "abc",
                "tool": "text_search",
                "params": { "query": "hello_marker", "workspace_path": ws.path().to_str().unwrap() },
            })],
        )
        .await;
        assert_eq!(responses[0]["id"], "abc");
        assert_eq!(responses[0]["result"]["meta"]["total_results"], 1);
    }

    #[tokio::test]
    async fn error_carries_recovery_hint() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let responses = run_session(
            base.path(),
            &[serde_json::json!({
                "id": 1,
                "tool": "text_search",
                "params": { "query": "x", "workspace_path": ws.path().to_str().unwrap() },
            })],
        )
        .await;
        assert_eq!(responses[0]["error"]["code"], "NO_INDEX");
        assert_eq!(
            responses[0]["error"]["suggested_action"]["tool"],
            "index_workspace"
        );
    }
}
