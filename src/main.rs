use codesearch_engine::{config, index, server, state, tools};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

const EXIT_OK: i32 = 0;
const EXIT_CORRUPT: i32 = 2;
const EXIT_CONFIG: i32 = 3;
const EXIT_USAGE: i32 = 64;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(|s| s.as_str()) {
        None => {}
        Some("--help" | "-h") => {
            println!(
                "codesearch-engine: multi-workspace code search engine\n\n\
                 Speaks line-delimited JSON requests on stdin and responses on stdout.\n\
                 Environment:\n\
                 \x20 CODESEARCH_BASE_DIR  engine state directory (default ~/.coa/codesearch)\n\
                 \x20 CODESEARCH_DEBUG     set to 1 for verbose logging"
            );
            std::process::exit(EXIT_OK);
        }
        Some(other) => {
            eprintln!("unknown argument: {other}\nusage: codesearch-engine [--help]");
            std::process::exit(EXIT_USAGE);
        }
    }

    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let config = config::EngineConfig::from_env();
    if let Err(e) = std::fs::create_dir_all(&config.base_dir) {
        eprintln!(
            "cannot create base directory {}: {e}",
            config.base_dir.display()
        );
        return EXIT_CONFIG;
    }

    let log_dir = config.logs_dir();
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "codesearch-engine.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if config.debug {
        "codesearch_engine=debug"
    } else {
        "codesearch_engine=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Stdout carries the wire protocol; logs go to stderr and the rotated
    // file only.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "codesearch_engine::panic", location = %location, payload = %payload, "thread panicked");
        default_panic(info);
    }));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return EXIT_CONFIG;
        }
    };

    runtime.block_on(async_main(config))
}

async fn async_main(config: config::EngineConfig) -> i32 {
    info!(
        base_dir = %config.base_dir.display(),
        debug = config.debug,
        "codesearch engine starting"
    );

    let state = match state::EngineState::new(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            error!("engine state initialization failed: {e}");
            return EXIT_CONFIG;
        }
    };

    // Startup reconcile: sweep dead locks, probe/repair indexes, find
    // workspaces whose symbol extraction lags.
    let resolver = state.index_manager.resolver().clone();
    let report = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            index::reconcile::reconcile_on_startup(&config, &resolver)
        })
        .await
        .unwrap_or_default()
    };
    if !report.corrupt.is_empty() && !config.repair_auto {
        error!(corrupt = ?report.corrupt, "unrecoverable index corruption and auto-repair is disabled");
        return EXIT_CORRUPT;
    }

    // Re-index stale workspaces in the background; requests are already
    // being served meanwhile.
    {
        let manager = state.index_manager.clone();
        let watchers = state.watcher_manager.clone();
        let stale = report.stale_workspaces.clone();
        tokio::spawn(async move {
            for ws_path in stale {
                let Some(path) = ws_path.to_str() else { continue };
                let Ok(ws) = manager.resolver().resolve(path) else {
                    continue;
                };
                info!(workspace = %ws.hash, "background re-index of stale workspace");
                if let Err(e) = manager
                    .index_workspace(&ws, false, &state::CancelFlag::new())
                    .await
                {
                    error!(workspace = %ws.hash, error = %e, "background re-index failed");
                }
                if let Err(e) = watchers.start_watching(&ws) {
                    error!(workspace = %ws.hash, error = %e, "failed to restore watcher");
                }
            }
        });
    }

    let registry = Arc::new(tools::ToolRegistry::with_builtin());
    let serve = server::serve_stdio(state.clone(), registry);
    tokio::pin!(serve);

    let exit = tokio::select! {
        result = &mut serve => match result {
            Ok(()) => EXIT_OK,
            Err(e) => {
                error!("protocol loop failed: {e}");
                EXIT_CONFIG
            }
        },
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            EXIT_OK
        }
    };

    state.shutdown().await;
    info!("codesearch engine shutdown complete");
    exit
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
