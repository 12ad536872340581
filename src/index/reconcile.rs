use crate::config::EngineConfig;
use crate::index::pipeline::walk_workspace;
use crate::paths::WorkspaceResolver;
use crate::symbols::store::SymbolDatabase;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sidecar recording the PID that owns the tantivy writer lock, so a later
/// startup can tell a live writer from a crashed one.
pub const WRITER_PID_FILENAME: &str = "writer.pid";

/// Tantivy's on-disk writer lock file.
const TANTIVY_WRITER_LOCK: &str = ".tantivy-writer.lock";

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub swept_locks: Vec<String>,
    pub corrupt: Vec<String>,
    pub repaired: Vec<String>,
    /// Workspaces whose symbol store lags behind file mtimes; callers queue
    /// a background index pass for these.
    pub stale_workspaces: Vec<PathBuf>,
}

/// Startup pass over every index directory on disk:
/// 1. remove writer locks whose owning process is dead,
/// 2. probe index integrity, backing up and dropping bad segment state when
///    auto-repair is enabled,
/// 3. flag workspaces whose symbol extraction lags the source tree.
pub fn reconcile_on_startup(config: &EngineConfig, resolver: &WorkspaceResolver) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for index_dir in resolver.discover_index_dirs() {
        report.scanned += 1;
        let dir_name = index_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if sweep_stale_lock(&index_dir) {
            report.swept_locks.push(dir_name.clone());
        }

        if let Err(probe_error) = probe_index(&index_dir) {
            warn!(dir = %index_dir.display(), error = %probe_error, "index failed integrity probe");
            if config.repair_auto {
                match backup_corrupt(&index_dir) {
                    Ok(backup) => {
                        info!(
                            dir = %index_dir.display(),
                            backup = %backup.display(),
                            "corrupt index backed up; next index pass rebuilds from source"
                        );
                        report.repaired.push(dir_name.clone());
                    }
                    Err(e) => {
                        warn!(dir = %index_dir.display(), error = %e, "backup of corrupt index failed");
                        report.corrupt.push(dir_name.clone());
                    }
                }
            } else {
                report.corrupt.push(dir_name.clone());
            }
            continue;
        }

        if let Some(ws_path) = WorkspaceResolver::try_reverse(&index_dir) {
            if ws_path.is_dir() && symbol_store_is_stale(config, &dir_name, &ws_path) {
                report.stale_workspaces.push(ws_path);
            }
        }
    }

    info!(
        scanned = report.scanned,
        swept = report.swept_locks.len(),
        corrupt = report.corrupt.len(),
        repaired = report.repaired.len(),
        stale = report.stale_workspaces.len(),
        "startup reconcile complete"
    );
    report
}

/// Remove the writer lock if its recorded owner is dead. Returns whether a
/// stale lock was swept. A lock file without a PID sidecar is treated as
/// stale only when no sidecar-owning process can exist (crash before the
/// sidecar write), which the sidecar ordering prevents.
pub fn sweep_stale_lock(index_dir: &Path) -> bool {
    let lock_path = index_dir.join(TANTIVY_WRITER_LOCK);
    let pid_path = index_dir.join(WRITER_PID_FILENAME);
    if !lock_path.exists() {
        // A pid sidecar without a lock is leftover bookkeeping.
        let _ = std::fs::remove_file(&pid_path);
        return false;
    }

    let owner = std::fs::read_to_string(&pid_path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());
    let stale = match owner {
        Some(pid) if pid == std::process::id() => false,
        Some(pid) => !pid_alive(pid),
        None => true,
    };
    if stale {
        let _ = std::fs::remove_file(&lock_path);
        let _ = std::fs::remove_file(&pid_path);
        info!(dir = %index_dir.display(), "removed stale writer lock");
    }
    stale
}

/// Record this process as the writer-lock owner. Called right after the
/// writer is created; removed on dispose.
pub fn write_pid_sidecar(index_dir: &Path) {
    let _ = std::fs::write(
        index_dir.join(WRITER_PID_FILENAME),
        std::process::id().to_string(),
    );
}

pub fn remove_pid_sidecar(index_dir: &Path) {
    let _ = std::fs::remove_file(index_dir.join(WRITER_PID_FILENAME));
}

#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes existence without signalling; EPERM still means
    // the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub fn pid_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

/// Open the index read-only and touch its segment metadata.
fn probe_index(index_dir: &Path) -> Result<(), String> {
    if !index_dir.join("meta.json").exists() {
        // Nothing indexed yet; an empty directory is healthy.
        return Ok(());
    }
    let index = tantivy::Index::open_in_dir(index_dir).map_err(|e| e.to_string())?;
    let reader = index.reader().map_err(|e| e.to_string())?;
    let searcher = reader.searcher();
    let _docs: u32 = searcher.segment_readers().iter().map(|s| s.num_docs()).sum();
    Ok(())
}

/// Move corrupt segment state aside (never delete user data outright) and
/// leave a fresh directory for the rebuild.
fn backup_corrupt(index_dir: &Path) -> std::io::Result<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let backup = index_dir.with_extension(format!("corrupt-{stamp}"));
    // Preserve the metadata sidecar so the workspace mapping survives.
    let metadata = std::fs::read(index_dir.join(crate::paths::METADATA_FILENAME)).ok();
    std::fs::rename(index_dir, &backup)?;
    std::fs::create_dir_all(index_dir)?;
    if let Some(metadata) = metadata {
        let _ = std::fs::write(index_dir.join(crate::paths::METADATA_FILENAME), metadata);
    }
    Ok(backup)
}

/// True when any file on disk is newer than its recorded extraction time
/// (or missing from the store entirely).
fn symbol_store_is_stale(config: &EngineConfig, ws_hash: &str, ws_path: &Path) -> bool {
    let db_path = config.symbols_dir().join(format!("{ws_hash}.db"));
    if !db_path.exists() {
        return true;
    }
    let Ok(db) = SymbolDatabase::open(&db_path, ws_hash) else {
        return true;
    };
    let Ok(times) = db.extraction_times() else {
        return true;
    };
    for file in walk_workspace(ws_path, config) {
        match times.get(&file.relative_path) {
            Some(&extracted) if extracted >= file.last_modified as i64 => {}
            _ => return true,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn own_pid_is_alive_and_bogus_pid_is_not() {
        assert!(pid_alive(std::process::id()));
        // PID beyond any real allocation on test machines.
        assert!(!pid_alive(3_999_999));
    }

    #[test]
    fn stale_lock_from_dead_pid_is_swept() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(TANTIVY_WRITER_LOCK), "").unwrap();
        std::fs::write(tmp.path().join(WRITER_PID_FILENAME), "3999999").unwrap();
        assert!(sweep_stale_lock(tmp.path()));
        assert!(!tmp.path().join(TANTIVY_WRITER_LOCK).exists());
        assert!(!tmp.path().join(WRITER_PID_FILENAME).exists());
    }

    #[test]
    fn live_lock_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(TANTIVY_WRITER_LOCK), "").unwrap();
        std::fs::write(
            tmp.path().join(WRITER_PID_FILENAME),
            std::process::id().to_string(),
        )
        .unwrap();
        assert!(!sweep_stale_lock(tmp.path()));
        assert!(tmp.path().join(TANTIVY_WRITER_LOCK).exists());
    }

    #[test]
    fn corrupt_meta_is_backed_up_with_metadata_preserved() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("deadbeef00000000");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meta.json"), "{ not valid").unwrap();
        std::fs::write(
            dir.join(crate::paths::METADATA_FILENAME),
            r#"{"original_path":"/ws","created_at":"2025-01-01T00:00:00Z","engine_version":"0"}"#,
        )
        .unwrap();

        assert!(probe_index(&dir).is_err());
        let backup = backup_corrupt(&dir).unwrap();
        assert!(backup.exists());
        assert!(!dir.join("meta.json").exists());
        assert!(dir.join(crate::paths::METADATA_FILENAME).exists());
    }

    #[test]
    fn reconcile_scans_and_repairs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            base_dir: tmp.path().to_path_buf(),
            repair_auto: true,
            ..Default::default()
        };
        let resolver = WorkspaceResolver::new(&config);
        let dir = config.indexes_dir().join("feedbead00000000");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meta.json"), "garbage").unwrap();

        let report = reconcile_on_startup(&config, &resolver);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.repaired, vec!["feedbead00000000".to_string()]);
        assert!(report.corrupt.is_empty());
    }
}
