use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const METADATA_FILENAME: &str = "workspace_metadata.json";

/// A canonicalized workspace and its stable short identifier.
///
/// The hash is sha256 over the normalized canonical path, truncated to 16 hex
/// chars. Two distinct canonical paths mapping to the same hash is treated as
/// a fatal configuration error by the index manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceId {
    pub canonical: PathBuf,
    pub hash: String,
}

impl WorkspaceId {
    pub fn display_path(&self) -> String {
        self.canonical.to_string_lossy().replace('\\', "/")
    }
}

/// Sidecar written into each index directory so the workspace path can be
/// recovered from the on-disk layout alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub original_path: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
}

#[derive(Debug, Clone)]
pub struct WorkspaceResolver {
    indexes_dir: PathBuf,
    symbols_dir: PathBuf,
}

impl WorkspaceResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            indexes_dir: config.indexes_dir(),
            symbols_dir: config.symbols_dir(),
        }
    }

    /// Resolve a workspace path for a write operation: the directory must
    /// exist. Canonicalization makes resolution idempotent.
    pub fn resolve(&self, raw: &str) -> EngineResult<WorkspaceId> {
        if raw.trim().is_empty() {
            return Err(EngineError::BadPath("empty workspace path".into()));
        }
        let canonical = dunce::canonicalize(raw)
            .map_err(|_| EngineError::NoSuchDirectory(raw.to_string()))?;
        if !canonical.is_dir() {
            return Err(EngineError::BadPath(format!(
                "{raw} is not a directory"
            )));
        }
        Ok(self.id_for_canonical(canonical))
    }

    /// Resolve for read-only operations: prefers canonicalization, falls back
    /// to lexical normalization so a since-deleted workspace still maps to
    /// its index directory.
    pub fn resolve_lenient(&self, raw: &str) -> EngineResult<WorkspaceId> {
        if raw.trim().is_empty() {
            return Err(EngineError::BadPath("empty workspace path".into()));
        }
        if let Ok(canonical) = dunce::canonicalize(raw) {
            return Ok(self.id_for_canonical(canonical));
        }
        let path = Path::new(raw);
        if !path.is_absolute() {
            return Err(EngineError::BadPath(format!(
                "{raw} is not an absolute path"
            )));
        }
        Ok(self.id_for_canonical(lexical_normalize(path)))
    }

    fn id_for_canonical(&self, canonical: PathBuf) -> WorkspaceId {
        let hash = workspace_hash(&canonical);
        WorkspaceId { canonical, hash }
    }

    pub fn index_dir(&self, ws: &WorkspaceId) -> PathBuf {
        self.indexes_dir.join(&ws.hash)
    }

    pub fn symbol_db_path(&self, ws: &WorkspaceId) -> PathBuf {
        self.symbols_dir.join(format!("{}.db", ws.hash))
    }

    pub fn metadata_path(&self, ws: &WorkspaceId) -> PathBuf {
        self.index_dir(ws).join(METADATA_FILENAME)
    }

    /// Write the metadata sidecar if absent. Atomic tmp-then-rename so a
    /// crash never leaves a half-written sidecar.
    pub fn ensure_metadata(&self, ws: &WorkspaceId) -> EngineResult<()> {
        let target = self.metadata_path(ws);
        if target.exists() {
            return Ok(());
        }
        let meta = WorkspaceMetadata {
            original_path: ws.display_path(),
            created_at: Utc::now(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = target.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&meta)?)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Recover the original workspace path from an index directory, if its
    /// metadata sidecar survives.
    pub fn try_reverse(index_dir: &Path) -> Option<PathBuf> {
        let raw = std::fs::read_to_string(index_dir.join(METADATA_FILENAME)).ok()?;
        let meta: WorkspaceMetadata = serde_json::from_str(&raw).ok()?;
        Some(PathBuf::from(meta.original_path))
    }

    /// Enumerate index directories present on disk (used at startup).
    pub fn discover_index_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let Ok(read) = std::fs::read_dir(&self.indexes_dir) else {
            return dirs;
        };
        for entry in read.flatten() {
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        dirs
    }
}

/// Stable short workspace hash. Backslashes are normalized and, on Windows,
/// the path is lowercased before hashing so the same directory always maps
/// to the same index regardless of how the caller spelled it.
pub fn workspace_hash(canonical: &Path) -> String {
    let mut normalized = canonical.to_string_lossy().replace('\\', "/");
    if cfg!(windows) {
        normalized = normalized.to_lowercase();
    }
    let digest = Sha256::digest(normalized.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn resolver(base: &Path) -> WorkspaceResolver {
        let cfg = EngineConfig {
            base_dir: base.to_path_buf(),
            ..Default::default()
        };
        WorkspaceResolver::new(&cfg)
    }

    #[test]
    fn resolve_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolver(tmp.path());
        let once = r.resolve(tmp.path().to_str().unwrap()).unwrap();
        let twice = r.resolve(once.canonical.to_str().unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn hash_is_stable_and_short() {
        let a = workspace_hash(Path::new("/home/dev/project"));
        let b = workspace_hash(Path::new("/home/dev/project"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, workspace_hash(Path::new("/home/dev/other")));
    }

    #[test]
    fn missing_directory_is_rejected_for_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolver(tmp.path());
        let missing = tmp.path().join("nope");
        let err = r.resolve(missing.to_str().unwrap()).unwrap_err();
        assert_eq!(err.code(), "NO_SUCH_DIRECTORY");
    }

    #[test]
    fn metadata_round_trips_through_try_reverse() {
        let tmp = tempfile::tempdir().unwrap();
        let ws_dir = tmp.path().join("ws");
        std::fs::create_dir_all(&ws_dir).unwrap();
        let r = resolver(tmp.path());
        let ws = r.resolve(ws_dir.to_str().unwrap()).unwrap();
        r.ensure_metadata(&ws).unwrap();
        let back = WorkspaceResolver::try_reverse(&r.index_dir(&ws)).unwrap();
        assert_eq!(back.to_string_lossy().replace('\\', "/"), ws.display_path());
    }

    #[test]
    fn lenient_resolution_handles_deleted_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolver(tmp.path());
        let ws = r.resolve_lenient("/definitely/gone/workspace").unwrap();
        assert_eq!(ws.hash.len(), 16);
    }
}
