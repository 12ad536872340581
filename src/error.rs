use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No index for workspace: {0}")]
    NoIndex(String),

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String, hint: String },

    #[error("Bad path: {0}")]
    BadPath(String),

    #[error("No such directory: {0}")]
    NoSuchDirectory(String),

    #[error("Write lock held for workspace: {0}")]
    LockHeld(String),

    #[error("Index corrupt for workspace {workspace}: {report}")]
    IndexCorrupt { workspace: String, report: String },

    #[error("Symbol store unavailable: {0}")]
    SymbolStoreUnavailable(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File is read-only: {0}")]
    ReadOnlyFile(String),

    #[error("Conflict detected: {0}")]
    ConflictDetected(String),

    #[error("Line {line} out of range (file has {line_count} lines)")]
    LineOutOfRange { line: usize, line_count: usize },

    #[error("Symbol not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Wire-level error payload. `code` is stable across releases; `hint` and
/// `suggested_action` give the calling agent a recovery path.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<serde_json::Value>,
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NoIndex(_) => "NO_INDEX",
            EngineError::InvalidQuery { .. } => "INVALID_QUERY",
            EngineError::BadPath(_) => "BAD_PATH",
            EngineError::NoSuchDirectory(_) => "NO_SUCH_DIRECTORY",
            EngineError::LockHeld(_) => "LOCK_HELD",
            EngineError::IndexCorrupt { .. } => "INDEX_CORRUPT",
            EngineError::SymbolStoreUnavailable(_) => "SYMBOL_STORE_UNAVAILABLE",
            EngineError::FileNotFound(_) => "FILE_NOT_FOUND",
            EngineError::ReadOnlyFile(_) => "READ_ONLY_FILE",
            EngineError::ConflictDetected(_) => "CONFLICT_DETECTED",
            EngineError::LineOutOfRange { .. } => "LINE_OUT_OF_RANGE",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Cancelled => "CANCELLED",
            EngineError::InvalidRequest(_) => "INVALID_REQUEST",
            EngineError::Index(_) => "INDEX_ERROR",
            EngineError::Search(_) => "SEARCH_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Serde(_) => "SERDE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the calling agent can fix this by changing its input or by
    /// running the suggested action first. Internal faults are not.
    pub fn is_client_fixable(&self) -> bool {
        !matches!(
            self,
            EngineError::Index(_)
                | EngineError::Search(_)
                | EngineError::Io(_)
                | EngineError::Internal(_)
        )
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let hint = match self {
            EngineError::NoIndex(ws) => Some(format!(
                "Run index_workspace for '{ws}' first, then retry the search"
            )),
            EngineError::InvalidQuery { hint, .. } => Some(hint.clone()),
            EngineError::LockHeld(_) => Some(
                "Another writer holds the index lock; retry after it finishes or restart the engine to sweep stale locks".to_string(),
            ),
            EngineError::IndexCorrupt { .. } => Some(
                "Run index_workspace with force=true to rebuild from the source tree".to_string(),
            ),
            EngineError::ConflictDetected(_) => Some(
                "The file changed since the preview was produced; re-run the search to get fresh matches".to_string(),
            ),
            _ => None,
        };

        let suggested_action = match self {
            EngineError::NoIndex(ws) => Some(serde_json::json!({
                "tool": "index_workspace",
                "params": { "workspace_path": ws },
            })),
            _ => None,
        };

        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
            hint,
            suggested_action,
        }
    }
}

impl From<tantivy::TantivyError> for EngineError {
    fn from(e: tantivy::TantivyError) -> Self {
        EngineError::Index(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::SymbolStoreUnavailable(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_index_carries_recovery_action() {
        let err = EngineError::NoIndex("/tmp/ws".into());
        let info = err.to_error_info();
        assert_eq!(info.code, "NO_INDEX");
        assert!(info.hint.is_some());
        let action = info.suggested_action.unwrap();
        assert_eq!(action["tool"], "index_workspace");
    }

    #[test]
    fn invalid_query_hint_is_preserved() {
        let err = EngineError::InvalidQuery {
            message: "leading wildcard".into(),
            hint: "drop the leading *".into(),
        };
        let info = err.to_error_info();
        assert_eq!(info.hint.as_deref(), Some("drop the leading *"));
    }

    #[test]
    fn internal_errors_are_not_client_fixable() {
        assert!(!EngineError::Index("boom".into()).is_client_fixable());
        assert!(EngineError::Cancelled.is_client_fixable());
        assert!(EngineError::BadPath("x".into()).is_client_fixable());
    }
}
