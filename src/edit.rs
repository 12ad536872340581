use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::pipeline::{content_hash, read_normalized, walk_workspace};
use crate::paths::WorkspaceId;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOperation {
    Insert,
    Replace,
    Delete,
}

impl LineOperation {
    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "insert" => Ok(LineOperation::Insert),
            "replace" => Ok(LineOperation::Replace),
            "delete" => Ok(LineOperation::Delete),
            other => Err(EngineError::InvalidRequest(format!(
                "unknown edit operation '{other}' (expected insert, replace or delete)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EditResult {
    pub file_path: String,
    pub operation: LineOperation,
    pub line: usize,
    pub line_count_before: usize,
    pub line_count_after: usize,
    /// A few lines around the edit so the caller can verify the result
    /// without a follow-up read.
    pub context: Vec<String>,
}

/// Apply one line-level operation to a file. Lines are 1-based; `insert`
/// accepts `line == line_count + 1` to append. The file's dominant line
/// ending and trailing-newline shape are preserved.
pub fn edit_lines(
    abs_path: &Path,
    display_path: &str,
    operation: LineOperation,
    line: usize,
    content: Option<&str>,
) -> EngineResult<EditResult> {
    if !abs_path.is_file() {
        return Err(EngineError::FileNotFound(display_path.to_string()));
    }
    if std::fs::metadata(abs_path)?.permissions().readonly() {
        return Err(EngineError::ReadOnlyFile(display_path.to_string()));
    }
    let original = std::fs::read_to_string(abs_path)
        .map_err(|_| EngineError::FileNotFound(display_path.to_string()))?;

    let ending = detect_line_ending(&original);
    let had_trailing_newline = original.ends_with('\n') || original.is_empty();
    let mut lines: Vec<String> = original.lines().map(|l| l.to_string()).collect();
    let before = lines.len();

    if line == 0 {
        return Err(EngineError::LineOutOfRange {
            line,
            line_count: before,
        });
    }

    match operation {
        LineOperation::Insert => {
            if line > before + 1 {
                return Err(EngineError::LineOutOfRange {
                    line,
                    line_count: before,
                });
            }
            let content = content.ok_or_else(|| {
                EngineError::InvalidRequest("insert requires 'content'".to_string())
            })?;
            // Multi-line content inserts as multiple lines.
            for (offset, new_line) in content.lines().enumerate() {
                lines.insert(line - 1 + offset, new_line.to_string());
            }
        }
        LineOperation::Replace => {
            if line > before {
                return Err(EngineError::LineOutOfRange {
                    line,
                    line_count: before,
                });
            }
            let content = content.ok_or_else(|| {
                EngineError::InvalidRequest("replace requires 'content'".to_string())
            })?;
            let mut replacement: Vec<String> = content.lines().map(|l| l.to_string()).collect();
            if replacement.is_empty() {
                replacement.push(String::new());
            }
            lines.splice(line - 1..line, replacement);
        }
        LineOperation::Delete => {
            if line > before {
                return Err(EngineError::LineOutOfRange {
                    line,
                    line_count: before,
                });
            }
            lines.remove(line - 1);
        }
    }

    let mut output = lines.join(ending);
    if had_trailing_newline && !lines.is_empty() {
        output.push_str(ending);
    }
    std::fs::write(abs_path, &output)?;

    let after = lines.len();
    let context = context_window(&lines, line, 2);
    Ok(EditResult {
        file_path: display_path.to_string(),
        operation,
        line,
        line_count_before: before,
        line_count_after: after,
        context,
    })
}

fn detect_line_ending(content: &str) -> &'static str {
    let crlf = content.matches("\r\n").count();
    let lf = content.matches('\n').count() - crlf;
    if crlf > lf { "\r\n" } else { "\n" }
}

fn context_window(lines: &[String], line: usize, radius: usize) -> Vec<String> {
    if lines.is_empty() {
        return Vec::new();
    }
    let center = line.saturating_sub(1).min(lines.len() - 1);
    let start = center.saturating_sub(radius);
    let end = (center + radius + 1).min(lines.len());
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{:>5}: {l}", start + i + 1))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceMatch {
    pub file_path: String,
    pub line: u32,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceResult {
    pub preview: bool,
    pub files_changed: usize,
    pub total_replacements: usize,
    pub matches: Vec<ReplaceMatch>,
    /// Relative paths of files actually rewritten (empty in preview mode).
    pub changed_files: Vec<String>,
}

/// Literal search-and-replace across a workspace.
///
/// The scan records a content hash per matched file; the apply pass
/// re-reads and verifies that hash right before writing, so a file changed
/// underneath the operation surfaces `ConflictDetected` instead of clobbering
/// the concurrent edit. Preview mode reports the same matches without
/// touching disk.
pub fn search_and_replace(
    ws: &WorkspaceId,
    config: &EngineConfig,
    query: &str,
    replacement: &str,
    preview: bool,
    max_matches: usize,
) -> EngineResult<ReplaceResult> {
    if query.is_empty() {
        return Err(EngineError::InvalidQuery {
            message: "search_and_replace query is empty".to_string(),
            hint: "Provide the literal text to replace".to_string(),
        });
    }

    struct FileHit {
        relative_path: String,
        hash: String,
        new_content: String,
        replacements: usize,
    }

    let mut matches = Vec::new();
    let mut file_hits: Vec<FileHit> = Vec::new();
    let mut total = 0usize;

    for file in walk_workspace(&ws.canonical, config) {
        let Some(content) = read_normalized(&file.abs_path, config.binary_sniff_bytes)? else {
            continue;
        };
        if !content.contains(query) {
            continue;
        }
        let mut replacements = 0usize;
        for (idx, line) in content.lines().enumerate() {
            if line.contains(query) {
                replacements += line.matches(query).count();
                if matches.len() < max_matches {
                    matches.push(ReplaceMatch {
                        file_path: file.relative_path.clone(),
                        line: (idx + 1) as u32,
                        before: line.trim_end().to_string(),
                        after: line.replace(query, replacement).trim_end().to_string(),
                    });
                }
            }
        }
        total += replacements;
        file_hits.push(FileHit {
            hash: content_hash(&content),
            new_content: content.replace(query, replacement),
            relative_path: file.relative_path,
            replacements,
        });
    }

    let mut changed_files = Vec::new();
    if !preview {
        for hit in &file_hits {
            let abs = ws.canonical.join(&hit.relative_path);
            if std::fs::metadata(&abs)?.permissions().readonly() {
                return Err(EngineError::ReadOnlyFile(hit.relative_path.clone()));
            }
            let current = read_normalized(&abs, config.binary_sniff_bytes)?
                .ok_or_else(|| EngineError::FileNotFound(hit.relative_path.clone()))?;
            if content_hash(&current) != hit.hash {
                return Err(EngineError::ConflictDetected(hit.relative_path.clone()));
            }
            std::fs::write(&abs, &hit.new_content)?;
            changed_files.push(hit.relative_path.clone());
        }
    }

    Ok(ReplaceResult {
        preview,
        files_changed: file_hits.iter().filter(|h| h.replacements > 0).count(),
        total_replacements: total,
        matches,
        changed_files,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct LineMatch {
    pub file_path: String,
    pub line_number: u32,
    pub line: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineSearchResult {
    pub matches: Vec<LineMatch>,
    pub files_scanned: usize,
    pub truncated: bool,
}

/// Regex line search over the workspace tree with surrounding context.
pub fn line_search(
    ws: &WorkspaceId,
    config: &EngineConfig,
    pattern: &str,
    context_lines: usize,
    max_matches: usize,
) -> EngineResult<LineSearchResult> {
    let re = regex::Regex::new(pattern).map_err(|e| EngineError::InvalidQuery {
        message: format!("invalid pattern: {e}"),
        hint: "line_search takes a regular expression; escape literal metacharacters".to_string(),
    })?;

    let mut matches = Vec::new();
    let mut truncated = false;
    let mut files_scanned = 0usize;

    'files: for file in walk_workspace(&ws.canonical, config) {
        let Some(content) = read_normalized(&file.abs_path, config.binary_sniff_bytes)? else {
            continue;
        };
        files_scanned += 1;
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if !re.is_match(line) {
                continue;
            }
            if matches.len() >= max_matches {
                truncated = true;
                break 'files;
            }
            let before_start = idx.saturating_sub(context_lines);
            let after_end = (idx + 1 + context_lines).min(lines.len());
            matches.push(LineMatch {
                file_path: file.relative_path.clone(),
                line_number: (idx + 1) as u32,
                line: line.to_string(),
                context_before: lines[before_start..idx].iter().map(|l| l.to_string()).collect(),
                context_after: lines[idx + 1..after_end].iter().map(|l| l.to_string()).collect(),
            });
        }
    }

    Ok(LineSearchResult {
        matches,
        files_scanned,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::paths::WorkspaceResolver;

    fn workspace(tmp: &tempfile::TempDir) -> (WorkspaceId, EngineConfig) {
        let config = EngineConfig {
            base_dir: tmp.path().join("base"),
            ..Default::default()
        };
        let resolver = WorkspaceResolver::new(&config);
        let ws_dir = tmp.path().join("ws");
        std::fs::create_dir_all(&ws_dir).unwrap();
        (resolver.resolve(ws_dir.to_str().unwrap()).unwrap(), config)
    }

    #[test]
    fn insert_replace_delete_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.rs");
        std::fs::write(&file, "one\ntwo\nthree\n").unwrap();

        let result =
            edit_lines(&file, "a.rs", LineOperation::Insert, 2, Some("inserted")).unwrap();
        assert_eq!(result.line_count_after, 4);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\ninserted\ntwo\nthree\n");

        edit_lines(&file, "a.rs", LineOperation::Replace, 2, Some("swapped")).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\nswapped\ntwo\nthree\n");

        let result = edit_lines(&file, "a.rs", LineOperation::Delete, 2, None).unwrap();
        assert_eq!(result.line_count_after, 3);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\ntwo\nthree\n");
    }

    #[test]
    fn out_of_range_line_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.rs");
        std::fs::write(&file, "only\n").unwrap();
        let err = edit_lines(&file, "a.rs", LineOperation::Replace, 5, Some("x")).unwrap_err();
        assert_eq!(err.code(), "LINE_OUT_OF_RANGE");
        // Insert may append at line_count + 1 but not beyond.
        assert!(edit_lines(&file, "a.rs", LineOperation::Insert, 2, Some("x")).is_ok());
        let err = edit_lines(&file, "a.rs", LineOperation::Insert, 9, Some("x")).unwrap_err();
        assert_eq!(err.code(), "LINE_OUT_OF_RANGE");
    }

    #[test]
    fn crlf_files_keep_their_endings() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.cs");
        std::fs::write(&file, "one\r\ntwo\r\n").unwrap();
        edit_lines(&file, "a.cs", LineOperation::Replace, 1, Some("uno")).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "uno\r\ntwo\r\n");
    }

    #[test]
    fn replace_preview_leaves_disk_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let (ws, config) = workspace(&tmp);
        std::fs::write(ws.canonical.join("a.rs"), "let old_name = 1;\n").unwrap();

        let result = search_and_replace(&ws, &config, "old_name", "new_name", true, 100).unwrap();
        assert_eq!(result.total_replacements, 1);
        assert!(result.preview);
        assert!(result.changed_files.is_empty());
        assert_eq!(
            std::fs::read_to_string(ws.canonical.join("a.rs")).unwrap(),
            "let old_name = 1;\n"
        );
    }

    #[test]
    fn replace_applies_and_reports_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (ws, config) = workspace(&tmp);
        std::fs::write(ws.canonical.join("a.rs"), "old old\n").unwrap();
        std::fs::write(ws.canonical.join("b.rs"), "old\n").unwrap();

        let result = search_and_replace(&ws, &config, "old", "new", false, 100).unwrap();
        assert_eq!(result.files_changed, 2);
        assert_eq!(result.total_replacements, 3);
        assert_eq!(result.changed_files.len(), 2);
        assert_eq!(std::fs::read_to_string(ws.canonical.join("a.rs")).unwrap(), "new new\n");
    }

    #[test]
    fn line_search_returns_context() {
        let tmp = tempfile::tempdir().unwrap();
        let (ws, config) = workspace(&tmp);
        std::fs::write(ws.canonical.join("a.rs"), "before\nneedle here\nafter\n").unwrap();

        let result = line_search(&ws, &config, "needle", 1, 10).unwrap();
        assert_eq!(result.matches.len(), 1);
        let m = &result.matches[0];
        assert_eq!(m.line_number, 2);
        assert_eq!(m.context_before, vec!["before"]);
        assert_eq!(m.context_after, vec!["after"]);
    }

    #[test]
    fn bad_line_search_pattern_is_invalid_query() {
        let tmp = tempfile::tempdir().unwrap();
        let (ws, config) = workspace(&tmp);
        let err = line_search(&ws, &config, "([", 0, 10).unwrap_err();
        assert_eq!(err.code(), "INVALID_QUERY");
    }
}
