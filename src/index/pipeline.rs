use crate::config::{EngineConfig, SUPPORTED_BARE_FILENAMES, is_supported_extension, path_is_excluded};
use crate::index::schema::IndexSchema;
use crate::lang::detect_language_for_path;
use crate::paths::WorkspaceId;
use crate::symbols::extract::{FileSymbols, extract_file_symbols, type_info_json};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tantivy::TantivyDocument;
use tracing::debug;

/// One file surviving the walk filters, before its content is read.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub last_modified: u64,
}

/// A file fully prepared for the writer: document plus the symbol rows that
/// belong to the same unit of work.
pub struct PreparedFile {
    pub walked: WalkedFile,
    pub content_hash: String,
    pub language: &'static str,
    pub document: TantivyDocument,
    pub symbols: FileSymbols,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub new: bool,
    pub doc_count: usize,
    pub indexed: usize,
    pub skipped_unchanged: usize,
    pub removed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub index_path: String,
}

/// Enumerate indexable files under a workspace root. Respects .gitignore,
/// the shared junk-directory filter, the extension allow-list and the size
/// cap. Output is sorted for deterministic indexing order.
pub fn walk_workspace(root: &Path, config: &EngineConfig) -> Vec<WalkedFile> {
    let mut files: Vec<WalkedFile> = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .max_depth(Some(config.max_walk_depth))
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| !path_is_excluded(entry.path()))
        .filter(|entry| is_indexable(entry.path()))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if metadata.len() > config.max_file_size_bytes {
                return None;
            }
            let relative = relative_unix_path(entry.path(), root);
            Some(WalkedFile {
                abs_path: entry.into_path(),
                relative_path: relative,
                size: metadata.len(),
                last_modified: mtime_secs(&metadata),
            })
        })
        .collect();
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    files
}

pub fn is_indexable(path: &Path) -> bool {
    let ext = path
        .extension()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase();
    if is_supported_extension(&ext) {
        return true;
    }
    path.file_name().is_some_and(|n| {
        let name = n.to_string_lossy().to_lowercase();
        SUPPORTED_BARE_FILENAMES.contains(&name.as_str())
    })
}

pub fn relative_unix_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

pub fn mtime_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Read a file as indexable text: binary files (NUL byte within the sniff
/// window) return `None`; a UTF-8 BOM is stripped; invalid sequences are
/// replaced rather than failing the file.
pub fn read_normalized(path: &Path, sniff_bytes: usize) -> std::io::Result<Option<String>> {
    let bytes = std::fs::read(path)?;
    let window = &bytes[..bytes.len().min(sniff_bytes)];
    if window.contains(&0) {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    Ok(Some(text.to_string()))
}

pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build the full `PreparedFile` for one walked file: read, hash, extract
/// the symbol summary, assemble the document. `None` means the file was
/// binary or vanished mid-walk.
pub fn prepare_file(
    schema: &IndexSchema,
    workspace: &WorkspaceId,
    walked: WalkedFile,
    sniff_bytes: usize,
) -> std::io::Result<Option<PreparedFile>> {
    let Some(content) = read_normalized(&walked.abs_path, sniff_bytes)? else {
        debug!(file = %walked.relative_path, "skipped binary file");
        return Ok(None);
    };
    let language = detect_language_for_path(&walked.abs_path);
    let hash = content_hash(&content);
    let symbols = extract_file_symbols(&content, language);
    let document = build_document(schema, workspace, &walked, &content, language, &hash, &symbols);
    Ok(Some(PreparedFile {
        walked,
        content_hash: hash,
        language,
        document,
        symbols,
    }))
}

fn build_document(
    schema: &IndexSchema,
    workspace: &WorkspaceId,
    walked: &WalkedFile,
    content: &str,
    language: &str,
    hash: &str,
    symbols: &FileSymbols,
) -> TantivyDocument {
    let abs = workspace
        .canonical
        .join(&walked.relative_path)
        .to_string_lossy()
        .replace('\\', "/");
    let filename = walked
        .abs_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let extension = walked
        .abs_path
        .extension()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase();
    let symbol_names = symbols
        .symbols
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let mut doc = TantivyDocument::new();
    doc.add_text(schema.path, &abs);
    doc.add_text(schema.relative_path, &walked.relative_path);
    doc.add_text(schema.filename, &filename);
    doc.add_text(schema.extension, &extension);
    doc.add_text(schema.content, content);
    doc.add_text(schema.language, language);
    doc.add_u64(schema.size, walked.size);
    doc.add_u64(schema.last_modified, walked.last_modified);
    doc.add_text(schema.content_hash, hash);
    doc.add_text(schema.symbols, &symbol_names);
    doc.add_text(schema.type_info, &type_info_json(&symbols.symbols));
    doc
}

/// Read and prepare many files in parallel; single-file failures are
/// dropped with a debug log so a bulk index never aborts on one bad file.
pub fn prepare_files_parallel(
    schema: &IndexSchema,
    workspace: &WorkspaceId,
    files: Vec<WalkedFile>,
    sniff_bytes: usize,
) -> (Vec<PreparedFile>, usize) {
    let results: Vec<Option<PreparedFile>> = files
        .into_par_iter()
        .map(|walked| {
            let rel = walked.relative_path.clone();
            match prepare_file(schema, workspace, walked, sniff_bytes) {
                Ok(prepared) => prepared,
                Err(e) => {
                    debug!(file = %rel, error = %e, "skipped unreadable file");
                    None
                }
            }
        })
        .collect();
    let total = results.len();
    let prepared: Vec<PreparedFile> = results.into_iter().flatten().collect();
    let failed = total - prepared.len();
    (prepared, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn walk_filters_junk_and_binaries_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/main.rs", b"fn main() {}");
        write(tmp.path(), "node_modules/pkg/index.js", b"x");
        write(tmp.path(), "image.png", b"\x89PNG");
        write(tmp.path(), "Makefile", b"all:");

        let files = walk_workspace(tmp.path(), &EngineConfig::default());
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert!(rels.contains(&"src/main.rs"));
        assert!(rels.contains(&"Makefile"));
        assert!(!rels.iter().any(|r| r.contains("node_modules")));
        assert!(!rels.contains(&"image.png"));
    }

    #[test]
    fn walk_respects_size_cap() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "big.rs", &vec![b'a'; 4096]);
        let config = EngineConfig {
            max_file_size_bytes: 1024,
            ..Default::default()
        };
        assert!(walk_workspace(tmp.path(), &config).is_empty());
    }

    #[test]
    fn binary_content_detected_by_nul_scan() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "data.rs", b"fn x() {}\x00garbage");
        let out = read_normalized(&tmp.path().join("data.rs"), 8192).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn bom_is_stripped() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.cs", b"\xEF\xBB\xBFclass A {}");
        let out = read_normalized(&tmp.path().join("a.cs"), 8192).unwrap().unwrap();
        assert_eq!(out, "class A {}");
    }

    #[test]
    fn walk_order_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "b.rs", b"b");
        write(tmp.path(), "a.rs", b"a");
        write(tmp.path(), "src/c.rs", b"c");
        let config = EngineConfig::default();
        let first: Vec<String> = walk_workspace(tmp.path(), &config)
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        let second: Vec<String> = walk_workspace(tmp.path(), &config)
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["a.rs", "b.rs", "src/c.rs"]);
    }
}
