use crate::error::{EngineError, EngineResult};
use crate::symbols::extract::{ExtractedSymbol, IdentifierOccurrence};
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A stored symbol row, shaped for the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: i64,
    pub file_path: String,
    pub name: String,
    pub kind: String,
    pub signature: String,
    pub language: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub modifiers: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containing_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileMeta {
    pub hash: String,
    pub size: u64,
    pub last_modified: i64,
}

#[derive(Debug, Clone)]
pub struct IdentifierRow {
    pub file_path: String,
    pub name: String,
    pub line: u32,
    pub col: u32,
    pub qualifier: Option<String>,
    pub is_call: bool,
    pub containing_symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Exact,
    Prefix,
    Fuzzy,
}

impl NameMatch {
    pub fn from_str(s: Option<&str>) -> Self {
        match s {
            Some("prefix") => NameMatch::Prefix,
            Some("fuzzy") => NameMatch::Fuzzy,
            _ => NameMatch::Exact,
        }
    }
}

/// Per-workspace relational store of extracted symbols and identifier
/// occurrences. One database file per workspace, WAL mode, single pooled
/// connection. The per-file replace is transactional so readers never
/// observe a half-extracted file.
pub struct SymbolDatabase {
    conn: Mutex<Connection>,
    workspace_hash: String,
}

impl SymbolDatabase {
    pub fn open(path: &Path, workspace_hash: &str) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Mutex::new(conn),
            workspace_hash: workspace_hash.to_string(),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                 path TEXT PRIMARY KEY,
                 language TEXT NOT NULL,
                 hash TEXT NOT NULL,
                 size INTEGER NOT NULL DEFAULT 0,
                 last_modified INTEGER NOT NULL,
                 last_extracted INTEGER NOT NULL,
                 symbol_count INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS symbols (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 workspace_hash TEXT NOT NULL,
                 file_path TEXT NOT NULL,
                 name TEXT NOT NULL,
                 kind TEXT NOT NULL,
                 signature TEXT NOT NULL DEFAULT '',
                 language TEXT NOT NULL DEFAULT '',
                 start_line INTEGER NOT NULL,
                 start_col INTEGER NOT NULL,
                 end_line INTEGER NOT NULL,
                 end_col INTEGER NOT NULL,
                 modifiers TEXT NOT NULL DEFAULT '',
                 base_type TEXT,
                 interfaces TEXT,
                 containing_type TEXT,
                 return_type TEXT,
                 parameters TEXT
             );
             CREATE TABLE IF NOT EXISTS identifiers (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 file_path TEXT NOT NULL,
                 name TEXT NOT NULL,
                 line INTEGER NOT NULL,
                 col INTEGER NOT NULL,
                 qualifier TEXT,
                 is_call INTEGER NOT NULL DEFAULT 0,
                 containing_symbol TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
             CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);
             CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
             CREATE INDEX IF NOT EXISTS idx_identifiers_name ON identifiers(name);
             CREATE INDEX IF NOT EXISTS idx_identifiers_file ON identifiers(file_path);
             CREATE INDEX IF NOT EXISTS idx_files_modified ON files(last_modified);",
        )?;
        Ok(())
    }

    /// Replace every row for `file_path` in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_file(
        &self,
        file_path: &str,
        language: &str,
        content_hash: &str,
        size: u64,
        last_modified: i64,
        symbols: &[ExtractedSymbol],
        identifiers: &[IdentifierOccurrence],
    ) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols WHERE file_path = ?1", params![file_path])?;
        tx.execute("DELETE FROM identifiers WHERE file_path = ?1", params![file_path])?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO symbols
                 (workspace_hash, file_path, name, kind, signature, language,
                  start_line, start_col, end_line, end_col, modifiers,
                  base_type, interfaces, containing_type, return_type, parameters)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            )?;
            for sym in symbols {
                stmt.execute(params![
                    self.workspace_hash,
                    file_path,
                    sym.name,
                    sym.kind,
                    sym.signature,
                    language,
                    sym.start_line,
                    sym.start_col,
                    sym.end_line,
                    sym.end_col,
                    sym.modifiers,
                    sym.base_type,
                    sym.interfaces,
                    sym.containing_type,
                    sym.return_type,
                    sym.parameters,
                ])?;
            }

            let mut ident_stmt = tx.prepare_cached(
                "INSERT INTO identifiers
                 (file_path, name, line, col, qualifier, is_call, containing_symbol)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for ident in identifiers {
                ident_stmt.execute(params![
                    file_path,
                    ident.name,
                    ident.line,
                    ident.col,
                    ident.qualifier,
                    ident.is_call as i64,
                    ident.containing_symbol,
                ])?;
            }

            tx.execute(
                "INSERT OR REPLACE INTO files
                 (path, language, hash, size, last_modified, last_extracted, symbol_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s','now'), ?6)",
                params![
                    file_path,
                    language,
                    content_hash,
                    size as i64,
                    last_modified,
                    symbols.len() as i64
                ],
            )?;
        }
        tx.commit()?;
        debug!(file = file_path, symbols = symbols.len(), "symbol rows replaced");
        Ok(())
    }

    pub fn delete_for_file(&self, file_path: &str) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols WHERE file_path = ?1", params![file_path])?;
        tx.execute("DELETE FROM identifiers WHERE file_path = ?1", params![file_path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![file_path])?;
        tx.commit()?;
        Ok(())
    }

    pub fn search_by_name(
        &self,
        query: &str,
        kind: Option<&str>,
        mode: NameMatch,
        limit: usize,
    ) -> EngineResult<Vec<SymbolRecord>> {
        let pattern = match mode {
            NameMatch::Exact => query.to_string(),
            NameMatch::Prefix => format!("{}%", escape_like(query)),
            NameMatch::Fuzzy => format!("%{}%", escape_like(query)),
        };
        let comparator = match mode {
            NameMatch::Exact => "name = ?1",
            _ => "name LIKE ?1 ESCAPE '\\'",
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM symbols
             WHERE {comparator} AND (?2 IS NULL OR kind = ?2)
             ORDER BY length(name), name, file_path, start_line
             LIMIT ?3",
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, kind, limit as i64], row_to_symbol)?;
        collect(rows)
    }

    /// Definitions matching an exact name, used by goto_definition and the
    /// call tracer. Type-kind definitions sort first.
    pub fn find_definitions(&self, name: &str) -> EngineResult<Vec<SymbolRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM symbols WHERE name = ?1
             ORDER BY CASE WHEN kind IN ('class','interface','struct','enum','trait') THEN 0 ELSE 1 END,
                      file_path, start_line",
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![name], row_to_symbol)?;
        collect(rows)
    }

    pub fn symbols_in_file(&self, file_path: &str) -> EngineResult<Vec<SymbolRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM symbols WHERE file_path = ?1 ORDER BY start_line, start_col",
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![file_path], row_to_symbol)?;
        collect(rows)
    }

    /// Identifier occurrences for a name, optionally scoped to one file.
    pub fn identifier_candidates(
        &self,
        name: &str,
        file: Option<&str>,
        limit: usize,
    ) -> EngineResult<Vec<IdentifierRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT file_path, name, line, col, qualifier, is_call, containing_symbol
             FROM identifiers
             WHERE name = ?1 AND (?2 IS NULL OR file_path = ?2)
             ORDER BY file_path, line, col
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![name, file, limit as i64], row_to_identifier)?;
        collect(rows)
    }

    /// Call sites inside the body of a named symbol (callee discovery).
    pub fn calls_within(&self, containing_symbol: &str, limit: usize) -> EngineResult<Vec<IdentifierRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT file_path, name, line, col, qualifier, is_call, containing_symbol
             FROM identifiers
             WHERE containing_symbol = ?1 AND is_call = 1
             ORDER BY file_path, line, col
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![containing_symbol, limit as i64], row_to_identifier)?;
        collect(rows)
    }

    /// Call sites that invoke a named symbol (caller discovery).
    pub fn calls_of(&self, name: &str, limit: usize) -> EngineResult<Vec<IdentifierRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT file_path, name, line, col, qualifier, is_call, containing_symbol
             FROM identifiers
             WHERE name = ?1 AND is_call = 1
             ORDER BY file_path, line, col
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![name, limit as i64], row_to_identifier)?;
        collect(rows)
    }

    /// Per-file change-detection metadata for the whole workspace. The
    /// indexing pipeline compares (size, mtime) first and hashes only on
    /// mismatch.
    pub fn file_meta(&self) -> EngineResult<HashMap<String, FileMeta>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, hash, size, last_modified FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                FileMeta {
                    hash: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                    last_modified: row.get(3)?,
                },
            ))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (path, meta) = row?;
            out.insert(path, meta);
        }
        Ok(out)
    }

    /// Map of file path → last extraction time, for the startup straggler pass.
    pub fn extraction_times(&self) -> EngineResult<HashMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, last_extracted FROM files")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut out = HashMap::new();
        for row in rows {
            let (path, ts) = row?;
            out.insert(path, ts);
        }
        Ok(out)
    }

    pub fn file_count(&self) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn symbol_count(&self) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn clear(&self) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols", [])?;
        tx.execute("DELETE FROM identifiers", [])?;
        tx.execute("DELETE FROM files", [])?;
        tx.commit()?;
        Ok(())
    }
}

const COLUMNS: &str = "id, file_path, name, kind, signature, language, start_line, start_col, \
                       end_line, end_col, modifiers, base_type, interfaces, containing_type, \
                       return_type, parameters";

fn row_to_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRecord> {
    Ok(SymbolRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        signature: row.get(4)?,
        language: row.get(5)?,
        start_line: row.get(6)?,
        start_col: row.get(7)?,
        end_line: row.get(8)?,
        end_col: row.get(9)?,
        modifiers: row.get(10)?,
        base_type: row.get(11)?,
        interfaces: row.get(12)?,
        containing_type: row.get(13)?,
        return_type: row.get(14)?,
        parameters: row.get(15)?,
    })
}

fn row_to_identifier(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentifierRow> {
    Ok(IdentifierRow {
        file_path: row.get(0)?,
        name: row.get(1)?,
        line: row.get(2)?,
        col: row.get(3)?,
        qualifier: row.get(4)?,
        is_call: row.get::<_, i64>(5)? != 0,
        containing_symbol: row.get(6)?,
    })
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> EngineResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(EngineError::from)?);
    }
    Ok(out)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::extract::extract_file_symbols;

    fn open_temp() -> (tempfile::TempDir, SymbolDatabase) {
        let tmp = tempfile::tempdir().unwrap();
        let db = SymbolDatabase::open(&tmp.path().join("ws.db"), "feedfacecafebeef").unwrap();
        (tmp, db)
    }

    fn seed_csharp(db: &SymbolDatabase) {
        let src = "public class HttpClientFactory {\n    public void Build() {\n    }\n}\n";
        let extracted = extract_file_symbols(src, "csharp");
        db.upsert_file("src/Foo.cs", "csharp", "h1", 10, 100, &extracted.symbols, &extracted.identifiers)
            .unwrap();
    }

    #[test]
    fn upsert_then_search_by_name() {
        let (_tmp, db) = open_temp();
        seed_csharp(&db);

        let hits = db
            .search_by_name("HttpClientFactory", Some("class"), NameMatch::Exact, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "src/Foo.cs");

        let prefix = db.search_by_name("Http", None, NameMatch::Prefix, 10).unwrap();
        assert_eq!(prefix.len(), 1);
    }

    #[test]
    fn upsert_replaces_previous_rows() {
        let (_tmp, db) = open_temp();
        seed_csharp(&db);
        // Re-extract with different content: old symbols must be gone.
        let src = "public class RenamedFactory {\n}\n";
        let extracted = extract_file_symbols(src, "csharp");
        db.upsert_file("src/Foo.cs", "csharp", "h2", 10, 200, &extracted.symbols, &extracted.identifiers)
            .unwrap();

        assert!(db.find_definitions("HttpClientFactory").unwrap().is_empty());
        assert_eq!(db.find_definitions("RenamedFactory").unwrap().len(), 1);
        assert_eq!(db.file_count().unwrap(), 1);
    }

    #[test]
    fn delete_for_file_removes_everything() {
        let (_tmp, db) = open_temp();
        seed_csharp(&db);
        db.delete_for_file("src/Foo.cs").unwrap();
        assert_eq!(db.symbol_count().unwrap(), 0);
        assert_eq!(db.file_count().unwrap(), 0);
    }

    #[test]
    fn identifier_candidates_round_trip() {
        let (_tmp, db) = open_temp();
        let src = "public class Bar {\n    public void Run() {\n        new HttpClientFactory().Build();\n    }\n}\n";
        let extracted = extract_file_symbols(src, "csharp");
        db.upsert_file("src/Bar.cs", "csharp", "h1", 10, 100, &extracted.symbols, &extracted.identifiers)
            .unwrap();

        let candidates = db.identifier_candidates("HttpClientFactory", None, 100).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_call);
        assert_eq!(candidates[0].containing_symbol.as_deref(), Some("Run"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        let (_tmp, db) = open_temp();
        seed_csharp(&db);
        let hits = db.search_by_name("%", None, NameMatch::Prefix, 10).unwrap();
        assert!(hits.is_empty());
    }
}
