use crate::analyzer::register_code_tokenizer;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::context::IndexContext;
use crate::index::pipeline::{
    self, IndexReport, PreparedFile, WalkedFile, walk_workspace,
};
use crate::index::schema::IndexSchema;
use crate::paths::{WorkspaceId, WorkspaceResolver};
use crate::query::preprocess::PreparedQuery;
use crate::query::search::{self, SearchHit, SearchOptions};
use crate::state::CancelFlag;
use crate::symbols::store::SymbolDatabase;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tantivy::{Index, Term};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub workspace_path: String,
    pub workspace_hash: String,
    pub doc_count: usize,
    pub refresh_version: u64,
    pub committed_opstamp: u64,
    pub pending_bytes: u64,
    pub is_indexing: bool,
    pub symbol_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexHealth {
    pub workspace_hash: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Owner of every per-workspace `IndexContext` and symbol database.
///
/// Contexts are created lazily, bounded by `max_open_indexes` with LRU
/// eviction (eviction commits pending writes before closing). All writer
/// access goes through the context's coarse mutex; searches capture a
/// searcher and run unlocked.
pub struct IndexManager {
    config: EngineConfig,
    resolver: WorkspaceResolver,
    contexts: DashMap<String, Arc<IndexContext>>,
    symbol_dbs: DashMap<String, Arc<SymbolDatabase>>,
}

impl IndexManager {
    pub fn new(config: EngineConfig) -> Self {
        let resolver = WorkspaceResolver::new(&config);
        Self {
            config,
            resolver,
            contexts: DashMap::new(),
            symbol_dbs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &WorkspaceResolver {
        &self.resolver
    }

    fn writer_timeout(&self) -> Duration {
        Duration::from_secs(self.config.writer_lock_timeout_secs)
    }

    pub fn reader_max_age(&self) -> Duration {
        Duration::from_secs(self.config.reader_max_age_secs)
    }

    /// Borrow (or lazily create) the context for a workspace. With
    /// `create = false` a workspace that was never indexed surfaces
    /// `NoIndex` so callers can suggest `index_workspace`.
    pub async fn get_context(
        &self,
        ws: &WorkspaceId,
        create: bool,
    ) -> EngineResult<Arc<IndexContext>> {
        if let Some(ctx) = self.contexts.get(&ws.hash) {
            let ctx = ctx.value().clone();
            // Two canonical paths mapping to one hash is unrecoverable
            // misconfiguration, not a search miss.
            if ctx.workspace.canonical != ws.canonical {
                return Err(EngineError::Internal(anyhow::anyhow!(
                    "workspace hash collision: {} and {} both map to {}",
                    ctx.workspace.display_path(),
                    ws.display_path(),
                    ws.hash
                )));
            }
            ctx.touch();
            return Ok(ctx);
        }

        let index_dir = self.resolver.index_dir(ws);
        let exists = index_dir.join("meta.json").exists();
        if !exists && !create {
            return Err(EngineError::NoIndex(ws.display_path()));
        }

        let schema = IndexSchema::build();
        let index = if exists {
            Index::open_in_dir(&index_dir).map_err(|e| EngineError::IndexCorrupt {
                workspace: ws.display_path(),
                report: format!("failed to open index: {e}"),
            })?
        } else {
            std::fs::create_dir_all(&index_dir)?;
            Index::create_in_dir(&index_dir, schema.schema().clone())
                .map_err(|e| EngineError::Index(format!("failed to create index: {e}")))?
        };
        register_code_tokenizer(&index);
        self.resolver.ensure_metadata(ws)?;

        let ctx = Arc::new(IndexContext::new(
            ws.clone(),
            index,
            index_dir,
            schema,
            self.config.writer_ram_budget_bytes,
        ));
        self.contexts.insert(ws.hash.clone(), ctx.clone());
        self.evict_over_limit().await;
        Ok(ctx)
    }

    /// Symbol database for a workspace. Errors map to
    /// `SymbolStoreUnavailable`; text search uses `try_symbol_db` to degrade
    /// instead.
    pub fn symbol_db(&self, ws: &WorkspaceId) -> EngineResult<Arc<SymbolDatabase>> {
        if let Some(db) = self.symbol_dbs.get(&ws.hash) {
            return Ok(db.value().clone());
        }
        let db = Arc::new(SymbolDatabase::open(
            &self.resolver.symbol_db_path(ws),
            &ws.hash,
        )?);
        self.symbol_dbs.insert(ws.hash.clone(), db.clone());
        Ok(db)
    }

    pub fn try_symbol_db(&self, ws: &WorkspaceId) -> Option<Arc<SymbolDatabase>> {
        match self.symbol_db(ws) {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(workspace = %ws.hash, error = %e, "symbol store unavailable, degrading");
                None
            }
        }
    }

    /// Full workspace index pass: walk, diff against the stored file
    /// metadata, re-index changed files, drop deleted ones, commit.
    /// `force` rebuilds from scratch. Cancellation between batches leaves
    /// any committed state valid.
    pub async fn index_workspace(
        &self,
        ws: &WorkspaceId,
        force: bool,
        cancel: &CancelFlag,
    ) -> EngineResult<IndexReport> {
        let index_dir = self.resolver.index_dir(ws);
        let new = !index_dir.join("meta.json").exists();
        let ctx = self.get_context(ws, true).await?;

        if !ctx.try_begin_indexing() {
            let doc_count = search::doc_count(&ctx, self.reader_max_age())?;
            info!(workspace = %ws.hash, "indexing already in progress, skipping");
            return Ok(IndexReport {
                new,
                doc_count,
                index_path: index_dir.to_string_lossy().to_string(),
                ..Default::default()
            });
        }

        let result = self.run_index_pass(ws, &ctx, new, force, cancel).await;
        ctx.end_indexing();
        result
    }

    async fn run_index_pass(
        &self,
        ws: &WorkspaceId,
        ctx: &Arc<IndexContext>,
        new: bool,
        force: bool,
        cancel: &CancelFlag,
    ) -> EngineResult<IndexReport> {
        let start = std::time::Instant::now();
        let symbol_db = self.try_symbol_db(ws);

        if force {
            self.clear_inner(ws, ctx).await?;
        }

        // Walk + change detection + read + extract are CPU/IO heavy; run on
        // the blocking pool so requests keep flowing.
        let walked = {
            let root = ws.canonical.clone();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || walk_workspace(&root, &config))
                .await
                .map_err(|e| EngineError::Internal(anyhow::anyhow!("walk task failed: {e}")))?
        };
        cancel.check()?;

        let known = match (&symbol_db, force) {
            (Some(db), false) => db.file_meta().unwrap_or_default(),
            _ => Default::default(),
        };

        let mut to_index: Vec<WalkedFile> = Vec::new();
        let mut skipped_unchanged = 0usize;
        let walked_set: HashSet<String> = walked.iter().map(|f| f.relative_path.clone()).collect();
        for file in walked {
            match known.get(&file.relative_path) {
                Some(meta)
                    if meta.size == file.size && meta.last_modified == file.last_modified as i64 =>
                {
                    skipped_unchanged += 1;
                }
                _ => to_index.push(file),
            }
        }
        let removed_paths: Vec<String> = known
            .keys()
            .filter(|p| !walked_set.contains(*p))
            .cloned()
            .collect();

        let (prepared, failed) = {
            let schema = ctx.schema.clone();
            let ws_clone = ws.clone();
            let sniff = self.config.binary_sniff_bytes;
            tokio::task::spawn_blocking(move || {
                pipeline::prepare_files_parallel(&schema, &ws_clone, to_index, sniff)
            })
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("prepare task failed: {e}")))?
        };
        cancel.check()?;

        // Unchanged content can still show a new mtime; skip those too after
        // hashing, so touch-without-edit does not churn the index.
        let mut fresh: Vec<PreparedFile> = Vec::new();
        let mut refreshed_meta: Vec<PreparedFile> = Vec::new();
        for file in prepared {
            match known.get(&file.walked.relative_path) {
                Some(meta) if meta.hash == file.content_hash => refreshed_meta.push(file),
                _ => fresh.push(file),
            }
        }
        skipped_unchanged += refreshed_meta.len();

        let indexed = fresh.len();
        let removed = removed_paths.len();

        if indexed > 0 || removed > 0 || !refreshed_meta.is_empty() {
            self.write_batches(ws, ctx, &symbol_db, fresh, &removed_paths, cancel)
                .await?;
            // Keep (size, mtime) current for files whose content did not
            // change, without rewriting their index documents.
            if let Some(db) = &symbol_db {
                for file in &refreshed_meta {
                    let _ = db.upsert_file(
                        &file.walked.relative_path,
                        file.language,
                        &file.content_hash,
                        file.walked.size,
                        file.walked.last_modified as i64,
                        &file.symbols.symbols,
                        &file.symbols.identifiers,
                    );
                }
            }
            ctx.commit(self.writer_timeout()).await?;
            let _ = ctx.fresh_searcher();
        }

        let doc_count = search::doc_count(ctx, self.reader_max_age())?;
        let report = IndexReport {
            new,
            doc_count,
            indexed,
            skipped_unchanged,
            removed,
            failed,
            duration_ms: start.elapsed().as_millis() as u64,
            index_path: self.resolver.index_dir(ws).to_string_lossy().to_string(),
        };
        info!(
            workspace = %ws.hash,
            indexed,
            skipped = skipped_unchanged,
            removed,
            failed,
            doc_count,
            duration_ms = report.duration_ms,
            "workspace index pass complete"
        );
        Ok(report)
    }

    async fn write_batches(
        &self,
        ws: &WorkspaceId,
        ctx: &Arc<IndexContext>,
        symbol_db: &Option<Arc<SymbolDatabase>>,
        files: Vec<PreparedFile>,
        removed_paths: &[String],
        cancel: &CancelFlag,
    ) -> EngineResult<()> {
        let batch_size = self.config.index_batch_size.max(1);
        let schema = ctx.schema.clone();

        // Deletions first: term deletes for vanished files plus their
        // symbol rows.
        if !removed_paths.is_empty() {
            let removed: Vec<String> = removed_paths.to_vec();
            let abs_root = ws.canonical.clone();
            ctx.with_writer(self.writer_timeout(), |writer| {
                for rel in &removed {
                    let abs = abs_root.join(rel).to_string_lossy().replace('\\', "/");
                    writer.delete_term(Term::from_field_text(schema.path, &abs));
                }
                Ok(())
            })
            .await?;
            if let Some(db) = symbol_db {
                for rel in removed_paths {
                    if let Err(e) = db.delete_for_file(rel) {
                        warn!(file = %rel, error = %e, "symbol delete failed");
                    }
                }
            }
        }

        let mut batch_start = 0;
        while batch_start < files.len() {
            cancel.check()?;
            let batch_end = (batch_start + batch_size).min(files.len());
            let batch = &files[batch_start..batch_end];

            let mut bytes: u64 = 0;
            ctx.with_writer(self.writer_timeout(), |writer| {
                for file in batch {
                    let abs = ws
                        .canonical
                        .join(&file.walked.relative_path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    writer.delete_term(Term::from_field_text(schema.path, &abs));
                    if let Err(e) = writer.add_document(file.document.clone()) {
                        warn!(file = %file.walked.relative_path, error = %e, "failed to add document");
                        continue;
                    }
                    bytes += file.walked.size;
                }
                Ok(())
            })
            .await?;
            ctx.add_pending_bytes(bytes);

            // Same logical unit of work: the symbol rows land with the
            // document batch. The inverted index stays authoritative on
            // crash; the startup reconciler re-extracts stragglers.
            if let Some(db) = symbol_db {
                for file in batch {
                    if let Err(e) = db.upsert_file(
                        &file.walked.relative_path,
                        file.language,
                        &file.content_hash,
                        file.walked.size,
                        file.walked.last_modified as i64,
                        &file.symbols.symbols,
                        &file.symbols.identifiers,
                    ) {
                        warn!(file = %file.walked.relative_path, error = %e, "symbol upsert failed");
                    }
                }
            }

            self.enforce_memory_ceiling(ctx).await?;
            batch_start = batch_end;
        }
        Ok(())
    }

    /// Re-index one file in place (watcher and edit paths). Does not commit;
    /// the caller batches commits.
    pub async fn index_file(&self, ws: &WorkspaceId, relative_path: &str) -> EngineResult<()> {
        let Ok(ctx) = self.get_context(ws, false).await else {
            return Ok(()); // Never indexed; the full pass will pick it up.
        };
        if ctx.is_indexing() {
            return Ok(()); // Full pass in flight covers this file.
        }

        let abs = ws.canonical.join(relative_path);
        if !abs.exists() || !pipeline::is_indexable(&abs) {
            return Ok(());
        }
        let metadata = std::fs::metadata(&abs)?;
        if metadata.len() > self.config.max_file_size_bytes {
            return Ok(());
        }

        let walked = WalkedFile {
            abs_path: abs.clone(),
            relative_path: relative_path.to_string(),
            size: metadata.len(),
            last_modified: pipeline::mtime_secs(&metadata),
        };
        let Some(prepared) =
            pipeline::prepare_file(&ctx.schema, ws, walked, self.config.binary_sniff_bytes)?
        else {
            return Ok(());
        };

        let schema = ctx.schema.clone();
        let abs_str = abs.to_string_lossy().replace('\\', "/");
        let doc = prepared.document.clone();
        let size = prepared.walked.size;
        ctx.with_writer(self.writer_timeout(), move |writer| {
            writer.delete_term(Term::from_field_text(schema.path, &abs_str));
            writer
                .add_document(doc)
                .map_err(|e| EngineError::Index(format!("failed to add document: {e}")))?;
            Ok(())
        })
        .await?;
        ctx.add_pending_bytes(size);

        if let Some(db) = self.try_symbol_db(ws) {
            if let Err(e) = db.upsert_file(
                relative_path,
                prepared.language,
                &prepared.content_hash,
                prepared.walked.size,
                prepared.walked.last_modified as i64,
                &prepared.symbols.symbols,
                &prepared.symbols.identifiers,
            ) {
                warn!(file = relative_path, error = %e, "symbol upsert failed");
            }
        }
        self.enforce_memory_ceiling(&ctx).await?;
        Ok(())
    }

    /// Term-delete one file (watcher and edit paths). Does not commit.
    pub async fn remove_file(&self, ws: &WorkspaceId, relative_path: &str) -> EngineResult<()> {
        let Ok(ctx) = self.get_context(ws, false).await else {
            return Ok(());
        };
        let schema = ctx.schema.clone();
        let abs = ws
            .canonical
            .join(relative_path)
            .to_string_lossy()
            .replace('\\', "/");
        ctx.with_writer(self.writer_timeout(), move |writer| {
            writer.delete_term(Term::from_field_text(schema.path, &abs));
            Ok(())
        })
        .await?;
        if let Some(db) = self.try_symbol_db(ws) {
            let _ = db.delete_for_file(relative_path);
        }
        Ok(())
    }

    pub async fn commit(&self, ws: &WorkspaceId) -> EngineResult<()> {
        let ctx = self.get_context(ws, false).await?;
        ctx.commit(self.writer_timeout()).await?;
        Ok(())
    }

    /// Search with a prepared query. The scoring pass touches stored fields,
    /// so it runs on the blocking pool.
    pub async fn search(
        &self,
        ws: &WorkspaceId,
        prepared: PreparedQuery,
        max_results: usize,
        want_snippets: bool,
        cancel: &CancelFlag,
    ) -> EngineResult<Vec<SearchHit>> {
        let ctx = self.get_context(ws, false).await?;
        let opts = SearchOptions {
            max_results,
            want_snippets,
            reader_max_age: self.reader_max_age(),
            regex_scan_cap: self.config.regex_scan_cap,
        };
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || search::execute_search(&ctx, &prepared, &opts, &cancel))
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("search task failed: {e}")))?
    }

    pub async fn recent_files(
        &self,
        ws: &WorkspaceId,
        cutoff: u64,
        limit: usize,
    ) -> EngineResult<Vec<SearchHit>> {
        let ctx = self.get_context(ws, false).await?;
        search::recent_files(&ctx, cutoff, limit, self.reader_max_age())
    }

    /// Drop every document (and symbol row) for a workspace, keeping the
    /// index directory itself.
    pub async fn clear(&self, ws: &WorkspaceId) -> EngineResult<()> {
        let ctx = self.get_context(ws, false).await?;
        self.clear_inner(ws, &ctx).await
    }

    async fn clear_inner(&self, ws: &WorkspaceId, ctx: &Arc<IndexContext>) -> EngineResult<()> {
        ctx.with_writer(self.writer_timeout(), |writer| {
            writer
                .delete_all_documents()
                .map_err(|e| EngineError::Index(format!("clear failed: {e}")))?;
            Ok(())
        })
        .await?;
        ctx.commit(self.writer_timeout()).await?;
        if let Some(db) = self.try_symbol_db(ws) {
            let _ = db.clear();
        }
        Ok(())
    }

    /// Destructive rebuild: clear, then a forced full pass.
    pub async fn rebuild(&self, ws: &WorkspaceId, cancel: &CancelFlag) -> EngineResult<IndexReport> {
        self.index_workspace(ws, true, cancel).await
    }

    pub async fn stats(&self, ws: &WorkspaceId) -> EngineResult<IndexStats> {
        let ctx = self.get_context(ws, false).await?;
        let doc_count = search::doc_count(&ctx, self.reader_max_age())?;
        let symbol_count = self
            .try_symbol_db(ws)
            .and_then(|db| db.symbol_count().ok());
        Ok(IndexStats {
            workspace_path: ws.display_path(),
            workspace_hash: ws.hash.clone(),
            doc_count,
            refresh_version: ctx.refresh_version(),
            committed_opstamp: ctx.committed_opstamp(),
            pending_bytes: ctx.pending_bytes(),
            is_indexing: ctx.is_indexing(),
            symbol_count,
        })
    }

    /// Read-only probe: can the on-disk index be opened and searched?
    pub fn health(&self, ws: &WorkspaceId) -> IndexHealth {
        let index_dir = self.resolver.index_dir(ws);
        let probe = || -> EngineResult<usize> {
            let index = Index::open_in_dir(&index_dir)?;
            register_code_tokenizer(&index);
            let reader = index.reader()?;
            let searcher = reader.searcher();
            Ok(searcher
                .segment_readers()
                .iter()
                .map(|s| s.num_docs() as usize)
                .sum())
        };
        match probe() {
            Ok(doc_count) => IndexHealth {
                workspace_hash: ws.hash.clone(),
                ok: true,
                doc_count: Some(doc_count),
                error: None,
            },
            Err(e) => IndexHealth {
                workspace_hash: ws.hash.clone(),
                ok: false,
                doc_count: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Force an early commit on the largest pending buffer once the
    /// process-wide ceiling is crossed.
    async fn enforce_memory_ceiling(&self, current: &Arc<IndexContext>) -> EngineResult<()> {
        let total: u64 = self.contexts.iter().map(|c| c.pending_bytes()).sum();
        if total <= self.config.ram_ceiling_bytes {
            return Ok(());
        }
        let largest = self
            .contexts
            .iter()
            .max_by_key(|c| c.pending_bytes())
            .map(|c| c.value().clone());
        let target = largest.unwrap_or_else(|| current.clone());
        info!(workspace = %target.workspace.hash, total_pending = total, "memory ceiling hit, forcing commit");
        target.commit(self.writer_timeout()).await?;
        Ok(())
    }

    /// Evict least-recently-used contexts beyond the open-index bound,
    /// committing their pending writes first.
    async fn evict_over_limit(&self) {
        while self.contexts.len() > self.config.max_open_indexes {
            let victim = self
                .contexts
                .iter()
                .min_by_key(|c| c.last_access())
                .map(|c| (c.key().clone(), c.value().clone()));
            let Some((hash, ctx)) = victim else {
                return;
            };
            if let Err(e) = ctx.dispose().await {
                warn!(workspace = %hash, error = %e, "eviction dispose failed");
            }
            self.contexts.remove(&hash);
            self.symbol_dbs.remove(&hash);
            info!(workspace = %hash, "evicted least-recently-used index context");
        }
    }

    /// Commit and close everything; used at shutdown.
    pub async fn dispose_all(&self) {
        let all: Vec<Arc<IndexContext>> =
            self.contexts.iter().map(|c| c.value().clone()).collect();
        for ctx in all {
            if let Err(e) = ctx.dispose().await {
                warn!(workspace = %ctx.workspace.hash, error = %e, "dispose on shutdown failed");
            }
        }
        self.contexts.clear();
        self.symbol_dbs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::preprocess::{SearchType, prepare_query};

    fn engine(base: &std::path::Path) -> IndexManager {
        IndexManager::new(EngineConfig {
            base_dir: base.to_path_buf(),
            ..Default::default()
        })
    }

    fn write(root: &std::path::Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    async fn indexed_workspace(
        manager: &IndexManager,
        ws_dir: &std::path::Path,
    ) -> (WorkspaceId, IndexReport) {
        let ws = manager.resolver().resolve(ws_dir.to_str().unwrap()).unwrap();
        let report = manager
            .index_workspace(&ws, false, &CancelFlag::new())
            .await
            .unwrap();
        (ws, report)
    }

    #[tokio::test]
    async fn empty_workspace_indexes_to_zero_docs() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        let manager = engine(base.path());
        let (_, report) = indexed_workspace(&manager, ws_dir.path()).await;
        assert!(report.new);
        assert_eq!(report.doc_count, 0);
    }

    #[tokio::test]
    async fn index_then_search_finds_camel_case() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        write(
            ws_dir.path(),
            "src/Foo.cs",
            "public class HttpClientFactory { public void Build() { } }",
        );
        let manager = engine(base.path());
        let (ws, report) = indexed_workspace(&manager, ws_dir.path()).await;
        assert_eq!(report.indexed, 1);

        let ctx = manager.get_context(&ws, false).await.unwrap();
        for query in ["HttpClient", "client factory"] {
            let prepared =
                prepare_query(&ctx.schema, query, SearchType::Standard, false).unwrap();
            let hits = manager
                .search(&ws, prepared, 10, true, &CancelFlag::new())
                .await
                .unwrap();
            assert!(!hits.is_empty(), "no hits for {query}");
            assert!(hits[0].relative_path.ends_with("Foo.cs"));
        }
    }

    #[tokio::test]
    async fn unchanged_files_are_skipped_on_reindex() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        write(ws_dir.path(), "a.rs", "fn a() {}");
        let manager = engine(base.path());
        let (ws, first) = indexed_workspace(&manager, ws_dir.path()).await;
        assert_eq!(first.indexed, 1);

        let second = manager
            .index_workspace(&ws, false, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.skipped_unchanged, 1);
        assert_eq!(second.doc_count, 1);
    }

    #[tokio::test]
    async fn deleted_files_are_removed_from_index() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        write(ws_dir.path(), "a.rs", "fn alpha_marker() {}");
        write(ws_dir.path(), "b.rs", "fn beta() {}");
        let manager = engine(base.path());
        let (ws, first) = indexed_workspace(&manager, ws_dir.path()).await;
        assert_eq!(first.doc_count, 2);

        std::fs::remove_file(ws_dir.path().join("a.rs")).unwrap();
        let second = manager
            .index_workspace(&ws, false, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(second.removed, 1);
        assert_eq!(second.doc_count, 1);
    }

    #[tokio::test]
    async fn exactly_one_document_per_path() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        write(ws_dir.path(), "a.rs", "fn one() {}");
        let manager = engine(base.path());
        let (ws, _) = indexed_workspace(&manager, ws_dir.path()).await;

        // Re-index the same file several times without a full pass.
        for content in ["fn two() {}", "fn three() {}", "fn four() {}"] {
            write(ws_dir.path(), "a.rs", content);
            manager.index_file(&ws, "a.rs").await.unwrap();
        }
        manager.commit(&ws).await.unwrap();

        let ctx = manager.get_context(&ws, false).await.unwrap();
        let abs = ws
            .canonical
            .join("a.rs")
            .to_string_lossy()
            .replace('\\', "/");
        let count = search::count_by_path(&ctx, &abs, manager.reader_max_age()).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn search_without_index_surfaces_no_index() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        let manager = engine(base.path());
        let ws = manager
            .resolver()
            .resolve(ws_dir.path().to_str().unwrap())
            .unwrap();
        let schema = IndexSchema::build();
        let prepared = prepare_query(&schema, "anything", SearchType::Standard, false).unwrap();
        let err = manager
            .search(&ws, prepared, 10, false, &CancelFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_INDEX");
    }

    #[tokio::test]
    async fn read_your_writes_after_commit() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        write(ws_dir.path(), "a.rs", "fn original() {}");
        let manager = engine(base.path());
        let (ws, _) = indexed_workspace(&manager, ws_dir.path()).await;

        write(ws_dir.path(), "a.rs", "fn freshly_added_marker() {}");
        manager.index_file(&ws, "a.rs").await.unwrap();
        manager.commit(&ws).await.unwrap();

        let ctx = manager.get_context(&ws, false).await.unwrap();
        let prepared =
            prepare_query(&ctx.schema, "freshly_added_marker", SearchType::Standard, false)
                .unwrap();
        let hits = manager
            .search(&ws, prepared, 10, false, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_index_leaves_valid_state() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            write(ws_dir.path(), &format!("f{i}.rs"), &format!("fn f{i}() {{}}"));
        }
        let manager = engine(base.path());
        let ws = manager
            .resolver()
            .resolve(ws_dir.path().to_str().unwrap())
            .unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = manager.index_workspace(&ws, false, &cancel).await.unwrap_err();
        assert_eq!(err.code(), "CANCELLED");

        // A subsequent pass completes normally.
        let report = manager
            .index_workspace(&ws, false, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.doc_count, 20);
    }

    #[tokio::test]
    async fn force_rebuild_resets_index() {
        let base = tempfile::tempdir().unwrap();
        let ws_dir = tempfile::tempdir().unwrap();
        write(ws_dir.path(), "a.rs", "fn a() {}");
        let manager = engine(base.path());
        let (ws, _) = indexed_workspace(&manager, ws_dir.path()).await;

        let report = manager.rebuild(&ws, &CancelFlag::new()).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.doc_count, 1);
    }
}
