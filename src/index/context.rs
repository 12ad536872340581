use crate::error::{EngineError, EngineResult};
use crate::index::schema::IndexSchema;
use crate::paths::WorkspaceId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher};
use tracing::debug;

/// Near-real-time reader cache for one workspace.
///
/// Tantivy readers only see committed segments, so the reopen-against-writer
/// design is approximated by commit-then-reload: a commit invalidates the
/// cached reader and the next search reloads it. The cache also reloads when
/// it has not been refreshed within `max_age`, or when the writer has
/// committed past the generation the reader last saw.
struct ReaderCache {
    reader: Option<IndexReader>,
    searcher: Option<Searcher>,
    last_refresh: Option<Instant>,
    seen_opstamp: u64,
    invalidated: bool,
    refresh_version: u64,
}

impl ReaderCache {
    fn new() -> Self {
        Self {
            reader: None,
            searcher: None,
            last_refresh: None,
            seen_opstamp: 0,
            invalidated: false,
            refresh_version: 0,
        }
    }

    fn is_stale(&self, committed: u64, max_age: Duration) -> bool {
        if self.searcher.is_none() || self.invalidated {
            return true;
        }
        if committed > self.seen_opstamp {
            return true;
        }
        match self.last_refresh {
            Some(at) => at.elapsed() > max_age,
            None => true,
        }
    }
}

/// Per-workspace holder of the inverted-index resources.
///
/// At most one `IndexWriter` exists per context; it is created on first
/// write and kept open. The async `writer` mutex serializes every mutation;
/// the search path only captures a searcher under the short reader lock and
/// then runs without any lock held.
pub struct IndexContext {
    pub workspace: WorkspaceId,
    pub index: Index,
    pub index_dir: std::path::PathBuf,
    pub schema: IndexSchema,
    writer: tokio::sync::Mutex<Option<IndexWriter>>,
    reader: parking_lot::Mutex<ReaderCache>,
    committed_opstamp: AtomicU64,
    /// Bytes buffered in the writer since the last commit; feeds the
    /// memory-pressure monitor.
    pending_bytes: AtomicU64,
    /// Unix seconds of last use; drives LRU eviction.
    last_access: AtomicU64,
    /// Guards against concurrent full-index passes on one workspace.
    is_indexing: std::sync::atomic::AtomicBool,
    writer_ram_budget: usize,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl IndexContext {
    pub fn new(
        workspace: WorkspaceId,
        index: Index,
        index_dir: std::path::PathBuf,
        schema: IndexSchema,
        ram_budget: usize,
    ) -> Self {
        Self {
            workspace,
            index,
            index_dir,
            schema,
            writer: tokio::sync::Mutex::new(None),
            reader: parking_lot::Mutex::new(ReaderCache::new()),
            committed_opstamp: AtomicU64::new(0),
            pending_bytes: AtomicU64::new(0),
            last_access: AtomicU64::new(unix_now()),
            is_indexing: std::sync::atomic::AtomicBool::new(false),
            writer_ram_budget: ram_budget,
        }
    }

    /// Atomically claim the full-indexing slot; `false` means a pass is
    /// already running.
    pub fn try_begin_indexing(&self) -> bool {
        self.is_indexing
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn end_indexing(&self) {
        self.is_indexing
            .store(false, std::sync::atomic::Ordering::Release);
    }

    pub fn is_indexing(&self) -> bool {
        self.is_indexing
            .load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn touch(&self) {
        self.last_access.store(unix_now(), Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes.load(Ordering::Relaxed)
    }

    pub fn add_pending_bytes(&self, n: u64) {
        self.pending_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn refresh_version(&self) -> u64 {
        self.reader.lock().refresh_version
    }

    pub fn committed_opstamp(&self) -> u64 {
        self.committed_opstamp.load(Ordering::Acquire)
    }

    /// Run `f` with exclusive writer access. The writer is created lazily on
    /// first use and kept open afterwards. Lock acquisition is bounded;
    /// exceeding the timeout surfaces `LockHeld`.
    pub async fn with_writer<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut IndexWriter) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut slot = tokio::time::timeout(timeout, self.writer.lock())
            .await
            .map_err(|_| EngineError::LockHeld(self.workspace.display_path()))?;
        if slot.is_none() {
            *slot = Some(self.open_writer()?);
            crate::index::reconcile::write_pid_sidecar(&self.index_dir);
        }
        self.touch();
        f(slot.as_mut().expect("writer just created"))
    }

    /// Acquire the tantivy writer, retrying once after a stale-lock sweep
    /// when a dead process left its OS lock behind.
    fn open_writer(&self) -> EngineResult<IndexWriter> {
        match self.index.writer(self.writer_ram_budget) {
            Ok(writer) => Ok(writer),
            Err(tantivy::TantivyError::LockFailure(_, _)) => {
                if crate::index::reconcile::sweep_stale_lock(&self.index_dir) {
                    self.index
                        .writer(self.writer_ram_budget)
                        .map_err(|_| EngineError::LockHeld(self.workspace.display_path()))
                } else {
                    Err(EngineError::LockHeld(self.workspace.display_path()))
                }
            }
            Err(e) => Err(EngineError::Index(format!("failed to create writer: {e}"))),
        }
    }

    /// Commit the writer (if one was ever created) and invalidate the cached
    /// reader so the next search observes the new generation.
    pub async fn commit(&self, timeout: Duration) -> EngineResult<u64> {
        let opstamp = self
            .with_writer(timeout, |writer| {
                writer
                    .commit()
                    .map_err(|e| EngineError::Index(format!("commit failed: {e}")))
            })
            .await?;
        self.pending_bytes.store(0, Ordering::Relaxed);
        self.committed_opstamp.store(opstamp, Ordering::Release);
        self.invalidate_reader();
        debug!(workspace = %self.workspace.hash, opstamp, "index committed");
        Ok(opstamp)
    }

    /// Cached searcher, reloading when stale per the NRT state machine.
    pub fn searcher(&self, max_age: Duration) -> EngineResult<Searcher> {
        let committed = self.committed_opstamp();
        let mut cache = self.reader.lock();
        if cache.is_stale(committed, max_age) {
            self.reload_locked(&mut cache, committed)?;
        }
        self.touch();
        Ok(cache.searcher.clone().expect("reader cache just refreshed"))
    }

    /// Unconditional reopen; used after large batch commits.
    pub fn fresh_searcher(&self) -> EngineResult<Searcher> {
        let committed = self.committed_opstamp();
        let mut cache = self.reader.lock();
        self.reload_locked(&mut cache, committed)?;
        self.touch();
        Ok(cache.searcher.clone().expect("reader cache just refreshed"))
    }

    /// Dispose the cached reader; the next search rebuilds it.
    pub fn invalidate_reader(&self) {
        let mut cache = self.reader.lock();
        cache.invalidated = true;
        cache.searcher = None;
    }

    fn reload_locked(&self, cache: &mut ReaderCache, committed: u64) -> EngineResult<()> {
        if cache.reader.is_none() {
            let reader = self
                .index
                .reader_builder()
                .reload_policy(ReloadPolicy::Manual)
                .try_into()
                .map_err(|e: tantivy::TantivyError| {
                    EngineError::Index(format!("failed to open reader: {e}"))
                })?;
            cache.reader = Some(reader);
        } else {
            cache
                .reader
                .as_ref()
                .expect("reader present")
                .reload()
                .map_err(|e| EngineError::Index(format!("failed to reload reader: {e}")))?;
        }
        cache.searcher = Some(cache.reader.as_ref().expect("reader present").searcher());
        cache.last_refresh = Some(Instant::now());
        cache.seen_opstamp = committed;
        cache.invalidated = false;
        cache.refresh_version += 1;
        Ok(())
    }

    /// Commit pending writes and drop the writer, releasing the OS lock.
    /// Called on LRU eviction and process shutdown.
    pub async fn dispose(&self) -> EngineResult<()> {
        let mut slot = self.writer.lock().await;
        if let Some(mut writer) = slot.take() {
            let opstamp = writer
                .commit()
                .map_err(|e| EngineError::Index(format!("commit on dispose failed: {e}")))?;
            self.committed_opstamp.store(opstamp, Ordering::Release);
            self.pending_bytes.store(0, Ordering::Relaxed);
            // Block until merge threads finish so the directory lock is free
            // for the next open.
            writer
                .wait_merging_threads()
                .map_err(|e| EngineError::Index(format!("merge shutdown failed: {e}")))?;
            crate::index::reconcile::remove_pid_sidecar(&self.index_dir);
        }
        self.invalidate_reader();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::register_code_tokenizer;

    fn context_in(dir: &std::path::Path) -> IndexContext {
        let schema = IndexSchema::build();
        let index = Index::create_in_dir(dir, schema.schema().clone()).unwrap();
        register_code_tokenizer(&index);
        let ws = WorkspaceId {
            canonical: dir.to_path_buf(),
            hash: "cafebabe00000000".into(),
        };
        IndexContext::new(ws, index, dir.to_path_buf(), schema, 50_000_000)
    }

    #[tokio::test]
    async fn refresh_version_is_monotonic() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_in(tmp.path());
        let _ = ctx.searcher(Duration::from_secs(30)).unwrap();
        let v1 = ctx.refresh_version();
        let _ = ctx.fresh_searcher().unwrap();
        let v2 = ctx.refresh_version();
        assert!(v2 > v1);
        // A fresh-enough cached searcher does not bump the version.
        let _ = ctx.searcher(Duration::from_secs(30)).unwrap();
        assert_eq!(ctx.refresh_version(), v2);
    }

    #[tokio::test]
    async fn commit_invalidates_reader() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_in(tmp.path());
        let _ = ctx.searcher(Duration::from_secs(30)).unwrap();
        let before = ctx.refresh_version();

        let schema = ctx.schema.clone();
        ctx.with_writer(Duration::from_secs(5), |writer| {
            let mut doc = tantivy::TantivyDocument::new();
            doc.add_text(schema.path, "/ws/a.rs");
            doc.add_text(schema.content, "fn main() {}");
            writer.add_document(doc).unwrap();
            Ok(())
        })
        .await
        .unwrap();
        ctx.commit(Duration::from_secs(5)).await.unwrap();

        let searcher = ctx.searcher(Duration::from_secs(30)).unwrap();
        assert!(ctx.refresh_version() > before);
        assert_eq!(searcher.num_docs(), 1);
    }

    #[tokio::test]
    async fn dispose_commits_and_releases_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_in(tmp.path());
        let schema = ctx.schema.clone();
        ctx.with_writer(Duration::from_secs(5), |writer| {
            let mut doc = tantivy::TantivyDocument::new();
            doc.add_text(schema.path, "/ws/b.rs");
            doc.add_text(schema.content, "struct B;");
            writer.add_document(doc).unwrap();
            Ok(())
        })
        .await
        .unwrap();
        ctx.dispose().await.unwrap();
        // Writes made before dispose are durable and visible.
        let searcher = ctx.fresh_searcher().unwrap();
        assert_eq!(searcher.num_docs(), 1);
    }
}
