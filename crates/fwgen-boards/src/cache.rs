//! Read-only cache of upstream board constraint files.
//!
//! Entries are keyed by `(board, upstream commit)` and checksummed on write;
//! a miss triggers at most one fetch per build, bounded by a timeout. Fetch
//! failure is never fatal: the caller falls back to the built-in pinout
//! template and records a warning.

use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::catalog::BoardDescriptor;
use crate::error::BoardError;

/// How long a fetch may run before the build falls back.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of upstream constraint text. Implementations must be cheap to
/// clone into the fetch worker thread.
pub trait UpstreamFetcher: Send + Sync {
    fn fetch(&self, source_path: &str) -> Result<String, BoardError>;
}

/// Fetcher backed by a pre-synced local mirror of the upstream board repo.
#[derive(Debug, Clone)]
pub struct MirrorFetcher {
    mirror_root: PathBuf,
}

impl MirrorFetcher {
    pub fn new(mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            mirror_root: mirror_root.into(),
        }
    }
}

impl UpstreamFetcher for MirrorFetcher {
    fn fetch(&self, source_path: &str) -> Result<String, BoardError> {
        let path = self.mirror_root.join(source_path);
        fs::read_to_string(&path).map_err(|err| BoardError::CacheFetch {
            board: source_path.to_string(),
            reason: format!("{}: {err}", path.display()),
        })
    }
}

/// On-disk cache: `<dir>/<board>-<commit>.xdc` plus a `.sha256` sidecar.
#[derive(Debug, Clone)]
pub struct RepoCache {
    dir: PathBuf,
    timeout: Duration,
}

impl RepoCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn entry_path(&self, board: &str, commit: &str) -> PathBuf {
        self.dir.join(format!("{board}-{commit}.xdc"))
    }

    fn checksum_path(&self, board: &str, commit: &str) -> PathBuf {
        self.dir.join(format!("{board}-{commit}.xdc.sha256"))
    }

    /// Returns the cached constraint text for `(board, commit)`, fetching it
    /// once on a miss. `None` means the board has no upstream source or the
    /// fetch failed/timed out; callers use the built-in fallback.
    pub fn constraints(
        &self,
        board: &BoardDescriptor,
        commit: &str,
        fetcher: Arc<dyn UpstreamFetcher>,
    ) -> Result<Option<String>, BoardError> {
        let Some(source_path) = board.pinout_xdc_source else {
            return Ok(None);
        };

        if let Some(text) = self.read_verified(board.name, commit)? {
            return Ok(Some(text));
        }

        match self.fetch_bounded(board.name, source_path, fetcher) {
            Ok(text) => {
                self.write_entry(board.name, commit, &text)?;
                Ok(Some(text))
            }
            Err(err) => {
                tracing::warn!(board = board.name, %err, "constraint fetch failed, using fallback");
                Ok(None)
            }
        }
    }

    fn read_verified(&self, board: &str, commit: &str) -> Result<Option<String>, BoardError> {
        let entry = self.entry_path(board, commit);
        if !entry.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&entry)?;
        let recorded = fs::read_to_string(self.checksum_path(board, commit))?;
        if checksum(&text) != recorded.trim() {
            return Err(BoardError::ChecksumMismatch {
                board: board.to_string(),
            });
        }
        Ok(Some(text))
    }

    fn write_entry(&self, board: &str, commit: &str, text: &str) -> Result<(), BoardError> {
        fs::create_dir_all(&self.dir)?;
        // One writer, many readers: land the content under a temporary name,
        // then rename into place so readers never observe a partial entry.
        let entry = self.entry_path(board, commit);
        let staged = entry.with_extension("xdc.partial");
        fs::write(&staged, text)?;
        fs::write(self.checksum_path(board, commit), checksum(text))?;
        fs::rename(&staged, &entry)?;
        Ok(())
    }

    /// Runs the fetch on a worker thread; on timeout the worker is abandoned
    /// and its eventual result discarded.
    fn fetch_bounded(
        &self,
        board: &str,
        source_path: &str,
        fetcher: Arc<dyn UpstreamFetcher>,
    ) -> Result<String, BoardError> {
        let (tx, rx) = mpsc::channel();
        let source = source_path.to_string();
        std::thread::spawn(move || {
            let _ = tx.send(fetcher.fetch(&source));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => Err(BoardError::CacheFetch {
                board: board.to_string(),
                reason: format!("timed out after {:?}", self.timeout),
            }),
        }
    }
}

fn checksum(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::board;
    use tempfile::tempdir;

    struct StaticFetcher(&'static str);

    impl UpstreamFetcher for StaticFetcher {
        fn fetch(&self, _source_path: &str) -> Result<String, BoardError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingFetcher;

    impl UpstreamFetcher for FailingFetcher {
        fn fetch(&self, source_path: &str) -> Result<String, BoardError> {
            Err(BoardError::CacheFetch {
                board: source_path.to_string(),
                reason: "upstream unreachable".into(),
            })
        }
    }

    #[test]
    fn fetches_once_then_serves_from_cache() {
        let dir = tempdir().unwrap();
        let cache = RepoCache::new(dir.path());
        let b = board("pcileech_75t484_x1").unwrap();

        let first = cache
            .constraints(b, "abc123", Arc::new(StaticFetcher("set_property PACKAGE_PIN A1")))
            .unwrap();
        assert_eq!(first.as_deref(), Some("set_property PACKAGE_PIN A1"));

        // Second call must hit the cache, not the (now different) upstream.
        let second = cache
            .constraints(b, "abc123", Arc::new(StaticFetcher("different content")))
            .unwrap();
        assert_eq!(second.as_deref(), Some("set_property PACKAGE_PIN A1"));
    }

    #[test]
    fn distinct_commits_get_distinct_entries() {
        let dir = tempdir().unwrap();
        let cache = RepoCache::new(dir.path());
        let b = board("pcileech_75t484_x1").unwrap();

        cache.constraints(b, "aaa", Arc::new(StaticFetcher("rev a"))).unwrap();
        let newer = cache.constraints(b, "bbb", Arc::new(StaticFetcher("rev b"))).unwrap();
        assert_eq!(newer.as_deref(), Some("rev b"));
    }

    #[test]
    fn fetch_failure_degrades_to_fallback() {
        let dir = tempdir().unwrap();
        let cache = RepoCache::new(dir.path());
        let b = board("pcileech_35t325_x1").unwrap();
        let result = cache.constraints(b, "abc", Arc::new(FailingFetcher)).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn board_without_upstream_source_uses_fallback() {
        let dir = tempdir().unwrap();
        let cache = RepoCache::new(dir.path());
        let b = board("pcileech_zdma_x8").unwrap();
        let result = cache.constraints(b, "abc", Arc::new(StaticFetcher("x"))).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn tampered_entry_fails_checksum() {
        let dir = tempdir().unwrap();
        let cache = RepoCache::new(dir.path());
        let b = board("pcileech_35t325_x1").unwrap();
        cache.constraints(b, "abc", Arc::new(StaticFetcher("original"))).unwrap();

        let entry = dir.path().join("pcileech_35t325_x1-abc.xdc");
        fs::write(&entry, "tampered").unwrap();
        let err = cache
            .constraints(b, "abc", Arc::new(StaticFetcher("original")))
            .unwrap_err();
        assert!(matches!(err, BoardError::ChecksumMismatch { .. }));
    }

    #[test]
    fn mirror_fetcher_reads_the_mirror_tree() {
        let dir = tempdir().unwrap();
        let source = "pcileech_35t325_x1/pcileech_35t325_x1.xdc";
        let path = dir.path().join(source);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "set_property IOSTANDARD LVCMOS33").unwrap();

        let fetcher = MirrorFetcher::new(dir.path());
        assert_eq!(
            fetcher.fetch(source).unwrap(),
            "set_property IOSTANDARD LVCMOS33"
        );
        assert!(fetcher.fetch("missing/file.xdc").is_err());
    }
}
