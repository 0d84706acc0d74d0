use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Errors surfaced by a resource loader
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("resource unreachable: {0}")]
    Unreachable(String),

    #[error("warm-up failed: {0}")]
    Warm(String),
}

/// Capability interface for clip I/O.
///
/// The engine and cache never touch storage or the network directly; they
/// go through this trait so tests can substitute a scripted fake and other
/// transports (HTTP, CDN) can be slotted in without touching the engine.
pub trait ResourceLoader: Send + Sync + 'static {
    /// Cheap reachability check. Must not transfer the clip body.
    fn probe(&self, url: &str) -> impl Future<Output = Result<(), LoadError>> + Send;

    /// Warm the clip into local buffers ahead of playback need.
    fn warm(&self, url: &str) -> impl Future<Output = Result<(), LoadError>> + Send;
}

/// Filesystem-backed loader.
///
/// Probing checks that the clip file exists; warming reads it through once
/// so the OS page cache holds it before the surface loads it. When a cache
/// directory is configured the clip is also copied there; a missing cache
/// directory disables persistence without being an error.
pub struct FsLoader {
    root: PathBuf,
    cache_dir: Option<PathBuf>,
}

impl FsLoader {
    pub fn new(root: PathBuf, cache_dir: Option<PathBuf>) -> Self {
        Self { root, cache_dir }
    }

    /// Map a clip URL to its on-disk path
    fn resolve_path(&self, url: &str) -> PathBuf {
        let path = Path::new(url);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Best-effort copy into the cache directory
    async fn persist(&self, url: &str, source: &Path) {
        let Some(cache_dir) = &self.cache_dir else {
            return;
        };

        let Some(name) = source.file_name() else {
            return;
        };
        let target = cache_dir.join(name);

        if tokio::fs::metadata(&target).await.is_ok() {
            log::trace!("cache copy of {} already present", url);
            return;
        }

        if let Err(e) = tokio::fs::create_dir_all(cache_dir).await {
            log::debug!(
                "Cache dir {} unavailable, skipping persist: {}",
                cache_dir.display(),
                e
            );
            return;
        }

        match tokio::fs::copy(source, &target).await {
            Ok(bytes) => log::debug!("Persisted {} to cache ({} bytes)", url, bytes),
            Err(e) => log::debug!("Failed to persist {} to cache: {}", url, e),
        }
    }
}

impl ResourceLoader for FsLoader {
    async fn probe(&self, url: &str) -> Result<(), LoadError> {
        let path = self.resolve_path(url);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                log::trace!("probe: {} reachable ({} bytes)", url, meta.len());
                Ok(())
            }
            Ok(_) => Err(LoadError::Unreachable(format!(
                "{} is not a regular file",
                path.display()
            ))),
            Err(e) => Err(LoadError::Unreachable(format!("{}: {}", path.display(), e))),
        }
    }

    async fn warm(&self, url: &str) -> Result<(), LoadError> {
        let path = self.resolve_path(url);

        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| LoadError::Warm(format!("{}: {}", path.display(), e)))?;

        // Read the clip through once so subsequent loads hit warm buffers
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| LoadError::Warm(format!("{}: {}", path.display(), e)))?;
            if n == 0 {
                break;
            }
            total += n as u64;
        }

        log::debug!("Warmed {} ({} bytes)", url, total);

        self.persist(url, &path).await;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted loader for engine and cache tests.
    ///
    /// Every probe/warm yields at least once (through a timer) so in-flight
    /// dedup paths are actually exercised under a paused test clock.
    #[derive(Default)]
    pub(crate) struct FakeLoader {
        pub unreachable: Mutex<HashSet<String>>,
        pub warm_failures: Mutex<HashSet<String>>,
        /// URLs whose warm-up never completes (preload stall scenario)
        pub warm_stalls: Mutex<HashSet<String>>,
        pub probe_calls: Mutex<HashMap<String, usize>>,
        pub warm_calls: Mutex<HashMap<String, usize>>,
    }

    impl FakeLoader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn mark_unreachable(&self, url: &str) {
            self.unreachable.lock().unwrap().insert(url.to_string());
        }

        pub fn mark_reachable(&self, url: &str) {
            self.unreachable.lock().unwrap().remove(url);
        }

        pub fn fail_warm(&self, url: &str) {
            self.warm_failures.lock().unwrap().insert(url.to_string());
        }

        pub fn stall_warm(&self, url: &str) {
            self.warm_stalls.lock().unwrap().insert(url.to_string());
        }

        pub fn probes_of(&self, url: &str) -> usize {
            self.probe_calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }

        pub fn warms_of(&self, url: &str) -> usize {
            self.warm_calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }

        fn count(map: &Mutex<HashMap<String, usize>>, url: &str) {
            *map.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        }
    }

    impl ResourceLoader for FakeLoader {
        async fn probe(&self, url: &str) -> Result<(), LoadError> {
            Self::count(&self.probe_calls, url);
            tokio::time::sleep(Duration::from_millis(10)).await;

            if self.unreachable.lock().unwrap().contains(url) {
                Err(LoadError::Unreachable(url.to_string()))
            } else {
                Ok(())
            }
        }

        async fn warm(&self, url: &str) -> Result<(), LoadError> {
            Self::count(&self.warm_calls, url);

            if self.warm_stalls.lock().unwrap().contains(url) {
                std::future::pending::<()>().await;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;

            if self.warm_failures.lock().unwrap().contains(url) {
                Err(LoadError::Warm(url.to_string()))
            } else {
                Ok(())
            }
        }
    }
}
