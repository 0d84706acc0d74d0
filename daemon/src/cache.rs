use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use common::{AssetStatus, CacheState, PreloadState, Variant};
use tokio::sync::watch;

use crate::loader::ResourceLoader;
use crate::recovery::RetryPolicy;

/// Outcome of a reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

/// Outcome of a preload warm-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preload {
    Ready,
    Failed,
}

/// Registry record for one clip. Created when the route table is
/// registered, mutated only by the cache, lives for the process lifetime.
#[derive(Debug, Clone)]
pub struct VideoAsset {
    pub url: String,
    pub variant: Variant,
    pub cache_state: CacheState,
    pub preload_state: PreloadState,
}

impl VideoAsset {
    fn new(url: &str, variant: Variant) -> Self {
        Self {
            url: url.to_string(),
            variant,
            cache_state: CacheState::Unknown,
            preload_state: PreloadState::NotStarted,
        }
    }
}

/// How a caller participates in a deduplicated operation: first caller
/// leads and does the work, later callers follow the in-flight channel,
/// and a terminal cache state settles without any I/O.
enum Flight<T> {
    Settled(T),
    Leader(watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

/// Tracks cache/preload status per clip URL and performs the actual
/// warm-up through the resource loader.
///
/// Concurrent probes or preloads for the same URL share one underlying
/// loader call: the in-flight maps hold a watch channel per URL and later
/// callers await the first caller's outcome. Lock order is always
/// `assets` before the in-flight map; no lock is held across an await.
pub struct PreloadCache<L> {
    pub(crate) loader: L,
    retry: RetryPolicy,
    preload_timeout: Duration,
    assets: Mutex<HashMap<String, VideoAsset>>,
    probes: Mutex<HashMap<String, watch::Receiver<Option<Availability>>>>,
    preloads: Mutex<HashMap<String, watch::Receiver<Option<Preload>>>>,
}

impl<L: ResourceLoader> PreloadCache<L> {
    pub fn new(loader: L, retry: RetryPolicy, preload_timeout: Duration) -> Self {
        Self {
            loader,
            retry,
            preload_timeout,
            assets: Mutex::new(HashMap::new()),
            probes: Mutex::new(HashMap::new()),
            preloads: Mutex::new(HashMap::new()),
        }
    }

    /// Create the registry record for a clip
    pub fn register(&self, url: &str, variant: Variant) {
        let mut assets = self.assets.lock().unwrap();
        assets
            .entry(url.to_string())
            .or_insert_with(|| VideoAsset::new(url, variant));
    }

    /// Check whether a clip is reachable.
    ///
    /// `Available` and `Unavailable` are terminal per probe cycle;
    /// `Unavailable` stays sticky until [`Self::reprobe`] resets the
    /// record. On success the caller is expected to kick off a preload.
    pub async fn probe(&self, url: &str) -> Availability {
        let flight = {
            let mut assets = self.assets.lock().unwrap();
            let asset = assets.entry(url.to_string()).or_insert_with(|| {
                log::debug!("Probing unregistered clip {}", url);
                VideoAsset::new(url, Variant::Normal)
            });

            match asset.cache_state {
                CacheState::Available => Flight::Settled(Availability::Available),
                CacheState::Unavailable => Flight::Settled(Availability::Unavailable),
                CacheState::Unknown | CacheState::Verifying => {
                    let mut probes = self.probes.lock().unwrap();
                    if let Some(rx) = probes.get(url) {
                        Flight::Follower(rx.clone())
                    } else {
                        let (tx, rx) = watch::channel(None);
                        probes.insert(url.to_string(), rx);
                        asset.cache_state = CacheState::Verifying;
                        Flight::Leader(tx)
                    }
                }
            }
        };

        match flight {
            Flight::Settled(availability) => availability,
            Flight::Follower(mut rx) => match rx.wait_for(|v| v.is_some()).await {
                Ok(value) => value.unwrap_or(Availability::Unavailable),
                Err(_) => {
                    // Leader abandoned mid-flight; clear the stale entry so
                    // the next probe starts a fresh cycle
                    log::warn!("Probe of {} abandoned in flight", url);
                    self.clear_stale_probe(url);
                    Availability::Unavailable
                }
            },
            Flight::Leader(tx) => {
                let availability = match self
                    .retry
                    .run("probe", || self.loader.probe(url))
                    .await
                {
                    Ok(()) => Availability::Available,
                    Err(e) => {
                        log::warn!("Clip {} unreachable: {}", url, e);
                        Availability::Unavailable
                    }
                };

                {
                    let mut assets = self.assets.lock().unwrap();
                    if let Some(asset) = assets.get_mut(url) {
                        asset.cache_state = match availability {
                            Availability::Available => CacheState::Available,
                            Availability::Unavailable => CacheState::Unavailable,
                        };
                    }
                    self.probes.lock().unwrap().remove(url);
                    let _ = tx.send(Some(availability));
                }

                availability
            }
        }
    }

    /// Warm a clip ahead of playback need.
    ///
    /// Idempotent: a second caller while a warm-up is in flight awaits the
    /// same outcome instead of starting a second read, and a clip already
    /// `Ready` resolves immediately. A warm-up that exceeds the bounded
    /// window resolves `Ready` anyway: a stalled loader must not block
    /// the pipeline, and a real decode problem still shows up when the
    /// surface loads the clip.
    pub async fn preload(&self, url: &str) -> Preload {
        let flight = {
            let mut assets = self.assets.lock().unwrap();
            let Some(asset) = assets.get_mut(url) else {
                log::debug!("Preload of unregistered clip {}", url);
                return Preload::Failed;
            };

            match asset.preload_state {
                PreloadState::Ready => Flight::Settled(Preload::Ready),
                _ => {
                    let mut preloads = self.preloads.lock().unwrap();
                    if let Some(rx) = preloads.get(url) {
                        Flight::Follower(rx.clone())
                    } else {
                        let (tx, rx) = watch::channel(None);
                        preloads.insert(url.to_string(), rx);
                        asset.preload_state = PreloadState::Preloading;
                        Flight::Leader(tx)
                    }
                }
            }
        };

        match flight {
            Flight::Settled(preload) => preload,
            Flight::Follower(mut rx) => match rx.wait_for(|v| v.is_some()).await {
                Ok(value) => value.unwrap_or(Preload::Failed),
                Err(_) => {
                    log::warn!("Preload of {} abandoned in flight", url);
                    self.clear_stale_preload(url);
                    Preload::Failed
                }
            },
            Flight::Leader(tx) => {
                let warmup = self.retry.run("preload", || self.loader.warm(url));
                let preload = match tokio::time::timeout(self.preload_timeout, warmup).await {
                    Ok(Ok(())) => Preload::Ready,
                    Ok(Err(e)) => {
                        log::warn!("Preload of {} failed: {}", url, e);
                        Preload::Failed
                    }
                    Err(_) => {
                        log::warn!(
                            "Preload of {} still pending after {:?}, treating as ready",
                            url,
                            self.preload_timeout
                        );
                        Preload::Ready
                    }
                };

                {
                    let mut assets = self.assets.lock().unwrap();
                    if let Some(asset) = assets.get_mut(url) {
                        asset.preload_state = match preload {
                            Preload::Ready => PreloadState::Ready,
                            Preload::Failed => PreloadState::Failed,
                        };
                    }
                    self.preloads.lock().unwrap().remove(url);
                    let _ = tx.send(Some(preload));
                }

                preload
            }
        }
    }

    /// Reset a clip so the next probe starts a fresh cycle. Returns false
    /// when the URL was never registered.
    pub fn reprobe(&self, url: &str) -> bool {
        let mut assets = self.assets.lock().unwrap();
        match assets.get_mut(url) {
            Some(asset) => {
                log::info!("Reprobe requested for {}", url);
                asset.cache_state = CacheState::Unknown;
                asset.preload_state = PreloadState::NotStarted;
                true
            }
            None => false,
        }
    }

    /// Mark a clip terminally unreachable (e.g. the surface failed to
    /// load it after retries)
    pub fn mark_unavailable(&self, url: &str) {
        let mut assets = self.assets.lock().unwrap();
        if let Some(asset) = assets.get_mut(url) {
            asset.cache_state = CacheState::Unavailable;
        }
    }

    /// Current (cache, preload) states of a clip
    #[allow(dead_code)] // Introspection used by tests
    pub fn states(&self, url: &str) -> Option<(CacheState, PreloadState)> {
        let assets = self.assets.lock().unwrap();
        assets
            .get(url)
            .map(|a| (a.cache_state, a.preload_state))
    }

    /// Status of every registered clip, sorted by URL
    pub fn snapshot(&self) -> Vec<AssetStatus> {
        let assets = self.assets.lock().unwrap();
        let mut statuses: Vec<AssetStatus> = assets
            .values()
            .map(|a| AssetStatus {
                url: a.url.clone(),
                variant: a.variant,
                cache_state: a.cache_state,
                preload_state: a.preload_state,
            })
            .collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }

    fn clear_stale_probe(&self, url: &str) {
        let mut assets = self.assets.lock().unwrap();
        if let Some(asset) = assets.get_mut(url) {
            if asset.cache_state == CacheState::Verifying {
                asset.cache_state = CacheState::Unknown;
            }
        }
        self.probes.lock().unwrap().remove(url);
    }

    fn clear_stale_preload(&self, url: &str) {
        let mut assets = self.assets.lock().unwrap();
        if let Some(asset) = assets.get_mut(url) {
            if asset.preload_state == PreloadState::Preloading {
                asset.preload_state = PreloadState::NotStarted;
            }
        }
        self.preloads.lock().unwrap().remove(url);
    }
}
