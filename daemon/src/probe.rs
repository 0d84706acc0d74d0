use std::sync::Arc;

use crate::cache::{Availability, PreloadCache};
use crate::loader::ResourceLoader;

/// Reachability gate consulted before committing to a transition.
///
/// The dedup and state bookkeeping live in the cache; what this adds is
/// the coupling between the two: a successful probe kicks off the preload
/// fire-and-forget so the clip is warming while the engine arms the
/// surface.
pub struct AvailabilityProbe<L> {
    cache: Arc<PreloadCache<L>>,
}

impl<L: ResourceLoader> AvailabilityProbe<L> {
    pub fn new(cache: Arc<PreloadCache<L>>) -> Self {
        Self { cache }
    }

    /// Probe a clip; on success start warming it in the background
    pub async fn check(&self, url: &str) -> Availability {
        let availability = self.cache.probe(url).await;

        if availability == Availability::Available {
            let cache = Arc::clone(&self.cache);
            let url = url.to_string();
            tokio::spawn(async move {
                let preload = cache.preload(&url).await;
                log::trace!("Background preload of {} settled: {:?}", url, preload);
            });
        }

        availability
    }
}
