use std::sync::Arc;
use std::time::Duration;

use common::{EngineSnapshot, EngineState};
use tokio::sync::Mutex;

use crate::bus::{BusEvent, EventBus, TransitionOutcome, TransitionRequest};
use crate::cache::{Availability, PreloadCache};
use crate::loader::ResourceLoader;
use crate::log_and_continue;
use crate::probe::AvailabilityProbe;
use crate::recovery::RetryPolicy;
use crate::surface::PlaybackSurface;

/// The one transition session the engine owns. Reset to idle on every
/// exit path, success or failure.
#[derive(Debug, Clone)]
struct TransitionSession {
    state: EngineState,
    active_url: Option<String>,
    single_flight: bool,
}

impl Default for TransitionSession {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            active_url: None,
            single_flight: false,
        }
    }
}

/// Serializes transition attempts against the playback surface.
///
/// Exactly one session runs at a time; a request arriving while one is in
/// flight is dropped, not queued (queueing would visually stack
/// transitions); the most recent trigger wins once the engine is next
/// idle. [`TransitionEngine::request`] is total: every call returns an
/// outcome and leaves the engine idle, bounded by the safety window even
/// when the surface never signals completion.
pub struct TransitionEngine<L, S> {
    probe: AvailabilityProbe<L>,
    cache: Arc<PreloadCache<L>>,
    surface: Arc<S>,
    bus: Arc<EventBus>,
    retry: RetryPolicy,
    safety_timeout: Duration,
    fallback_image: Option<String>,
    session: Mutex<TransitionSession>,
}

impl<L: ResourceLoader, S: PlaybackSurface> TransitionEngine<L, S> {
    pub fn new(
        cache: Arc<PreloadCache<L>>,
        surface: Arc<S>,
        bus: Arc<EventBus>,
        retry: RetryPolicy,
        safety_timeout: Duration,
        fallback_image: Option<String>,
    ) -> Self {
        Self {
            probe: AvailabilityProbe::new(Arc::clone(&cache)),
            cache,
            surface,
            bus,
            retry,
            safety_timeout,
            fallback_image,
            session: Mutex::new(TransitionSession::default()),
        }
    }

    /// Attempt a transition to the requested clip.
    ///
    /// Always returns; the outcome signals "pipeline settled", not "video
    /// played successfully".
    pub async fn request(&self, req: TransitionRequest) -> TransitionOutcome {
        {
            let mut session = self.session.lock().await;
            if session.single_flight {
                log::debug!(
                    "Dropping transition to {} ({:?}): {} already in flight",
                    req.target_url,
                    req.origin,
                    session.active_url.as_deref().unwrap_or("?")
                );
                return TransitionOutcome::Dropped;
            }
            session.single_flight = true;
            session.state = EngineState::Preparing;
            session.active_url = Some(req.target_url.clone());
        }

        log::info!(
            "Transition to {} requested ({:?})",
            req.target_url,
            req.origin
        );

        let outcome = self.run(&req).await;
        self.finish().await;

        self.bus.publish(BusEvent::TransitionCompleted {
            url: req.target_url.clone(),
            outcome,
        });
        log::info!(
            "Transition to {} settled: {:?} ({}ms after request)",
            req.target_url,
            outcome,
            req.requested_at.elapsed().as_millis()
        );

        outcome
    }

    /// The fallible middle of a session; `request` wraps it so the engine
    /// returns to idle on every path out of here
    async fn run(&self, req: &TransitionRequest) -> TransitionOutcome {
        let url = req.target_url.as_str();

        if self.probe.check(url).await == Availability::Unavailable {
            self.engage_fallback(url);
            return TransitionOutcome::Unavailable;
        }

        if self.surface.current_source().as_deref() != Some(url) {
            let swapped = self
                .retry
                .run("swap source", || self.surface.swap_source(url))
                .await;
            if let Err(e) = swapped {
                log::error!("Could not arm {}: {}", url, e);
                self.cache.mark_unavailable(url);
                self.engage_fallback(url);
                return TransitionOutcome::Unavailable;
            }
        }

        let mut synthesized_ended = false;
        if let Err(e) = self.surface.play().await {
            log::warn!("Play rejected for {} ({}), retrying muted", url, e);
            self.surface.set_muted(true);
            if let Err(e) = self.surface.play().await {
                log::warn!(
                    "Play rejected again for {} ({}), synthesizing ended signal",
                    url,
                    e
                );
                synthesized_ended = true;
            }
        }

        {
            let mut session = self.session.lock().await;
            session.state = EngineState::Playing;
        }

        if synthesized_ended {
            return TransitionOutcome::Completed;
        }

        match tokio::time::timeout(self.safety_timeout, self.surface.wait_ended()).await {
            Ok(()) => TransitionOutcome::Completed,
            Err(_) => {
                log::warn!(
                    "No ended signal from {} within {:?}, forcing completion",
                    url,
                    self.safety_timeout
                );
                TransitionOutcome::Forced
            }
        }
    }

    /// Every exit path funnels through here: pause the surface and return
    /// the session to idle
    async fn finish(&self) {
        log_and_continue!(self.surface.pause().await, "pause playback surface");

        let mut session = self.session.lock().await;
        session.state = EngineState::Idle;
        session.single_flight = false;
    }

    fn engage_fallback(&self, url: &str) {
        log::warn!("Clip {} unavailable, engaging fallback image", url);
        self.bus.publish(BusEvent::FallbackEngaged {
            url: url.to_string(),
            image: self.fallback_image.clone(),
        });
    }

    /// Point-in-time view of the session for status reporting
    pub async fn snapshot(&self) -> EngineSnapshot {
        let session = self.session.lock().await;
        EngineSnapshot {
            state: session.state,
            active_url: session.active_url.clone(),
            single_flight: session.single_flight,
        }
    }

    /// Return the session to its initial state. For tests.
    #[allow(dead_code)]
    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        *session = TransitionSession::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::testing::FakeLoader;
    use crate::surface::testing::FakeSurface;
    use common::TransitionOrigin;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::Ordering;

    const SAFETY: Duration = Duration::from_millis(1200);

    struct Rig {
        engine: TransitionEngine<FakeLoader, FakeSurface>,
        surface: Arc<FakeSurface>,
        cache: Arc<PreloadCache<FakeLoader>>,
        bus: Arc<EventBus>,
        events: Arc<StdMutex<Vec<BusEvent>>>,
    }

    fn rig_with(loader: FakeLoader, surface: FakeSurface, attempts: u32) -> Rig {
        let cache = Arc::new(PreloadCache::new(
            loader,
            RetryPolicy::new(attempts, Duration::from_millis(20)),
            Duration::from_millis(500),
        ));
        let surface = Arc::new(surface);
        let bus = Arc::new(EventBus::new());

        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let engine = TransitionEngine::new(
            Arc::clone(&cache),
            Arc::clone(&surface),
            Arc::clone(&bus),
            RetryPolicy::new(attempts, Duration::from_millis(20)),
            SAFETY,
            Some("assets/still.png".to_string()),
        );

        Rig {
            engine,
            surface,
            cache,
            bus,
            events,
        }
    }

    fn rig() -> Rig {
        rig_with(FakeLoader::new(), FakeSurface::new(), 1)
    }

    fn request(url: &str) -> TransitionRequest {
        TransitionRequest::new(url, TransitionOrigin::RouteChange)
    }

    fn fallbacks(events: &StdMutex<Vec<BusEvent>>) -> usize {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, BusEvent::FallbackEngaged { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_plays_to_completion() {
        let rig = rig();
        rig.cache.register("clip.mp4", common::Variant::Normal);

        let outcome = rig.engine.request(request("clip.mp4")).await;

        assert_eq!(outcome, TransitionOutcome::Completed);
        assert_eq!(rig.surface.current_source().as_deref(), Some("clip.mp4"));
        assert_eq!(rig.surface.plays(), 1);
        assert_eq!(rig.surface.pauses(), 1);

        let snapshot = rig.engine.snapshot().await;
        assert_eq!(snapshot.state, EngineState::Idle);
        assert!(!snapshot.single_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_drops_overlapping_request() {
        let rig = rig();
        rig.cache.register("first.mp4", common::Variant::Normal);
        rig.cache.register("second.mp4", common::Variant::Uv);

        let (a, b) = tokio::join!(
            rig.engine.request(request("first.mp4")),
            rig.engine.request(request("second.mp4")),
        );

        assert_eq!(a, TransitionOutcome::Completed);
        assert_eq!(b, TransitionOutcome::Dropped);

        // The engine kept targeting the first URL throughout
        let snapshot = rig.engine.snapshot().await;
        assert_eq!(snapshot.active_url.as_deref(), Some("first.mp4"));
        assert_eq!(rig.surface.current_source().as_deref(), Some("first.mp4"));
        assert_eq!(rig.surface.plays(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_clip_skips_playback() {
        let loader = FakeLoader::new();
        loader.mark_unreachable("missing.mp4");
        let rig = rig_with(loader, FakeSurface::new(), 1);
        rig.cache.register("missing.mp4", common::Variant::Normal);

        let outcome = rig.engine.request(request("missing.mp4")).await;

        assert_eq!(outcome, TransitionOutcome::Unavailable);
        assert_eq!(rig.surface.plays(), 0);
        assert_eq!(fallbacks(&rig.events), 1);
        assert_eq!(rig.engine.snapshot().await.state, EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_rejection_retries_muted() {
        let surface = FakeSurface::new();
        surface.reject_unmuted_play.store(true, Ordering::SeqCst);
        let rig = rig_with(FakeLoader::new(), surface, 1);
        rig.cache.register("clip.mp4", common::Variant::Normal);

        let outcome = rig.engine.request(request("clip.mp4")).await;

        assert_eq!(outcome, TransitionOutcome::Completed);
        assert_eq!(rig.surface.plays(), 2);
        assert!(rig.surface.muted.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_play_rejection_synthesizes_ended() {
        let surface = FakeSurface::new();
        surface.reject_all_play.store(true, Ordering::SeqCst);
        surface.never_ends();
        let rig = rig_with(FakeLoader::new(), surface, 1);
        rig.cache.register("clip.mp4", common::Variant::Normal);

        let started = tokio::time::Instant::now();
        let outcome = rig.engine.request(request("clip.mp4")).await;

        // Settles well inside the safety window: the synthesized ended
        // signal skips the wait entirely
        assert_eq!(outcome, TransitionOutcome::Completed);
        assert!(started.elapsed() < SAFETY);
        assert_eq!(rig.surface.plays(), 2);
        assert_eq!(rig.engine.snapshot().await.state, EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_completion_is_forced_idle() {
        let surface = FakeSurface::new();
        surface.never_ends();
        let rig = rig_with(FakeLoader::new(), surface, 1);
        rig.cache.register("clip.mp4", common::Variant::Normal);

        let started = tokio::time::Instant::now();
        let outcome = rig.engine.request(request("clip.mp4")).await;

        assert_eq!(outcome, TransitionOutcome::Forced);
        assert!(started.elapsed() >= SAFETY);
        assert_eq!(rig.surface.pauses(), 1);
        assert_eq!(rig.engine.snapshot().await.state, EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_failure_marks_clip_unavailable() {
        let surface = FakeSurface::new();
        surface.fail_swap("broken.mp4");
        let rig = rig_with(FakeLoader::new(), surface, 2);
        rig.cache.register("broken.mp4", common::Variant::Normal);

        let outcome = rig.engine.request(request("broken.mp4")).await;

        assert_eq!(outcome, TransitionOutcome::Unavailable);
        assert_eq!(rig.surface.swap_calls.load(Ordering::SeqCst), 2);
        assert_eq!(rig.surface.plays(), 0);
        assert_eq!(
            rig.cache.states("broken.mp4").unwrap().0,
            common::CacheState::Unavailable
        );
        assert_eq!(fallbacks(&rig.events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_source_is_not_reswapped() {
        let rig = rig();
        rig.cache.register("clip.mp4", common::Variant::Normal);

        rig.engine.request(request("clip.mp4")).await;
        rig.engine.request(request("clip.mp4")).await;

        assert_eq!(rig.surface.swap_calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.surface.plays(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_stays_sticky_across_requests() {
        let loader = FakeLoader::new();
        loader.mark_unreachable("flaky.mp4");
        let rig = rig_with(loader, FakeSurface::new(), 1);
        rig.cache.register("flaky.mp4", common::Variant::Normal);

        assert_eq!(
            rig.engine.request(request("flaky.mp4")).await,
            TransitionOutcome::Unavailable
        );

        // The clip comes back, but without a reprobe play is still gated
        rig.cache.loader.mark_reachable("flaky.mp4");
        assert_eq!(
            rig.engine.request(request("flaky.mp4")).await,
            TransitionOutcome::Unavailable
        );
        assert_eq!(rig.surface.plays(), 0);

        rig.cache.reprobe("flaky.mp4");
        assert_eq!(
            rig.engine.request(request("flaky.mp4")).await,
            TransitionOutcome::Completed
        );
        assert_eq!(rig.surface.plays(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_event_published_per_settled_request() {
        let rig = rig();
        rig.cache.register("clip.mp4", common::Variant::Normal);

        rig.engine.request(request("clip.mp4")).await;

        let completions: Vec<TransitionOutcome> = rig
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                BusEvent::TransitionCompleted { outcome, .. } => Some(*outcome),
                _ => None,
            })
            .collect();
        assert_eq!(completions, vec![TransitionOutcome::Completed]);

        // Bus stays usable for later sessions
        assert!(rig.bus.listener_count() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_session_to_initial_state() {
        let rig = rig();
        rig.cache.register("clip.mp4", common::Variant::Normal);
        rig.engine.request(request("clip.mp4")).await;

        rig.engine.reset().await;

        let snapshot = rig.engine.snapshot().await;
        assert_eq!(snapshot.state, EngineState::Idle);
        assert_eq!(snapshot.active_url, None);
        assert!(!snapshot.single_flight);
    }
}
