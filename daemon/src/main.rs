mod bus;
mod cache;
mod config;
mod engine;
mod ipc_server;
mod loader;
mod macros;
mod probe;
mod recovery;
mod resolver;
mod surface;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use common::{TransitionOrigin, Variant};

use crate::bus::{BusEvent, EventBus, TransitionRequest};
use crate::cache::PreloadCache;
use crate::engine::TransitionEngine;
use crate::loader::FsLoader;
use crate::probe::AvailabilityProbe;
use crate::recovery::RetryPolicy;
use crate::resolver::ModeResolver;
use crate::surface::MediaSurface;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!(
        "Starting Backdrop transition daemon v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config_path = config::Config::default_config_path()?;
    log::info!("Looking for config at: {}", config_path.display());

    let config = match config::Config::load() {
        Ok(cfg) => {
            log::info!("✓ Configuration loaded successfully");
            log::info!("  General settings:");
            log::info!("    - Log level: {}", cfg.general.log_level);
            log::info!("    - Boot route: {}", cfg.general.boot_route);
            log::info!("    - Boot variant: {}", cfg.general.boot_variant);
            match cfg.general.fallback_image {
                Some(ref image) => log::info!("    - Fallback image: {}", image),
                None => log::info!("    - Fallback image: not configured"),
            }
            log::info!("  Engine settings:");
            log::info!("    - Safety timeout: {}ms", cfg.engine.safety_timeout_ms);
            log::info!("    - Preload timeout: {}ms", cfg.engine.preload_timeout_ms);
            log::info!(
                "  Retry policy: {} attempts, {}ms delay",
                cfg.retry.attempts,
                cfg.retry.delay_ms
            );
            log::info!("  Media root: {}", cfg.media_root().display());
            log::info!("  Routes: {} configured", cfg.route.len());
            for route in &cfg.route {
                log::info!("    - {} -> {} / {}", route.path, route.normal, route.uv);
            }
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config: {}. Using defaults.", e);
            log::info!("To create a config file:");
            log::info!("  mkdir -p {}", config_path.parent().unwrap().display());
            log::info!("  cp config.toml.example {}", config_path.display());
            config::Config::default()
        }
    };

    let boot_route = config.general.boot_route.clone();
    let boot_variant = Variant::from_str(&config.general.boot_variant).unwrap_or_default();

    // Build the engine and its collaborators
    let resolver = Arc::new(ModeResolver::new(&config.route));
    if resolver.is_empty() {
        log::warn!("No routes configured; every navigation will be skipped");
    }
    let retry = RetryPolicy::from_settings(&config.retry);
    let loader = FsLoader::new(config.media_root(), config.cache_dir());
    let cache = Arc::new(PreloadCache::new(loader, retry, config.preload_timeout()));
    let surface = Arc::new(MediaSurface::new(config.media_root())?);
    let bus = Arc::new(EventBus::new());

    // Registry init: one record per configured clip
    for (url, variant) in resolver.clips() {
        cache.register(&url, variant);
    }

    let engine = Arc::new(TransitionEngine::new(
        Arc::clone(&cache),
        Arc::clone(&surface),
        Arc::clone(&bus),
        retry,
        config.safety_timeout(),
        config.general.fallback_image.clone(),
    ));

    // Completion observer: the stand-in for overlay components that react
    // to a settled transition
    bus.subscribe(|event| match event {
        BusEvent::TransitionCompleted { url, outcome } => {
            log::debug!("Transition event: {} settled as {:?}", url, outcome);
        }
        BusEvent::FallbackEngaged { url, image } => match image {
            Some(image) => log::info!("Showing fallback image {} instead of {}", image, url),
            None => log::warn!("Fallback engaged for {} but no image is configured", url),
        },
        BusEvent::Trigger(_) => {}
    });

    // Trigger fan-in: bus -> channel -> driver task
    let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
    bus.subscribe(move |event| {
        if let BusEvent::Trigger(req) = event {
            let _ = trigger_tx.send(req.clone());
        }
    });

    // Each request is spawned so overlapping triggers are dropped by the
    // engine's single-flight check instead of queueing in the channel
    let driver_engine = Arc::clone(&engine);
    let driver_handle = tokio::spawn(async move {
        while let Some(req) = trigger_rx.recv().await {
            let engine = Arc::clone(&driver_engine);
            tokio::spawn(async move {
                engine.request(req).await;
            });
        }
    });

    // First-load trigger. The bus boot guard swallows it, so nothing plays
    // before the first real navigation; arming the guard here is what lets
    // that first navigation through.
    match resolver.resolve(&boot_route, boot_variant) {
        Some(url) => {
            bus.publish(BusEvent::Trigger(TransitionRequest::new(
                url,
                TransitionOrigin::FirstLoad,
            )));
        }
        None => {
            log::warn!("Boot route {} has no mapped clip", boot_route);
        }
    }

    // Warm both variants of the boot route in the background so the first
    // navigation hits a verified, warm cache
    for variant in [Variant::Normal, Variant::Uv] {
        if let Some(url) = resolver.resolve(&boot_route, variant) {
            let cache = Arc::clone(&cache);
            let url = url.to_string();
            tokio::spawn(async move {
                AvailabilityProbe::new(cache).check(&url).await;
            });
        }
    }

    let state = Arc::new(Mutex::new(DaemonState::new(boot_route, boot_variant)));

    // Start IPC server
    let ipc_ctx = ipc_server::IpcContext {
        state: Arc::clone(&state),
        resolver: Arc::clone(&resolver),
        cache: Arc::clone(&cache),
        engine: Arc::clone(&engine),
        bus: Arc::clone(&bus),
    };
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_ctx).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Set up signal handlers
    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = ipc_handle => {
            log::info!("IPC server stopped");
        }
        _ = driver_handle => {
            log::info!("Transition driver stopped");
        }
    }

    log::info!("Daemon shutting down");
    Ok(())
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
    /// Route the site currently shows
    pub path: String,
    /// Variant the site currently shows
    pub variant: Variant,
}

impl DaemonState {
    fn new(path: String, variant: Variant) -> Self {
        Self {
            should_exit: false,
            start_time: std::time::Instant::now(),
            path,
            variant,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
