use thiserror::Error;

/// Errors surfaced by a playback surface
#[derive(Debug, Error)]
#[allow(dead_code)] // All variants constructed by the feature-gated surface
pub enum SurfaceError {
    #[error("playback rejected: {0}")]
    PlayRejected(String),

    #[error("source load failed: {0}")]
    Load(String),

    #[error("pause failed: {0}")]
    Pause(String),
}

/// Capability interface for the externally-owned video output.
///
/// The transition engine is the only mutator of the surface while a
/// session is active. Implementations report end-of-stream through
/// [`PlaybackSurface::wait_ended`]; the engine bounds that wait with its
/// safety window, so a surface that never signals cannot wedge the
/// pipeline.
pub trait PlaybackSurface: Send + Sync + 'static {
    /// URL of the clip currently armed on the surface, if any
    fn current_source(&self) -> Option<String>;

    /// Arm a new clip, replacing whatever was armed before
    fn swap_source(&self, url: &str) -> impl Future<Output = Result<(), SurfaceError>> + Send;

    /// Start playback of the armed clip
    fn play(&self) -> impl Future<Output = Result<(), SurfaceError>> + Send;

    /// Mute or unmute the surface; applies to the armed clip immediately
    fn set_muted(&self, muted: bool);

    /// Halt playback, keeping the current frame
    fn pause(&self) -> impl Future<Output = Result<(), SurfaceError>> + Send;

    /// Resolves when the armed clip reports end of stream
    fn wait_ended(&self) -> impl Future<Output = ()> + Send;
}

#[cfg(feature = "video")]
mod gst_surface {
    use super::{PlaybackSurface, SurfaceError};
    use anyhow::{Context, Result};
    use gstreamer as gst;
    use gstreamer::prelude::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::watch;

    /// GStreamer-backed playback surface.
    ///
    /// Each armed clip gets its own playbin pipeline; a blocking task
    /// drains the pipeline bus and translates EOS (or a pipeline error)
    /// into the ended signal. Replacing the source tears the previous
    /// pipeline down.
    pub struct MediaSurface {
        media_root: PathBuf,
        muted: AtomicBool,
        inner: Mutex<Option<Playback>>,
    }

    struct Playback {
        pipeline: gst::Element,
        url: String,
        ended_rx: watch::Receiver<bool>,
    }

    impl MediaSurface {
        pub fn new(media_root: PathBuf) -> Result<Self> {
            gst::init().context("Failed to initialize GStreamer")?;

            Ok(Self {
                media_root,
                muted: AtomicBool::new(false),
                inner: Mutex::new(None),
            })
        }

        fn clip_uri(&self, url: &str) -> Result<String, SurfaceError> {
            let path = Path::new(url);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.media_root.join(path)
            };

            gst::glib::filename_to_uri(&path, None)
                .map(|uri| uri.to_string())
                .map_err(|e| SurfaceError::Load(format!("{}: {}", path.display(), e)))
        }

        fn teardown(playback: Playback) {
            log::debug!("Tearing down pipeline for {}", playback.url);
            let _ = playback.pipeline.set_state(gst::State::Null);
        }
    }

    impl PlaybackSurface for MediaSurface {
        fn current_source(&self) -> Option<String> {
            self.inner.lock().unwrap().as_ref().map(|p| p.url.clone())
        }

        async fn swap_source(&self, url: &str) -> Result<(), SurfaceError> {
            let uri = self.clip_uri(url)?;

            let pipeline = gst::ElementFactory::make("playbin")
                .name("backdrop-playbin")
                .property("uri", &uri)
                .build()
                .map_err(|e| SurfaceError::Load(format!("playbin: {}", e)))?;

            pipeline.set_property("mute", self.muted.load(Ordering::Relaxed));

            // Pre-roll so missing demuxers/decoders fail here, not at play
            pipeline
                .set_state(gst::State::Ready)
                .map_err(|e| SurfaceError::Load(format!("{}: {}", url, e)))?;

            let bus = pipeline
                .bus()
                .ok_or_else(|| SurfaceError::Load(format!("{}: pipeline has no bus", url)))?;

            let (ended_tx, ended_rx) = watch::channel(false);
            let watched_url = url.to_string();
            tokio::task::spawn_blocking(move || {
                while !ended_tx.is_closed() {
                    let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
                        continue;
                    };
                    match msg.view() {
                        gst::MessageView::Eos(_) => {
                            log::debug!("Clip {} reached EOS", watched_url);
                            let _ = ended_tx.send(true);
                            break;
                        }
                        gst::MessageView::Error(err) => {
                            log::error!(
                                "GStreamer error on {}: {} (debug: {:?})",
                                watched_url,
                                err.error(),
                                err.debug()
                            );
                            let _ = ended_tx.send(true);
                            break;
                        }
                        _ => {}
                    }
                }
            });

            let previous = self.inner.lock().unwrap().replace(Playback {
                pipeline,
                url: url.to_string(),
                ended_rx,
            });
            if let Some(playback) = previous {
                Self::teardown(playback);
            }

            log::info!("Armed clip {}", url);
            Ok(())
        }

        async fn play(&self) -> Result<(), SurfaceError> {
            let inner = self.inner.lock().unwrap();
            let Some(playback) = inner.as_ref() else {
                return Err(SurfaceError::PlayRejected("no source armed".to_string()));
            };

            playback.pipeline.set_property("mute", self.muted.load(Ordering::Relaxed));
            playback
                .pipeline
                .set_state(gst::State::Playing)
                .map(|_| ())
                .map_err(|e| SurfaceError::PlayRejected(format!("{}: {}", playback.url, e)))
        }

        fn set_muted(&self, muted: bool) {
            self.muted.store(muted, Ordering::Relaxed);
            let inner = self.inner.lock().unwrap();
            if let Some(playback) = inner.as_ref() {
                playback.pipeline.set_property("mute", muted);
            }
        }

        async fn pause(&self) -> Result<(), SurfaceError> {
            let inner = self.inner.lock().unwrap();
            let Some(playback) = inner.as_ref() else {
                return Ok(());
            };

            playback
                .pipeline
                .set_state(gst::State::Paused)
                .map(|_| ())
                .map_err(|e| SurfaceError::Pause(format!("{}: {}", playback.url, e)))
        }

        async fn wait_ended(&self) {
            let rx = {
                let inner = self.inner.lock().unwrap();
                inner.as_ref().map(|p| p.ended_rx.clone())
            };

            // A closed channel means the watcher is gone; count that as
            // ended rather than waiting forever
            if let Some(mut rx) = rx {
                let _ = rx.wait_for(|ended| *ended).await;
            }
        }
    }

    impl Drop for MediaSurface {
        fn drop(&mut self) {
            if let Some(playback) = self.inner.lock().unwrap().take() {
                Self::teardown(playback);
            }
        }
    }
}

#[cfg(feature = "video")]
pub use gst_surface::MediaSurface;

// Stub implementation when video support is disabled: tracks the armed
// source so the engine logic stays exercised, reports instant completion.
#[cfg(not(feature = "video"))]
pub struct MediaSurface {
    source: std::sync::Mutex<Option<String>>,
}

#[cfg(not(feature = "video"))]
impl MediaSurface {
    pub fn new(_media_root: std::path::PathBuf) -> anyhow::Result<Self> {
        log::warn!("Video support not compiled in; playback surface is headless");
        Ok(Self {
            source: std::sync::Mutex::new(None),
        })
    }
}

#[cfg(not(feature = "video"))]
impl PlaybackSurface for MediaSurface {
    fn current_source(&self) -> Option<String> {
        self.source.lock().unwrap().clone()
    }

    async fn swap_source(&self, url: &str) -> Result<(), SurfaceError> {
        log::info!("Armed clip {} (headless)", url);
        *self.source.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn play(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn set_muted(&self, _muted: bool) {}

    async fn pause(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    async fn wait_ended(&self) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted surface for engine tests
    #[derive(Default)]
    pub(crate) struct FakeSurface {
        source: Mutex<Option<String>>,
        pub muted: AtomicBool,
        pub swap_calls: AtomicUsize,
        pub play_calls: AtomicUsize,
        pub pause_calls: AtomicUsize,
        /// Reject every play attempt (hard autoplay block)
        pub reject_all_play: AtomicBool,
        /// Reject play while unmuted (autoplay policy)
        pub reject_unmuted_play: AtomicBool,
        pub swap_failures: Mutex<HashSet<String>>,
        /// Time until the ended signal; None means it never fires
        pub clip_length: Mutex<Option<Duration>>,
    }

    impl FakeSurface {
        pub fn new() -> Self {
            Self {
                clip_length: Mutex::new(Some(Duration::from_millis(100))),
                ..Self::default()
            }
        }

        pub fn never_ends(&self) {
            *self.clip_length.lock().unwrap() = None;
        }

        pub fn fail_swap(&self, url: &str) {
            self.swap_failures.lock().unwrap().insert(url.to_string());
        }

        pub fn plays(&self) -> usize {
            self.play_calls.load(Ordering::SeqCst)
        }

        pub fn pauses(&self) -> usize {
            self.pause_calls.load(Ordering::SeqCst)
        }
    }

    impl PlaybackSurface for FakeSurface {
        fn current_source(&self) -> Option<String> {
            self.source.lock().unwrap().clone()
        }

        async fn swap_source(&self, url: &str) -> Result<(), SurfaceError> {
            self.swap_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            if self.swap_failures.lock().unwrap().contains(url) {
                return Err(SurfaceError::Load(url.to_string()));
            }
            *self.source.lock().unwrap() = Some(url.to_string());
            Ok(())
        }

        async fn play(&self) -> Result<(), SurfaceError> {
            self.play_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_all_play.load(Ordering::SeqCst) {
                return Err(SurfaceError::PlayRejected("blocked".to_string()));
            }
            if self.reject_unmuted_play.load(Ordering::SeqCst)
                && !self.muted.load(Ordering::SeqCst)
            {
                return Err(SurfaceError::PlayRejected("unmuted".to_string()));
            }
            Ok(())
        }

        fn set_muted(&self, muted: bool) {
            self.muted.store(muted, Ordering::SeqCst);
        }

        async fn pause(&self) -> Result<(), SurfaceError> {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_ended(&self) {
            let length = *self.clip_length.lock().unwrap();
            match length {
                Some(length) => tokio::time::sleep(length).await,
                None => std::future::pending().await,
            }
        }
    }
}
