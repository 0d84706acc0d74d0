//! Common types and utilities for Backdrop.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the daemon (`backdrop`) and client (`bdctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using JSON-serialized
//! messages. The client sends [`Command`] variants and receives [`Response`]
//! variants.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, Variant};
//!
//! // Ask the daemon to switch to the UV clip of the current route
//! let cmd = Command::SetMode {
//!     variant: Variant::Uv,
//! };
//!
//! // Serialize for sending over IPC
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common error types shared between client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum BackdropError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for BackdropError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BackdropError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// One of the two interchangeable background clips for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// The unfiltered scenic clip
    Normal,
    /// The thematically-filtered "UV" clip
    Uv,
}

impl Default for Variant {
    fn default() -> Self {
        Self::Normal
    }
}

impl Variant {
    /// Parse a variant name from a string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "uv" => Some(Self::Uv),
            _ => None,
        }
    }

    /// Get the name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Uv => "uv",
        }
    }

    /// The other variant
    pub fn toggled(&self) -> Self {
        match self {
            Self::Normal => Self::Uv,
            Self::Uv => Self::Normal,
        }
    }
}

/// What caused a transition to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionOrigin {
    /// The visitor navigated to a different route
    RouteChange,
    /// The visitor toggled UV mode
    ModeToggle,
    /// Initial load of the session
    FirstLoad,
}

/// Reachability of a clip as last observed by the availability probe.
///
/// Per probe cycle the state only moves forward: `Unknown` → `Verifying` →
/// terminal. `Unavailable` is sticky until an explicit re-probe is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    Unknown,
    Verifying,
    Available,
    Unavailable,
}

/// Warm-up progress of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreloadState {
    NotStarted,
    Preloading,
    Ready,
    Failed,
}

/// Transition engine state, exactly one session at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// No transition in progress
    Idle,
    /// Probing/preloading and arming the playback surface
    Preparing,
    /// Play has been issued, waiting for completion
    Playing,
}

/// Commands sent from client to daemon via IPC.
///
/// Each command represents an action the daemon should perform. Commands are
/// serialized to JSON and sent over a Unix socket.
///
/// # Examples
///
/// ```
/// use common::Command;
///
/// // Report a route change; the daemon resolves and plays the mapped clip
/// let cmd = Command::Navigate {
///     path: "/gallery".to_string(),
/// };
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Report a route change. The daemon resolves the clip mapped to the
    /// path under the current variant and requests a transition to it.
    Navigate {
        /// Route path (e.g., "/", "/gallery")
        path: String,
    },
    /// Switch the active variant. The daemon requests a transition to the
    /// clip mapped to the current route under the new variant.
    SetMode {
        /// Target variant
        variant: Variant,
    },
    /// Query daemon status
    Status,
    /// List the configured route table
    ListRoutes,
    /// Reset a clip marked `Unavailable` so the next transition probes it
    /// again
    Reprobe {
        /// Clip URL as registered in the route table
        url: String,
    },
    /// Ping the daemon
    Ping,
    /// Kill the daemon
    Kill,
}

/// Response from daemon to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(BackdropError),
    Status(DaemonStatus),
    Routes(Vec<RouteInfo>),
    Pong,
}

/// Daemon status information
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    /// Route the site currently shows
    pub path: String,
    /// Variant the site currently shows
    pub variant: Variant,
    pub engine: EngineSnapshot,
    pub assets: Vec<AssetStatus>,
}

/// Point-in-time view of the transition engine session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    /// URL of the clip the current/last session targeted
    pub active_url: Option<String>,
    pub single_flight: bool,
}

/// Cache/preload status of one registered clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetStatus {
    pub url: String,
    pub variant: Variant,
    pub cache_state: CacheState,
    pub preload_state: PreloadState,
}

/// One entry of the configured route table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub path: String,
    pub normal: String,
    pub uv: String,
}

/// IPC socket path helper
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("backdrop.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parse() {
        assert_eq!(Variant::from_str("normal"), Some(Variant::Normal));
        assert_eq!(Variant::from_str("UV"), Some(Variant::Uv));
        assert_eq!(Variant::from_str("uv"), Some(Variant::Uv));
        assert_eq!(Variant::from_str("ultraviolet"), None);
        assert_eq!(Variant::from_str(""), None);
    }

    #[test]
    fn test_variant_toggled() {
        assert_eq!(Variant::Normal.toggled(), Variant::Uv);
        assert_eq!(Variant::Uv.toggled(), Variant::Normal);
        assert_eq!(Variant::Uv.toggled().toggled(), Variant::Uv);
    }

    #[test]
    fn test_variant_name() {
        assert_eq!(Variant::Normal.name(), "normal");
        assert_eq!(Variant::Uv.name(), "uv");
    }

    #[test]
    fn test_command_serialization() {
        let cmd = Command::Navigate {
            path: "/gallery".to_string(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let deserialized: Command = serde_json::from_str(&json).unwrap();
        matches!(deserialized, Command::Navigate { .. });

        let cmd = Command::SetMode {
            variant: Variant::Uv,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let deserialized: Command = serde_json::from_str(&json).unwrap();
        matches!(deserialized, Command::SetMode { .. });
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Ok;
        let json = serde_json::to_string(&resp).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        matches!(deserialized, Response::Ok);

        let resp = Response::Error(BackdropError::NotFound("test".to_string()));
        let json = serde_json::to_string(&resp).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        matches!(deserialized, Response::Error(_));

        let resp = Response::Pong;
        let json = serde_json::to_string(&resp).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        matches!(deserialized, Response::Pong);
    }

    #[test]
    fn test_status_serialization() {
        let status = DaemonStatus {
            version: "0.1.0".to_string(),
            uptime_secs: 42,
            path: "/".to_string(),
            variant: Variant::Normal,
            engine: EngineSnapshot {
                state: EngineState::Idle,
                active_url: Some("clips/home.mp4".to_string()),
                single_flight: false,
            },
            assets: vec![AssetStatus {
                url: "clips/home.mp4".to_string(),
                variant: Variant::Normal,
                cache_state: CacheState::Available,
                preload_state: PreloadState::Ready,
            }],
        };

        let json = serde_json::to_string(&Response::Status(status)).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        match deserialized {
            Response::Status(s) => {
                assert_eq!(s.uptime_secs, 42);
                assert_eq!(s.variant, Variant::Normal);
                assert_eq!(s.engine.state, EngineState::Idle);
                assert_eq!(s.assets.len(), 1);
                assert_eq!(s.assets[0].cache_state, CacheState::Available);
            }
            _ => panic!("Wrong response type"),
        }
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BackdropError = io_err.into();
        matches!(err, BackdropError::Io(_));

        let json_err = serde_json::from_str::<Command>("invalid json").unwrap_err();
        let err: BackdropError = json_err.into();
        matches!(err, BackdropError::Ipc(_));
    }

    #[test]
    fn test_socket_path() {
        let path = get_socket_path();
        assert!(path.to_str().unwrap().contains("backdrop.sock"));
    }
}
