use anyhow::Result;
use common::{BackdropError, Command, DaemonStatus, Response, TransitionOrigin};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use crate::DaemonState;
use crate::bus::{BusEvent, EventBus, TransitionRequest};
use crate::cache::PreloadCache;
use crate::engine::TransitionEngine;
use crate::loader::ResourceLoader;
use crate::resolver::ModeResolver;
use crate::surface::PlaybackSurface;

/// Everything a command handler can reach
pub struct IpcContext<L, S> {
    pub state: Arc<Mutex<DaemonState>>,
    pub resolver: Arc<ModeResolver>,
    pub cache: Arc<PreloadCache<L>>,
    pub engine: Arc<TransitionEngine<L, S>>,
    pub bus: Arc<EventBus>,
}

impl<L, S> Clone for IpcContext<L, S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            resolver: Arc::clone(&self.resolver),
            cache: Arc::clone(&self.cache),
            engine: Arc::clone(&self.engine),
            bus: Arc::clone(&self.bus),
        }
    }
}

pub async fn start<L, S>(ctx: IpcContext<L, S>) -> Result<()>
where
    L: ResourceLoader,
    S: PlaybackSurface,
{
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        // Check if we should exit
        if ctx.state.lock().await.should_exit {
            break;
        }

        // Accept connections with timeout
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, ctx).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => {
                // Timeout, continue loop to check exit condition
                continue;
            }
        }
    }

    // Clean up socket
    let _ = std::fs::remove_file(&socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client<L, S>(stream: UnixStream, ctx: IpcContext<L, S>) -> Result<()>
where
    L: ResourceLoader,
    S: PlaybackSurface,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &ctx).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(BackdropError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        // Send response
        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command<L, S>(command: Command, ctx: &IpcContext<L, S>) -> Response
where
    L: ResourceLoader,
    S: PlaybackSurface,
{
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Status => {
            let state = ctx.state.lock().await;
            let status = DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: state.uptime_secs(),
                path: state.path.clone(),
                variant: state.variant,
                engine: ctx.engine.snapshot().await,
                assets: ctx.cache.snapshot(),
            };
            Response::Status(status)
        }

        Command::ListRoutes => Response::Routes(ctx.resolver.route_infos()),

        Command::Navigate { path } => {
            let variant = {
                let mut state = ctx.state.lock().await;
                state.path = path.clone();
                state.variant
            };

            match ctx.resolver.resolve(&path, variant) {
                Some(url) => {
                    ctx.bus.publish(BusEvent::Trigger(TransitionRequest::new(
                        url,
                        TransitionOrigin::RouteChange,
                    )));
                    Response::Ok
                }
                None => {
                    log::debug!("No clip mapped for {}, skipping transition", path);
                    Response::Ok
                }
            }
        }

        Command::SetMode { variant } => {
            let path = {
                let mut state = ctx.state.lock().await;
                state.variant = variant;
                state.path.clone()
            };

            match ctx.resolver.resolve(&path, variant) {
                Some(url) => {
                    ctx.bus.publish(BusEvent::Trigger(TransitionRequest::new(
                        url,
                        TransitionOrigin::ModeToggle,
                    )));
                    Response::Ok
                }
                None => {
                    log::debug!(
                        "No {} clip mapped for {}, skipping transition",
                        variant.name(),
                        path
                    );
                    Response::Ok
                }
            }
        }

        Command::Reprobe { url } => {
            if ctx.cache.reprobe(&url) {
                Response::Ok
            } else {
                Response::Error(BackdropError::NotFound(url))
            }
        }

        Command::Kill => {
            log::info!("Received kill command");
            ctx.state.lock().await.should_exit = true;
            Response::Ok
        }
    }
}
