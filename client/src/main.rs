use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{Command, Response, Variant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "bdctl")]
#[command(about = "Backdrop Transition Daemon Control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report a route change (plays the clip mapped to the path)
    Navigate {
        /// Route path, e.g. "/" or "/gallery"
        path: String,
    },

    /// Switch the active variant
    Mode {
        /// Variant name: "normal" or "uv"
        variant: String,
    },

    /// Toggle between the normal and UV variants
    Toggle,

    /// Query daemon status (engine session and per-clip cache states)
    Status,

    /// List the configured route table
    Routes,

    /// Reset a clip marked unavailable so it gets probed again
    Reprobe {
        /// Clip URL as registered in the route table
        url: String,
    },

    /// Ping the daemon to check if it's running
    Ping,

    /// Kill the running daemon
    Kill,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Navigate { path } => Command::Navigate { path },
        Commands::Mode { variant } => {
            let variant = match Variant::from_str(&variant) {
                Some(v) => v,
                None => {
                    eprintln!("Unknown variant '{}' (expected: normal, uv)", variant);
                    std::process::exit(1);
                }
            };
            Command::SetMode { variant }
        }
        Commands::Toggle => {
            // Read the active variant from the daemon, then flip it
            let status = match send_command(Command::Status).await {
                Ok(Response::Status(status)) => status,
                Ok(_) => {
                    eprintln!("Unexpected response to status query");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            Command::SetMode {
                variant: status.variant.toggled(),
            }
        }
        Commands::Status => Command::Status,
        Commands::Routes => Command::ListRoutes,
        Commands::Reprobe { url } => Command::Reprobe { url },
        Commands::Ping => Command::Ping,
        Commands::Kill => Command::Kill,
    };

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nIs the daemon running? Try starting it with: backdrop");
            std::process::exit(1);
        }
    }
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!(
                "  Showing: {} ({} variant)",
                status.path,
                status.variant.name()
            );
            println!(
                "  Engine: {:?} (single-flight: {})",
                status.engine.state, status.engine.single_flight
            );
            match status.engine.active_url {
                Some(url) => println!("  Active clip: {}", url),
                None => println!("  Active clip: none"),
            }
            println!("  Clips:");
            for asset in status.assets {
                println!(
                    "    {} [{}] - cache: {:?}, preload: {:?}",
                    asset.url,
                    asset.variant.name(),
                    asset.cache_state,
                    asset.preload_state
                );
            }
        }
        Response::Routes(routes) => {
            println!("Configured Routes:");
            for route in routes {
                println!("  {} -> {} / {}", route.path, route.normal, route.uv);
            }
        }
        Response::Pong => {
            println!("✓ Daemon is running");
        }
    }
}
