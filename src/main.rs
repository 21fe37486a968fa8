//! UART Logger
//!
//! Opens a serial port and prints the received bytes as hex, one line per
//! frame. A frame ends when the line has been quiet for longer than the
//! configured idle gap.
//!
//! # Usage
//!
//! ```bash
//! # List available serial ports
//! uart-logger ports
//!
//! # Log a port at 115200 baud, splitting frames on 5 ms of silence
//! uart-logger monitor -p /dev/ttyUSB0 -b 115200 -t 5
//!
//! # Load settings from a file, override the parity
//! uart-logger monitor -c logger.toml --parity even
//! ```

mod config;
mod display;
mod error;
mod serial;
mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, info};
use std::io::Write;
use std::path::PathBuf;

use config::{Parity, PortConfiguration, PortSettings, StopBits, STANDARD_BAUD_RATES};
use display::{Console, Next, CLOSED_MESSAGE};
use session::Session;

/// UART Logger
///
/// Capture serial traffic as idle-gap delimited hex frames
#[derive(Parser)]
#[command(name = "uart-logger")]
#[command(version)]
#[command(about = "Log UART traffic as timestamped hex frames")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// List the standard baud rates
    Bauds,

    /// Open a port and print received frames
    Monitor {
        /// Serial port path (e.g., /dev/ttyUSB0, COM3); first detected port if omitted
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate (default 9600)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Stop bits: 1, 1.5 or 2
        #[arg(short, long)]
        stop_bits: Option<StopBits>,

        /// Parity: none, even, odd, mark or space
        #[arg(long)]
        parity: Option<Parity>,

        /// Idle gap in milliseconds that ends a frame (default 1)
        #[arg(short = 't', long = "idle-gap")]
        idle_gap_ms: Option<f64>,

        /// TOML file with default settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Ports => serial::port::print_ports(),
        Commands::Bauds => {
            for rate in STANDARD_BAUD_RATES {
                println!("{}", rate);
            }
            Ok(())
        }
        Commands::Monitor {
            port,
            baud,
            stop_bits,
            parity,
            idle_gap_ms,
            config,
            no_color,
        } => {
            if no_color {
                colored::control::set_override(false);
            }

            let file_settings = match config {
                Some(path) => PortSettings::load(&path)?,
                None => PortSettings::default(),
            };
            let settings = file_settings.merge(PortSettings {
                port,
                baud_rate: baud,
                stop_bits,
                parity,
                idle_gap_ms,
            });

            run_monitor(settings).await
        }
    }
}

async fn run_monitor(settings: PortSettings) -> Result<()> {
    let config = settings
        .resolve(serial::port::default_port)
        .context("Invalid port settings")?;

    let mut console = Console::stdout();
    let Some(mut session) = connect(&config, &mut console)? else {
        std::process::exit(1);
    };

    console.header(session.config())?;
    println!("{}", "Press Ctrl+C to stop\n".yellow());

    loop {
        tokio::select! {
            event = session.next_event() => {
                match event {
                    Some(event) => {
                        if console.render(&event)? == Next::Teardown {
                            break;
                        }
                    }
                    None => break,
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                let was_open = session.is_open();
                if was_open {
                    info!("Interrupted, closing {}", config.port_name());
                    session.close();
                }
                // Frames queued before the close are still rendered
                while let Some(event) = session.try_next_event() {
                    if console.render(&event)? == Next::Teardown {
                        break;
                    }
                }
                if was_open {
                    console.status(CLOSED_MESSAGE)?;
                }
                break;
            }
        }
    }

    let exit = tokio::task::spawn_blocking(move || session.finish())
        .await
        .context("Reader thread join failed")?;
    debug!("Session ended: {:?} after {} frames", exit, console.frames());

    console.summary()?;
    Ok(())
}

/// Open the session, reporting a failure once on the console
fn connect<W: Write>(
    config: &PortConfiguration,
    console: &mut Console<W>,
) -> std::io::Result<Option<Session>> {
    match Session::open(config.clone()) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            console.error(&format!("Error: {}", e))?;
            Ok(None)
        }
    }
}
