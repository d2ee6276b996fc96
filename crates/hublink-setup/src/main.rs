//! # hublink-setup
//!
//! Pairs the hub with a Bluetooth LE controller.
//!
//! ## Running
//!
//! ```bash
//! # Try it without radio hardware
//! cargo run --package hublink-setup -- connect --simulate
//!
//! # On the hub
//! ./hublink-setup --production connect --timeout 60
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use clap::Parser;
use tracing::{error, info};

use hublink_setup::{app::App, cli::Cli, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.production)?;

    info!(command = ?cli.command, "starting hublink-setup");

    let outcome = match App::load(&cli) {
        Ok(app) => app.execute(&cli.command).await,
        Err(e) => Err(e),
    };

    if let Err(e) = outcome {
        error!(code = e.error_code(), "{e}");
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }

    Ok(())
}
