//! penkey — a BLE HID-over-GATT keyboard daemon for single-board computers.
//!
//! Architecture:
//! - **Bluetooth worker** (tokio): owns the bluer Session/Adapter; serves the
//!   GATT tree, keeps the advertisement registered, answers pairing callbacks.
//! - **FIFO reader** (blocking thread): reads newline-terminated UTF-8 text
//!   from the well-known pipe.
//! - **Typist task** (tokio): converts text into timed HID input reports.
//!
//! One mpsc channel bridges the reader thread and the typist; the typist and
//! the BlueZ callback surface share only the input-report state.

mod bluetooth;
mod config;
mod hid;
mod input;

use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Error handling & logging ─────────────────────────────────────────
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("penkey starting");

    config::init()?;
    let cfg = config::get();

    // ── Input channel ───────────────────────────────────────────────────
    input::ensure_fifo(&cfg.input.fifo_path)?;
    let entries = input::spawn_reader(cfg.input.fifo_path.clone())?;

    // ── Run until fatal error or shutdown signal ────────────────────────
    bluetooth::worker::run(entries).await?;

    info!("penkey exiting");
    Ok(())
}
