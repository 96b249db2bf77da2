//! Daemon assembly around the `bluer::Session` and `Adapter`.
//!
//! Sequence: find the adapter (fatal if missing), bring it up, register the
//! pairing agent, serve the GATT application with bounded retries, spawn the
//! typist, then keep the advertisement alive until it fails terminally or a
//! shutdown signal arrives. Handles are dropped on the way out, which
//! best-effort unregisters everything with BlueZ.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bluer::{Adapter, Session};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::advertising::{self, build_advertisement};
use super::agent;
use super::gatt::{self, InputReportState};
use crate::config::{self, RadioMode};
use crate::input;

/// How often the release monitor samples the advertising instance count.
const RELEASE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Run the daemon until terminal failure or shutdown signal.
pub async fn run(entries: mpsc::Receiver<String>) -> Result<()> {
    let cfg = config::get();

    let session = Session::new()
        .await
        .wrap_err("Failed to connect to BlueZ D-Bus")?;

    let adapter = session
        .default_adapter()
        .await
        .wrap_err("No Bluetooth adapter found")?;
    info!("Using adapter: {}", adapter.name());

    prepare_adapter(&adapter).await?;

    // Pairing must keep working even if agent registration fails (another
    // default agent may already cover us), so this is not fatal.
    let _agent_handle = match agent::register(&session, &adapter, &cfg.pairing).await {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("Failed to register pairing agent (pairing may prompt): {e}");
            None
        }
    };

    // ── GATT application ────────────────────────────────────────────────
    let reports = InputReportState::new();
    let _app_handle = {
        let mut serve = {
            let adapter = adapter.clone();
            let reports = reports.clone();
            move || {
                let adapter = adapter.clone();
                let app = gatt::build_application(reports.clone(), &cfg.device);
                async move { adapter.serve_gatt_application(app).await }
            }
        };
        advertising::register_with_backoff("RegisterApplication", &mut serve, cfg.advertising)
            .await
            .map_err(|e| eyre!("GATT registration permanently failed: {e}"))?
    };
    info!("GATT application registered");

    // ── Input pipeline ──────────────────────────────────────────────────
    let typist = tokio::spawn(input::run_typist(
        entries,
        reports.clone(),
        cfg.input.clone(),
    ));

    // ── Advertisement ───────────────────────────────────────────────────
    let (release_tx, release_rx) = mpsc::channel(4);
    let advertising_up = Arc::new(AtomicBool::new(false));
    let monitor = tokio::spawn(release_monitor(
        adapter.clone(),
        advertising_up.clone(),
        release_tx,
    ));

    let register = {
        let adapter = adapter.clone();
        let name = cfg.device.name.clone();
        move || {
            let adapter = adapter.clone();
            let adv = build_advertisement(&name);
            async move { adapter.advertise(adv).await }
        }
    };

    let result = tokio::select! {
        res = advertising::maintain(register, release_rx, cfg.advertising, advertising_up) => {
            res.map_err(|e| eyre!("Advertising permanently failed: {e}"))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    monitor.abort();
    typist.abort();
    result
}

/// One-shot adapter bring-up. Power is mandatory; the remaining properties
/// are best effort because another service may already manage them.
async fn prepare_adapter(adapter: &Adapter) -> Result<()> {
    let cfg = config::get();

    adapter
        .set_powered(true)
        .await
        .wrap_err("Failed to power on the adapter")?;

    if let Err(e) = adapter.set_pairable(true).await {
        warn!("Could not set adapter pairable: {e}");
    }
    if let Err(e) = adapter.set_pairable_timeout(0).await {
        warn!("Could not clear pairable timeout: {e}");
    }
    if let Err(e) = adapter.set_alias(cfg.device.name.clone()).await {
        warn!("Could not set adapter alias: {e}");
    }

    // Classic discoverability only matters for dual-mode radios; LE hosts
    // find us through the advertisement flags.
    if cfg.radio == RadioMode::Dual {
        if let Err(e) = adapter.set_discoverable(true).await {
            warn!("Could not set adapter discoverable: {e}");
        }
        if let Err(e) = adapter.set_discoverable_timeout(0).await {
            warn!("Could not clear discoverable timeout: {e}");
        }
    }

    Ok(())
}

/// Detect BlueZ revoking our advertisement.
///
/// bluer consumes the raw `Release()` callback internally, but a revocation
/// shows up as the active instance count dropping to zero. The manager keeps
/// `advertising_up` raised exactly while it holds a registration handle, so
/// zero instances during that window is a release — including one that lands
/// before the first poll ever saw the advertisement alive. Repeated reports
/// of the same loss are deduplicated by the manager's post-registration
/// drain.
async fn release_monitor(
    adapter: Adapter,
    advertising_up: Arc<AtomicBool>,
    release_tx: mpsc::Sender<()>,
) {
    let mut poll = tokio::time::interval(RELEASE_POLL_INTERVAL);
    loop {
        poll.tick().await;
        if !advertising_up.load(Ordering::SeqCst) {
            continue;
        }
        match adapter.active_advertising_instances().await {
            Ok(0) => {
                debug!("No active advertising instances while a handle is held");
                if release_tx.send(()).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Could not query advertising instances: {e}"),
        }
    }
}
