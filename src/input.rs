//! Input pipeline: FIFO → typist → Input Report notifications.
//!
//! Two halves, coupled only by an mpsc channel:
//!
//! - **Reader thread**: blocks on the named FIFO, forwards each line (with
//!   its terminator restored) to the channel. Reopens on EOF and retries on
//!   error — this loop runs for the process lifetime.
//! - **Typist task**: drains entries in strict FIFO order and converts each
//!   character into a timed key-down / all-keys-up report pair, gated on the
//!   host's subscription state.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bluetooth::gatt::InputReportState;
use crate::config::InputConfig;
use crate::hid::{keymap, report};

/// Create the FIFO if absent and open its permissions so any local producer
/// can write. Access control is filesystem-level by design.
pub fn ensure_fifo(path: &Path) -> Result<()> {
    match mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => info!("Created FIFO at {}", path.display()),
        Err(nix::errno::Errno::EEXIST) => {}
        Err(e) => {
            return Err(e).wrap_err_with(|| format!("Failed to create FIFO {}", path.display()))
        }
    }
    // mkfifo is subject to the umask; force the intended mode.
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
        .wrap_err_with(|| format!("Failed to set FIFO permissions on {}", path.display()))?;
    Ok(())
}

/// Spawn the blocking reader thread. Returns the channel the typist drains.
pub fn spawn_reader(path: PathBuf) -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("fifo-reader".into())
        .spawn(move || reader_loop(&path, tx))
        .wrap_err("Failed to spawn FIFO reader thread")?;
    Ok(rx)
}

fn reader_loop(path: &Path, tx: mpsc::Sender<String>) {
    loop {
        // Opening a FIFO read-only blocks until a producer opens it for
        // writing; EOF below means the producer closed, so we loop and
        // reopen rather than terminating.
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Cannot open FIFO {}: {e}", path.display());
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        for line in BufReader::new(file).lines() {
            match line {
                Ok(mut text) => {
                    // The producer contract is newline-terminated text;
                    // restore the terminator so it is typed as Enter.
                    text.push('\n');
                    if tx.blocking_send(text).is_err() {
                        debug!("Typist channel closed — reader exiting");
                        return;
                    }
                }
                Err(e) => {
                    warn!("FIFO read error: {e} — reopening");
                    break;
                }
            }
        }
    }
}

/// Consume text entries and emit HID reports in strict arrival order.
///
/// Unmapped characters are skipped silently (deliberate best-effort policy).
/// Mapped characters wait for a subscribed host, so text queued while the
/// host is away is typed after it reconnects instead of being lost. A
/// character is only complete once both its key-down and the following
/// all-keys-up were queued; failed pushes (queue full, host unsubscribing
/// mid-key) replay the character rather than drop it or leave a key held.
pub async fn run_typist(
    mut entries: mpsc::Receiver<String>,
    reports: Arc<InputReportState>,
    timing: InputConfig,
) {
    let hold = Duration::from_millis(timing.key_hold_ms);
    let gap = Duration::from_millis(timing.key_gap_ms);
    let mut subscribed = reports.subscribed_watch();

    while let Some(entry) = entries.recv().await {
        debug!(chars = entry.chars().count(), "Typing entry");
        for ch in entry.chars() {
            let (usage, modifiers) = keymap::map_char(ch);
            if usage == 0 {
                debug!("Dropping unmapped character {ch:?}");
                continue;
            }

            let press = report::key_report(modifiers, usage);
            'replay: loop {
                if subscribed.wait_for(|s| *s).await.is_err() {
                    // Subscription state owner gone — daemon shutting down.
                    return;
                }

                if !reports.push(press) {
                    // Queue full or subscription lost since the wait; give
                    // the notify loop room to drain and replay.
                    sleep(gap).await;
                    continue;
                }
                sleep(hold).await;

                // The key-down is out; the release must follow or the host
                // auto-repeats a held key. Retry until it is queued, or
                // replay the whole character if the subscription dropped
                // (press and release then reach the host together).
                loop {
                    if reports.push(report::release_report()) {
                        break 'replay;
                    }
                    if !reports.is_subscribed() {
                        continue 'replay;
                    }
                    sleep(gap).await;
                }
            }
            sleep(gap).await;
        }
    }
    debug!("Entry channel closed — typist exiting");
}
