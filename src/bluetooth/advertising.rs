//! LE advertisement lifecycle management.
//!
//! BlueZ may revoke a registered advertisement at any time (stack restarts,
//! adapter resets, internal housekeeping) — in practice this is the most
//! failure-prone part of running a BLE peripheral, so the re-registration
//! path is driven by an explicit state machine:
//!
//! `Unregistered → Registering → Advertising → (Released) → Re-registering
//! → Advertising | Failed`
//!
//! [`maintain`] is generic over the registration call so the recovery path
//! can be exercised in tests without a bluetoothd.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bluer::adv::Advertisement;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::gatt::{APPEARANCE_KEYBOARD, HID_SERVICE};
use crate::config::RetryConfig;

/// Terminal failure: the retry budget was exhausted.
#[derive(Debug)]
pub struct RegistrationExhausted {
    pub attempts: u32,
    pub last_error: bluer::Error,
}

impl std::fmt::Display for RegistrationExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "registration failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for RegistrationExhausted {}

/// Build the LE advertisement: connectable peripheral carrying the HID
/// service UUID, the configured name and the keyboard appearance, flagged
/// general-discoverable.
pub fn build_advertisement(local_name: &str) -> Advertisement {
    Advertisement {
        advertisement_type: bluer::adv::Type::Peripheral,
        service_uuids: [HID_SERVICE].into_iter().collect(),
        discoverable: Some(true),
        local_name: Some(local_name.to_string()),
        appearance: Some(APPEARANCE_KEYBOARD),
        ..Default::default()
    }
}

/// Keep the advertisement registered until the release channel closes.
///
/// Each pass registers with a bounded exponential backoff, holds the handle
/// while advertising, and starts over when BlueZ releases the registration.
/// Returns `Ok(())` on orderly shutdown (release channel closed) and the
/// terminal error once a registration round exhausts its retry budget —
/// callers must treat that as fatal rather than advertise dead state.
///
/// `advertising` is the handshake with the release monitor: it is true
/// exactly while a registration handle is held, so the monitor can report
/// zero active instances as a release without ever having observed the
/// advertisement alive. Release events queued while the flag was down
/// belong to an already-replaced registration and are drained, so a burst
/// of reports for the same loss triggers one recovery round, not several.
pub async fn maintain<F, Fut, H>(
    mut register: F,
    mut released: mpsc::Receiver<()>,
    retry: RetryConfig,
    advertising: Arc<AtomicBool>,
) -> Result<(), RegistrationExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bluer::Result<H>>,
{
    loop {
        let handle = register_with_backoff("RegisterAdvertisement", &mut register, retry).await?;
        while released.try_recv().is_ok() {}
        advertising.store(true, Ordering::SeqCst);
        info!("Advertisement registered");

        let event = released.recv().await;
        advertising.store(false, Ordering::SeqCst);
        match event {
            Some(()) => {
                // Dropping the handle best-effort unregisters the stale
                // object before the fresh registration.
                warn!("Advertisement released by host stack — re-registering");
                drop(handle);
            }
            None => {
                debug!("Release channel closed — stopping advertisement");
                drop(handle);
                return Ok(());
            }
        }
    }
}

/// Run `register` up to `retry.max_attempts` times with exponential backoff
/// (initial delay doubling per attempt, capped at 30 s). Shared by the
/// advertisement and GATT application registrations.
pub async fn register_with_backoff<F, Fut, H>(
    what: &str,
    register: &mut F,
    retry: RetryConfig,
) -> Result<H, RegistrationExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bluer::Result<H>>,
{
    const MAX_BACKOFF: Duration = Duration::from_secs(30);
    let mut backoff = Duration::from_secs(retry.initial_backoff_secs);

    for attempt in 1..=retry.max_attempts {
        match register().await {
            Ok(handle) => {
                debug!("{what} succeeded on attempt {attempt}");
                return Ok(handle);
            }
            Err(e) if attempt == retry.max_attempts => {
                return Err(RegistrationExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                warn!(
                    "{what} attempt {attempt}/{} failed: {e} — retrying in {backoff:?}",
                    retry.max_attempts
                );
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
    unreachable!("max_attempts is clamped to at least 1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn retry5() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_backoff_secs: 2,
        }
    }

    fn failed() -> bluer::Error {
        bluer::Error {
            kind: bluer::ErrorKind::Failed,
            message: "simulated".into(),
        }
    }

    /// Registration counter that always succeeds with a unit handle.
    fn counting_register(
        count: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<bluer::Result<()>> {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        }
    }

    /// Spin until the mocked registration count reaches `n`.
    async fn registered(count: &AtomicUsize, n: usize) {
        while count.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    async fn run_releases(n: usize) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel(8);

        let task = tokio::spawn(maintain(
            counting_register(count.clone()),
            release_rx,
            retry5(),
            Arc::new(AtomicBool::new(false)),
        ));

        // Each release only lands after the previous registration is up,
        // like the poll-driven monitor reporting an established loss.
        for i in 0..n {
            registered(&count, i + 1).await;
            release_tx.send(()).await.unwrap();
        }
        registered(&count, n + 1).await;
        drop(release_tx);

        task.await.unwrap().unwrap();
        count.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn reregisters_once_per_release() {
        assert_eq!(run_releases(1).await, 2);
        assert_eq!(run_releases(2).await, 3);
    }

    #[tokio::test]
    async fn survives_a_run_of_releases() {
        assert_eq!(run_releases(5).await, 6);
    }

    #[tokio::test]
    async fn queued_duplicate_releases_coalesce_into_one_recovery() {
        let count = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel(8);

        let task = tokio::spawn(maintain(
            counting_register(count.clone()),
            release_rx,
            retry5(),
            Arc::new(AtomicBool::new(false)),
        ));

        // Several reports of the same loss queue up before the manager
        // reacts; they must cost one re-registration, not five.
        registered(&count, 1).await;
        for _ in 0..5 {
            release_tx.send(()).await.unwrap();
        }
        registered(&count, 2).await;
        drop(release_tx);

        task.await.unwrap().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn advertising_flag_tracks_the_held_handle() {
        let count = Arc::new(AtomicUsize::new(0));
        let flag = Arc::new(AtomicBool::new(false));
        let (release_tx, release_rx) = mpsc::channel(8);

        let task = tokio::spawn(maintain(
            counting_register(count.clone()),
            release_rx,
            retry5(),
            flag.clone(),
        ));

        registered(&count, 1).await;
        assert!(flag.load(Ordering::SeqCst), "flag raised while advertising");

        drop(release_tx);
        task.await.unwrap().unwrap();
        assert!(!flag.load(Ordering::SeqCst), "flag lowered on shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_stops_after_the_retry_budget() {
        let count = Arc::new(AtomicUsize::new(0));
        let register = {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err::<(), _>(failed()))
            }
        };

        let (_release_tx, release_rx) = mpsc::channel(1);
        let err = maintain(register, release_rx, retry5(), Arc::new(AtomicBool::new(false)))
            .await
            .expect_err("must fail terminally, not retry forever");

        assert_eq!(err.attempts, 5);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_registration_starts_succeeding() {
        // Two failures, then success: the handle must come back and the
        // attempt count reflects the retries.
        let count = Arc::new(AtomicUsize::new(0));
        let register = {
            let count = count.clone();
            move || {
                let n = count.fetch_add(1, Ordering::SeqCst);
                std::future::ready(if n < 2 { Err(failed()) } else { Ok(()) })
            }
        };

        let mut register = register;
        register_with_backoff("RegisterAdvertisement", &mut register, retry5())
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
