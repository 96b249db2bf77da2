//! The HID-over-GATT object tree served to BlueZ.
//!
//! `bluer::gatt::local` turns these structs into the org.bluez.GattService1 /
//! GattCharacteristic1 / GattDescriptor1 objects the daemon enumerates via
//! ObjectManager, so the wire contract is handled by the binding and this
//! module only supplies values and handlers.
//!
//! Three services are exposed: HID (0x1812), Device Information (0x180A) and
//! Battery (0x180F). Some hosts refuse to bind a HID driver when the last
//! two are missing.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluer::gatt::local::{
    Application, Characteristic, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicRead, CharacteristicWrite, CharacteristicWriteMethod, Descriptor,
    DescriptorRead, ReqError, Service,
};
use bluer::Uuid;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::hid::report::{self, REPORT_LEN};

// ─── Assigned numbers ───────────────────────────────────────────────────────

/// Expand a 16-bit Bluetooth SIG assigned number into its 128-bit form.
pub const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5F9B_34FB)
}

pub const HID_SERVICE: Uuid = uuid16(0x1812);
const HID_INFORMATION: Uuid = uuid16(0x2A4A);
const REPORT_MAP: Uuid = uuid16(0x2A4B);
const HID_CONTROL_POINT: Uuid = uuid16(0x2A4C);
const REPORT: Uuid = uuid16(0x2A4D);
const PROTOCOL_MODE: Uuid = uuid16(0x2A4E);
const REPORT_REFERENCE: Uuid = uuid16(0x2908);

const DEVICE_INFORMATION_SERVICE: Uuid = uuid16(0x180A);
const MODEL_NUMBER: Uuid = uuid16(0x2A24);
const MANUFACTURER_NAME: Uuid = uuid16(0x2A29);
const PNP_ID: Uuid = uuid16(0x2A50);

const BATTERY_SERVICE: Uuid = uuid16(0x180F);
const BATTERY_LEVEL: Uuid = uuid16(0x2A19);

/// Report Reference descriptor report types.
const REPORT_TYPE_INPUT: u8 = 0x01;
const REPORT_TYPE_OUTPUT: u8 = 0x02;

/// GAP appearance: HID keyboard.
pub const APPEARANCE_KEYBOARD: u16 = 0x03C1;

// ─── Input Report shared state ──────────────────────────────────────────────

/// State shared between the typist task and the BlueZ callback surface.
///
/// The typist writes reports; the event loop reads the last value when the
/// host issues a characteristic read and drains the queue into notifications
/// while the host is subscribed. The pieces are individually synchronised
/// (mutex, watch, bounded channel) — there is no other shared mutable state
/// between the two execution contexts.
pub struct InputReportState {
    last: Mutex<[u8; REPORT_LEN]>,
    subscribed: watch::Sender<bool>,
    notify_tx: mpsc::Sender<[u8; REPORT_LEN]>,
    notify_rx: tokio::sync::Mutex<mpsc::Receiver<[u8; REPORT_LEN]>>,
}

impl InputReportState {
    pub fn new() -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::channel(64);
        Arc::new(Self {
            last: Mutex::new(report::release_report()),
            subscribed: watch::Sender::new(false),
            notify_tx,
            notify_rx: tokio::sync::Mutex::new(notify_rx),
        })
    }

    /// Last report pushed while subscribed; all-keys-up initially.
    pub fn last_report(&self) -> [u8; REPORT_LEN] {
        *self.last.lock().expect("input report lock poisoned")
    }

    pub fn is_subscribed(&self) -> bool {
        *self.subscribed.borrow()
    }

    /// Mark the host subscribed. Idempotent.
    pub fn subscribe(&self) {
        self.subscribed.send_replace(true);
    }

    /// Mark the host unsubscribed. A no-op when not subscribed.
    pub fn unsubscribe(&self) {
        self.subscribed.send_replace(false);
    }

    /// Watch handle for tasks that want to wait for a subscription.
    pub fn subscribed_watch(&self) -> watch::Receiver<bool> {
        self.subscribed.subscribe()
    }

    /// Queue a report for notification. Returns `false` without blocking
    /// when the host is not subscribed or the queue is full; an unsubscribed
    /// host simply does not receive reports.
    pub fn push(&self, report: [u8; REPORT_LEN]) -> bool {
        if !self.is_subscribed() {
            return false;
        }
        *self.last.lock().expect("input report lock poisoned") = report;
        match self.notify_tx.try_send(report) {
            Ok(()) => true,
            Err(_) => {
                warn!("Input report queue full — dropping report");
                false
            }
        }
    }

    /// Next queued report. `None` never happens in production (the state
    /// owns the sender) but keeps the notify loop honest.
    pub async fn next_notification(&self) -> Option<[u8; REPORT_LEN]> {
        self.notify_rx.lock().await.recv().await
    }

    #[cfg(test)]
    pub(crate) async fn notify_queue_is_empty(&self) -> bool {
        self.notify_rx.lock().await.try_recv().is_err()
    }
}

// ─── Application assembly ───────────────────────────────────────────────────

/// Build the complete GATT application for registration with BlueZ.
pub fn build_application(state: Arc<InputReportState>, device: &DeviceConfig) -> Application {
    Application {
        services: vec![
            hid_service(state),
            device_information_service(device),
            battery_service(),
        ],
        ..Default::default()
    }
}

fn hid_service(state: Arc<InputReportState>) -> Service {
    let led_mask = Arc::new(AtomicU8::new(0x00));

    Service {
        uuid: HID_SERVICE,
        primary: true,
        characteristics: vec![
            static_read_characteristic(HID_INFORMATION, report::HID_INFORMATION.to_vec()),
            static_read_characteristic(REPORT_MAP, report::REPORT_MAP.to_vec()),
            protocol_mode_characteristic(),
            control_point_characteristic(),
            input_report_characteristic(state),
            output_report_characteristic(led_mask),
        ],
        ..Default::default()
    }
}

/// A read-only characteristic with a fixed value.
fn static_read_characteristic(uuid: Uuid, value: Vec<u8>) -> Characteristic {
    Characteristic {
        uuid,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| {
                let value = value.clone();
                Box::pin(async move { Ok(value) })
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Validate a Protocol Mode write.
///
/// Only Report Protocol (0x01) is implemented; there are no Boot Keyboard
/// characteristics behind a Boot Protocol (0x00) switch, so that write is
/// refused outright rather than accepted into a mode with no input path.
fn validate_protocol_mode(value: &[u8]) -> Result<(), ReqError> {
    match value {
        [0x01] => Ok(()),
        [_] => Err(ReqError::NotSupported),
        _ => Err(ReqError::InvalidValueLength),
    }
}

/// Protocol Mode: one byte, fixed at Report Protocol.
fn protocol_mode_characteristic() -> Characteristic {
    Characteristic {
        uuid: PROTOCOL_MODE,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| Box::pin(async move { Ok(vec![0x01]) })),
            ..Default::default()
        }),
        write: Some(CharacteristicWrite {
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _req| {
                Box::pin(async move {
                    validate_protocol_mode(&value)?;
                    info!("Protocol mode confirmed: report protocol");
                    Ok(())
                })
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// HID Control Point: write-without-response suspend hints, otherwise a no-op.
fn control_point_characteristic() -> Characteristic {
    Characteristic {
        uuid: HID_CONTROL_POINT,
        write: Some(CharacteristicWrite {
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _req| {
                Box::pin(async move {
                    if value.len() != 1 {
                        return Err(ReqError::InvalidValueLength);
                    }
                    // 0x00 = Suspend, 0x01 = Exit Suspend.
                    let state = if value[0] == 0x00 { "suspend" } else { "resume" };
                    info!("HID control point: {state}");
                    Ok(())
                })
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Input Report: read returns the last report, notify streams the queue.
fn input_report_characteristic(state: Arc<InputReportState>) -> Characteristic {
    let read_state = state.clone();
    Characteristic {
        uuid: REPORT,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| {
                let state = read_state.clone();
                Box::pin(async move { Ok(state.last_report().to_vec()) })
            }),
            ..Default::default()
        }),
        notify: Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |mut notifier| {
                let state = state.clone();
                Box::pin(async move {
                    state.subscribe();
                    info!("Input report notifications enabled");
                    // The stop flag only flips via BlueZ; poll it so an idle
                    // subscription still notices StopNotify.
                    let mut poll = tokio::time::interval(Duration::from_millis(500));
                    loop {
                        tokio::select! {
                            report = state.next_notification() => {
                                let Some(report) = report else { break };
                                if let Err(e) = notifier.notify(report.to_vec()).await {
                                    debug!("Notify failed (host gone?): {e}");
                                    break;
                                }
                            }
                            _ = poll.tick() => {
                                if notifier.is_stopped() {
                                    break;
                                }
                            }
                        }
                    }
                    state.unsubscribe();
                    info!("Input report notifications disabled");
                })
            })),
            ..Default::default()
        }),
        descriptors: vec![report_reference_descriptor(1, REPORT_TYPE_INPUT)],
        ..Default::default()
    }
}

/// Output Report: the host writes the keyboard LED bitmap here.
fn output_report_characteristic(led_mask: Arc<AtomicU8>) -> Characteristic {
    let read_mask = led_mask.clone();
    Characteristic {
        uuid: REPORT,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| {
                let mask = read_mask.clone();
                Box::pin(async move { Ok(vec![mask.load(Ordering::Relaxed)]) })
            }),
            ..Default::default()
        }),
        write: Some(CharacteristicWrite {
            write: true,
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _req| {
                let mask = led_mask.clone();
                Box::pin(async move {
                    if value.is_empty() {
                        return Err(ReqError::InvalidValueLength);
                    }
                    // Only NumLock..Kana are defined; mask the rest off.
                    let led = value[0] & 0x1F;
                    mask.store(led, Ordering::Relaxed);
                    debug!("LED output report: {led:#04x}");
                    Ok(())
                })
            })),
            ..Default::default()
        }),
        descriptors: vec![report_reference_descriptor(1, REPORT_TYPE_OUTPUT)],
        ..Default::default()
    }
}

/// Report Reference descriptor pairing a report ID with its type.
fn report_reference_descriptor(report_id: u8, report_type: u8) -> Descriptor {
    Descriptor {
        uuid: REPORT_REFERENCE,
        read: Some(DescriptorRead {
            read: true,
            fun: Box::new(move |_req| Box::pin(async move { Ok(vec![report_id, report_type]) })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn device_information_service(device: &DeviceConfig) -> Service {
    // PnP ID: vendor-ID source 0x02 (USB), then VID/PID/version little-endian.
    let pnp = vec![
        0x02,
        (device.vendor_id & 0xFF) as u8,
        (device.vendor_id >> 8) as u8,
        (device.product_id & 0xFF) as u8,
        (device.product_id >> 8) as u8,
        (device.version & 0xFF) as u8,
        (device.version >> 8) as u8,
    ];

    Service {
        uuid: DEVICE_INFORMATION_SERVICE,
        primary: true,
        characteristics: vec![
            static_read_characteristic(PNP_ID, pnp),
            static_read_characteristic(MANUFACTURER_NAME, device.manufacturer.clone().into_bytes()),
            static_read_characteristic(MODEL_NUMBER, device.model.clone().into_bytes()),
        ],
        ..Default::default()
    }
}

fn battery_service() -> Service {
    Service {
        uuid: BATTERY_SERVICE,
        primary: true,
        // Mains-powered; report a constant full battery.
        characteristics: vec![static_read_characteristic(BATTERY_LEVEL, vec![100])],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid16_expands_to_bluetooth_base() {
        assert_eq!(
            HID_SERVICE.to_string(),
            "00001812-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            REPORT_REFERENCE.to_string(),
            "00002908-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn boot_protocol_writes_are_refused() {
        assert!(validate_protocol_mode(&[0x01]).is_ok());
        assert!(matches!(
            validate_protocol_mode(&[0x00]),
            Err(ReqError::NotSupported)
        ));
        assert!(matches!(
            validate_protocol_mode(&[0x02]),
            Err(ReqError::NotSupported)
        ));
        assert!(matches!(
            validate_protocol_mode(&[]),
            Err(ReqError::InvalidValueLength)
        ));
        assert!(matches!(
            validate_protocol_mode(&[0x01, 0x01]),
            Err(ReqError::InvalidValueLength)
        ));
    }

    #[test]
    fn subscribe_is_idempotent() {
        let state = InputReportState::new();
        assert!(!state.is_subscribed());
        state.subscribe();
        state.subscribe();
        assert!(state.is_subscribed());
    }

    #[test]
    fn unsubscribe_when_not_subscribed_is_a_noop() {
        let state = InputReportState::new();
        state.unsubscribe();
        assert!(!state.is_subscribed());
        state.subscribe();
        state.unsubscribe();
        state.unsubscribe();
        assert!(!state.is_subscribed());
    }

    #[tokio::test]
    async fn push_while_unsubscribed_delivers_nothing() {
        let state = InputReportState::new();
        assert!(!state.push(report::key_report(0, 0x04)));
        // Last value is untouched and the queue stays empty.
        assert_eq!(state.last_report(), report::release_report());
        assert!(state.notify_queue_is_empty().await);
    }

    #[tokio::test]
    async fn push_while_subscribed_queues_and_updates_last_value() {
        let state = InputReportState::new();
        state.subscribe();
        let press = report::key_report(0x02, 0x17);
        assert!(state.push(press));
        assert_eq!(state.last_report(), press);
        assert_eq!(state.next_notification().await, Some(press));
    }
}
