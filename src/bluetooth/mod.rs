//! BlueZ-facing half of the daemon.
//!
//! - `worker`: owns the session/adapter and assembles everything.
//! - `gatt`: the HID-over-GATT object tree and the shared input-report state.
//! - `advertising`: LE advertisement lifecycle with bounded-backoff recovery.
//! - `agent`: the default pairing agent and its policy.

pub mod advertising;
pub mod agent;
pub mod gatt;
pub mod worker;
