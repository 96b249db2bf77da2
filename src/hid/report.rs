//! 8-byte HID keyboard input report layout and the static report descriptor.
//!
//! Layout (boot-keyboard compatible): byte 0 modifier bitmap, byte 1
//! reserved, bytes 2–7 up to six concurrently pressed usage codes. The
//! daemon only ever presses one key at a time, so byte 2 carries the usage
//! and bytes 3–7 stay zero.

/// Size of a keyboard input report.
pub const REPORT_LEN: usize = 8;

/// Build a key-down report for a single usage code.
pub fn key_report(modifiers: u8, usage: u8) -> [u8; REPORT_LEN] {
    [modifiers, 0x00, usage, 0, 0, 0, 0, 0]
}

/// The all-keys-up report. Must follow every key-down report before the
/// next character, otherwise hosts treat the key as held and auto-repeat.
pub fn release_report() -> [u8; REPORT_LEN] {
    [0; REPORT_LEN]
}

/// HID Information characteristic value: HID spec v1.11, country code 0,
/// flags = remote wake + normally connectable.
pub const HID_INFORMATION: [u8; 4] = [0x11, 0x01, 0x00, 0x03];

/// HID report descriptor for the 8-byte keyboard report plus a 1-byte LED
/// output report. This descriptor is parsed by the host OS HID driver; its
/// field layout must stay in sync with [`key_report`].
#[rustfmt::skip]
pub const REPORT_MAP: [u8; 63] = [
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x06,       // Usage (Keyboard)
    0xA1, 0x01,       // Collection (Application)
    0x05, 0x07,       //   Usage Page (Key Codes)
    0x19, 0xE0,       //   Usage Minimum (224)
    0x29, 0xE7,       //   Usage Maximum (231)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x01,       //   Logical Maximum (1)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0x08,       //   Report Count (8)
    0x81, 0x02,       //   Input (Data, Variable, Absolute) — modifier bits
    0x95, 0x01,       //   Report Count (1)
    0x75, 0x08,       //   Report Size (8)
    0x81, 0x01,       //   Input (Constant) — reserved byte
    0x95, 0x05,       //   Report Count (5)
    0x75, 0x01,       //   Report Size (1)
    0x05, 0x08,       //   Usage Page (LEDs)
    0x19, 0x01,       //   Usage Minimum (1)
    0x29, 0x05,       //   Usage Maximum (5)
    0x91, 0x02,       //   Output (Data, Variable, Absolute) — LED report
    0x95, 0x01,       //   Report Count (1)
    0x75, 0x03,       //   Report Size (3)
    0x91, 0x01,       //   Output (Constant) — LED padding
    0x95, 0x06,       //   Report Count (6)
    0x75, 0x08,       //   Report Size (8)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x65,       //   Logical Maximum (101)
    0x05, 0x07,       //   Usage Page (Key Codes)
    0x19, 0x00,       //   Usage Minimum (0)
    0x29, 0x65,       //   Usage Maximum (101)
    0x81, 0x00,       //   Input (Data, Array) — key array
    0xC0,             // End Collection
];
