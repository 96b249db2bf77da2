//! HID keyboard primitives: character-to-usage mapping and the 8-byte
//! input report layout. Pure functions only — no I/O, no BlueZ.

pub mod keymap;
pub mod report;
