//! Core types and logic for the Chrono Trigger autotracker.
//!
//! This crate decodes game memory read through a QUsb2Snes-compatible bridge
//! into the obtained state of every tracker entity. It performs no I/O: the
//! CLI crate owns the socket and timers and drives [`machine::TrackerSession`].
//!
//! # Modules
//!
//! - [`error`]: Tracker error types with actionable suggestions
//! - [`protocol`]: JSON requests and replies exchanged with the bridge
//! - [`memory`]: Segment buffers and raw memory decoding
//! - [`events`]: Boss and world-progress flags
//! - [`items`]: Key item registry and resolution strategies
//! - [`state`]: Obtained-state store and go-mode derivation
//! - [`machine`]: Connection and polling state machine
//!
//! # Entities
//!
//! | Kind | Source | Example |
//! |------|--------|---------|
//! | **Character** | Party segment | `Crono`, `Frog` |
//! | **Event** | Event segment | `nizbel`, `melchior`, `magic` |
//! | **Key item** | Inventory, plus equipment or events | `pendant`, `moonstone` |
//! | **Go mode** | Derived from key items | `gomode` |
//!
//! Identifiers are case-sensitive and match the rendering layer's icon names.

pub mod error;
pub mod events;
pub mod items;
pub mod machine;
pub mod memory;
pub mod protocol;
pub mod state;
