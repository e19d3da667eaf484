//! Bridge connection, control channel and the tracker event loop.

pub mod connection;
pub mod control;
pub mod driver;

// Public API - used by main.rs
pub use driver::{Notification, Tracker};
