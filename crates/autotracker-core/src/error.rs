//! Tracker error types with operator-facing suggestions.

use thiserror::Error;

use crate::memory::Segment;

/// Errors raised by the tracker core.
///
/// None of these ever escape message handling in the state machine: transport
/// and protocol failures are logged and force the read state back to idle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// Socket-level failure reported by the transport.
    #[error("bridge connection error: {0}")]
    Transport(String),

    /// A reply had an unexpected shape.
    #[error("unexpected bridge reply: {0}")]
    Protocol(String),

    /// A memory reply did not match the requested window size.
    #[error("{segment} reply was {actual} bytes, expected {expected}")]
    SegmentLength {
        segment: Segment,
        expected: usize,
        actual: usize,
    },

    /// A toggle or query named something the tracker does not display.
    #[error("unknown tracker identifier '{0}'")]
    UnknownIdentifier(String),
}

impl TrackerError {
    /// A short hint on how to recover.
    pub fn suggestion(&self) -> &'static str {
        match self {
            TrackerError::Transport(_) => {
                "Check that the bridge (QUsb2Snes or compatible) is running, then reconnect"
            }
            TrackerError::Protocol(_) | TrackerError::SegmentLength { .. } => {
                "The bridge sent something unexpected; the next polling cycle will retry"
            }
            TrackerError::UnknownIdentifier(_) => {
                "Run 'autotracker items' to see every tracked identifier"
            }
        }
    }
}
