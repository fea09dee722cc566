//! Error Module
//!
//! Typed errors for the window-server core. Command-level failures are
//! reported back to the guest through the request completion and never
//! terminate the server; only invariant violations fail loudly.

use thiserror::Error;

/// Completion codes written back to the guest. Negative values follow the
/// legacy system error numbering the guest side expects.
pub mod status {
    /// Request completed successfully.
    pub const NONE: i32 = 0;
    /// Generic argument error (malformed payload, bad handle).
    pub const ARGUMENT: i32 = -6;
    /// Referenced object was not found.
    pub const NOT_FOUND: i32 = -1;
    /// Opcode is not supported by the target object.
    pub const NOT_SUPPORTED: i32 = -5;
    /// Resource exhaustion scoped to the failing command.
    pub const NO_MEMORY: i32 = -4;
}

/// Errors produced while decoding or executing a single client command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WsError {
    /// Opcode not recognized by the dispatcher.
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    /// Payload bytes do not match the opcode's expected layout.
    #[error("malformed payload for opcode {opcode:#06x}: expected {expected} bytes, got {got}")]
    MalformedPayload {
        opcode: u16,
        expected: usize,
        got: usize,
    },

    /// Handle does not resolve to a live object.
    #[error("handle {0} not found")]
    BadHandle(u32),

    /// Handle resolves to an object of the wrong kind for this opcode.
    #[error("handle {handle} is a {actual}, opcode requires a {expected}")]
    HandleTypeMismatch {
        handle: u32,
        expected: &'static str,
        actual: &'static str,
    },

    /// Session-local handle space has been exhausted.
    #[error("session handle space exhausted")]
    HandleSpaceExhausted,

    /// Command buffer framing is inconsistent (truncated header or payload).
    #[error("malformed command buffer at offset {0}")]
    MalformedCommandBuffer(usize),

    /// Unknown hotkey class in a restore-hotkey command.
    #[error("unknown hotkey type {0}")]
    UnknownHotKey(u32),

    /// Window kind field outside the legacy enumeration.
    #[error("invalid window kind {0}")]
    InvalidWindowKind(u32),

    /// Guest-supplied screen index outside the configured range.
    #[error("screen index {index} out of range ({count} configured)")]
    ScreenIndexOutOfRange { index: u32, count: usize },
}

impl WsError {
    /// Completion code delivered to the guest for this error.
    pub fn status(&self) -> i32 {
        match self {
            WsError::UnknownOpcode(_) => status::NOT_SUPPORTED,
            WsError::MalformedPayload { .. } => status::ARGUMENT,
            WsError::BadHandle(_) => status::NOT_FOUND,
            WsError::HandleTypeMismatch { .. } => status::ARGUMENT,
            WsError::HandleSpaceExhausted => status::NO_MEMORY,
            WsError::MalformedCommandBuffer(_) => status::ARGUMENT,
            WsError::UnknownHotKey(_) => status::ARGUMENT,
            WsError::InvalidWindowKind(_) => status::ARGUMENT,
            WsError::ScreenIndexOutOfRange { .. } => status::ARGUMENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(WsError::UnknownOpcode(0xff).status(), status::NOT_SUPPORTED);
        assert_eq!(WsError::BadHandle(3).status(), status::NOT_FOUND);
        assert_eq!(WsError::HandleSpaceExhausted.status(), status::NO_MEMORY);
        assert_eq!(
            WsError::HandleTypeMismatch {
                handle: 1,
                expected: "window group",
                actual: "sprite"
            }
            .status(),
            status::ARGUMENT
        );
    }
}
