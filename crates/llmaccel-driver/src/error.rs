//! Error types for accelerator driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for accelerator operations
pub type Result<T> = std::result::Result<T, AccelError>;

/// Errors that can occur while driving the accelerator
#[derive(Debug, Error)]
pub enum AccelError {
    /// Device node not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// A register transaction failed; may succeed on retry
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Register access outside the mapped window
    #[error("Register offset {offset:#x} outside mapped window of {limit:#x} bytes")]
    OutOfBounds {
        /// Requested byte offset
        offset: usize,
        /// Window size in bytes
        limit: usize,
    },

    /// Component is in the wrong state for the requested operation
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Operation did not complete in its polling budget
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Elapsed time in milliseconds
        duration_ms: u64,
    },

    /// The device set the status error flag
    #[error("Hardware error: device reported code {code:#x}")]
    HardwareError {
        /// Device error code
        code: u32,
    },

    /// Bounded queue rejected a push
    #[error("Queue full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// Interrupt descriptor could not be opened or armed
    #[error("Interrupts unavailable: {reason}")]
    IrqUnavailable {
        /// Reason for failure
        reason: String,
    },

    /// Configuration value could not be parsed
    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for rejection
        reason: String,
    },
}

impl AccelError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create an interrupts unavailable error
    pub fn irq_unavailable(reason: impl Into<String>) -> Self {
        Self::IrqUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same register transaction may succeed
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransferFailed { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AccelError::transfer_failed("bus").is_transient());
        assert!(AccelError::Timeout { duration_ms: 5 }.is_transient());
        assert!(!AccelError::HardwareError { code: 3 }.is_transient());
        assert!(!AccelError::OutOfBounds { offset: 0x200, limit: 0x100 }.is_transient());
    }

    #[test]
    fn messages_carry_context() {
        let e = AccelError::OutOfBounds { offset: 0x200, limit: 0x100 };
        assert_eq!(
            e.to_string(),
            "Register offset 0x200 outside mapped window of 0x100 bytes"
        );
        let e = AccelError::QueueFull { capacity: 100 };
        assert_eq!(e.to_string(), "Queue full (capacity 100)");
    }
}
