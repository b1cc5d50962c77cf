//! Register backend abstraction
//!
//! Every device transaction goes through [`RegisterBackend::read32`] and
//! [`RegisterBackend::write32`]. Higher layers never touch raw pointers.

use crate::backends::mmio::MmioBackend;
use crate::backends::software::SimulatedDevice;
use crate::error::Result;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// 32-bit register access to the accelerator control block
///
/// Methods take `&self`: the scheduler owns the configuration and control
/// registers and the interrupt service thread owns `ISR`, so both hold the
/// same backend through an `Arc`.
pub trait RegisterBackend: Debug + Send + Sync {
    /// Read the register at byte `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the offset is outside the window or the transaction fails.
    fn read32(&self, offset: usize) -> Result<u32>;

    /// Write `value` to the register at byte `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the offset is outside the window or the transaction fails.
    fn write32(&self, offset: usize, value: u32) -> Result<()>;

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Memory-mapped control block (UIO or `/dev/mem`)
    Mmio,

    /// In-process register file, no hardware required
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mmio => write!(f, "MMIO"),
            Self::Software => write!(f, "Software (simulated)"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelection {
    /// Map the device if possible, otherwise simulate
    Auto,

    /// Force the memory-mapped backend
    Mmio,

    /// Force the simulated device
    Software,
}

/// Select a register backend for `device` (a UIO node such as `/dev/uio0`)
///
/// # Errors
///
/// Returns error if the forced backend cannot be initialized.
pub fn select_backend(
    selection: BackendSelection,
    device: &Path,
) -> Result<Arc<dyn RegisterBackend>> {
    match selection {
        BackendSelection::Auto => match MmioBackend::open_uio(device) {
            Ok(backend) => {
                tracing::info!("Using MMIO backend for {}", device.display());
                Ok(Arc::new(backend))
            }
            Err(e) => {
                tracing::info!(
                    "MMIO unavailable for {} ({e}), using simulated device",
                    device.display()
                );
                Ok(Arc::new(SimulatedDevice::new()))
            }
        },

        BackendSelection::Mmio => {
            MmioBackend::open_uio(device).map(|b| Arc::new(b) as Arc<dyn RegisterBackend>)
        }

        BackendSelection::Software => Ok(Arc::new(SimulatedDevice::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_falls_back_to_software() {
        let backend = select_backend(BackendSelection::Auto, Path::new("/dev/uio-missing"))
            .expect("auto selection always yields a backend");
        assert_eq!(backend.backend_type(), BackendType::Software);
    }

    #[test]
    fn forced_mmio_reports_missing_device() {
        let result = select_backend(BackendSelection::Mmio, Path::new("/dev/uio-missing"));
        assert!(result.is_err(), "Should fail gracefully on missing hardware");
    }
}
