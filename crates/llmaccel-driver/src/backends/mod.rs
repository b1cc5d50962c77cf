//! Register backend implementations
//!
//! Two backends available:
//! - **Mmio**: the control block mapped through UIO (real hardware)
//! - **Software**: an in-process register file (CI, fault injection)

pub mod mmio;
pub mod software;

pub use mmio::MmioBackend;
pub use software::SimulatedDevice;
