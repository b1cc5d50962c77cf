//! AXI-Lite register map of the accelerator control block.
//!
//! Offsets are byte offsets from the device base. The layout is the HLS
//! `s_axilite` map of the generation kernel:
//!
//! ```text
//! 0x00        AP_CTRL        start / done / idle / ready / auto_restart / interrupt
//! 0x04        GIE            global interrupt enable
//! 0x08        IER            per-source interrupt enable
//! 0x0C        ISR            interrupt status (write 1 to clear)
//! 0x10..0xA4  CONFIG_IN      38 words, 1216 bits
//! 0xAC..0xB8  STATUS_OUT     4 words, 128 bits
//! 0xBC        STATUS_CTRL    status_out_ap_vld
//! 0xD4        IRQ_CLEAR      irq_clear_in
//! ```

// ── Platform ─────────────────────────────────────────────────────────────────

/// Default physical base address of the control block (device tree default).
pub const BASE_ADDR: u64 = 0x43C0_0000;

/// Size of the register window in bytes. Everything above `IRQ_CLEAR` is unused.
pub const REGION_SIZE: usize = 0x100;

// ── Control and interrupts ───────────────────────────────────────────────────

/// Block-level control signals.
pub const AP_CTRL: usize = 0x00;
/// Global interrupt enable.
pub const GIE: usize = 0x04;
/// Interrupt enable.
pub const IER: usize = 0x08;
/// Interrupt status, write-1-to-clear.
pub const ISR: usize = 0x0C;

// ── Configuration input ──────────────────────────────────────────────────────

/// First word of `config_in`.
pub const CONFIG_BASE: usize = 0x10;
/// Number of 32-bit words in `config_in`.
pub const CONFIG_WORDS: usize = 38;

// ── Status output ────────────────────────────────────────────────────────────

/// First word of `status_out`.
pub const STATUS_BASE: usize = 0xAC;
/// Number of 32-bit words in `status_out`.
pub const STATUS_WORDS: usize = 4;
/// `status_out` handshake register.
pub const STATUS_CTRL: usize = 0xBC;

// ── Interrupt clear ──────────────────────────────────────────────────────────

/// Clears every pending interrupt source when written.
pub const IRQ_CLEAR: usize = 0xD4;

/// Byte offset of configuration word `n`.
pub const fn config_offset(n: usize) -> usize {
    CONFIG_BASE + n * 4
}

/// Byte offset of status word `n`.
pub const fn status_offset(n: usize) -> usize {
    STATUS_BASE + n * 4
}

/// `AP_CTRL` bit definitions.
pub mod ap_ctrl {
    /// ap_start (R/W/COH).
    pub const START: u32 = 1 << 0;
    /// ap_done (R/COR).
    pub const DONE: u32 = 1 << 1;
    /// ap_idle (R).
    pub const IDLE: u32 = 1 << 2;
    /// ap_ready (R/COR).
    pub const READY: u32 = 1 << 3;
    /// auto_restart (R/W).
    pub const AUTO_RESTART: u32 = 1 << 7;
    /// Interrupt line state (R).
    pub const INTERRUPT: u32 = 1 << 9;
}

/// `STATUS_CTRL` bit definitions.
pub mod status_ctrl {
    /// status_out_ap_vld: the status words hold a fresh value.
    pub const VALID: u32 = 1 << 0;
}

/// `GIE` bit definitions.
pub mod gie {
    /// Enable the interrupt output.
    pub const ENABLE: u32 = 1 << 0;
}
