// SPDX-License-Identifier: AGPL-3.0-only

//! Software (simulated) accelerator
//!
//! Implements [`RegisterBackend`] over an in-process register file laid out
//! exactly like the HLS control block. This enables:
//!
//! 1. **CI without hardware**: the device session, interrupt service and
//!    scheduler run unmodified against it.
//!
//! 2. **Fault injection**: status-valid gaps, device errors, early completion
//!    and transient bus failures can be scripted per test.
//!
//! 3. **Transaction audit**: every accepted write is journaled, so tests can
//!    assert which configuration words a call touched.
//!
//! ## Register behaviour
//!
//! ```text
//! AP_CTRL     write START  → busy, status_out armed (VALID), ISR |= READY
//!             write 0      → idle
//! ISR         write-1-to-clear
//! IRQ_CLEAR   any write clears ISR
//! STATUS_*    read-only, driven by the device model
//! ```
//!
//! Each transaction costs `latency` (100 µs by default, as a register access
//! over the interconnect does), so callers cannot assume writes are free.

use crate::backend::{BackendType, RegisterBackend};
use crate::error::{AccelError, Result};
use crate::irq::IrqTrigger;
use llmaccel_chip::config::ConfigWords;
use llmaccel_chip::regs::{self, ap_ctrl, status_ctrl};
use llmaccel_chip::status::{flags, StatusWord};
use llmaccel_chip::irq;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// Default cost of one register transaction.
pub const DEFAULT_LATENCY: Duration = Duration::from_micros(100);

#[derive(Debug)]
struct SimState {
    regs: [u32; regs::REGION_SIZE / 4],
    status: StatusWord,
    status_valid: bool,
    fail_next: u32,
    journal: Vec<(usize, u32)>,
    irq_line: Option<IrqTrigger>,
}

impl SimState {
    fn raise(&mut self, mask: u32) {
        self.regs[regs::ISR / 4] |= mask;
        if let Some(line) = &self.irq_line {
            line.fire();
        }
    }
}

/// Software (simulated) accelerator.
#[derive(Debug)]
pub struct SimulatedDevice {
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimulatedDevice {
    /// Create an idle device with default transaction latency.
    pub fn new() -> Self {
        let mut regs = [0u32; regs::REGION_SIZE / 4];
        regs[regs::AP_CTRL / 4] = ap_ctrl::IDLE;
        Self {
            state: Mutex::new(SimState {
                regs,
                status: StatusWord::default(),
                status_valid: true,
                fail_next: 0,
                journal: Vec::new(),
                irq_line: None,
            }),
            latency: DEFAULT_LATENCY,
        }
    }

    /// Set the per-transaction latency (zero for fast unit tests).
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Wire the interrupt output to a simulated IRQ line.
    #[must_use]
    pub fn with_irq_line(self, line: IrqTrigger) -> Self {
        self.state().irq_line = Some(line);
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(offset: usize) -> Result<()> {
        if offset % 4 != 0 || offset + 4 > regs::REGION_SIZE {
            return Err(AccelError::OutOfBounds {
                offset,
                limit: regs::REGION_SIZE,
            });
        }
        Ok(())
    }

    fn delay(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }

    fn take_failure(state: &mut SimState, offset: usize) -> Result<()> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(AccelError::transfer_failed(format!(
                "simulated bus error @ {offset:#x}"
            )));
        }
        Ok(())
    }

    /// Control whether `STATUS_CTRL` reports fresh status.
    pub fn set_status_valid(&self, valid: bool) {
        self.state().status_valid = valid;
    }

    /// Finish the current generation from the device side.
    pub fn complete(&self) {
        let mut s = self.state();
        s.status.flags |= flags::DONE;
        s.regs[regs::AP_CTRL / 4] = ap_ctrl::DONE | ap_ctrl::IDLE;
        s.raise(irq::DONE);
        debug!("SimulatedDevice: generation completed");
    }

    /// Report a device error with `code`.
    pub fn inject_error(&self, code: u32) {
        let mut s = self.state();
        s.status.flags |= flags::ERROR;
        s.status.error_code = code;
        s.raise(irq::ERROR);
        debug!("SimulatedDevice: injected error {code:#x}");
    }

    /// Set `mask` in `ISR` and pulse the interrupt line.
    pub fn raise_interrupt(&self, mask: u32) {
        self.state().raise(mask);
    }

    /// Fail the next `count` transactions with a transient error.
    pub fn fail_transactions(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// Current `config_in` image as the device holds it.
    pub fn config_words(&self) -> ConfigWords {
        let s = self.state();
        let base = regs::CONFIG_BASE / 4;
        let mut words = [0u32; regs::CONFIG_WORDS];
        words.copy_from_slice(&s.regs[base..base + regs::CONFIG_WORDS]);
        words
    }

    /// Peek a register without cost or side effects.
    pub fn peek(&self, offset: usize) -> u32 {
        self.state().regs[offset / 4]
    }

    /// Accepted writes in order, as `(offset, value)`.
    pub fn journal(&self) -> Vec<(usize, u32)> {
        self.state().journal.clone()
    }

    /// Forget journaled writes.
    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBackend for SimulatedDevice {
    fn read32(&self, offset: usize) -> Result<u32> {
        Self::check(offset)?;
        self.delay();

        let mut s = self.state();
        Self::take_failure(&mut s, offset)?;

        let value = match offset {
            regs::STATUS_CTRL => {
                if s.status_valid {
                    status_ctrl::VALID
                } else {
                    0
                }
            }
            o if (regs::STATUS_BASE..regs::STATUS_CTRL).contains(&o) => {
                s.status.pack()[(o - regs::STATUS_BASE) / 4]
            }
            o => s.regs[o / 4],
        };

        trace!("SimulatedDevice: read {offset:#06x} = {value:#010x}");
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        Self::check(offset)?;
        self.delay();

        let mut s = self.state();
        Self::take_failure(&mut s, offset)?;
        trace!("SimulatedDevice: write {offset:#06x} = {value:#010x}");

        match offset {
            regs::AP_CTRL => {
                let keep = value & ap_ctrl::AUTO_RESTART;
                if value & ap_ctrl::START != 0 {
                    s.regs[regs::AP_CTRL / 4] = ap_ctrl::START | keep;
                    s.status = StatusWord {
                        flags: flags::VALID,
                        ..StatusWord::default()
                    };
                    s.raise(irq::READY);
                } else {
                    s.regs[regs::AP_CTRL / 4] = ap_ctrl::IDLE | keep;
                }
            }
            regs::ISR => s.regs[regs::ISR / 4] &= !value,
            regs::IRQ_CLEAR => s.regs[regs::ISR / 4] = 0,
            o if (regs::STATUS_BASE..=regs::STATUS_CTRL).contains(&o) => {
                trace!("SimulatedDevice: ignoring write to read-only {o:#x}");
            }
            o => s.regs[o / 4] = value,
        }

        s.journal.push((offset, value));
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }
}
