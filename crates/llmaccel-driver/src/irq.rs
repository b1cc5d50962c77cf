//! Interrupt service
//!
//! An [`EventSource`] owns a background thread that waits on an
//! [`IrqSource`], reads `ISR` once per wake, dispatches one callback per set
//! bit and acknowledges exactly those bits (write-1-to-clear).
//!
//! ```text
//! Uninitialized ──init──▶ Enabled ──start──▶ Running ──stop──▶ Stopped
//!                                    ▲                            │
//!                                    └────────────start───────────┘
//! ```
//!
//! The wait is bounded by `irq_wait` so that [`EventSource::stop`] is observed
//! promptly when no interrupts arrive. The service thread only reads and
//! clears `ISR`; everything else belongs to the scheduler.

use crate::backend::RegisterBackend;
use crate::error::{AccelError, Result};
use llmaccel_chip::regs::{self, gie};
use llmaccel_chip::{irq, InterruptEvent};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::io::{read, write, Errno};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Callback invoked on the service thread for one interrupt kind.
pub type IrqCallback = Arc<dyn Fn(InterruptEvent) + Send + Sync>;

/// Blocking, cancellable wait for the interrupt line.
pub trait IrqSource: Send {
    /// Wait up to `timeout` for the line to fire
    ///
    /// Returns `true` if an interrupt arrived, `false` on timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the descriptor fails; the service loop logs it and
    /// keeps waiting.
    fn wait(&mut self, timeout: Duration) -> Result<bool>;
}

/// UIO interrupt descriptor (`/dev/uioN`)
///
/// A read returns the 4-byte interrupt count; writing `1` re-enables the
/// interrupt in the UIO driver.
#[derive(Debug)]
pub struct UioIrq {
    file: File,
}

impl UioIrq {
    /// Open a UIO node and arm it
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::IrqUnavailable`] if the node cannot be opened or armed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| AccelError::irq_unavailable(format!("{}: {e}", path.display())))?;

        let irq = Self { file };
        irq.rearm()
            .map_err(|e| AccelError::irq_unavailable(format!("{}: {e}", path.display())))?;
        info!("Opened interrupt descriptor {}", path.display());
        Ok(irq)
    }

    fn rearm(&self) -> Result<()> {
        write(&self.file, &1u32.to_ne_bytes())
            .map_err(|e| AccelError::transfer_failed(format!("IRQ re-arm failed: {e}")))?;
        Ok(())
    }
}

impl IrqSource for UioIrq {
    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut fds = [PollFd::new(&self.file, PollFlags::IN)];

        match poll(&mut fds, timeout_ms) {
            Ok(0) | Err(Errno::INTR) => return Ok(false),
            Ok(_) => {}
            Err(e) => return Err(AccelError::transfer_failed(format!("IRQ poll failed: {e}"))),
        }
        if !fds[0].revents().contains(PollFlags::IN) {
            return Ok(false);
        }

        let mut count = [0u8; 4];
        read(&self.file, &mut count)
            .map_err(|e| AccelError::transfer_failed(format!("IRQ read failed: {e}")))?;
        trace!("UIO interrupt count {}", u32::from_ne_bytes(count));

        self.rearm()?;
        Ok(true)
    }
}

/// In-process interrupt line for the simulated device.
#[derive(Debug)]
pub struct SimulatedIrq {
    rx: Receiver<()>,
}

/// Firing end of a [`SimulatedIrq`].
#[derive(Debug, Clone)]
pub struct IrqTrigger {
    tx: Sender<()>,
}

impl SimulatedIrq {
    /// Create a connected line and trigger.
    pub fn new() -> (Self, IrqTrigger) {
        let (tx, rx) = mpsc::channel();
        (Self { rx }, IrqTrigger { tx })
    }
}

impl IrqTrigger {
    /// Pulse the line. A line nobody waits on is ignored.
    pub fn fire(&self) {
        let _ = self.tx.send(());
    }
}

impl IrqSource for SimulatedIrq {
    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => {
                // Coalesce pulses that arrived together; ISR carries the detail.
                while self.rx.try_recv().is_ok() {}
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                Ok(false)
            }
        }
    }
}

/// Counters shared with the service thread.
#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    per_kind: [AtomicU64; 4],
    spurious: AtomicU64,
}

/// Point-in-time copy of the interrupt counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptStats {
    /// Wakes with at least one pending bit; one wake may carry several kinds
    pub total: u64,
    /// `AP_DONE`
    pub done: u64,
    /// `AP_READY`
    pub ready: u64,
    /// Token available
    pub token_ready: u64,
    /// Kernel error
    pub error: u64,
    /// Wakes with nothing pending in `ISR`
    pub spurious: u64,
}

impl InterruptStats {
    /// Count for one kind.
    pub const fn count(&self, event: InterruptEvent) -> u64 {
        match event {
            InterruptEvent::Done => self.done,
            InterruptEvent::Ready => self.ready,
            InterruptEvent::TokenReady => self.token_ready,
            InterruptEvent::Error => self.error,
        }
    }
}

impl fmt::Display for InterruptStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Interrupt statistics:")?;
        writeln!(f, "  Total:        {}", self.total)?;
        writeln!(f, "  AP_DONE:      {}", self.done)?;
        writeln!(f, "  AP_READY:     {}", self.ready)?;
        writeln!(f, "  TOKEN_READY:  {}", self.token_ready)?;
        writeln!(f, "  ERROR:        {}", self.error)?;
        write!(f, "  Spurious:     {}", self.spurious)
    }
}

/// Lifecycle of an [`EventSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSourceState {
    /// No descriptor yet
    Uninitialized,
    /// Descriptor open, interrupts enabled, no thread
    Enabled,
    /// Service thread running
    Running,
    /// Service thread joined, interrupts disabled
    Stopped,
}

struct Shared {
    regs: Arc<dyn RegisterBackend>,
    shutdown: AtomicBool,
    callbacks: Mutex<[Option<IrqCallback>; 4]>,
    counters: Counters,
}

impl Shared {
    fn callback(&self, event: InterruptEvent) -> Option<IrqCallback> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)[event.index()].clone()
    }

    /// Handle one wake: read `ISR` once, dispatch, acknowledge.
    fn service(&self) -> Result<()> {
        let isr = self.regs.read32(regs::ISR)?;
        let handled = isr & irq::ALL;
        if handled == 0 {
            self.counters.spurious.fetch_add(1, Ordering::Relaxed);
            trace!("Spurious wake, ISR = {isr:#x}");
            return Ok(());
        }

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        for event in InterruptEvent::decode(handled) {
            self.counters.per_kind[event.index()].fetch_add(1, Ordering::Relaxed);
            debug!("Interrupt: {event}");
            if let Some(cb) = self.callback(event) {
                cb(event);
            }
        }

        self.regs.write32(regs::ISR, handled)
    }

    fn run(&self, mut source: Box<dyn IrqSource>, wait: Duration) -> Box<dyn IrqSource> {
        debug!("Interrupt service loop started");
        while !self.shutdown.load(Ordering::Acquire) {
            match source.wait(wait) {
                Ok(true) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = self.service() {
                        error!("Interrupt service failed: {e}");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Interrupt wait failed: {e}");
                    std::thread::sleep(wait);
                }
            }
        }
        debug!("Interrupt service loop exited");
        source
    }
}

/// Interrupt notifier with per-kind callbacks and counters.
pub struct EventSource {
    shared: Arc<Shared>,
    wait: Duration,
    state: EventSourceState,
    source: Option<Box<dyn IrqSource>>,
    worker: Option<JoinHandle<Box<dyn IrqSource>>>,
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("state", &self.state)
            .field("wait", &self.wait)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventSource {
    /// Create an uninitialized source over `regs`, waking at least every `wait`.
    pub fn new(regs: Arc<dyn RegisterBackend>, wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                regs,
                shutdown: AtomicBool::new(false),
                callbacks: Mutex::new([None, None, None, None]),
                counters: Counters::default(),
            }),
            wait,
            state: EventSourceState::Uninitialized,
            source: None,
            worker: None,
        }
    }

    /// Take ownership of an interrupt descriptor and enable `GIE` and every source in `IER`
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidState`] once running, or a register error.
    pub fn init(&mut self, source: Box<dyn IrqSource>) -> Result<()> {
        if self.state == EventSourceState::Running {
            return Err(AccelError::invalid_state("event source already running"));
        }
        self.shared.regs.write32(regs::GIE, gie::ENABLE)?;
        self.shared.regs.write32(regs::IER, irq::ALL)?;
        self.source = Some(source);
        self.state = EventSourceState::Enabled;
        info!("Interrupts enabled (GIE=1, IER={:#x})", irq::ALL);
        Ok(())
    }

    /// [`EventSource::init`] with a UIO node
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::IrqUnavailable`] if the node cannot be opened; the
    /// source stays uninitialized and the caller falls back to polling.
    pub fn init_uio(&mut self, path: &Path) -> Result<()> {
        let irq = UioIrq::open(path)?;
        self.init(Box::new(irq))
    }

    /// Spawn the service thread. A no-op when already running.
    ///
    /// After [`EventSource::stop`] the same descriptor is reused and
    /// interrupts are enabled again.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidState`] before [`EventSource::init`], or
    /// [`AccelError::Io`] if the thread cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.state == EventSourceState::Running {
            return Ok(());
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| AccelError::invalid_state("event source not initialized"))?;

        if self.state == EventSourceState::Stopped {
            let enabled = self
                .shared
                .regs
                .write32(regs::GIE, gie::ENABLE)
                .and_then(|()| self.shared.regs.write32(regs::IER, irq::ALL));
            if let Err(e) = enabled {
                self.source = Some(source);
                return Err(e);
            }
        }

        self.shared.shutdown.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let wait = self.wait;
        let handle = std::thread::Builder::new()
            .name("llmaccel-irq".into())
            .spawn(move || shared.run(source, wait))?;

        self.worker = Some(handle);
        self.state = EventSourceState::Running;
        info!("Interrupt handler started");
        Ok(())
    }

    /// Stop the service thread and disable interrupts
    ///
    /// Blocks until the thread has exited; no callback runs after this
    /// returns. Safe to call in any state.
    pub fn stop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.shutdown.store(true, Ordering::Release);
            match handle.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => error!("Interrupt service thread panicked"),
            }
        }
        if matches!(
            self.state,
            EventSourceState::Enabled | EventSourceState::Running
        ) {
            for offset in [regs::GIE, regs::IER] {
                if let Err(e) = self.shared.regs.write32(offset, 0) {
                    warn!("Failed to disable interrupts @ {offset:#x}: {e}");
                }
            }
            self.state = EventSourceState::Stopped;
            info!("Interrupt handler stopped");
        }
    }

    /// Register `callback` for `event`, replacing any earlier one.
    pub fn on<F>(&self, event: InterruptEvent, callback: F)
    where
        F: Fn(InterruptEvent) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[event.index()] = Some(Arc::new(callback));
    }

    /// Remove the callback for `event`.
    pub fn clear_callback(&self, event: InterruptEvent) {
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[event.index()] = None;
    }

    /// Set `mask` bits in `IER`
    ///
    /// # Errors
    ///
    /// Returns a register error.
    pub fn enable_interrupt(&self, mask: u32) -> Result<()> {
        let ier = self.shared.regs.read32(regs::IER)?;
        self.shared.regs.write32(regs::IER, ier | mask)?;
        debug!("Enabled interrupt mask {mask:#x}");
        Ok(())
    }

    /// Clear `mask` bits in `IER`
    ///
    /// # Errors
    ///
    /// Returns a register error.
    pub fn disable_interrupt(&self, mask: u32) -> Result<()> {
        let ier = self.shared.regs.read32(regs::IER)?;
        self.shared.regs.write32(regs::IER, ier & !mask)?;
        debug!("Disabled interrupt mask {mask:#x}");
        Ok(())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> InterruptStats {
        let c = &self.shared.counters;
        let kind = |e: InterruptEvent| c.per_kind[e.index()].load(Ordering::Relaxed);
        InterruptStats {
            total: c.total.load(Ordering::Relaxed),
            done: kind(InterruptEvent::Done),
            ready: kind(InterruptEvent::Ready),
            token_ready: kind(InterruptEvent::TokenReady),
            error: kind(InterruptEvent::Error),
            spurious: c.spurious.load(Ordering::Relaxed),
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> EventSourceState {
        self.state
    }

    /// Whether the service thread is running.
    pub fn is_running(&self) -> bool {
        self.state == EventSourceState::Running
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.stop();
    }
}
