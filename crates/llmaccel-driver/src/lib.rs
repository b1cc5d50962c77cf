//! Control and scheduling for an LLM inference accelerator.
//!
//! Drives an HLS kernel that generates one token per step behind a 32-bit
//! AXI-Lite control block: prompts go in through a DMA buffer and a 1216-bit
//! configuration record, tokens come back through a 128-bit status record,
//! and completion is signalled by `AP_CTRL` and a UIO interrupt.
//!
//! # Layers
//!
//! ```text
//! Submitter ──▶ QueueHandle<Task> ─┐
//!          └──▶ QueueHandle<Command> ─▶ Engine ──▶ DeviceSession ──▶ RegisterBackend
//!                                                                    ├ MmioBackend (UIO)
//! EventSource (llmaccel-irq thread) ── ISR only ─────────────────────┘ SimulatedDevice
//! ```
//!
//! The scheduler owns the configuration and control registers; the interrupt
//! thread only reads and acknowledges `ISR`.
//!
//! # Quick start
//!
//! ```no_run
//! use llmaccel_driver::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env()?;
//! let regs = select_backend(BackendSelection::Auto, "/dev/uio0".as_ref())?;
//! let session = DeviceSession::new(regs, MemoryLayout::simulated(&config), &config);
//!
//! let (submitter, tasks, commands) = queues(&config);
//! let (tx, rx) = std::sync::mpsc::channel();
//! let engine = Engine::new(session, tasks, commands, Box::new(ByteTokenizer), Box::new(tx), config)?;
//! let handle = engine.spawn()?;
//!
//! submitter.submit("Hello")?;
//! submitter.send(Command::Shutdown)?;
//! for event in rx {
//!     println!("{event:?}");
//! }
//! handle.join()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod config;
pub mod engine;
mod error;
pub mod irq;
pub mod memory;
pub mod queue;
pub mod session;
pub mod sink;
pub mod tokenizer;

pub use backend::{select_backend, BackendSelection, BackendType, RegisterBackend};
pub use config::{EngineConfig, ModelDims};
pub use engine::{
    queues, Command, Engine, EngineHandle, EngineMonitor, EngineState, EngineStatus, Prompt,
    Submitter, Task, TaskKind,
};
pub use error::{AccelError, Result};
pub use irq::{EventSource, EventSourceState, InterruptStats, IrqSource, SimulatedIrq, UioIrq};
pub use memory::{DmaRegion, MemoryLayout};
pub use queue::{BoundedQueue, QueueHandle};
pub use session::DeviceSession;
pub use sink::{FinishReason, OutputEvent, OutputSink};
pub use tokenizer::{ByteTokenizer, Tokenizer};

/// Register-level definitions (re-exported from llmaccel-chip).
pub use llmaccel_chip as chip;

/// Everything an embedding application usually needs.
pub mod prelude {
    pub use crate::backends::{MmioBackend, SimulatedDevice};
    pub use crate::{
        queues, select_backend, AccelError, BackendSelection, ByteTokenizer, Command,
        DeviceSession, Engine, EngineConfig, EngineStatus, EventSource, FinishReason,
        MemoryLayout, OutputEvent, OutputSink, Submitter, Tokenizer,
    };
    pub use llmaccel_chip::{InterruptEvent, EOS_TOKEN};
}
