//! Ordered stream of generation output
//!
//! Every task produces `Started`, zero or more `Token`s and exactly one
//! `Finished`. `MemoryCleared` follows any key/value cache reset.

use crate::engine::Command;
use std::sync::mpsc::Sender;

/// Why a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The device produced the end-of-stream token
    EndOfStream,
    /// The emitted-token cap was reached
    MaxTokens,
    /// The device reported done without end-of-stream
    DeviceDone,
    /// A command cancelled the generation
    Aborted(Command),
    /// The status error flag was set
    DeviceError {
        /// Device error code
        code: u32,
    },
    /// Register I/O failed or the device stopped producing tokens
    Failed(String),
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "EOS"),
            Self::MaxTokens => write!(f, "Max tokens reached"),
            Self::DeviceDone => write!(f, "Device done"),
            Self::Aborted(Command::Shutdown) => write!(f, "Aborted: shutdown requested"),
            Self::Aborted(_) => write!(f, "Aborted"),
            Self::DeviceError { code } => write!(f, "Device error {code:#x}"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// One item of the output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Generation for `task_id` began
    Started {
        /// Task id
        task_id: u32,
    },
    /// One generated token
    Token {
        /// Task id
        task_id: u32,
        /// Raw token id
        token: u32,
        /// Detokenized fragment
        text: String,
    },
    /// Generation for `task_id` ended
    Finished {
        /// Task id
        task_id: u32,
        /// Why it ended
        reason: FinishReason,
        /// Tokens emitted
        tokens: usize,
    },
    /// The key/value cache was zeroed
    MemoryCleared,
}

/// Receives output events in production order.
pub trait OutputSink: Send {
    /// Append one event.
    fn emit(&mut self, event: OutputEvent);
}

impl OutputSink for Sender<OutputEvent> {
    fn emit(&mut self, event: OutputEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.send(event);
    }
}

impl OutputSink for Vec<OutputEvent> {
    fn emit(&mut self, event: OutputEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_in_order() {
        let (mut tx, rx) = std::sync::mpsc::channel();
        tx.emit(OutputEvent::Started { task_id: 1 });
        tx.emit(OutputEvent::MemoryCleared);
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![OutputEvent::Started { task_id: 1 }, OutputEvent::MemoryCleared]
        );
    }

    #[test]
    fn channel_sink_tolerates_closed_receiver() {
        let (mut tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        tx.emit(OutputEvent::MemoryCleared);
    }

    #[test]
    fn abort_markers_render() {
        assert_eq!(FinishReason::Aborted(Command::StopCurrent).to_string(), "Aborted");
        assert_eq!(
            FinishReason::Aborted(Command::Shutdown).to_string(),
            "Aborted: shutdown requested"
        );
    }
}
