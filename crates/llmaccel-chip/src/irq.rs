//! Interrupt sources reported in `ISR` / enabled in `IER`.

/// ap_done.
pub const DONE: u32 = 1 << 0;
/// ap_ready.
pub const READY: u32 = 1 << 1;
/// A token is available in `status_out`.
pub const TOKEN_READY: u32 = 1 << 2;
/// The kernel raised an error.
pub const ERROR: u32 = 1 << 3;
/// Every source this driver understands.
pub const ALL: u32 = DONE | READY | TOKEN_READY | ERROR;

/// One interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptEvent {
    /// ap_done
    Done,
    /// ap_ready
    Ready,
    /// token available
    TokenReady,
    /// kernel error
    Error,
}

impl InterruptEvent {
    /// All kinds in ISR bit order.
    pub const ALL: [Self; 4] = [Self::Done, Self::Ready, Self::TokenReady, Self::Error];

    /// ISR / IER bit for this source.
    pub const fn mask(self) -> u32 {
        match self {
            Self::Done => DONE,
            Self::Ready => READY,
            Self::TokenReady => TOKEN_READY,
            Self::Error => ERROR,
        }
    }

    /// Index into per-kind tables.
    pub const fn index(self) -> usize {
        match self {
            Self::Done => 0,
            Self::Ready => 1,
            Self::TokenReady => 2,
            Self::Error => 3,
        }
    }

    /// Sources set in an `ISR` value, in bit order.
    pub fn decode(isr: u32) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |e| isr & e.mask() != 0)
    }
}

impl std::fmt::Display for InterruptEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "AP_DONE"),
            Self::Ready => write!(f, "AP_READY"),
            Self::TokenReady => write!(f, "TOKEN_READY"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ignores_unknown_bits() {
        let events: Vec<_> = InterruptEvent::decode(0xF0 | DONE | ERROR).collect();
        assert_eq!(events, vec![InterruptEvent::Done, InterruptEvent::Error]);
    }

    #[test]
    fn masks_and_indices_line_up() {
        for (i, e) in InterruptEvent::ALL.iter().enumerate() {
            assert_eq!(e.index(), i);
            assert_eq!(e.mask(), 1 << i);
        }
        assert_eq!(ALL, 0xF);
    }
}
