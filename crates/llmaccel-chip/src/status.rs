//! `status_out` record: 128 bits in four words.

use crate::regs::STATUS_WORDS;

/// Packed `status_out` image.
pub type StatusWords = [u32; STATUS_WORDS];

/// Reserved end-of-stream token id. Never a vocabulary id.
pub const EOS_TOKEN: u32 = u32::MAX;

/// `status_out` flag bits (word 3).
pub mod flags {
    /// Status holds a live generation.
    pub const VALID: u32 = 1 << 0;
    /// Generation finished.
    pub const DONE: u32 = 1 << 1;
    /// Generation failed; see the error code word.
    pub const ERROR: u32 = 1 << 2;
}

/// Device-reported generation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusWord {
    /// Most recent token id.
    pub current_token: u32,
    /// Tokens generated so far in this generation.
    pub tokens_generated: u32,
    /// Device error code, meaningful when the error flag is set.
    pub error_code: u32,
    /// Flag bits, see [`flags`].
    pub flags: u32,
}

impl StatusWord {
    /// Serialize into the `status_out` word image.
    pub const fn pack(&self) -> StatusWords {
        [
            self.current_token,
            self.tokens_generated,
            self.error_code,
            self.flags,
        ]
    }

    /// Decode a `status_out` word image.
    pub const fn unpack(words: &StatusWords) -> Self {
        Self {
            current_token: words[0],
            tokens_generated: words[1],
            error_code: words[2],
            flags: words[3],
        }
    }

    /// Valid bit.
    pub const fn is_valid(&self) -> bool {
        self.flags & flags::VALID != 0
    }

    /// Done bit.
    pub const fn is_done(&self) -> bool {
        self.flags & flags::DONE != 0
    }

    /// Error bit.
    pub const fn has_error(&self) -> bool {
        self.flags & flags::ERROR != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn flag_accessors() {
        let s = StatusWord {
            flags: flags::VALID | flags::ERROR,
            ..Default::default()
        };
        assert!(s.is_valid());
        assert!(!s.is_done());
        assert!(s.has_error());
    }

    #[test]
    fn field_order_matches_wire() {
        let s = StatusWord::unpack(&[11, 22, 33, flags::DONE]);
        assert_eq!(s.current_token, 11);
        assert_eq!(s.tokens_generated, 22);
        assert_eq!(s.error_code, 33);
        assert!(s.is_done());
    }

    proptest! {
        #[test]
        fn prop_status_round_trip(words in any::<[u32; 4]>()) {
            prop_assert_eq!(StatusWord::unpack(&words).pack(), words);
        }
    }
}
