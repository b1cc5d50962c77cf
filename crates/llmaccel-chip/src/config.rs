//! `config_in` record: 1216 bits carried in 38 consecutive 32-bit words.
//!
//! Serialization is explicit and field-by-field, so the wire layout does not
//! depend on host padding, alignment or endianness.
//!
//! ```text
//! word  0-1   input buffer address   (low word first)
//! word  2-3   output buffer address
//! word  4-5   key/value cache address
//! word  6     stride
//! word  7     max tokens
//! word  8     batch size
//! word  9     sequence length
//! word 10     num layers
//! word 11     hidden size
//! word 12     num heads
//! word 13     vocab size
//! word 14     prompt length          ┐
//! word 15     task id                ├ task-scoped
//! word 16     task type              ┘
//! word 17     flags
//! word 18-37  reserved
//! ```

use crate::regs::CONFIG_WORDS;

/// Packed `config_in` image.
pub type ConfigWords = [u32; CONFIG_WORDS];

/// Word index of every field.
pub mod word {
    /// Input buffer address, two words.
    pub const INPUT_ADDR: usize = 0;
    /// Output buffer address, two words.
    pub const OUTPUT_ADDR: usize = 2;
    /// Key/value cache address, two words.
    pub const KV_CACHE_ADDR: usize = 4;
    /// Input stride.
    pub const STRIDE: usize = 6;
    /// Device-side token limit.
    pub const MAX_TOKENS: usize = 7;
    /// Batch size.
    pub const BATCH_SIZE: usize = 8;
    /// Sequence length.
    pub const SEQUENCE_LENGTH: usize = 9;
    /// Transformer layers.
    pub const NUM_LAYERS: usize = 10;
    /// Hidden dimension.
    pub const HIDDEN_SIZE: usize = 11;
    /// Attention heads.
    pub const NUM_HEADS: usize = 12;
    /// Vocabulary size.
    pub const VOCAB_SIZE: usize = 13;
    /// Prompt length in tokens.
    pub const PROMPT_LENGTH: usize = 14;
    /// Task id.
    pub const TASK_ID: usize = 15;
    /// Task type.
    pub const TASK_TYPE: usize = 16;
    /// Feature flags.
    pub const FLAGS: usize = 17;
    /// First reserved word.
    pub const RESERVED: usize = 18;
    /// Number of reserved words.
    pub const RESERVED_WORDS: usize = super::CONFIG_WORDS - RESERVED;

    /// Words rewritten by a per-task update, in write order.
    pub const TASK_SCOPED: [usize; 3] = [PROMPT_LENGTH, TASK_ID, TASK_TYPE];
}

/// Full device configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigWord {
    /// DMA address of the prompt buffer.
    pub input_buffer_addr: u64,
    /// DMA address of the output buffer.
    pub output_buffer_addr: u64,
    /// DMA address of the key/value cache.
    pub kv_cache_addr: u64,
    /// Input stride.
    pub stride: u32,
    /// Device-side token limit.
    pub max_tokens: u32,
    /// Batch size.
    pub batch_size: u32,
    /// Sequence length.
    pub sequence_length: u32,
    /// Transformer layers.
    pub num_layers: u32,
    /// Hidden dimension.
    pub hidden_size: u32,
    /// Attention heads.
    pub num_heads: u32,
    /// Vocabulary size.
    pub vocab_size: u32,
    /// Prompt length in tokens.
    pub prompt_length: u32,
    /// Task id.
    pub task_id: u32,
    /// Task type.
    pub task_type: u32,
    /// Feature flags.
    pub flags: u32,
    /// Reserved padding, carried verbatim.
    pub reserved: [u32; word::RESERVED_WORDS],
}

impl ConfigWord {
    /// Serialize into the `config_in` word image.
    pub fn pack(&self) -> ConfigWords {
        let mut words = [0u32; CONFIG_WORDS];
        set_addr(&mut words, word::INPUT_ADDR, self.input_buffer_addr);
        set_addr(&mut words, word::OUTPUT_ADDR, self.output_buffer_addr);
        set_addr(&mut words, word::KV_CACHE_ADDR, self.kv_cache_addr);
        words[word::STRIDE] = self.stride;
        words[word::MAX_TOKENS] = self.max_tokens;
        words[word::BATCH_SIZE] = self.batch_size;
        words[word::SEQUENCE_LENGTH] = self.sequence_length;
        words[word::NUM_LAYERS] = self.num_layers;
        words[word::HIDDEN_SIZE] = self.hidden_size;
        words[word::NUM_HEADS] = self.num_heads;
        words[word::VOCAB_SIZE] = self.vocab_size;
        words[word::PROMPT_LENGTH] = self.prompt_length;
        words[word::TASK_ID] = self.task_id;
        words[word::TASK_TYPE] = self.task_type;
        words[word::FLAGS] = self.flags;
        words[word::RESERVED..].copy_from_slice(&self.reserved);
        words
    }

    /// Decode a `config_in` word image.
    pub fn unpack(words: &ConfigWords) -> Self {
        let mut reserved = [0u32; word::RESERVED_WORDS];
        reserved.copy_from_slice(&words[word::RESERVED..]);
        Self {
            input_buffer_addr: get_addr(words, word::INPUT_ADDR),
            output_buffer_addr: get_addr(words, word::OUTPUT_ADDR),
            kv_cache_addr: get_addr(words, word::KV_CACHE_ADDR),
            stride: words[word::STRIDE],
            max_tokens: words[word::MAX_TOKENS],
            batch_size: words[word::BATCH_SIZE],
            sequence_length: words[word::SEQUENCE_LENGTH],
            num_layers: words[word::NUM_LAYERS],
            hidden_size: words[word::HIDDEN_SIZE],
            num_heads: words[word::NUM_HEADS],
            vocab_size: words[word::VOCAB_SIZE],
            prompt_length: words[word::PROMPT_LENGTH],
            task_id: words[word::TASK_ID],
            task_type: words[word::TASK_TYPE],
            flags: words[word::FLAGS],
            reserved,
        }
    }
}

/// Store a 64-bit address into two consecutive words, low word first.
#[allow(clippy::cast_possible_truncation)]
pub fn set_addr(words: &mut ConfigWords, start: usize, addr: u64) {
    words[start] = addr as u32;
    words[start + 1] = (addr >> 32) as u32;
}

/// Read a 64-bit address from two consecutive words, low word first.
pub fn get_addr(words: &ConfigWords, start: usize) -> u64 {
    (u64::from(words[start + 1]) << 32) | u64::from(words[start])
}
