//! Engine configuration
//!
//! Defaults reproduce the reference bring-up: 16 KiB input, 4 KiB output and
//! 256 KiB key/value buffers, stride 128, a device token limit of 2048 and a
//! 50-token generation cap polled every 50 ms. Every field can be overridden
//! through `LLMACCEL_*` environment variables via [`EngineConfig::from_env`].

use crate::error::{AccelError, Result};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Model geometry written into `config_in` at configure time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    /// Batch size
    pub batch_size: u32,
    /// Maximum sequence length
    pub sequence_length: u32,
    /// Transformer layers
    pub num_layers: u32,
    /// Hidden dimension
    pub hidden_size: u32,
    /// Attention heads
    pub num_heads: u32,
    /// Vocabulary size; every ordinary token id is below this
    pub vocab_size: u32,
}

impl Default for ModelDims {
    fn default() -> Self {
        Self {
            batch_size: 1,
            sequence_length: 2048,
            num_layers: 22,
            hidden_size: 2048,
            num_heads: 32,
            vocab_size: 32_000,
        }
    }
}

/// Scheduler, session and interrupt-service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Input buffer capacity in tokens; longer prompts are truncated
    pub input_words: usize,
    /// Output buffer capacity in words
    pub output_words: usize,
    /// Key/value cache size in words
    pub kv_cache_words: usize,
    /// Input stride written to `config_in`
    pub stride: u32,
    /// Device-side token limit written to `config_in`
    pub device_max_tokens: u32,
    /// Model geometry
    pub model: ModelDims,
    /// Tokens a session produces before it injects end-of-stream
    pub eos_after: u32,
    /// Emitted-token cap per generation
    pub generation_cap: usize,
    /// Consecutive empty polls before a generation is failed
    pub max_stalled_polls: u32,
    /// Sleep between generation-loop iterations
    pub poll_interval: Duration,
    /// Sleep when both queues are empty
    pub idle_interval: Duration,
    /// Interrupt wait timeout; bounds `EventSource::stop` latency
    pub irq_wait: Duration,
    /// Retries per register transaction on transient failure
    pub register_retries: u32,
    /// Task queue capacity
    pub task_queue_capacity: usize,
    /// Command queue capacity
    pub command_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_words: 4096,
            output_words: 1024,
            kv_cache_words: 65_536,
            stride: 128,
            device_max_tokens: 2048,
            model: ModelDims::default(),
            eos_after: 11,
            generation_cap: 50,
            max_stalled_polls: 200,
            poll_interval: Duration::from_millis(50),
            idle_interval: Duration::from_millis(100),
            irq_wait: Duration::from_millis(1000),
            register_retries: 3,
            task_queue_capacity: 100,
            command_queue_capacity: 10,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LLMACCEL_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed, or the result
    /// fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        override_with(&lookup, "LLMACCEL_INPUT_WORDS", &mut cfg.input_words)?;
        override_with(&lookup, "LLMACCEL_OUTPUT_WORDS", &mut cfg.output_words)?;
        override_with(&lookup, "LLMACCEL_KV_CACHE_WORDS", &mut cfg.kv_cache_words)?;
        override_with(&lookup, "LLMACCEL_STRIDE", &mut cfg.stride)?;
        override_with(&lookup, "LLMACCEL_MAX_TOKENS", &mut cfg.device_max_tokens)?;
        override_with(&lookup, "LLMACCEL_VOCAB_SIZE", &mut cfg.model.vocab_size)?;
        override_with(&lookup, "LLMACCEL_EOS_AFTER", &mut cfg.eos_after)?;
        override_with(&lookup, "LLMACCEL_GENERATION_CAP", &mut cfg.generation_cap)?;
        override_with(&lookup, "LLMACCEL_MAX_STALLED_POLLS", &mut cfg.max_stalled_polls)?;
        override_with(&lookup, "LLMACCEL_REGISTER_RETRIES", &mut cfg.register_retries)?;
        override_with(&lookup, "LLMACCEL_TASK_QUEUE", &mut cfg.task_queue_capacity)?;
        override_with(&lookup, "LLMACCEL_COMMAND_QUEUE", &mut cfg.command_queue_capacity)?;
        override_millis(&lookup, "LLMACCEL_POLL_INTERVAL_MS", &mut cfg.poll_interval)?;
        override_millis(&lookup, "LLMACCEL_IDLE_INTERVAL_MS", &mut cfg.idle_interval)?;
        override_millis(&lookup, "LLMACCEL_IRQ_WAIT_MS", &mut cfg.irq_wait)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the scheduler cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("input_words", self.input_words),
            ("kv_cache_words", self.kv_cache_words),
            ("generation_cap", self.generation_cap),
            ("task_queue_capacity", self.task_queue_capacity),
            ("command_queue_capacity", self.command_queue_capacity),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(AccelError::invalid_config(key, "must be non-zero"));
            }
        }
        if self.irq_wait.is_zero() {
            return Err(AccelError::invalid_config("irq_wait", "must be non-zero"));
        }
        Ok(())
    }

    /// Set the per-generation token cap.
    #[must_use]
    pub fn with_generation_cap(mut self, cap: usize) -> Self {
        self.generation_cap = cap;
        self
    }

    /// Set how many tokens a session produces before end-of-stream.
    #[must_use]
    pub fn with_eos_after(mut self, tokens: u32) -> Self {
        self.eos_after = tokens;
        self
    }

    /// Set the generation-loop and idle sleeps together.
    #[must_use]
    pub fn with_intervals(mut self, poll: Duration, idle: Duration) -> Self {
        self.poll_interval = poll;
        self.idle_interval = idle;
        self
    }

    /// Set the stalled-poll bound.
    #[must_use]
    pub fn with_max_stalled_polls(mut self, polls: u32) -> Self {
        self.max_stalled_polls = polls;
        self
    }

    /// Set the input buffer capacity.
    #[must_use]
    pub fn with_input_words(mut self, words: usize) -> Self {
        self.input_words = words;
        self
    }

    /// Set the interrupt wait timeout.
    #[must_use]
    pub fn with_irq_wait(mut self, wait: Duration) -> Self {
        self.irq_wait = wait;
        self
    }
}

fn override_with<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| AccelError::invalid_config(key, format!("{raw:?}: {e}")))?;
        tracing::debug!("{key} overridden from environment");
    }
    Ok(())
}

fn override_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut Duration,
) -> Result<()> {
    let mut millis = u64::try_from(slot.as_millis()).unwrap_or(u64::MAX);
    override_with(lookup, key, &mut millis)?;
    *slot = Duration::from_millis(millis);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.input_words, 4096);
        assert_eq!(cfg.generation_cap, 50);
        assert!(u64::from(cfg.model.vocab_size) < u64::from(llmaccel_chip::EOS_TOKEN));
    }

    #[test]
    fn overrides_apply() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("LLMACCEL_GENERATION_CAP", "7"),
            ("LLMACCEL_POLL_INTERVAL_MS", " 3 "),
            ("LLMACCEL_STRIDE", "64"),
        ]))
        .unwrap();
        assert_eq!(cfg.generation_cap, 7);
        assert_eq!(cfg.poll_interval, Duration::from_millis(3));
        assert_eq!(cfg.stride, 64);
        assert_eq!(cfg.idle_interval, Duration::from_millis(100));
    }

    #[test]
    fn unparsable_value_names_the_key() {
        let err = EngineConfig::from_lookup(lookup(&[("LLMACCEL_TASK_QUEUE", "lots")]))
            .unwrap_err();
        match err {
            AccelError::InvalidConfig { key, .. } => assert_eq!(key, "LLMACCEL_TASK_QUEUE"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("LLMACCEL_COMMAND_QUEUE", "0")]))
            .unwrap_err();
        assert!(matches!(err, AccelError::InvalidConfig { .. }));
    }
}
