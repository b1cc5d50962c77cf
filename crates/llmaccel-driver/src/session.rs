//! Device session: one configured accelerator and its buffers
//!
//! Builds every operation from a bounded number of [`RegisterBackend`]
//! transactions:
//!
//! ```text
//! configure         38 writes   full config_in image
//! set_task_config    3 writes   words 14..=16 only
//! start_inference    4 writes   task words + AP_START
//! read_status     1 or 5 reads  STATUS_CTRL, then status_out if valid
//! is_done/is_idle    1 read     AP_CTRL, never cached
//! reset              2 writes   IRQ_CLEAR, AP_CTRL=0 (+ zero KV cache)
//! ```
//!
//! Each transaction is retried up to `register_retries` times on a transient
//! failure; exhaustion surfaces as an error to the caller.

use crate::backend::RegisterBackend;
use crate::config::{EngineConfig, ModelDims};
use crate::error::{AccelError, Result};
use crate::memory::MemoryLayout;
use llmaccel_chip::config::word;
use llmaccel_chip::regs::{self, ap_ctrl, status_ctrl};
use llmaccel_chip::status::flags;
use llmaccel_chip::{ConfigWord, StatusWord, EOS_TOKEN};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// `config_in` task type for free-running generation.
pub const TASK_TYPE_GENERATE: u32 = 0;

/// Token ids produced by a session start above this value.
pub const GENERATED_TOKEN_BASE: u32 = 100;

/// A configured accelerator plus its prompt, output and key/value buffers.
#[derive(Debug)]
pub struct DeviceSession {
    regs: Arc<dyn RegisterBackend>,
    memory: MemoryLayout,
    config: ConfigWord,
    status: StatusWord,
    model: ModelDims,
    eos_after: u32,
    retries: u32,
    configured: bool,
    armed: bool,
    ended_by_eos: bool,
    session_tokens: u32,
}

impl DeviceSession {
    /// Wrap a backend and buffer set. Call [`DeviceSession::configure`] before any task.
    pub fn new(regs: Arc<dyn RegisterBackend>, memory: MemoryLayout, cfg: &EngineConfig) -> Self {
        debug!(
            "Device session on {} backend: input {} words, kv cache {} words",
            regs.backend_type(),
            memory.input.len(),
            memory.kv_cache.len()
        );
        Self {
            regs,
            memory,
            config: ConfigWord::default(),
            status: StatusWord::default(),
            model: cfg.model,
            eos_after: cfg.eos_after,
            retries: cfg.register_retries,
            configured: false,
            armed: false,
            ended_by_eos: false,
            session_tokens: 0,
        }
    }

    fn with_retry<T>(&self, offset: usize, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Register transaction @ {offset:#x} failed ({e}), retry {attempt}/{}",
                        self.retries
                    );
                }
                other => return other,
            }
        }
    }

    fn read_reg(&self, offset: usize) -> Result<u32> {
        self.with_retry(offset, || self.regs.read32(offset))
    }

    fn write_reg(&self, offset: usize, value: u32) -> Result<()> {
        self.with_retry(offset, || self.regs.write32(offset, value))
    }

    /// Build the full `config_in` record and write all 38 words
    ///
    /// Task-scoped fields start at zero; [`DeviceSession::set_task_config`]
    /// fills them per task.
    ///
    /// # Errors
    ///
    /// Returns error if a register write fails after retries. The session is
    /// then unconfigured.
    pub fn configure(
        &mut self,
        input_addr: u64,
        output_addr: u64,
        kv_cache_addr: u64,
        stride: u32,
        max_tokens: u32,
    ) -> Result<()> {
        info!("Configuring accelerator with 1216-bit config_in");

        self.configured = false;
        self.config = ConfigWord {
            input_buffer_addr: input_addr,
            output_buffer_addr: output_addr,
            kv_cache_addr,
            stride,
            max_tokens,
            batch_size: self.model.batch_size,
            sequence_length: self.model.sequence_length,
            num_layers: self.model.num_layers,
            hidden_size: self.model.hidden_size,
            num_heads: self.model.num_heads,
            vocab_size: self.model.vocab_size,
            ..ConfigWord::default()
        };

        for (i, value) in self.config.pack().iter().enumerate() {
            self.write_reg(regs::config_offset(i), *value)?;
        }
        self.configured = true;

        debug!(
            "Configuration complete ({} words): input={input_addr:#x} output={output_addr:#x} kv={kv_cache_addr:#x}",
            regs::CONFIG_WORDS
        );
        Ok(())
    }

    /// Configure from this session's own buffer addresses
    ///
    /// # Errors
    ///
    /// Same as [`DeviceSession::configure`].
    pub fn configure_from_layout(&mut self, stride: u32, max_tokens: u32) -> Result<()> {
        self.configure(
            self.memory.input.phys_addr(),
            self.memory.output.phys_addr(),
            self.memory.kv_cache.phys_addr(),
            stride,
            max_tokens,
        )
    }

    /// Update prompt length, task id and task type, writing only those three words
    ///
    /// Relies on the device retaining addresses and stride from
    /// [`DeviceSession::configure`]; every other word is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidState`] before the first successful
    /// configure, or a register error after retries.
    pub fn set_task_config(&mut self, task_id: u32, prompt_len: u32) -> Result<()> {
        if !self.configured {
            return Err(AccelError::invalid_state(
                "set_task_config before configure",
            ));
        }
        debug!("Setting task config - id: {task_id}, prompt length: {prompt_len}");

        self.config.prompt_length = prompt_len;
        self.config.task_id = task_id;
        self.config.task_type = TASK_TYPE_GENERATE;

        let words = self.config.pack();
        for i in word::TASK_SCOPED {
            self.write_reg(regs::config_offset(i), words[i])?;
        }
        Ok(())
    }

    /// Load a prompt and assert `AP_START`
    ///
    /// Tokens beyond the input buffer's capacity are dropped; the prompt
    /// length written to the device is the number actually transmitted, which
    /// is returned. Arms the session: the per-session token counter restarts
    /// and the done latch clears.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceSession::set_task_config`], plus a failed start write.
    pub fn start_inference(&mut self, task_id: u32, tokens: &[u32]) -> Result<usize> {
        let sent = tokens.len().min(self.memory.input.len());
        if sent < tokens.len() {
            warn!(
                "Prompt for task {task_id} truncated: {} tokens, buffer holds {sent}",
                tokens.len()
            );
        }
        debug!("Starting inference - task {task_id}, {sent} tokens");

        self.set_task_config(task_id, u32::try_from(sent).unwrap_or(u32::MAX))?;
        self.memory.input.fill_from(&tokens[..sent]);

        self.armed = false;
        self.ended_by_eos = false;
        self.session_tokens = 0;
        self.status = StatusWord::default();

        self.write_reg(regs::AP_CTRL, ap_ctrl::START)?;
        self.armed = true;
        Ok(sent)
    }

    /// Refresh the cached status if the device marks it valid
    ///
    /// When `STATUS_CTRL` is not valid the previous status is kept. Otherwise
    /// all four words are read before the cache is replaced, so a failed read
    /// never leaves a partially updated status. After end-of-stream the done
    /// flag and the final token and count stay set until the next start.
    ///
    /// # Errors
    ///
    /// Returns a register error after retries.
    pub fn read_status(&mut self) -> Result<()> {
        let ctrl = self.read_reg(regs::STATUS_CTRL)?;
        if ctrl & status_ctrl::VALID == 0 {
            trace!("status_out not valid, keeping last known status");
            return Ok(());
        }

        let mut words = [0u32; regs::STATUS_WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.read_reg(regs::status_offset(i))?;
        }
        let mut fresh = StatusWord::unpack(&words);
        if self.ended_by_eos {
            fresh.flags |= flags::DONE;
            fresh.current_token = EOS_TOKEN;
            fresh.tokens_generated = self.session_tokens;
        }
        self.status = fresh;
        Ok(())
    }

    /// Poll once and advance the current generation by one token
    ///
    /// Returns `None` when the status is not valid, the session is not armed,
    /// or the device reports done. After `eos_after` tokens the session yields
    /// [`EOS_TOKEN`] once, sets the done flag and disarms; nothing further is
    /// produced until the next [`DeviceSession::start_inference`].
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::HardwareError`] when the status error flag is set
    /// (the session disarms), or a register error after retries.
    pub fn next_token(&mut self) -> Result<Option<u32>> {
        self.read_status()?;

        if !self.armed {
            return Ok(None);
        }
        if self.status.has_error() {
            self.armed = false;
            return Err(AccelError::HardwareError {
                code: self.status.error_code,
            });
        }
        if !self.status.is_valid() {
            return Ok(None);
        }
        if self.status.is_done() {
            debug!("Device reported done after {} tokens", self.session_tokens);
            self.armed = false;
            return Ok(None);
        }

        let token = if self.session_tokens >= self.eos_after {
            self.status.flags |= flags::DONE;
            self.armed = false;
            self.ended_by_eos = true;
            EOS_TOKEN
        } else {
            self.session_tokens += 1;
            self.status.tokens_generated = self.session_tokens;
            GENERATED_TOKEN_BASE
                .saturating_add(self.session_tokens)
                .min(EOS_TOKEN - 1)
        };
        self.status.current_token = token;
        Ok(Some(token))
    }

    /// Whether a generation is armed and not yet done
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// `AP_CTRL` done bit, read fresh
    ///
    /// # Errors
    ///
    /// Returns a register error after retries.
    pub fn is_done(&self) -> Result<bool> {
        Ok(self.read_reg(regs::AP_CTRL)? & ap_ctrl::DONE != 0)
    }

    /// `AP_CTRL` idle bit, read fresh
    ///
    /// # Errors
    ///
    /// Returns a register error after retries.
    pub fn is_idle(&self) -> Result<bool> {
        Ok(self.read_reg(regs::AP_CTRL)? & ap_ctrl::IDLE != 0)
    }

    /// Clear pending interrupts, deassert start and zero the key/value cache
    ///
    /// The cache is zeroed and the session disarmed even if a register write
    /// fails; the write error is still returned.
    ///
    /// # Errors
    ///
    /// Returns a register error after retries.
    pub fn reset(&mut self) -> Result<()> {
        info!("Resetting accelerator");

        let written = self
            .write_reg(regs::IRQ_CLEAR, u32::MAX)
            .and_then(|()| self.write_reg(regs::AP_CTRL, 0));

        self.memory.kv_cache.clear();
        self.armed = false;
        self.ended_by_eos = false;
        self.session_tokens = 0;

        info!("Reset complete, KV cache cleared");
        written
    }

    /// Fresh status read, then the cached record
    ///
    /// # Errors
    ///
    /// Returns a register error after retries.
    pub fn status(&mut self) -> Result<StatusWord> {
        self.read_status()?;
        Ok(self.status)
    }

    /// Last known status without touching the device
    pub const fn cached_status(&self) -> &StatusWord {
        &self.status
    }

    /// Configuration record as last written
    pub const fn config(&self) -> &ConfigWord {
        &self.config
    }

    /// Whether [`DeviceSession::configure`] has completed
    pub const fn is_configured(&self) -> bool {
        self.configured
    }

    /// Buffers
    pub const fn memory(&self) -> &MemoryLayout {
        &self.memory
    }

    /// Mutable buffers
    pub fn memory_mut(&mut self) -> &mut MemoryLayout {
        &mut self.memory
    }

    /// Register backend
    pub fn backend(&self) -> &Arc<dyn RegisterBackend> {
        &self.regs
    }
}
