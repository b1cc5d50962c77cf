//! Scheduler: turns queued tasks and commands into device sessions
//!
//! ```text
//!            Shutdown
//!   Idle ─────────────────────────────────▶ ShuttingDown
//!    │ ▲                                        ▲
//!    │ │ EOS / cap / done / error               │ Shutdown
//!    │ │ StopCurrent / Reset (+ clear cache)    │
//!    ▼ │                                        │
//!  Generating ──────────────────────────────────┘
//! ```
//!
//! Each idle iteration handles at most one item, commands first. During a
//! generation the command queue is polled once per token, so cancellation
//! latency is one `poll_interval`. Every generation is bounded by the token
//! cap and the stalled-poll limit, whatever the device does.

use crate::config::EngineConfig;
use crate::error::{AccelError, Result};
use crate::queue::QueueHandle;
use crate::session::DeviceSession;
use crate::sink::{FinishReason, OutputEvent, OutputSink};
use crate::tokenizer::Tokenizer;
use llmaccel_chip::EOS_TOKEN;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a task asks the device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskKind {
    /// Free-running token generation
    #[default]
    Generate,
}

/// Prompt as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Raw text, tokenized by the engine
    Text(String),
    /// Pre-tokenized ids
    Tokens(Vec<u32>),
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u32>> for Prompt {
    fn from(tokens: Vec<u32>) -> Self {
        Self::Tokens(tokens)
    }
}

/// One unit of work, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Submitter-assigned id, increasing
    pub id: u32,
    /// Kind tag
    pub kind: TaskKind,
    /// Prompt
    pub prompt: Prompt,
}

/// Out-of-band control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Cancel the running generation
    StopCurrent,
    /// Cancel the running generation and clear the key/value cache
    Reset,
    /// Cancel, clear and terminate the scheduler
    Shutdown,
}

/// Scheduler status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    /// Waiting for work
    #[default]
    Idle,
    /// Running a generation
    Generating,
    /// Terminal
    ShuttingDown,
}

/// Scheduler-owned state, observable through [`EngineMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineState {
    /// Current status
    pub status: EngineStatus,
    /// Task being generated
    pub current_task: Option<u32>,
    /// A command cancelled the current generation
    pub cancel_current: bool,
    /// Clear the cache once the current generation unwinds
    pub reset_requested: bool,
}

/// Read-only view of a running engine's state.
#[derive(Debug, Clone)]
pub struct EngineMonitor {
    state: Arc<Mutex<EngineState>>,
}

impl EngineMonitor {
    /// Copy of the current state.
    pub fn snapshot(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status.
    pub fn status(&self) -> EngineStatus {
        self.snapshot().status
    }
}

/// Producer side of the task and command queues
///
/// Clones share the id counter and queues; the queue lock serializes
/// concurrent producers.
#[derive(Debug, Clone)]
pub struct Submitter {
    tasks: QueueHandle<Task>,
    commands: QueueHandle<Command>,
    next_id: Arc<AtomicU32>,
}

impl Submitter {
    /// Producer over existing queues; ids start at 1.
    pub fn new(tasks: QueueHandle<Task>, commands: QueueHandle<Command>) -> Self {
        Self {
            tasks,
            commands,
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Enqueue a generation and return its id
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::QueueFull`] and drops the request when the task
    /// queue is full.
    pub fn submit(&self, prompt: impl Into<Prompt>) -> Result<u32> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Task {
            id,
            kind: TaskKind::Generate,
            prompt: prompt.into(),
        };
        self.tasks.push(task).map_err(|_| {
            warn!("Task queue full, dropping task {id}");
            AccelError::QueueFull {
                capacity: self.tasks.capacity(),
            }
        })?;
        debug!("Submitted task {id}");
        Ok(id)
    }

    /// Enqueue a command
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::QueueFull`] when the command queue is full.
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands.push(command).map_err(|_| {
            warn!("Command queue full, dropping {command:?}");
            AccelError::QueueFull {
                capacity: self.commands.capacity(),
            }
        })
    }
}

/// Create both queues sized from `config`, returning the producer and consumer ends.
pub fn queues(config: &EngineConfig) -> (Submitter, QueueHandle<Task>, QueueHandle<Command>) {
    let tasks = QueueHandle::new(config.task_queue_capacity);
    let commands = QueueHandle::new(config.command_queue_capacity);
    (
        Submitter::new(tasks.clone(), commands.clone()),
        tasks,
        commands,
    )
}

/// Single-session scheduler.
pub struct Engine {
    session: DeviceSession,
    tasks: QueueHandle<Task>,
    commands: QueueHandle<Command>,
    tokenizer: Box<dyn Tokenizer>,
    sink: Box<dyn OutputSink>,
    config: EngineConfig,
    state: Arc<Mutex<EngineState>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session", &self.session)
            .field("state", &self.state())
            .field("pending_tasks", &self.tasks.len())
            .field("pending_commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build a scheduler, configuring the session from its buffer layout if needed
    ///
    /// # Errors
    ///
    /// Returns error if `config` is invalid or the configure writes fail.
    pub fn new(
        mut session: DeviceSession,
        tasks: QueueHandle<Task>,
        commands: QueueHandle<Command>,
        tokenizer: Box<dyn Tokenizer>,
        sink: Box<dyn OutputSink>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !session.is_configured() {
            session.configure_from_layout(config.stride, config.device_max_tokens)?;
        }
        info!(
            "Engine ready on {} backend (cap {} tokens)",
            session.backend().backend_type(),
            config.generation_cap
        );
        Ok(Self {
            session,
            tasks,
            commands,
            tokenizer,
            sink,
            config,
            state: Arc::new(Mutex::new(EngineState::default())),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state.
    pub fn state(&self) -> EngineState {
        *self.lock_state()
    }

    /// Handle for observing state from other threads.
    pub fn monitor(&self) -> EngineMonitor {
        EngineMonitor {
            state: Arc::clone(&self.state),
        }
    }

    /// The device session.
    pub const fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Mutable device session.
    pub fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    /// One idle iteration
    ///
    /// Handles at most one item, a command before a task, and sleeps for
    /// `idle_interval` when both queues are empty. Returns `false` once the
    /// engine is shutting down.
    pub fn tick(&mut self) -> bool {
        if self.state().status == EngineStatus::ShuttingDown {
            return false;
        }

        if let Some(command) = self.commands.pop() {
            self.handle_idle_command(command);
        } else if let Some(task) = self.tasks.pop() {
            self.run_task(task);
        } else {
            sleep(self.config.idle_interval);
        }

        self.state().status != EngineStatus::ShuttingDown
    }

    /// Loop until shutdown, then reset the device once
    ///
    /// # Errors
    ///
    /// Returns error if the final reset fails; the cache is cleared anyway.
    pub fn run(&mut self) -> Result<()> {
        info!("Engine loop started");
        while self.tick() {}

        info!("Engine shutting down");
        let reset = self.session.reset();
        self.sink.emit(OutputEvent::MemoryCleared);
        reset
    }

    /// Run the engine on its own thread
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::Io`] if the thread cannot be spawned.
    pub fn spawn(self) -> Result<EngineHandle> {
        let monitor = self.monitor();
        let handle = std::thread::Builder::new()
            .name("llmaccel-engine".into())
            .spawn(move || {
                let mut engine = self;
                if let Err(e) = engine.run() {
                    error!("Final reset failed: {e}");
                }
                engine
            })?;
        Ok(EngineHandle { handle, monitor })
    }

    fn handle_idle_command(&mut self, command: Command) {
        match command {
            Command::Shutdown => {
                info!("Shutdown requested");
                self.lock_state().status = EngineStatus::ShuttingDown;
            }
            Command::Reset => self.clear_memory(),
            Command::StopCurrent => debug!("StopCurrent while idle, nothing to stop"),
        }
    }

    fn clear_memory(&mut self) {
        if let Err(e) = self.session.reset() {
            error!("Reset failed: {e}");
        }
        self.sink.emit(OutputEvent::MemoryCleared);
    }

    fn run_task(&mut self, task: Task) {
        {
            let mut state = self.lock_state();
            state.status = EngineStatus::Generating;
            state.current_task = Some(task.id);
            state.cancel_current = false;
            state.reset_requested = false;
        }
        self.sink.emit(OutputEvent::Started { task_id: task.id });

        let tokens = match task.prompt {
            Prompt::Text(text) => self.tokenizer.encode(&text),
            Prompt::Tokens(tokens) => tokens,
        };
        debug!("Task {} ({:?}): {} prompt tokens", task.id, task.kind, tokens.len());

        let (reason, emitted) = self.generate(task.id, &tokens);
        info!("Task {} finished: {reason} ({emitted} tokens)", task.id);
        self.sink.emit(OutputEvent::Finished {
            task_id: task.id,
            reason,
            tokens: emitted,
        });

        if self.state().reset_requested {
            self.clear_memory();
        }

        let mut state = self.lock_state();
        state.current_task = None;
        state.cancel_current = false;
        state.reset_requested = false;
        if state.status == EngineStatus::Generating {
            state.status = EngineStatus::Idle;
        }
    }

    /// Apply a command observed mid-generation. Every command cancels.
    fn handle_generating_command(&self, command: Command) {
        let mut state = self.lock_state();
        state.cancel_current = true;
        match command {
            Command::StopCurrent => info!("Stopping current generation"),
            Command::Reset => {
                info!("Reset requested during generation");
                state.reset_requested = true;
            }
            Command::Shutdown => {
                info!("Shutdown requested during generation");
                state.status = EngineStatus::ShuttingDown;
            }
        }
    }

    fn generate(&mut self, task_id: u32, prompt: &[u32]) -> (FinishReason, usize) {
        if let Err(e) = self.session.start_inference(task_id, prompt) {
            error!("Task {task_id}: start failed: {e}");
            return (FinishReason::Failed(e.to_string()), 0);
        }

        let mut emitted = 0;
        let mut stalled = 0u32;
        loop {
            if let Some(command) = self.commands.pop() {
                self.handle_generating_command(command);
                if self.state().cancel_current {
                    return (FinishReason::Aborted(command), emitted);
                }
            }

            match self.session.next_token() {
                Ok(Some(EOS_TOKEN)) => return (FinishReason::EndOfStream, emitted),
                Ok(Some(token)) => {
                    stalled = 0;
                    let text = self.tokenizer.decode(token);
                    self.sink.emit(OutputEvent::Token {
                        task_id,
                        token,
                        text,
                    });
                    emitted += 1;
                    if emitted >= self.config.generation_cap {
                        return (FinishReason::MaxTokens, emitted);
                    }
                }
                Ok(None) if !self.session.is_armed() => {
                    return (FinishReason::DeviceDone, emitted);
                }
                Ok(None) => {
                    stalled += 1;
                    if stalled > self.config.max_stalled_polls {
                        let e = stall_timeout(self.config.poll_interval, stalled);
                        warn!("Task {task_id}: no token after {stalled} polls");
                        return (FinishReason::Failed(e.to_string()), emitted);
                    }
                }
                Err(AccelError::HardwareError { code }) => {
                    error!("Task {task_id}: device error {code:#x}");
                    return (FinishReason::DeviceError { code }, emitted);
                }
                Err(e) => {
                    error!("Task {task_id}: {e}");
                    return (FinishReason::Failed(e.to_string()), emitted);
                }
            }

            sleep(self.config.poll_interval);
        }
    }
}

/// Owner's handle to a spawned [`Engine`].
#[derive(Debug)]
pub struct EngineHandle {
    handle: JoinHandle<Engine>,
    monitor: EngineMonitor,
}

impl EngineHandle {
    /// State observer.
    pub const fn monitor(&self) -> &EngineMonitor {
        &self.monitor
    }

    /// Whether the engine thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the engine to shut down and take it back
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidState`] if the engine thread panicked.
    pub fn join(self) -> Result<Engine> {
        self.handle
            .join()
            .map_err(|_| AccelError::invalid_state("engine thread panicked"))
    }
}

/// Timeout error for `polls` empty polls, saturating on absurd intervals.
fn stall_timeout(interval: Duration, polls: u32) -> AccelError {
    let waited = interval.checked_mul(polls).unwrap_or(Duration::MAX);
    AccelError::Timeout {
        duration_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
    }
}

fn sleep(interval: Duration) {
    if !interval.is_zero() {
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedDevice;
    use crate::memory::MemoryLayout;
    use crate::tokenizer::ByteTokenizer;

    type Hook = Box<dyn Fn(usize) + Send>;

    /// Shared output log with an optional hook run after each token.
    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<OutputEvent>>>,
        hook: Arc<Mutex<Option<Hook>>>,
    }

    impl Recorder {
        fn after_token(&self, hook: impl Fn(usize) + Send + 'static) {
            *self.hook.lock().unwrap() = Some(Box::new(hook));
        }

        fn events(&self) -> Vec<OutputEvent> {
            self.events.lock().unwrap().clone()
        }

        fn tokens(&self) -> Vec<u32> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    OutputEvent::Token { token, .. } => Some(token),
                    _ => None,
                })
                .collect()
        }

        fn finish(&self) -> Vec<FinishReason> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    OutputEvent::Finished { reason, .. } => Some(reason),
                    _ => None,
                })
                .collect()
        }
    }

    impl OutputSink for Recorder {
        fn emit(&mut self, event: OutputEvent) {
            let is_token = matches!(event, OutputEvent::Token { .. });
            self.events.lock().unwrap().push(event);
            if is_token {
                let seen = self.tokens().len();
                if let Some(hook) = self.hook.lock().unwrap().as_ref() {
                    hook(seen);
                }
            }
        }
    }

    struct Rig {
        dev: Arc<SimulatedDevice>,
        submitter: Submitter,
        commands: QueueHandle<Command>,
        recorder: Recorder,
        engine: Engine,
    }

    impl Rig {
        /// Push `command` once the `n`th token has been emitted.
        fn command_after(&self, n: usize, command: Command) {
            let queue = self.commands.clone();
            self.recorder.after_token(move |seen| {
                if seen == n {
                    queue.push(command).unwrap();
                }
            });
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig::default().with_intervals(Duration::ZERO, Duration::ZERO)
    }

    fn rig_with(config: EngineConfig) -> Rig {
        let dev = Arc::new(SimulatedDevice::new().with_latency(Duration::ZERO));
        let session = DeviceSession::new(dev.clone(), MemoryLayout::simulated(&config), &config);
        let (submitter, tasks, commands) = queues(&config);
        let recorder = Recorder::default();
        let engine = Engine::new(
            session,
            tasks,
            commands.clone(),
            Box::new(ByteTokenizer),
            Box::new(recorder.clone()),
            config,
        )
        .unwrap();
        Rig {
            dev,
            submitter,
            commands,
            recorder,
            engine,
        }
    }

    fn rig() -> Rig {
        rig_with(fast_config())
    }

    #[test]
    fn new_configures_session() {
        let r = rig();
        assert!(r.engine.session().is_configured());
        assert_eq!(r.engine.session().config().stride, 128);
        assert_eq!(r.engine.session().config().max_tokens, 2048);
    }

    #[test]
    fn task_ids_start_at_one_and_increase() {
        let r = rig();
        assert_eq!(r.submitter.submit("a").unwrap(), 1);
        assert_eq!(r.submitter.clone().submit("b").unwrap(), 2);
        assert_eq!(r.submitter.submit(vec![1, 2]).unwrap(), 3);
    }

    #[test]
    fn full_command_queue_is_reported() {
        let r = rig();
        for _ in 0..10 {
            r.submitter.send(Command::StopCurrent).unwrap();
        }
        assert!(matches!(
            r.submitter.send(Command::Reset),
            Err(AccelError::QueueFull { capacity: 10 })
        ));
        assert_eq!(r.commands.len(), 10);
    }

    #[test]
    fn generation_ends_on_eos() {
        let mut r = rig();
        r.submitter.submit("hello").unwrap();
        assert!(r.engine.tick());

        let expected: Vec<u32> = (101..=111).collect();
        assert_eq!(r.recorder.tokens(), expected);
        assert_eq!(r.recorder.finish(), vec![FinishReason::EndOfStream]);
        assert!(!r.recorder.tokens().contains(&EOS_TOKEN));
        assert_eq!(r.engine.state(), EngineState::default());

        let events = r.recorder.events();
        assert_eq!(events.first(), Some(&OutputEvent::Started { task_id: 1 }));
        assert_eq!(
            r.dev.config_words()[llmaccel_chip::config::word::PROMPT_LENGTH],
            5
        );
    }

    #[test]
    fn generation_is_capped() {
        let mut r = rig_with(fast_config().with_eos_after(1000).with_generation_cap(7));
        r.submitter.submit("x").unwrap();
        r.engine.tick();
        assert_eq!(r.recorder.tokens().len(), 7);
        assert_eq!(r.recorder.finish(), vec![FinishReason::MaxTokens]);
    }

    #[test]
    fn silent_device_times_out() {
        let mut r = rig_with(fast_config().with_max_stalled_polls(5));
        r.dev.set_status_valid(false);
        r.submitter.submit("x").unwrap();
        r.engine.tick();

        assert!(r.recorder.tokens().is_empty());
        match r.recorder.finish().as_slice() {
            [FinishReason::Failed(reason)] => assert!(reason.contains("timeout")),
            other => panic!("unexpected finish: {other:?}"),
        }
        assert_eq!(r.engine.state().status, EngineStatus::Idle);
    }

    #[test]
    fn stall_timeout_saturates() {
        assert!(matches!(
            stall_timeout(Duration::from_millis(50), 201),
            AccelError::Timeout { duration_ms: 10_050 }
        ));
        assert!(matches!(
            stall_timeout(Duration::from_millis(u64::MAX), 201),
            AccelError::Timeout {
                duration_ms: u64::MAX
            }
        ));
    }

    #[test]
    fn device_done_ends_generation() {
        let mut r = rig();
        let dev = r.dev.clone();
        r.recorder.after_token(move |seen| {
            if seen == 2 {
                dev.complete();
            }
        });
        r.submitter.submit("x").unwrap();
        r.engine.tick();

        assert_eq!(r.recorder.tokens(), vec![101, 102]);
        assert_eq!(r.recorder.finish(), vec![FinishReason::DeviceDone]);
    }

    #[test]
    fn status_error_is_task_local() {
        let mut r = rig();
        let dev = r.dev.clone();
        r.recorder.after_token(move |seen| {
            if seen == 2 {
                dev.inject_error(0x42);
            }
        });
        r.submitter.submit("x").unwrap();
        r.engine.tick();

        assert_eq!(
            r.recorder.finish(),
            vec![FinishReason::DeviceError { code: 0x42 }]
        );
        assert_eq!(r.engine.state().status, EngineStatus::Idle);

        r.recorder.after_token(|_| {});
        r.submitter.submit("y").unwrap();
        r.engine.tick();
        assert_eq!(r.recorder.finish().last(), Some(&FinishReason::EndOfStream));
    }

    #[test]
    fn bus_failure_aborts_task_only() {
        let mut r = rig_with(EngineConfig {
            register_retries: 1,
            ..fast_config()
        });
        r.dev.fail_transactions(2);
        r.submitter.submit("x").unwrap();
        r.engine.tick();
        assert!(matches!(
            r.recorder.finish().as_slice(),
            [FinishReason::Failed(_)]
        ));
        assert_eq!(r.engine.state().status, EngineStatus::Idle);

        r.submitter.submit("y").unwrap();
        r.engine.tick();
        assert_eq!(r.recorder.finish().last(), Some(&FinishReason::EndOfStream));
    }

    #[test]
    fn command_checked_before_task() {
        let mut r = rig();
        r.submitter.submit("x").unwrap();
        r.submitter.send(Command::Shutdown).unwrap();

        assert!(!r.engine.tick());
        assert_eq!(r.engine.state().status, EngineStatus::ShuttingDown);
        assert!(r.recorder.events().is_empty());
        assert!(!r.engine.tick());
    }

    #[test]
    fn idle_reset_clears_cache() {
        let mut r = rig();
        r.engine
            .session_mut()
            .memory_mut()
            .kv_cache
            .as_mut_slice()
            .fill(3);
        r.submitter.send(Command::Reset).unwrap();
        assert!(r.engine.tick());
        assert!(r
            .engine
            .session()
            .memory()
            .kv_cache
            .as_slice()
            .iter()
            .all(|&w| w == 0));
        assert_eq!(r.recorder.events(), vec![OutputEvent::MemoryCleared]);
        assert_eq!(r.engine.state().status, EngineStatus::Idle);
    }

    #[test]
    fn idle_stop_is_noop() {
        let mut r = rig();
        r.submitter.send(Command::StopCurrent).unwrap();
        assert!(r.engine.tick());
        assert!(r.recorder.events().is_empty());
        assert_eq!(r.engine.state(), EngineState::default());
    }

    #[test]
    fn stop_mid_generation_aborts_and_recovers() {
        let mut r = rig();
        r.command_after(3, Command::StopCurrent);
        r.submitter.submit("first").unwrap();
        r.engine.tick();

        assert_eq!(r.recorder.tokens(), vec![101, 102, 103]);
        assert_eq!(
            r.recorder.finish(),
            vec![FinishReason::Aborted(Command::StopCurrent)]
        );
        assert_eq!(r.engine.state(), EngineState::default());

        r.submitter.submit("second").unwrap();
        r.engine.tick();
        assert_eq!(r.recorder.finish().last(), Some(&FinishReason::EndOfStream));
    }

    #[test]
    fn reset_mid_generation_clears_after_abort() {
        let mut r = rig();
        r.command_after(1, Command::Reset);
        r.engine
            .session_mut()
            .memory_mut()
            .kv_cache
            .as_mut_slice()
            .fill(9);
        r.submitter.submit("x").unwrap();
        r.engine.tick();

        let events = r.recorder.events();
        let n = events.len();
        assert!(matches!(
            &events[n - 2],
            OutputEvent::Finished {
                reason: FinishReason::Aborted(Command::Reset),
                ..
            }
        ));
        assert_eq!(events[n - 1], OutputEvent::MemoryCleared);
        assert!(r
            .engine
            .session()
            .memory()
            .kv_cache
            .as_slice()
            .iter()
            .all(|&w| w == 0));
        assert!(!r.engine.state().reset_requested);
        assert_eq!(r.engine.state().status, EngineStatus::Idle);
    }

    #[test]
    fn shutdown_mid_generation_terminates() {
        let mut r = rig();
        r.command_after(2, Command::Shutdown);
        r.submitter.submit("x").unwrap();
        r.submitter.submit("never runs").unwrap();
        r.engine.run().unwrap();

        assert_eq!(
            r.recorder.finish(),
            vec![FinishReason::Aborted(Command::Shutdown)]
        );
        assert_eq!(r.recorder.events().last(), Some(&OutputEvent::MemoryCleared));
        assert_eq!(r.engine.state().status, EngineStatus::ShuttingDown);
        assert_eq!(r.engine.state().current_task, None);
    }
}
