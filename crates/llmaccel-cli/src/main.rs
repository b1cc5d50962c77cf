//! `llmaccel`: console front end for the token-generation accelerator.
//!
//! ```text
//! USAGE:
//!   llmaccel run  [--backend auto|mmio|software] [--device /dev/uio0]
//!   llmaccel regs [--backend ...] [--device ...]   Dump the control block
//!   llmaccel config                                Show effective configuration
//! ```
//!
//! In `run`, each input line is a prompt, except:
//!
//! ```text
//!   /stop    cancel the current generation
//!   /reset   cancel and clear the KV cache
//!   /quit    shut down
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use llmaccel_driver::backends::SimulatedDevice;
use llmaccel_driver::chip::regs::{self, ap_ctrl, status_ctrl};
use llmaccel_driver::chip::{ConfigWord, InterruptEvent, StatusWord};
use llmaccel_driver::{
    queues, select_backend, AccelError, BackendSelection, ByteTokenizer, Command, DeviceSession,
    Engine, EngineConfig, EngineHandle, EventSource, IrqSource, MemoryLayout, OutputEvent,
    OutputSink, RegisterBackend, SimulatedIrq, Submitter, UioIrq,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llmaccel", about = "LLM accelerator console", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Interactive generation console.
    Run {
        #[command(flatten)]
        target: Target,
        /// Override the per-generation token cap.
        #[arg(long)]
        generation_cap: Option<usize>,
    },
    /// Print control, status and configuration registers.
    Regs {
        #[command(flatten)]
        target: Target,
    },
    /// Print the configuration after `LLMACCEL_*` overrides.
    Config,
}

#[derive(clap::Args)]
struct Target {
    /// Register backend.
    #[arg(long, value_enum, default_value_t = Backend::Auto)]
    backend: Backend,
    /// UIO node exposing the control block and interrupt.
    #[arg(long, default_value = "/dev/uio0")]
    device: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// Map the device if present, otherwise simulate.
    Auto,
    /// Require the mapped device.
    Mmio,
    /// Simulated device.
    Software,
}

impl From<Backend> for BackendSelection {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Auto => Self::Auto,
            Backend::Mmio => Self::Mmio,
            Backend::Software => Self::Software,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run {
            target,
            generation_cap,
        } => cmd_run(&target, generation_cap)?,
        Cmd::Regs { target } => cmd_regs(&target)?,
        Cmd::Config => cmd_config()?,
    }

    Ok(())
}

type Device = (Arc<dyn RegisterBackend>, Option<Box<dyn IrqSource>>);

/// Open the register window plus whatever interrupt line goes with it.
fn open_device(target: &Target) -> Result<Device> {
    let mapped = match target.backend {
        Backend::Software => None,
        Backend::Mmio => Some(
            select_backend(BackendSelection::Mmio, &target.device)
                .with_context(|| format!("opening {}", target.device.display()))?,
        ),
        Backend::Auto => match select_backend(BackendSelection::Mmio, &target.device) {
            Ok(regs) => Some(regs),
            Err(e) => {
                info!(
                    "MMIO unavailable for {} ({e}), using simulated device",
                    target.device.display()
                );
                None
            }
        },
    };

    if let Some(regs) = mapped {
        let irq: Option<Box<dyn IrqSource>> = match UioIrq::open(&target.device) {
            Ok(irq) => Some(Box::new(irq)),
            Err(e) => {
                warn!("{e}; continuing in poll-only mode");
                None
            }
        };
        return Ok((regs, irq));
    }

    let (line, trigger) = SimulatedIrq::new();
    let sim: Arc<dyn RegisterBackend> = Arc::new(SimulatedDevice::new().with_irq_line(trigger));
    Ok((sim, Some(Box::new(line))))
}

fn cmd_run(target: &Target, generation_cap: Option<usize>) -> Result<()> {
    let mut config = EngineConfig::from_env()?;
    if let Some(cap) = generation_cap {
        config = config.with_generation_cap(cap);
    }

    let (regs, irq) = open_device(target)?;
    println!("LLM accelerator console ({} backend)", regs.backend_type());
    println!("Commands: /quit, /stop, /reset");
    println!();

    let session = DeviceSession::new(Arc::clone(&regs), MemoryLayout::simulated(&config), &config);
    let (submitter, tasks, commands) = queues(&config);
    let engine = Engine::new(
        session,
        tasks,
        commands,
        Box::new(ByteTokenizer),
        Box::new(ConsoleSink),
        config.clone(),
    )?;

    let mut events = EventSource::new(Arc::clone(&regs), config.irq_wait);
    events.on(InterruptEvent::Done, |e| debug!("{e}: generation complete"));
    events.on(InterruptEvent::Error, |e| warn!("{e}: device raised an error"));
    if let Some(irq) = irq {
        events.init(irq)?;
        events.start()?;
    }

    let handle = engine.spawn()?;
    let outcome = drive(std::io::stdin().lock(), &submitter, handle);
    events.stop();
    println!();
    println!("{}", events.stats());
    outcome
}

/// Feed `input` to the scheduler, then shut it down and wait for its final reset.
///
/// The engine is joined even when reading `input` fails; that error is
/// returned afterwards.
fn drive(input: impl BufRead, submitter: &Submitter, handle: EngineHandle) -> Result<()> {
    let console = console_loop(input, submitter);
    if !matches!(console, Ok(true)) {
        request_shutdown(submitter);
    }
    let joined = handle.join();

    console?;
    joined?;
    Ok(())
}

/// Read lines until `/quit` or EOF. Returns whether `/quit` already sent shutdown.
fn console_loop(input: impl BufRead, submitter: &Submitter) -> Result<bool> {
    let mut lines = input.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(false);
        };
        let line = line?;

        let outcome = match line.trim() {
            "" => continue,
            "/quit" => {
                request_shutdown(submitter);
                return Ok(true);
            }
            "/stop" => submitter.send(Command::StopCurrent),
            "/reset" => submitter.send(Command::Reset),
            prompt => submitter.submit(prompt).map(|id| debug!("Queued task {id}")),
        };
        if let Err(e) = outcome {
            eprintln!("{e}");
        }
    }
}

/// Shutdown must get through even if the command queue is momentarily full.
fn request_shutdown(submitter: &Submitter) {
    while let Err(AccelError::QueueFull { .. }) = submitter.send(Command::Shutdown) {
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Prints the output stream with the console's markers.
struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn emit(&mut self, event: OutputEvent) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(render(&event).as_bytes());
        let _ = out.flush();
    }
}

fn render(event: &OutputEvent) -> String {
    match event {
        OutputEvent::Started { .. } => "\n[Generating] ".to_string(),
        OutputEvent::Token { text, .. } => text.clone(),
        OutputEvent::Finished { reason, .. } => format!("\n[{reason}]\n"),
        OutputEvent::MemoryCleared => "[Memory cleared]\n".to_string(),
    }
}

fn cmd_regs(target: &Target) -> Result<()> {
    let regs = select_backend(target.backend.into(), &target.device)
        .with_context(|| format!("opening {}", target.device.display()))?;
    dump_registers(regs.as_ref())
}

fn dump_registers(regs: &dyn RegisterBackend) -> Result<()> {
    let ctrl = regs.read32(regs::AP_CTRL)?;
    let bit = |mask: u32| u8::from(ctrl & mask != 0);

    println!("Backend      : {}", regs.backend_type());
    println!("Base address : {:#010x}", regs::BASE_ADDR);
    println!(
        "AP_CTRL      : {ctrl:#010x}  start={} done={} idle={} ready={} auto_restart={}",
        bit(ap_ctrl::START),
        bit(ap_ctrl::DONE),
        bit(ap_ctrl::IDLE),
        bit(ap_ctrl::READY),
        bit(ap_ctrl::AUTO_RESTART),
    );
    println!("GIE          : {:#010x}", regs.read32(regs::GIE)?);
    println!("IER          : {:#010x}", regs.read32(regs::IER)?);
    let isr = regs.read32(regs::ISR)?;
    let pending: Vec<String> = InterruptEvent::decode(isr).map(|e| e.to_string()).collect();
    println!("ISR          : {isr:#010x}  {}", pending.join(" "));

    let valid = regs.read32(regs::STATUS_CTRL)? & status_ctrl::VALID != 0;
    let mut words = [0u32; regs::STATUS_WORDS];
    for (i, w) in words.iter_mut().enumerate() {
        *w = regs.read32(regs::status_offset(i))?;
    }
    let status = StatusWord::unpack(&words);
    println!(
        "Status       : valid={valid} token={} generated={} error={:#x} done={} err={}",
        status.current_token,
        status.tokens_generated,
        status.error_code,
        status.is_done(),
        status.has_error(),
    );

    let mut config = [0u32; regs::CONFIG_WORDS];
    for (i, w) in config.iter_mut().enumerate() {
        *w = regs.read32(regs::config_offset(i))?;
    }
    let c = ConfigWord::unpack(&config);
    println!("Input buffer : {:#x}", c.input_buffer_addr);
    println!("Output buffer: {:#x}", c.output_buffer_addr);
    println!("KV cache     : {:#x}", c.kv_cache_addr);
    println!("Stride       : {}   Max tokens: {}", c.stride, c.max_tokens);
    println!(
        "Model        : batch={} seq={} layers={} hidden={} heads={} vocab={}",
        c.batch_size, c.sequence_length, c.num_layers, c.hidden_size, c.num_heads, c.vocab_size
    );
    println!(
        "Task         : id={} type={} prompt_len={}",
        c.task_id, c.task_type, c.prompt_length
    );
    Ok(())
}

fn cmd_config() -> Result<()> {
    let c = EngineConfig::from_env()?;
    println!(
        "Buffers      : input {} / output {} / kv {} words",
        c.input_words, c.output_words, c.kv_cache_words
    );
    println!("Stride       : {}", c.stride);
    println!("Device max   : {} tokens", c.device_max_tokens);
    println!(
        "Model        : batch={} seq={} layers={} hidden={} heads={} vocab={}",
        c.model.batch_size,
        c.model.sequence_length,
        c.model.num_layers,
        c.model.hidden_size,
        c.model.num_heads,
        c.model.vocab_size
    );
    println!("EOS after    : {} tokens", c.eos_after);
    println!("Token cap    : {}", c.generation_cap);
    println!("Stall limit  : {} polls", c.max_stalled_polls);
    println!("Poll / idle  : {:?} / {:?}", c.poll_interval, c.idle_interval);
    println!("IRQ wait     : {:?}", c.irq_wait);
    println!("Retries      : {}", c.register_retries);
    println!(
        "Queues       : tasks {} / commands {}",
        c.task_queue_capacity, c.command_queue_capacity
    );
    Ok(())
}
