//! End-to-end scheduler scenarios on the simulated device
//!
//! The engine runs on its own thread, as in production; output is observed
//! through a channel sink.

use llmaccel_driver::backends::SimulatedDevice;
use llmaccel_driver::chip::{irq, InterruptEvent, EOS_TOKEN};
use llmaccel_driver::{
    queues, AccelError, ByteTokenizer, Command, DeviceSession, Engine, EngineConfig, EngineStatus,
    EventSource, FinishReason, MemoryLayout, OutputEvent, SimulatedIrq, Submitter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RECV: Duration = Duration::from_secs(5);

struct Harness {
    dev: Arc<SimulatedDevice>,
    submitter: Submitter,
    output: Receiver<OutputEvent>,
    engine: Engine,
}

fn harness(config: EngineConfig, dev: SimulatedDevice) -> Harness {
    let dev = Arc::new(dev);
    let session = DeviceSession::new(dev.clone(), MemoryLayout::simulated(&config), &config);
    let (submitter, tasks, commands) = queues(&config);
    let (tx, output) = mpsc::channel();
    let engine = Engine::new(
        session,
        tasks,
        commands,
        Box::new(ByteTokenizer),
        Box::new(tx),
        config,
    )
    .expect("engine");
    Harness {
        dev,
        submitter,
        output,
        engine,
    }
}

fn fast_device() -> SimulatedDevice {
    SimulatedDevice::new().with_latency(Duration::ZERO)
}

/// Receive until the `Finished` event for any task.
fn until_finished(rx: &Receiver<OutputEvent>) -> (Vec<u32>, FinishReason) {
    let mut tokens = Vec::new();
    loop {
        match rx.recv_timeout(RECV).expect("engine stalled") {
            OutputEvent::Token { token, .. } => tokens.push(token),
            OutputEvent::Finished { reason, .. } => return (tokens, reason),
            OutputEvent::Started { .. } | OutputEvent::MemoryCleared => {}
        }
    }
}

#[test]
fn overflowing_task_queue_rejects_the_extra_task() {
    let h = harness(EngineConfig::default(), fast_device());
    for _ in 0..100 {
        h.submitter.submit("p").unwrap();
    }
    assert!(matches!(
        h.submitter.submit("one too many"),
        Err(AccelError::QueueFull { capacity: 100 })
    ));
    // Nothing has been consumed: the engine never ran.
    assert_eq!(h.engine.state().status, EngineStatus::Idle);
}

#[test]
fn stop_current_aborts_then_next_task_runs() {
    let config = EngineConfig::default()
        .with_eos_after(10_000)
        .with_generation_cap(10_000)
        .with_intervals(Duration::from_millis(2), Duration::from_millis(2));
    let h = harness(config, fast_device());
    let monitor = h.engine.monitor();
    let handle = h.engine.spawn().unwrap();

    h.submitter.submit("long").unwrap();
    match h.output.recv_timeout(RECV).unwrap() {
        OutputEvent::Started { task_id } => assert_eq!(task_id, 1),
        other => panic!("unexpected first event {other:?}"),
    }
    // Let a few tokens through before cancelling.
    for _ in 0..3 {
        assert!(matches!(
            h.output.recv_timeout(RECV).unwrap(),
            OutputEvent::Token { .. }
        ));
    }
    h.submitter.send(Command::StopCurrent).unwrap();

    let (_, reason) = until_finished(&h.output);
    assert_eq!(reason, FinishReason::Aborted(Command::StopCurrent));

    let id = h.submitter.submit(vec![1, 2, 3]).unwrap();
    assert_eq!(id, 2);
    match h.output.recv_timeout(RECV).unwrap() {
        OutputEvent::Started { task_id } => assert_eq!(task_id, 2),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(monitor.snapshot().current_task, Some(2));

    h.submitter.send(Command::Shutdown).unwrap();
    let engine = handle.join().unwrap();
    assert_eq!(engine.state().status, EngineStatus::ShuttingDown);
}

#[test]
fn shutdown_mid_generation_clears_cache_and_terminates() {
    let config = EngineConfig::default()
        .with_eos_after(10_000)
        .with_generation_cap(10_000)
        .with_intervals(Duration::from_millis(1), Duration::from_millis(1));
    let mut h = harness(config, fast_device());
    h.engine
        .session_mut()
        .memory_mut()
        .kv_cache
        .as_mut_slice()
        .fill(0xDEAD_BEEF);
    let handle = h.engine.spawn().unwrap();

    h.submitter.submit("x").unwrap();
    for _ in 0..3 {
        h.output.recv_timeout(RECV).unwrap();
    }
    h.submitter.send(Command::Shutdown).unwrap();

    let (_, reason) = until_finished(&h.output);
    assert_eq!(reason, FinishReason::Aborted(Command::Shutdown));
    assert_eq!(
        h.output.recv_timeout(RECV).unwrap(),
        OutputEvent::MemoryCleared
    );

    let engine = handle.join().unwrap();
    assert_eq!(engine.state().status, EngineStatus::ShuttingDown);
    assert!(engine
        .session()
        .memory()
        .kv_cache
        .as_slice()
        .iter()
        .all(|&w| w == 0));
    assert!(h.dev.peek(llmaccel_driver::chip::regs::ISR) == 0);
}

#[test]
fn every_prompt_length_terminates() {
    let config = EngineConfig::default()
        .with_input_words(16)
        .with_intervals(Duration::ZERO, Duration::ZERO);
    let h = harness(config, fast_device());
    let handle = h.engine.spawn().unwrap();

    for len in [0usize, 1, 16, 17, 5000] {
        h.submitter.submit(vec![7u32; len]).unwrap();
        let (tokens, reason) = until_finished(&h.output);
        assert_eq!(reason, FinishReason::EndOfStream, "prompt length {len}");
        assert_eq!(tokens.len(), 11);
        assert!(!tokens.contains(&EOS_TOKEN));
    }

    h.submitter.send(Command::Shutdown).unwrap();
    handle.join().unwrap();
}

#[test]
fn shutdown_from_idle_is_immediate() {
    let h = harness(EngineConfig::default(), fast_device());
    let handle = h.engine.spawn().unwrap();
    h.submitter.send(Command::Shutdown).unwrap();
    let engine = handle.join().unwrap();
    assert_eq!(engine.state().status, EngineStatus::ShuttingDown);
    assert_eq!(
        h.output.recv_timeout(RECV).unwrap(),
        OutputEvent::MemoryCleared
    );
}

#[test]
fn interrupts_observed_alongside_generation() {
    let (line, trigger) = SimulatedIrq::new();
    let config = EngineConfig::default()
        .with_intervals(Duration::ZERO, Duration::ZERO)
        .with_irq_wait(Duration::from_millis(20));
    let h = harness(
        config.clone(),
        SimulatedDevice::new()
            .with_latency(Duration::ZERO)
            .with_irq_line(trigger),
    );

    let mut events = EventSource::new(h.dev.clone(), config.irq_wait);
    let ready = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ready);
    events.on(InterruptEvent::Ready, move |_| {
        r.fetch_add(1, Ordering::SeqCst);
    });
    events.init(Box::new(line)).unwrap();
    events.start().unwrap();

    let handle = h.engine.spawn().unwrap();
    let wait_ready = |n: usize| {
        let deadline = Instant::now() + RECV;
        while ready.load(Ordering::SeqCst) < n && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    };

    // Each START raises READY; wait for it to be serviced before the next.
    h.submitter.submit("a").unwrap();
    until_finished(&h.output);
    wait_ready(1);
    h.submitter.submit("b").unwrap();
    until_finished(&h.output);
    wait_ready(2);
    h.submitter.send(Command::Shutdown).unwrap();
    handle.join().unwrap();
    events.stop();

    assert_eq!(ready.load(Ordering::SeqCst), 2);
    assert_eq!(events.stats().ready, 2);
    assert_eq!(h.dev.peek(llmaccel_driver::chip::regs::ISR) & irq::READY, 0);
}
