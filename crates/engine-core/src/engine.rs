//! Drives the single realtime loop that ties a [`Realm`] to an
//! [`AudioBackend`]: latches the active `Program`, renders one block,
//! delivers the sink buffers to the backend, and ferries perf/load telemetry
//! plus the realm's own out-messages to the notification pump. Runs on its
//! own thread; nothing on the control thread ever calls into the loop body
//! directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use engine_rt::perf::{Clock, MonotonicClock};
use engine_rt::{enter_hard_rt, EngineResult, MessageBody};
use io_backends::{AudioBackend, BlockContext as BackendBlockContext, Channel, CpalBackend, NullBackend, RendererBackend};

use crate::config::{BackendKind, EngineConfig};
use crate::notification::NotificationBus;
use crate::realm::Realm;

/// How long the loop sleeps when no Program is active yet.
const NO_PROGRAM_SLEEP: Duration = Duration::from_millis(100);

/// Owns the backend, the pump thread and the RT thread for one `Realm`.
/// `start`/`stop` are the only control-thread entry points once built; the
/// loop itself never touches a lock the control thread also holds, besides
/// whatever `Realm`'s own internals already serialize.
pub struct Engine {
    config: EngineConfig,
    realm: Arc<Realm>,
    notifications: Arc<NotificationBus>,
    shutdown: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    rt_thread: Option<JoinHandle<()>>,
    pump_thread: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: EngineConfig, realm: Arc<Realm>) -> Self {
        Engine {
            config,
            realm,
            notifications: NotificationBus::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            rt_thread: None,
            pump_thread: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    pub fn notifications(&self) -> &Arc<NotificationBus> {
        &self.notifications
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs `Realm::run_maintenance` from the control thread. Not called by
    /// the RT loop itself -- reclaiming a superseded Program's arena takes a
    /// lock the RT thread must never contend for.
    pub fn run_maintenance(&self) {
        self.realm.run_maintenance();
    }

    /// Spawns the pump thread and the RT thread. A no-op if already running.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.store(false, Ordering::Release);
        self.pump_thread = Some(self.notifications.spawn_pump());

        let realm = Arc::clone(&self.realm);
        let notifications = Arc::clone(&self.notifications);
        let shutdown = Arc::clone(&self.shutdown);
        let config = self.config.clone();
        self.rt_thread = Some(thread::spawn(move || {
            run_rt_loop(&realm, &notifications, &config, &shutdown)
        }));
    }

    /// Flips the shared shutdown flag and joins both threads. Blocking; for
    /// control-thread use only.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.rt_thread.take() {
            let _ = handle.join();
        }
        self.notifications.shutdown();
        if let Some(handle) = self.pump_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_backend(kind: BackendKind) -> Box<dyn AudioBackend> {
    match kind {
        BackendKind::Null => Box::new(NullBackend::new()),
        BackendKind::Cpal => Box::new(CpalBackend::new()),
        BackendKind::Renderer => Box::new(RendererBackend::to_memory()),
    }
}

/// Hands the named sink buffer, if the active Program has one, to the
/// backend. `Realm::with_buffer` already no-ops when no Program is latched
/// or the name is absent, so a realm with only one channel wired up is not
/// an error.
fn deliver_sink(
    realm: &Realm,
    backend: &mut dyn AudioBackend,
    ctx: &BackendBlockContext,
    name: &str,
    channel: Channel,
) -> EngineResult<()> {
    realm
        .with_buffer(name, |buffer| backend.output(ctx, channel, buffer))
        .unwrap_or(Ok(()))
}

/// Calls `end_block` on drop unless `dismiss` already ran it explicitly --
/// covers the case where `process_block` or a sink delivery bails out
/// partway through a block.
struct EndBlockGuard<'a> {
    backend: &'a mut dyn AudioBackend,
    ctx: &'a BackendBlockContext,
    armed: bool,
}

impl<'a> EndBlockGuard<'a> {
    fn new(backend: &'a mut dyn AudioBackend, ctx: &'a BackendBlockContext) -> Self {
        EndBlockGuard { backend, ctx, armed: true }
    }

    fn dismiss(mut self) -> EngineResult<()> {
        self.armed = false;
        self.backend.end_block(self.ctx)
    }
}

impl Drop for EndBlockGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.backend.end_block(self.ctx);
        }
    }
}

fn run_rt_loop(realm: &Arc<Realm>, notifications: &Arc<NotificationBus>, config: &EngineConfig, shutdown: &AtomicBool) {
    let clock = MonotonicClock::default();
    let setup_ctx = BackendBlockContext {
        sample_rate: config.sample_rate,
        block_size: config.block_size,
        sample_pos: 0,
        time_scale: 1.0,
    };
    let mut backend = build_backend(config.backend);
    if let Err(err) = backend.setup(&setup_ctx) {
        tracing::error!(?err, "audio backend setup failed, RT loop exiting");
        return;
    }
    // Safety: this is the thread that will run every `process_block` call
    // for the remainder of the loop, and it has not yet processed a block.
    unsafe { enter_hard_rt(config.rt_priority) };

    let mut last_perf = None;
    let mut first_block = true;

    while !shutdown.load(Ordering::Acquire) {
        // Step 1: latch the active Program, or back off.
        if !realm.get_active_program() {
            thread::sleep(NO_PROGRAM_SLEEP);
            continue;
        }

        let loop_start_ns = clock.now_ns();

        // Step 2: latch an out-messages queue from the pump's triple buffer.
        let mut queue = notifications.acquire_out_queue(config.message_queue_capacity);

        // Step 3: push last block's perf stats, if any accumulated.
        if let Some(perf) = last_perf.take() {
            if perf_is_nonempty(&perf) {
                queue.push(MessageBody::PerfStats(perf));
            }
        }

        // Steps 4 (reset) happen inside `Realm::process_block` itself.
        let block_ctx = BackendBlockContext {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            sample_pos: realm.sample_pos(),
            time_scale: 1.0,
        };

        // Step 5: begin_block, with a guard covering every failure path.
        if let Err(err) = backend.begin_block(&block_ctx) {
            tracing::error!(?err, "backend begin_block failed");
            last_perf = Some(realm.take_block_perf());
            notifications.publish_out_queue(queue);
            continue;
        }
        let guard = EndBlockGuard::new(backend.as_mut(), &block_ctx);

        // Step 6: render the block.
        if let Err(err) = realm.process_block(config.block_size, loop_start_ns) {
            tracing::error!(?err, realm = realm.name(), "realm process_block failed");
        } else {
            // Step 7: deliver each sink buffer the Program produced.
            if let Err(err) = deliver_sink(realm, guard.backend, &block_ctx, "sink:in:left", Channel::AudioLeft) {
                tracing::error!(?err, "backend rejected left sink output");
            }
            if let Err(err) = deliver_sink(realm, guard.backend, &block_ctx, "sink:in:right", Channel::AudioRight) {
                tracing::error!(?err, "backend rejected right sink output");
            }
        }

        // Step 8: engine load, skipped on the first block (nothing to
        // compare the loop duration against yet).
        if !first_block {
            let elapsed_ns = clock.now_ns().saturating_sub(loop_start_ns);
            let block_duration_us = (config.block_size as f64 / config.sample_rate.max(1) as f64) * 1_000_000.0;
            let loop_duration_us = elapsed_ns as f64 / 1_000.0;
            let load = if block_duration_us > 0.0 {
                (loop_duration_us / block_duration_us) as f32
            } else {
                0.0
            };
            queue.push(MessageBody::EngineLoad { load });
        }
        first_block = false;

        // Step 9: dismiss the guard, calling end_block explicitly.
        if let Err(err) = guard.dismiss() {
            tracing::error!(?err, "backend end_block failed");
        }

        // Fold in whatever the realm itself pushed this block (PlayerState,
        // NodeStateChange) before handing the queue back to the pump.
        for message in realm.take_out_messages().drain() {
            queue.push(message);
        }

        // Step 10: publish the out-messages queue back to the pump.
        notifications.publish_out_queue(queue);
        last_perf = Some(realm.take_block_perf());
    }

    backend.cleanup();
}

fn perf_is_nonempty(perf: &engine_rt::PerfStats) -> bool {
    perf.num_spans() > 0
}
