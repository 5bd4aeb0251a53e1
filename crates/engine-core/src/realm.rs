use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use engine_graph::vm::{self, ChildRealmExecutor, NoiseSource, ProgramProcessor, RandNoiseSource, VmContext};
use engine_graph::{Buffer, BufferArenaPool, Program, Spec};
use engine_plugin_host::{Processor, ProcessorId};
use engine_rt::{EngineResult, EngineStatus, MessageBody, MessageQueue, PerfStats, SwapSlots};
use parking_lot::Mutex;

use crate::block_context::BlockContext;
use crate::player::Player;
use crate::processor_adapter::ProcessorAdapter;

/// A processor registered with a `Realm`, along with the number of active
/// `Spec`s currently referencing it. Removed, and `cleanup`-ed, the instant
/// this drops to zero on the control thread.
struct ProcessorEntry {
    processor: Arc<Mutex<Box<dyn Processor>>>,
    ref_count: u32,
}

/// A named control value a `Realm` owns independently of any one `Program`.
/// `generation` lets a late-arriving `set_float_control_value`
/// call lose to one that already landed, the same last-writer-wins guard
/// `Buffer::ControlValue` uses inside a Program.
struct ControlValueEntry {
    value: f32,
    generation: u32,
    ref_count: u32,
}

struct ChildRealmEntry {
    realm: Arc<Realm>,
    ref_count: u32,
}

#[derive(Default)]
struct Registries {
    processors: HashMap<ProcessorId, ProcessorEntry>,
    control_values: HashMap<String, ControlValueEntry>,
    child_realms: HashMap<String, ChildRealmEntry>,
}

/// Bridges a child [`Realm`] onto [`engine_graph::vm::ChildRealmExecutor`],
/// caching the sink samples from the last successful render so `sink_left`/
/// `sink_right` can hand back borrowed slices after `process_block` returns.
struct ChildRealmAdapter {
    realm: Arc<Realm>,
    last_left: Vec<f32>,
    last_right: Vec<f32>,
}

impl ChildRealmExecutor for ChildRealmAdapter {
    fn process_block(&mut self, frames: usize) -> EngineResult<PerfStats> {
        if !self.realm.get_active_program() {
            return Err(EngineStatus::error("child realm has no active program"));
        }
        self.realm.process_block(frames, 0)?;
        let (left, right) = self.realm.sink_samples();
        self.last_left = left;
        self.last_right = right;
        Ok(self.realm.take_block_perf())
    }

    fn sink_left(&self) -> Option<&[f32]> {
        Some(&self.last_left)
    }

    fn sink_right(&self) -> Option<&[f32]> {
        Some(&self.last_right)
    }
}

/// Owns one realm's processor/control-value/child-realm registries, the
/// `{next, current, old}` Program swap and the per-block scratch a
/// `Program`'s VM pass runs against.
///
/// The Program swap and the out-message handoff both need a thread to hold
/// exclusive `&mut` access to whatever sits in `current` for an entire
/// block, which is why both use [`SwapSlots`] rather than the `Arc`-sharing
/// [`engine_rt::TripleBuffer`]: the per-processor state blobs in
/// [`engine_plugin_host::double_buffer`] are genuinely immutable-per-version
/// and use `TripleBuffer` directly, but a `Program`'s buffers are written in
/// place every block and a `MessageQueue` is pushed into throughout one.
pub struct Realm {
    name: String,
    sample_rate: u32,
    registries: Mutex<Registries>,
    programs: SwapSlots<Program>,
    arena_pool: Mutex<BufferArenaPool>,
    block_context: Mutex<BlockContext>,
    player: Mutex<Option<Player>>,
    program_version: AtomicU32,
}

impl Realm {
    pub fn new(name: impl Into<String>, sample_rate: u32, block_size: usize) -> Self {
        Realm {
            name: name.into(),
            sample_rate,
            registries: Mutex::new(Registries::default()),
            programs: SwapSlots::new(),
            arena_pool: Mutex::new(BufferArenaPool::new()),
            block_context: Mutex::new(BlockContext::new(block_size)),
            player: Mutex::new(None),
            program_version: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_context.lock().time_map.len()
    }

    /// Attaches a `Player` to this realm (only the top-level realm a
    /// transport drives needs one; child realms spliced in via
    /// `CALL_CHILD_REALM` render silently unless given one too).
    pub fn set_player(&self, player: Player) {
        *self.player.lock() = Some(player);
    }

    pub fn update_player_state(&self, mutation: crate::player::PlayerStateMutation) -> EngineResult<()> {
        let player = self.player.lock();
        match player.as_ref() {
            Some(player) => player.update_state(mutation),
            None => Err(EngineStatus::error("realm has no player attached")),
        }
    }

    pub fn add_processor(&self, id: ProcessorId, processor: Box<dyn Processor>) {
        self.registries.lock().processors.insert(
            id,
            ProcessorEntry {
                processor: Arc::new(Mutex::new(processor)),
                ref_count: 0,
            },
        );
    }

    pub fn add_control_value(&self, name: impl Into<String>, initial: f32) {
        self.registries.lock().control_values.insert(
            name.into(),
            ControlValueEntry {
                value: initial,
                generation: 0,
                ref_count: 0,
            },
        );
    }

    pub fn add_child_realm(&self, name: impl Into<String>, realm: Arc<Realm>) {
        self.registries
            .lock()
            .child_realms
            .insert(name.into(), ChildRealmEntry { realm, ref_count: 0 });
    }

    pub fn set_float_control_value(&self, name: &str, value: f32, generation: u32) -> EngineResult<()> {
        let mut registries = self.registries.lock();
        let entry = registries
            .control_values
            .get_mut(name)
            .ok_or_else(|| EngineStatus::error(format!("unknown control value {name}")))?;
        if generation > entry.generation {
            entry.value = value;
            entry.generation = generation;
        }
        Ok(())
    }

    pub fn send_processor_message(&self, id: ProcessorId, bytes: &[u8]) -> EngineResult<()> {
        let registries = self.registries.lock();
        let entry = registries
            .processors
            .get(&id)
            .ok_or_else(|| EngineStatus::error(format!("unknown processor {id}")))?;
        entry.processor.lock().handle_message(bytes)
    }

    pub fn set_processor_parameters(&self, id: ProcessorId, bytes: &[u8]) -> EngineResult<()> {
        let registries = self.registries.lock();
        let entry = registries
            .processors
            .get(&id)
            .ok_or_else(|| EngineStatus::error(format!("unknown processor {id}")))?;
        entry.processor.lock().set_parameters(bytes)
    }

    /// Reads a named buffer out of the active Program via callback, since the
    /// Program lives behind a lock for the scope of this call rather than
    /// being returned by reference.
    pub fn with_buffer<R>(&self, name: &str, f: impl FnOnce(&Buffer) -> R) -> Option<R> {
        self.programs.with_current_mut(|program| {
            program.buffer_by_name(name).map(f)
        })?
    }

    fn validate_spec_refs(&self, spec: &Spec) -> EngineResult<()> {
        let registries = self.registries.lock();
        for idx in 0..spec.num_processors() {
            let reference = spec.processor(idx);
            if !registries.processors.contains_key(&reference.id) {
                return Err(EngineStatus::error(format!(
                    "spec references unknown processor {}",
                    reference.id
                )));
            }
        }
        for idx in 0..spec.num_control_values() {
            let reference = spec.control_value(idx);
            if !registries.control_values.contains_key(&reference.name) {
                return Err(EngineStatus::error(format!(
                    "spec references unknown control value {}",
                    reference.name
                )));
            }
        }
        for idx in 0..spec.num_child_realms() {
            let reference = spec.child_realm(idx);
            if !registries.child_realms.contains_key(&reference.name) {
                return Err(EngineStatus::error(format!(
                    "spec references unknown child realm {}",
                    reference.name
                )));
            }
        }
        Ok(())
    }

    fn activate(&self, spec: &Spec) {
        let mut registries = self.registries.lock();
        for idx in 0..spec.num_processors() {
            let id = spec.processor(idx).id;
            if let Some(entry) = registries.processors.get_mut(&id) {
                entry.ref_count += 1;
                if entry.ref_count == 1 {
                    let _ = entry.processor.lock().setup();
                }
            }
        }
        for idx in 0..spec.num_control_values() {
            let name = spec.control_value(idx).name.clone();
            if let Some(entry) = registries.control_values.get_mut(&name) {
                entry.ref_count += 1;
            }
        }
        for idx in 0..spec.num_child_realms() {
            let name = spec.child_realm(idx).name.clone();
            if let Some(entry) = registries.child_realms.get_mut(&name) {
                entry.ref_count += 1;
            }
        }
    }

    fn deactivate(&self, spec: &Spec) {
        let mut registries = self.registries.lock();
        for idx in 0..spec.num_processors() {
            let id = spec.processor(idx).id;
            let mut cleaned_up = false;
            if let Some(entry) = registries.processors.get_mut(&id) {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                if entry.ref_count == 0 {
                    entry.processor.lock().cleanup();
                    cleaned_up = true;
                }
            }
            if cleaned_up {
                registries.processors.remove(&id);
            }
        }
        for idx in 0..spec.num_control_values() {
            let name = spec.control_value(idx).name.clone();
            let mut drop_entry = false;
            if let Some(entry) = registries.control_values.get_mut(&name) {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                drop_entry = entry.ref_count == 0;
            }
            if drop_entry {
                registries.control_values.remove(&name);
            }
        }
        for idx in 0..spec.num_child_realms() {
            let name = spec.child_realm(idx).name.clone();
            let mut drop_entry = false;
            if let Some(entry) = registries.child_realms.get_mut(&name) {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                drop_entry = entry.ref_count == 0;
            }
            if drop_entry {
                registries.child_realms.remove(&name);
            }
        }
    }

    fn destroy_program(&self, program: Program) {
        self.deactivate(program.spec());
        let mut pool = self.arena_pool.lock();
        program.release_arena(&mut pool);
    }

    /// Compiles and activates `spec` as the next Program to render.
    /// Rejects a spec that references a processor/control-value/child-realm
    /// this realm has not been told about, or one missing the mandatory sink
    /// buffers.
    pub fn set_spec(&self, spec: Arc<Spec>) -> EngineResult<()> {
        self.validate_spec_refs(&spec)?;
        let version = self.program_version.fetch_add(1, Ordering::SeqCst) + 1;
        let program = {
            let mut pool = self.arena_pool.lock();
            Program::from_pool(Arc::clone(&spec), &mut pool, self.sample_rate, version)
        };
        program.validate_sinks()?;
        self.activate(&spec);

        if let Some(displaced) = self.programs.publish(program) {
            self.destroy_program(displaced);
        }
        if let Some(displaced) = self.programs.take_old() {
            self.destroy_program(displaced);
        }
        Ok(())
    }

    /// Latches `next -> current`. Returns whether a Program is active after
    /// the attempt.
    pub fn get_active_program(&self) -> bool {
        self.programs.acquire()
    }

    /// Reclaims and destroys whatever Program most recently fell out of
    /// `current`. Control-thread only.
    pub fn run_maintenance(&self) {
        if let Some(old) = self.programs.take_old() {
            self.destroy_program(old);
        }
    }

    /// Forcibly tears down every Program slot, used when a realm is shutting
    /// down rather than swapping to a new spec.
    pub fn clear_programs(&self) {
        for slot in self.programs.clear_all().into_iter().flatten() {
            self.destroy_program(slot);
        }
    }

    fn sink_samples(&self) -> (Vec<f32>, Vec<f32>) {
        self.programs
            .with_current_mut(|program| {
                let left = program
                    .buffer_by_name("sink:in:left")
                    .and_then(|b| b.as_samples().ok())
                    .map(|s| s.to_vec())
                    .unwrap_or_default();
                let right = program
                    .buffer_by_name("sink:in:right")
                    .and_then(|b| b.as_samples().ok())
                    .map(|s| s.to_vec())
                    .unwrap_or_default();
                (left, right)
            })
            .unwrap_or_default()
    }

    /// Reclaims this block's perf spans, leaving a fresh `PerfStats` in
    /// their place. Used by `ChildRealmExecutor::process_block` to hand
    /// child spans up to the parent VM pass, and by the engine loop to
    /// decide whether the previous block's spans are worth a message.
    pub(crate) fn take_block_perf(&self) -> PerfStats {
        let mut ctx = self.block_context.lock();
        std::mem::replace(&mut ctx.perf, PerfStats::new())
    }

    /// Renders one block of audio. Assumes `get_active_program` already
    /// succeeded this block; returns an error otherwise rather than doing
    /// anything silently.
    pub fn process_block(&self, frames: usize, now_ns: u64) -> EngineResult<()> {
        let mut ctx_guard = self.block_context.lock();
        let ctx = &mut *ctx_guard;
        ctx.reset_for_next_block();
        ctx.sample_pos = ctx.sample_pos.wrapping_add(frames as u64);

        self.programs
            .with_current_mut(|program| {
                if let Some(player) = self.player.lock().as_mut() {
                    player.fill_time_map(program.time_mapper(), ctx);
                }

                let registries = self.registries.lock();
                let mut processors: Vec<Box<dyn ProgramProcessor>> = (0..program.spec().num_processors())
                    .map(|idx| program.spec().processor(idx).id)
                    .map(|id| -> Box<dyn ProgramProcessor> {
                        match registries.processors.get(&id) {
                            Some(entry) => Box::new(ProcessorAdapter::new(Arc::clone(&entry.processor))),
                            None => Box::new(MissingProcessor),
                        }
                    })
                    .collect();

                let mut child_realms: Vec<Box<dyn ChildRealmExecutor>> = (0..program.spec().num_child_realms())
                    .map(|idx| program.spec().child_realm(idx).name.clone())
                    .map(|name| -> Box<dyn ChildRealmExecutor> {
                        match registries.child_realms.get(&name) {
                            Some(entry) => Box::new(ChildRealmAdapter {
                                realm: Arc::clone(&entry.realm),
                                last_left: Vec::new(),
                                last_right: Vec::new(),
                            }),
                            None => Box::new(MissingChildRealm),
                        }
                    })
                    .collect();

                let control_values: Vec<(f32, u32)> = (0..program.spec().num_control_values())
                    .map(|idx| program.spec().control_value(idx).name.clone())
                    .map(|name| {
                        registries
                            .control_values
                            .get(&name)
                            .map(|entry| (entry.value, entry.generation))
                            .unwrap_or((0.0, 0))
                    })
                    .collect();
                drop(registries);

                let mut noise: RandNoiseSource = RandNoiseSource;
                let mut vm_ctx = VmContext {
                    processors: &mut processors,
                    child_realms: &mut child_realms,
                    messages: &mut ctx.out_messages,
                    perf: &mut ctx.perf,
                    noise: &mut noise as &mut dyn NoiseSource,
                    control_values: &control_values,
                    now_ns,
                };
                vm::run_block(program, frames, &mut vm_ctx)
            })
            .unwrap_or_else(|| Err(EngineStatus::error("realm has no active program")))?;

        self.drain_processor_notifications(ctx);
        Ok(())
    }

    fn drain_processor_notifications(&self, ctx: &mut BlockContext) {
        let mut registries = self.registries.lock();
        for (id, entry) in registries.processors.iter_mut() {
            let mut processor = entry.processor.lock();
            if let Some(notification) = processor.base_mut().take_pending_notification() {
                ctx.out_messages.push(MessageBody::NodeStateChange {
                    node_id: id.to_string(),
                    broken: notification.state == engine_plugin_host::ProcessorState::Broken,
                });
            }
        }
    }

    /// Drains this realm's out-message queue, leaving a fresh (but still
    /// capacity-reserved) one in its place. Called by the Engine once per
    /// block, after `process_block`.
    pub fn take_out_messages(&self) -> MessageQueue {
        let mut ctx = self.block_context.lock();
        std::mem::take(&mut ctx.out_messages)
    }

    pub fn sample_pos(&self) -> u64 {
        self.block_context.lock().sample_pos
    }
}

/// Stands in for a processor a Spec references that this realm was never
/// told about; `validate_spec_refs` should make this unreachable in
/// practice, but `process_block` still needs something to put in the slot
/// rather than panicking if that invariant is ever violated.
struct MissingProcessor;

impl ProgramProcessor for MissingProcessor {
    fn process_block(&mut self, _buffers: &mut [Buffer], _frames: usize) -> EngineResult<()> {
        Err(EngineStatus::error("processor slot is unpopulated"))
    }
}

struct MissingChildRealm;

impl ChildRealmExecutor for MissingChildRealm {
    fn process_block(&mut self, _frames: usize) -> EngineResult<PerfStats> {
        Err(EngineStatus::error("child realm slot is unpopulated"))
    }
    fn sink_left(&self) -> Option<&[f32]> {
        None
    }
    fn sink_right(&self) -> Option<&[f32]> {
        None
    }
}
