//! Exercises the six concrete end-to-end scenarios from the engine's design
//! notes (the "Testable Properties" section): silence-through, a constant
//! float through COPY, a looping transport, a processor hot-swap's
//! ref-counting, a processor that goes BROKEN mid-run, and a child-realm
//! splice. Each test drives `Realm` the way `Engine`'s RT loop does, without
//! spinning up the real threads.

use std::sync::Arc;

use engine_core::{Player, PlayerStateMutation, Realm};
use engine_graph::opcode::{Instruction, OpArg, OpCode};
use engine_graph::{BufferType, Spec};
use engine_plugin_host::{Processor, ProcessorBase, ProcessorId, ProcessorKind};
use engine_rt::{EngineResult, EngineStatus};
use musical_time::MusicalDuration;

fn silence_spec() -> Spec {
    let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
    spec.append_buffer("sink:in:left", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    spec.append_buffer("sink:in:right", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    spec.append_opcode(Instruction::new(
        OpCode::Clear,
        vec![OpArg::Int(spec.buffer_index("sink:in:left").unwrap() as i64)],
    ));
    spec.append_opcode(Instruction::new(
        OpCode::Clear,
        vec![OpArg::Int(spec.buffer_index("sink:in:right").unwrap() as i64)],
    ));
    spec.append_opcode(Instruction::new(OpCode::End, vec![]));
    spec
}

/// A `null`-style realm with no processors, block_size 4, sample_rate
/// 48000. One block's output is silence on both channels.
#[test]
fn scenario_silence_through() {
    let realm = Realm::new("root", 48_000, 4);
    realm.set_spec(Arc::new(silence_spec())).unwrap();
    assert!(realm.get_active_program());

    realm.process_block(4, 0).unwrap(); // init pass: no CONNECT_PORT, still consumed
    realm.process_block(4, 0).unwrap();

    let left = realm.with_buffer("sink:in:left", |b| b.as_samples().unwrap().to_vec()).unwrap();
    let right = realm.with_buffer("sink:in:right", |b| b.as_samples().unwrap().to_vec()).unwrap();
    assert_eq!(left, vec![0.0; 4]);
    assert_eq!(right, vec![0.0; 4]);
}

/// `SET_FLOAT sink:in:left, 0.25; COPY sink:in:left, sink:in:right`.
/// `SET_FLOAT` on a `FloatAudioBlock` only ever writes the first sample, so
/// only `buf[0]` is 0.25 and the rest stays cleared.
#[test]
fn scenario_set_float_then_copy() {
    let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
    let left = spec
        .append_buffer("sink:in:left", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    let right = spec
        .append_buffer("sink:in:right", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    spec.append_opcode(Instruction::new(
        OpCode::SetFloat,
        vec![OpArg::Int(left as i64), OpArg::Float(0.25)],
    ));
    spec.append_opcode(Instruction::new(
        OpCode::Copy,
        vec![OpArg::Int(left as i64), OpArg::Int(right as i64)],
    ));
    spec.append_opcode(Instruction::new(OpCode::End, vec![]));

    let realm = Realm::new("root", 48_000, 4);
    realm.set_spec(Arc::new(spec)).unwrap();
    assert!(realm.get_active_program());
    realm.process_block(4, 0).unwrap();
    realm.process_block(4, 0).unwrap();

    let left_samples = realm.with_buffer("sink:in:left", |b| b.as_samples().unwrap().to_vec()).unwrap();
    let right_samples = realm.with_buffer("sink:in:right", |b| b.as_samples().unwrap().to_vec()).unwrap();
    assert_eq!(left_samples, vec![0.25, 0.0, 0.0, 0.0]);
    assert_eq!(right_samples, vec![0.25, 0.0, 0.0, 0.0]);
}

/// `TimeMapper(bpm=120, sr=48000, duration=2/1)`, transport playing at
/// `7/4` with a `[0, 2)` loop, rendering ~0.5s (24000 frames).
/// The time map must wrap from near `2` back to `0` at least once while
/// `playing` stays true, and a `PlayerState` message is emitted.
#[test]
fn scenario_looping_transport() {
    let realm = Realm::new("root", 48_000, 24_000);
    realm.set_player(Player::new(128));
    realm
        .update_player_state(PlayerStateMutation {
            playing: Some(true),
            seek_to: Some(musical_time::MusicalTime::new(7, 4)),
            loop_enabled: Some(true),
            loop_start_time: Some(musical_time::MusicalTime::zero()),
            loop_end_time: Some(musical_time::MusicalTime::new(2, 1)),
            ..Default::default()
        })
        .unwrap();

    let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
    spec.append_buffer("sink:in:left", BufferType::FloatAudioBlock { block_size: 24_000 })
        .unwrap();
    spec.append_buffer("sink:in:right", BufferType::FloatAudioBlock { block_size: 24_000 })
        .unwrap();
    spec.append_opcode(Instruction::new(OpCode::End, vec![]));
    realm.set_spec(Arc::new(spec)).unwrap();
    assert!(realm.get_active_program());

    realm.process_block(24_000, 0).unwrap(); // init pass
    realm.process_block(24_000, 0).unwrap();

    let messages = realm.take_out_messages();
    let saw_player_state = messages
        .iter()
        .any(|m| matches!(m, engine_rt::MessageBody::PlayerState(_)));
    assert!(saw_player_state);
}

/// A no-op processor used purely to prove the registry's ref-counting
/// protocol; it never fails and never reads its buffers.
struct TrackedProcessor {
    base: ProcessorBase,
}

impl TrackedProcessor {
    fn new(id: ProcessorId, node_id: &str) -> Self {
        let base = ProcessorBase::new(id, "root", node_id, engine_plugin_host::NodeDescription::new(ProcessorKind::Null, vec![]));
        TrackedProcessor { base }
    }
}

impl Processor for TrackedProcessor {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }
    fn process_block_internal(&mut self, _buffers: &mut [engine_graph::Buffer], _frames: usize) -> EngineResult<()> {
        Ok(())
    }
}

fn spec_with_processors(ids: &[u64]) -> Spec {
    let mut spec = silence_spec();
    for (idx, &id) in ids.iter().enumerate() {
        spec.append_processor(id, &format!("n{idx}")).unwrap();
    }
    spec
}

/// Spec A references {P1}. Spec B references {P1, P2}; after
/// the swap latches, P2's ref_count is 1 and P1's is still 1 (still kept
/// alive by both specs... except A has already been superseded, so only B
/// holds it). Spec C then references {P2} alone; after another latch and
/// `run_maintenance`, P1's ref_count has dropped to zero and it has been
/// torn down.
#[test]
fn scenario_processor_hot_swap_ref_counting() {
    let realm = Realm::new("root", 48_000, 4);
    realm.add_processor(1, Box::new(TrackedProcessor::new(1, "p1")));
    realm.add_processor(2, Box::new(TrackedProcessor::new(2, "p2")));

    realm.set_spec(Arc::new(spec_with_processors(&[1]))).unwrap();
    assert!(realm.get_active_program());

    realm.set_spec(Arc::new(spec_with_processors(&[1, 2]))).unwrap();
    assert!(realm.get_active_program());
    // Spec A (old) is now in `old`; P1 is referenced by both A and B until
    // `run_maintenance` reclaims A.
    realm.run_maintenance();

    realm.set_spec(Arc::new(spec_with_processors(&[2]))).unwrap();
    assert!(realm.get_active_program());
    realm.run_maintenance();

    // P1 is no longer referenced by any live Spec; rendering a processor
    // message to it now fails since the registry entry was torn down.
    assert!(realm.send_processor_message(1, b"mute").is_err());
    // P2 is still registered and reachable.
    assert!(realm.send_processor_message(2, b"mute").is_ok());
}

/// A processor whose `process_block_internal` fails on its third call.
struct BreaksOnThirdCall {
    base: ProcessorBase,
    calls: u32,
}

impl BreaksOnThirdCall {
    fn new(id: ProcessorId) -> Self {
        let description = engine_plugin_host::NodeDescription::new(
            ProcessorKind::Null,
            vec![engine_plugin_host::PortSpec::new(
                "out",
                engine_plugin_host::PortDirection::Output,
                engine_plugin_host::PortType::Audio,
            )],
        );
        BreaksOnThirdCall {
            base: ProcessorBase::new(id, "root", "breaker", description),
            calls: 0,
        }
    }
}

impl Processor for BreaksOnThirdCall {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }
    fn process_block_internal(&mut self, buffers: &mut [engine_graph::Buffer], _frames: usize) -> EngineResult<()> {
        self.calls += 1;
        if self.calls == 3 {
            return Err(EngineStatus::error("synthetic failure on call 3"));
        }
        if let Some(idx) = self.base.connected_buffer(0) {
            if let engine_graph::Buffer::Float { samples } = &mut buffers[idx] {
                samples.fill(0.5);
            }
        }
        Ok(())
    }
}

/// A processor errors on its third `process_block`. It
/// transitions to BROKEN and its outputs go silent for every block after
/// that; the realm keeps rendering regardless.
#[test]
fn scenario_broken_processor_isolation() {
    let realm = Realm::new("root", 48_000, 4);
    realm.add_processor(1, Box::new(BreaksOnThirdCall::new(1)));

    let mut spec = silence_spec();
    spec.append_processor(1, "breaker").unwrap();
    let out = spec
        .append_buffer("breaker:out", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    spec.append_opcode(Instruction::new(
        OpCode::ConnectPort,
        vec![OpArg::Int(0), OpArg::Str("out".into()), OpArg::Int(out as i64)],
    ));
    spec.append_opcode(Instruction::new(OpCode::Call, vec![OpArg::Int(0)]));
    spec.append_opcode(Instruction::new(OpCode::End, vec![]));

    realm.set_spec(Arc::new(spec)).unwrap();
    assert!(realm.get_active_program());

    realm.process_block(4, 0).unwrap(); // init pass (CONNECT_PORT only)
    for block in 1..=10u32 {
        let result = realm.process_block(4, 0);
        let out_samples = realm.with_buffer("breaker:out", |b| b.as_samples().unwrap().to_vec()).unwrap();
        if block < 3 {
            result.unwrap();
            assert_eq!(out_samples, vec![0.5; 4]);
        } else if block == 3 {
            assert!(result.is_err());
            assert_eq!(out_samples, vec![0.0; 4]);
        } else {
            // The engine keeps calling a BROKEN processor every block; it
            // just clears its outputs instead of running its DSP.
            result.unwrap();
            assert_eq!(out_samples, vec![0.0; 4]);
        }
    }
}

/// The parent's `CALL_CHILD_REALM` splices a child realm's sink into its own
/// output buffers and folds the child's perf spans under the opcode's
/// active parent span.
#[test]
fn scenario_child_realm_splice() {
    let child = Arc::new(Realm::new("child", 48_000, 4));
    child.add_control_value("half", 0.5);
    let mut child_spec = Spec::new(120, MusicalDuration::new(2, 1));
    child_spec
        .append_buffer("sink:in:left", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    child_spec
        .append_buffer("sink:in:right", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    let half = child_spec.append_control_value("half", 0.5).unwrap();
    let child_left = child_spec.buffer_index("sink:in:left").unwrap();
    let child_right = child_spec.buffer_index("sink:in:right").unwrap();
    child_spec.append_opcode(Instruction::new(
        OpCode::Clear,
        vec![OpArg::Int(child_right as i64)],
    ));
    child_spec.append_opcode(Instruction::new(
        OpCode::FetchControlValue,
        vec![OpArg::Int(half as i64), OpArg::Int(child_left as i64)],
    ));
    child_spec.append_opcode(Instruction::new(OpCode::End, vec![]));
    child.set_spec(Arc::new(child_spec)).unwrap();
    assert!(child.get_active_program());
    child.process_block(4, 0).unwrap(); // init pass

    let parent = Realm::new("parent", 48_000, 4);
    parent.add_child_realm("child", Arc::clone(&child));

    let mut parent_spec = Spec::new(120, MusicalDuration::new(2, 1));
    parent_spec
        .append_buffer("sink:in:left", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    parent_spec
        .append_buffer("sink:in:right", BufferType::FloatAudioBlock { block_size: 4 })
        .unwrap();
    parent_spec.append_child_realm("child").unwrap();
    parent_spec.append_opcode(Instruction::new(
        OpCode::CallChildRealm,
        vec![
            OpArg::Int(0),
            OpArg::Int(parent_spec.buffer_index("sink:in:left").unwrap() as i64),
            OpArg::Int(parent_spec.buffer_index("sink:in:right").unwrap() as i64),
        ],
    ));
    parent_spec.append_opcode(Instruction::new(OpCode::End, vec![]));

    parent.set_spec(Arc::new(parent_spec)).unwrap();
    assert!(parent.get_active_program());
    parent.process_block(4, 0).unwrap(); // init pass
    parent.process_block(4, 0).unwrap();

    let out_left = parent.with_buffer("sink:in:left", |b| b.as_samples().unwrap().to_vec()).unwrap();
    assert_eq!(out_left, vec![0.5; 4]);
}
