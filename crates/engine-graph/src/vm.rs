use engine_rt::{EngineStatus, MessageBody, MessageQueue, PerfStats};

use crate::buffer::Buffer;
use crate::opcode::OpCode;
use crate::program::Program;

/// A processor the VM can invoke through `CALL`/`CONNECT_PORT`. Kept minimal
/// on purpose: the processor lifecycle (setup/cleanup/broken-state
/// handling) lives one layer up, in the crate that owns `Processor`; the VM
/// only needs enough of an interface to drive one block.
pub trait ProgramProcessor: Send {
    fn connect_port(&mut self, _port_name: &str, _buffer_index: usize) {}

    fn process_block(&mut self, buffers: &mut [Buffer], frames: usize) -> Result<(), EngineStatus>;
}

/// A child `Realm` the VM can splice into the parent program's output via
/// `CALL_CHILD_REALM`.
pub trait ChildRealmExecutor: Send {
    fn process_block(&mut self, frames: usize) -> Result<PerfStats, EngineStatus>;
    fn sink_left(&self) -> Option<&[f32]>;
    fn sink_right(&self) -> Option<&[f32]>;
}

/// Generates the next pseudo-random sample for `NOISE`. A trait rather than
/// a bare `rand::Rng` so tests can inject a deterministic sequence.
pub trait NoiseSource {
    fn next_sample(&mut self) -> f32;
}

/// A single MIDI NOTE_ON (channel 0, middle C, full velocity), status byte
/// first, matching the raw wire shape `AtomData` events carry.
const NOTE_ON_EVENT: [u8; 3] = [0x90, 60, 127];

pub struct RandNoiseSource;

impl NoiseSource for RandNoiseSource {
    fn next_sample(&mut self) -> f32 {
        2.0 * rand::random::<f32>() - 1.0
    }
}

/// Everything the VM needs beyond the `Program` itself to run one block:
/// the processor/child-realm tables a `CALL`/`CALL_CHILD_REALM` indexes
/// into, the out-message queue, perf spans and a noise source.
pub struct VmContext<'a> {
    pub processors: &'a mut [Box<dyn ProgramProcessor>],
    pub child_realms: &'a mut [Box<dyn ChildRealmExecutor>],
    pub messages: &'a mut MessageQueue,
    pub perf: &'a mut PerfStats,
    pub noise: &'a mut dyn NoiseSource,
    /// `(value, generation)` snapshot of the Realm's named `ControlValue`
    /// registry, indexed the same as the active Program's `Spec::control_value`
    /// vector. The VM itself never owns control-value state (`Realm` does);
    /// it only reads whatever snapshot the caller took before this
    /// block, so `FETCH_CONTROL_VALUE`'s `cv` argument indexes here rather
    /// than into the Program's own buffers.
    pub control_values: &'a [(f32, u32)],
    pub now_ns: u64,
}

/// Runs every instruction in `program`'s spec in order against `program`'s
/// buffers. `END` stops the pass early without being an error. On the first
/// pass for a Program version, `CONNECT_PORT` (and nothing else) runs;
/// afterwards it is skipped.
pub fn run_block(program: &mut Program, frames: usize, ctx: &mut VmContext<'_>) -> Result<(), EngineStatus> {
    let is_init_pass = !program.is_initialized();
    let num_ops = program.spec().num_ops();

    for idx in 0..num_ops {
        let (op, args) = {
            let instruction = program.spec().opcode(idx);
            (instruction.op, instruction.args.clone())
        };

        if op.is_init_only() && !is_init_pass {
            continue;
        }
        if !op.is_init_only() && is_init_pass && op != OpCode::End && op != OpCode::Noop {
            // Only CONNECT_PORT runs on the init pass; everything else waits
            // for the first real block.
            continue;
        }

        match run_one(program, op, &args, frames, ctx) {
            Ok(true) => break,
            Ok(false) => {}
            Err(status) => return Err(status),
        }
    }

    if is_init_pass {
        program.mark_initialized();
    }
    Ok(())
}

/// Returns `Ok(true)` when the instruction stream should stop (an `END`).
fn run_one(
    program: &mut Program,
    op: OpCode,
    args: &[crate::opcode::OpArg],
    frames: usize,
    ctx: &mut VmContext<'_>,
) -> Result<bool, EngineStatus> {
    match op {
        OpCode::Noop => Ok(false),
        OpCode::End => Ok(true),

        OpCode::Copy => {
            let (src, dst) = two_buffer_indices(args)?;
            copy_between(program.buffers_mut(), src, dst, Buffer::copy_from)?;
            Ok(false)
        }
        OpCode::Clear => {
            let idx = one_buffer_index(args)?;
            program.buffer_mut(idx).clear();
            Ok(false)
        }
        OpCode::Mix => {
            let (src, dst) = two_buffer_indices(args)?;
            copy_between(program.buffers_mut(), src, dst, Buffer::mix)?;
            Ok(false)
        }
        OpCode::Mul => {
            let idx = one_buffer_index(args)?;
            let factor = args
                .get(1)
                .and_then(|a| a.as_float())
                .ok_or_else(|| EngineStatus::error("MUL missing float factor"))?;
            program.buffer_mut(idx).mul(factor)?;
            Ok(false)
        }
        OpCode::SetFloat => {
            let idx = one_buffer_index(args)?;
            let value = args
                .get(1)
                .and_then(|a| a.as_float())
                .ok_or_else(|| EngineStatus::error("SET_FLOAT missing value"))?;
            program.buffer_mut(idx).set_float(value)?;
            Ok(false)
        }
        OpCode::FetchControlValue => {
            let (cv_idx, dst_idx) = two_buffer_indices(args)?;
            let (value, _generation) = *ctx
                .control_values
                .get(cv_idx)
                .ok_or_else(|| EngineStatus::error("FETCH_CONTROL_VALUE unknown control value index"))?;
            match program.buffer_mut(dst_idx) {
                Buffer::Float { samples } => {
                    samples.fill(value);
                    Ok(false)
                }
                Buffer::ControlValue { value: dst, generation } => {
                    *dst = value;
                    *generation = _generation;
                    Ok(false)
                }
                Buffer::IntControlValue { .. } => Err(EngineStatus::error(
                    "FETCH_CONTROL_VALUE into an IntControlValue buffer is declared unimplemented",
                )),
                _ => Err(EngineStatus::error(
                    "FETCH_CONTROL_VALUE destination is not a float buffer",
                )),
            }
        }
        OpCode::PostRms => {
            let idx = one_buffer_index(args)?;
            let node_id = args
                .get(1)
                .and_then(|a| a.as_str())
                .unwrap_or("unknown")
                .to_string();
            let rms = program.buffer(idx).rms()?;
            ctx.messages.push(MessageBody::NodeMessage {
                node_id,
                payload: rms.to_le_bytes().to_vec(),
            });
            Ok(false)
        }
        OpCode::Noise => {
            let idx = one_buffer_index(args)?;
            match program.buffer_mut(idx) {
                Buffer::Float { samples } => {
                    for sample in samples.iter_mut().take(frames) {
                        *sample = ctx.noise.next_sample();
                    }
                    Ok(false)
                }
                _ => Err(EngineStatus::error("NOISE destination is not an audio block")),
            }
        }
        OpCode::Sine => Err(EngineStatus::error("SINE is not implemented yet.")),
        OpCode::MidiMonkey => {
            let idx = one_buffer_index(args)?;
            let prob = args
                .get(1)
                .and_then(|a| a.as_float())
                .ok_or_else(|| EngineStatus::error("MIDI_MONKEY missing probability"))?;
            // Draw a uniform [0, 1) roll off the same noise source NOISE uses,
            // rather than pulling in a second RNG just for this one opcode.
            let roll = (ctx.noise.next_sample() + 1.0) / 2.0;
            match program.buffer_mut(idx) {
                Buffer::Atom { events } => {
                    if roll < prob {
                        events.extend_from_slice(&NOTE_ON_EVENT);
                    }
                    Ok(false)
                }
                _ => Err(EngineStatus::error("MIDI_MONKEY destination is not an atom buffer")),
            }
        }

        OpCode::ConnectPort => {
            let processor_idx = args
                .first()
                .and_then(|a| a.as_int())
                .ok_or_else(|| EngineStatus::error("CONNECT_PORT missing processor index"))? as usize;
            let port_name = args
                .get(1)
                .and_then(|a| a.as_str())
                .ok_or_else(|| EngineStatus::error("CONNECT_PORT missing port name"))?;
            let buffer_idx = args
                .get(2)
                .and_then(|a| a.as_int())
                .ok_or_else(|| EngineStatus::error("CONNECT_PORT missing buffer index"))? as usize;
            let processor = ctx
                .processors
                .get_mut(processor_idx)
                .ok_or_else(|| EngineStatus::error("CONNECT_PORT unknown processor index"))?;
            processor.connect_port(port_name, buffer_idx);
            Ok(false)
        }
        OpCode::Call => {
            let processor_idx = args
                .first()
                .and_then(|a| a.as_int())
                .ok_or_else(|| EngineStatus::error("CALL missing processor index"))? as usize;
            let processor = ctx
                .processors
                .get_mut(processor_idx)
                .ok_or_else(|| EngineStatus::error("CALL unknown processor index"))?;
            processor.process_block(program.buffers_mut(), frames)
                .map(|()| false)
        }
        OpCode::CallChildRealm => {
            let realm_idx = args
                .first()
                .and_then(|a| a.as_int())
                .ok_or_else(|| EngineStatus::error("CALL_CHILD_REALM missing realm index"))? as usize;
            let (dst_left, dst_right) = two_buffer_indices(&args[1..])?;
            let realm = ctx
                .child_realms
                .get_mut(realm_idx)
                .ok_or_else(|| EngineStatus::error("CALL_CHILD_REALM unknown realm index"))?;
            match realm.process_block(frames) {
                Ok(child_perf) => {
                    let parent_span = ctx.perf.current_span_id();
                    for span in child_perf.spans() {
                        let mut rewritten = *span;
                        if rewritten.parent_id == 0 {
                            rewritten.parent_id = parent_span;
                        }
                        ctx.perf.append_span(rewritten, "child_realm");
                    }
                    if let (Some(left), Some(right)) = (realm.sink_left(), realm.sink_right()) {
                        let left = left.to_vec();
                        let right = right.to_vec();
                        if let Buffer::Float { samples } = program.buffer_mut(dst_left) {
                            samples.copy_from_slice(&left[..samples.len().min(left.len())]);
                        }
                        if let Buffer::Float { samples } = program.buffer_mut(dst_right) {
                            samples.copy_from_slice(&right[..samples.len().min(right.len())]);
                        }
                    }
                    Ok(false)
                }
                Err(status) => {
                    program.buffer_mut(dst_left).clear();
                    program.buffer_mut(dst_right).clear();
                    tracing::warn!(error = %status, "child realm failed, clearing its outputs");
                    Ok(false)
                }
            }
        }

        OpCode::LogRms => {
            let idx = one_buffer_index(args)?;
            let node_id = args.get(1).and_then(|a| a.as_str()).unwrap_or("unknown");
            let rms = program.buffer(idx).rms()?;
            tracing::debug!(node_id, rms, "LOG_RMS");
            Ok(false)
        }
        OpCode::LogAtom => {
            let idx = one_buffer_index(args)?;
            let node_id = args.get(1).and_then(|a| a.as_str()).unwrap_or("unknown");
            let event_count = match program.buffer(idx) {
                Buffer::Atom { events } => events.len(),
                _ => return Err(EngineStatus::error("LOG_ATOM source is not an atom buffer")),
            };
            tracing::debug!(node_id, event_count, "LOG_ATOM");
            Ok(false)
        }
    }
}

fn one_buffer_index(args: &[crate::opcode::OpArg]) -> Result<usize, EngineStatus> {
    args.first()
        .and_then(|a| a.as_int())
        .map(|v| v as usize)
        .ok_or_else(|| EngineStatus::error("opcode missing buffer index"))
}

fn two_buffer_indices(args: &[crate::opcode::OpArg]) -> Result<(usize, usize), EngineStatus> {
    let a = args
        .first()
        .and_then(|a| a.as_int())
        .ok_or_else(|| EngineStatus::error("opcode missing first buffer index"))? as usize;
    let b = args
        .get(1)
        .and_then(|a| a.as_int())
        .ok_or_else(|| EngineStatus::error("opcode missing second buffer index"))? as usize;
    Ok((a, b))
}

fn copy_between(
    buffers: &mut [Buffer],
    src: usize,
    dst: usize,
    op: impl Fn(&mut Buffer, &Buffer) -> Result<(), EngineStatus>,
) -> Result<(), EngineStatus> {
    if src == dst {
        return Err(EngineStatus::error("source and destination buffers must differ"));
    }
    let max = src.max(dst);
    if max >= buffers.len() {
        return Err(EngineStatus::error("buffer index out of range"));
    }
    let (lo, hi) = if src < dst { (src, dst) } else { (dst, src) };
    let (left, right) = buffers.split_at_mut(hi);
    let (lo_buf, hi_buf) = (&mut left[lo], &mut right[0]);
    if src < dst {
        op(hi_buf, lo_buf)
    } else {
        op(lo_buf, hi_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferType;
    use crate::opcode::{Instruction, OpArg};
    use crate::spec::Spec;
    use musical_time::MusicalDuration;
    use std::sync::Arc;

    struct FixedNoise(f32);
    impl NoiseSource for FixedNoise {
        fn next_sample(&mut self) -> f32 {
            self.0
        }
    }

    fn run(program: &mut Program, frames: usize) -> Result<(), EngineStatus> {
        let mut processors: Vec<Box<dyn ProgramProcessor>> = Vec::new();
        let mut child_realms: Vec<Box<dyn ChildRealmExecutor>> = Vec::new();
        let mut messages = MessageQueue::new();
        let mut perf = PerfStats::new();
        let mut noise = FixedNoise(0.5);
        let mut ctx = VmContext {
            processors: &mut processors,
            child_realms: &mut child_realms,
            messages: &mut messages,
            perf: &mut perf,
            noise: &mut noise,
            control_values: &[],
            now_ns: 0,
        };
        run_block(program, frames, &mut ctx)
    }

    fn run_with_control_values(
        program: &mut Program,
        frames: usize,
        control_values: &[(f32, u32)],
    ) -> Result<(), EngineStatus> {
        let mut processors: Vec<Box<dyn ProgramProcessor>> = Vec::new();
        let mut child_realms: Vec<Box<dyn ChildRealmExecutor>> = Vec::new();
        let mut messages = MessageQueue::new();
        let mut perf = PerfStats::new();
        let mut noise = FixedNoise(0.5);
        let mut ctx = VmContext {
            processors: &mut processors,
            child_realms: &mut child_realms,
            messages: &mut messages,
            perf: &mut perf,
            noise: &mut noise,
            control_values,
            now_ns: 0,
        };
        run_block(program, frames, &mut ctx)
    }

    #[test]
    fn clear_then_set_float_then_end() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        let buf = spec
            .append_buffer("osc:out", BufferType::FloatAudioBlock { block_size: 4 })
            .unwrap();
        spec.append_buffer("sink:in:left", BufferType::FloatAudioBlock { block_size: 4 })
            .unwrap();
        spec.append_buffer("sink:in:right", BufferType::FloatAudioBlock { block_size: 4 })
            .unwrap();
        spec.append_opcode(Instruction::new(OpCode::Clear, vec![OpArg::Int(buf as i64)]));
        spec.append_opcode(Instruction::new(
            OpCode::SetFloat,
            vec![OpArg::Int(buf as i64), OpArg::Float(1.0)],
        ));
        spec.append_opcode(Instruction::new(OpCode::End, vec![]));

        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        // init pass (no CONNECT_PORT present, still consumes a pass)
        run(&mut program, 4).unwrap();
        run(&mut program, 4).unwrap();
        assert_eq!(program.buffer(buf).as_samples().unwrap()[0], 1.0);
    }

    #[test]
    fn noise_fills_requested_frames() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        let buf = spec
            .append_buffer("noise:out", BufferType::FloatAudioBlock { block_size: 4 })
            .unwrap();
        spec.append_opcode(Instruction::new(OpCode::Noise, vec![OpArg::Int(buf as i64)]));
        spec.append_opcode(Instruction::new(OpCode::End, vec![]));
        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        run(&mut program, 4).unwrap();
        run(&mut program, 4).unwrap();
        assert_eq!(program.buffer(buf).as_samples().unwrap(), &[0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn midi_monkey_emits_note_on_when_roll_beats_probability() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        let buf = spec.append_buffer("atom:out", BufferType::AtomData).unwrap();
        spec.append_opcode(Instruction::new(
            OpCode::MidiMonkey,
            vec![OpArg::Int(buf as i64), OpArg::Float(1.0)],
        ));
        spec.append_opcode(Instruction::new(OpCode::End, vec![]));
        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        run(&mut program, 4).unwrap(); // init pass
        run(&mut program, 4).unwrap();
        match program.buffer(buf) {
            Buffer::Atom { events } => assert_eq!(events.as_slice(), &[0x90, 60, 127]),
            _ => panic!("expected atom buffer"),
        }
    }

    #[test]
    fn midi_monkey_emits_nothing_when_probability_is_zero() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        let buf = spec.append_buffer("atom:out", BufferType::AtomData).unwrap();
        spec.append_opcode(Instruction::new(
            OpCode::MidiMonkey,
            vec![OpArg::Int(buf as i64), OpArg::Float(0.0)],
        ));
        spec.append_opcode(Instruction::new(OpCode::End, vec![]));
        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        run(&mut program, 4).unwrap();
        run(&mut program, 4).unwrap();
        match program.buffer(buf) {
            Buffer::Atom { events } => assert!(events.is_empty()),
            _ => panic!("expected atom buffer"),
        }
    }

    #[test]
    fn sine_is_unimplemented() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        let buf = spec
            .append_buffer("sine:out", BufferType::FloatAudioBlock { block_size: 4 })
            .unwrap();
        spec.append_opcode(Instruction::new(OpCode::Sine, vec![OpArg::Int(buf as i64)]));
        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        run(&mut program, 4).unwrap();
        assert!(run(&mut program, 4).is_err());
    }

    #[test]
    fn fetch_control_value_reads_the_context_snapshot_not_a_program_buffer() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        spec.append_control_value("gain", 0.5).unwrap();
        let dst = spec
            .append_buffer("gain:fetched", BufferType::FloatAudioBlock { block_size: 2 })
            .unwrap();
        spec.append_opcode(Instruction::new(
            OpCode::FetchControlValue,
            vec![OpArg::Int(0), OpArg::Int(dst as i64)],
        ));
        spec.append_opcode(Instruction::new(OpCode::End, vec![]));
        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        run_with_control_values(&mut program, 2, &[(0.75, 3)]).unwrap();
        run_with_control_values(&mut program, 2, &[(0.75, 3)]).unwrap();
        assert_eq!(program.buffer(dst).as_samples().unwrap(), &[0.75, 0.75]);
    }

    #[test]
    fn fetch_control_value_into_int_control_value_is_unimplemented() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        spec.append_control_value("gain", 0.5).unwrap();
        let dst = spec
            .append_buffer("gain:int", BufferType::IntControlValue)
            .unwrap();
        spec.append_opcode(Instruction::new(
            OpCode::FetchControlValue,
            vec![OpArg::Int(0), OpArg::Int(dst as i64)],
        ));
        spec.append_opcode(Instruction::new(OpCode::End, vec![]));
        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        run_with_control_values(&mut program, 2, &[(0.75, 3)]).unwrap();
        assert!(run_with_control_values(&mut program, 2, &[(0.75, 3)]).is_err());
    }

    #[test]
    fn mix_adds_source_into_destination() {
        let mut spec = Spec::new(120, MusicalDuration::new(2, 1));
        let a = spec
            .append_buffer("a", BufferType::FloatAudioBlock { block_size: 2 })
            .unwrap();
        let b = spec
            .append_buffer("b", BufferType::FloatAudioBlock { block_size: 2 })
            .unwrap();
        spec.append_opcode(Instruction::new(
            OpCode::SetFloat,
            vec![OpArg::Int(a as i64), OpArg::Float(1.0)],
        ));
        spec.append_opcode(Instruction::new(
            OpCode::Mix,
            vec![OpArg::Int(a as i64), OpArg::Int(b as i64)],
        ));
        spec.append_opcode(Instruction::new(OpCode::End, vec![]));
        let mut program = Program::new(Arc::new(spec), 48_000, 1);
        run(&mut program, 2).unwrap();
        run(&mut program, 2).unwrap();
        assert_eq!(program.buffer(b).as_samples().unwrap()[0], 1.0);
    }
}
