use engine_graph::Buffer;
use engine_rt::EngineStatus;

use crate::processor::{NodeDescription, PortDirection, PortSpec, PortType, Processor, ProcessorBase, ProcessorId};

/// The closed set of concrete processor variants. A `Spec`'s
/// `NodeDescription` selects one of these by tag rather than a type string;
/// each variant's DSP algorithm is out of scope beyond enough of a body to
/// prove the lifecycle/port/message plumbing this crate owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Null,
    Csound,
    Plugin,
    SoundFile,
    Instrument,
    PianoRoll,
    SampleScript,
    MidiSource,
    MidiCcToCv,
    StepSequencer,
    CustomCsound,
    ControlTrack,
    MidiVelocityMapper,
    MidiLooper,
    MidiMonitor,
    Oscilloscope,
    Vumeter,
    Vca,
    Noise,
    Oscillator,
}

/// Discards its inputs and clears its outputs every block. The minimal
/// processor used by silence-through scenarios and as a placeholder node
/// while a graph is being assembled.
pub struct NullProcessor {
    base: ProcessorBase,
}

impl NullProcessor {
    pub fn new(id: ProcessorId, realm_name: impl Into<String>, node_id: impl Into<String>) -> Self {
        let description = NodeDescription::new(
            ProcessorKind::Null,
            vec![PortSpec::new("out", PortDirection::Output, PortType::Audio)],
        );
        NullProcessor {
            base: ProcessorBase::new(id, realm_name, node_id, description),
        }
    }
}

impl Processor for NullProcessor {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }
    fn process_block_internal(&mut self, buffers: &mut [Buffer], _frames: usize) -> Result<(), EngineStatus> {
        self.clear_outputs(buffers);
        Ok(())
    }
}

/// Fills its output port with uniform noise every block (the `NOISE`
/// opcode's processor-shaped counterpart, used where a graph wants a node
/// rather than an inline opcode).
pub struct NoiseProcessor {
    base: ProcessorBase,
}

impl NoiseProcessor {
    pub fn new(id: ProcessorId, realm_name: impl Into<String>, node_id: impl Into<String>) -> Self {
        let description = NodeDescription::new(
            ProcessorKind::Noise,
            vec![PortSpec::new("out", PortDirection::Output, PortType::Audio)],
        );
        NoiseProcessor {
            base: ProcessorBase::new(id, realm_name, node_id, description),
        }
    }
}

impl Processor for NoiseProcessor {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }
    fn process_block_internal(&mut self, buffers: &mut [Buffer], frames: usize) -> Result<(), EngineStatus> {
        if let Some(buf_idx) = self.base.connected_buffer(0) {
            if let Some(Buffer::Float { samples }) = buffers.get_mut(buf_idx) {
                for sample in samples.iter_mut().take(frames) {
                    *sample = 2.0 * rand::random::<f32>() - 1.0;
                }
            }
        }
        Ok(())
    }
}

/// A metering sink: reads its input port's RMS every block and never
/// writes audio. Represents `Vumeter`/`Oscilloscope` -- both only ever
/// read, so they share this shape.
pub struct VumeterProcessor {
    base: ProcessorBase,
    pub last_rms: f32,
}

impl VumeterProcessor {
    pub fn new(id: ProcessorId, realm_name: impl Into<String>, node_id: impl Into<String>) -> Self {
        let description = NodeDescription::new(
            ProcessorKind::Vumeter,
            vec![PortSpec::new("in", PortDirection::Input, PortType::Audio)],
        );
        VumeterProcessor {
            base: ProcessorBase::new(id, realm_name, node_id, description),
            last_rms: 0.0,
        }
    }
}

impl Processor for VumeterProcessor {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }
    fn process_block_internal(&mut self, buffers: &mut [Buffer], _frames: usize) -> Result<(), EngineStatus> {
        if let Some(buf_idx) = self.base.connected_buffer(0) {
            if let Some(buf) = buffers.get(buf_idx) {
                self.last_rms = buf.rms()?;
            }
        }
        Ok(())
    }

    /// A pure sink has no output ports to clear; this override skips the
    /// default's (harmless, but pointless) zero-port scan.
    fn clear_outputs(&self, _buffers: &mut [Buffer]) {}
}

/// Accepts only `set_parameters` (never the inline-message path); the
/// control track has no port-level audio/event input of its own, so this
/// is the sole mutation path (see DESIGN.md for the rationale).
pub struct ControlTrackProcessor {
    base: ProcessorBase,
}

impl ControlTrackProcessor {
    pub fn new(id: ProcessorId, realm_name: impl Into<String>, node_id: impl Into<String>) -> Self {
        let description = NodeDescription::new(
            ProcessorKind::ControlTrack,
            vec![PortSpec::new("out", PortDirection::Output, PortType::Control)],
        );
        ControlTrackProcessor {
            base: ProcessorBase::new(id, realm_name, node_id, description),
        }
    }
}

impl Processor for ControlTrackProcessor {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    /// The inline-message path is deliberately a no-op; parameters only
    /// arrive via `set_parameters_internal`.
    fn handle_message_internal(&mut self, _bytes: &[u8]) -> Result<(), EngineStatus> {
        Ok(())
    }

    fn set_parameters_internal(&mut self, bytes: &[u8]) -> Result<(), EngineStatus> {
        self.base.parameters.insert("control_points".to_string(), bytes.to_vec());
        Ok(())
    }

    fn process_block_internal(&mut self, buffers: &mut [Buffer], _frames: usize) -> Result<(), EngineStatus> {
        if let Some(buf_idx) = self.base.connected_buffer(0) {
            if let Some(Buffer::ControlValue { value, generation }) = buffers.get_mut(buf_idx) {
                *generation = generation.wrapping_add(1);
                let _ = value;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_graph::BufferType;

    #[test]
    fn null_processor_clears_its_output() {
        let mut p = NullProcessor::new(1, "r", "n");
        p.setup().unwrap();
        p.connect_port(0, 0);
        let mut buffers = vec![Buffer::new(BufferType::FloatAudioBlock { block_size: 4 })];
        if let Buffer::Float { samples } = &mut buffers[0] {
            samples.fill(5.0);
        }
        p.process_block(&mut buffers, 4).unwrap();
        assert_eq!(buffers[0].as_samples().unwrap(), &[0.0; 4]);
    }

    #[test]
    fn noise_processor_fills_requested_frames() {
        let mut p = NoiseProcessor::new(2, "r", "n");
        p.setup().unwrap();
        p.connect_port(0, 0);
        let mut buffers = vec![Buffer::new(BufferType::FloatAudioBlock { block_size: 4 })];
        p.process_block(&mut buffers, 4).unwrap();
        let samples = buffers[0].as_samples().unwrap();
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn control_track_only_accepts_set_parameters() {
        let mut p = ControlTrackProcessor::new(3, "r", "n");
        p.setup().unwrap();
        p.handle_message(b"ignored inline message").unwrap();
        assert!(!p.base().parameters.contains_key("control_points"));
        p.set_parameters(b"points").unwrap();
        assert_eq!(p.base().parameters.get("control_points").unwrap(), b"points");
    }
}
