use std::path::PathBuf;

use engine_graph::Buffer;
use engine_rt::EngineResult;

use crate::{AudioBackend, BlockContext, Channel};

/// Renders to an in-memory interleaved stereo buffer, optionally flushed to
/// a WAV file on `cleanup` via `hound`. Used for offline rendering and for
/// tests that need to assert on what a program actually produced rather
/// than just that it ran.
pub struct RendererBackend {
    wav_path: Option<PathBuf>,
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
}

impl RendererBackend {
    pub fn new() -> Self {
        RendererBackend {
            wav_path: None,
            left: Vec::new(),
            right: Vec::new(),
            sample_rate: 48_000,
        }
    }

    /// Renders to memory only; `cleanup` performs no file I/O.
    pub fn to_memory() -> Self {
        Self::new()
    }

    /// Renders to memory and writes a 16-bit PCM WAV to `path` on `cleanup`.
    pub fn to_wav_file(path: impl Into<PathBuf>) -> Self {
        RendererBackend {
            wav_path: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn left_channel(&self) -> &[f32] {
        &self.left
    }

    pub fn right_channel(&self) -> &[f32] {
        &self.right
    }

    fn flush_to_wav(&self) -> EngineResult<()> {
        let Some(path) = &self.wav_path else {
            return Ok(());
        };
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|err| engine_rt::EngineStatus::error(format!("wav create failed: {err}")))?;
        let frames = self.left.len().max(self.right.len());
        for i in 0..frames {
            let l = self.left.get(i).copied().unwrap_or(0.0);
            let r = self.right.get(i).copied().unwrap_or(0.0);
            writer
                .write_sample(to_i16(l))
                .map_err(|err| engine_rt::EngineStatus::error(format!("wav write failed: {err}")))?;
            writer
                .write_sample(to_i16(r))
                .map_err(|err| engine_rt::EngineStatus::error(format!("wav write failed: {err}")))?;
        }
        writer
            .finalize()
            .map_err(|err| engine_rt::EngineStatus::error(format!("wav finalize failed: {err}")))?;
        Ok(())
    }
}

impl Default for RendererBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl AudioBackend for RendererBackend {
    fn setup(&mut self, ctx: &BlockContext) -> EngineResult<()> {
        self.sample_rate = ctx.sample_rate;
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Err(err) = self.flush_to_wav() {
            tracing::error!(?err, "renderer backend failed to flush wav file");
        }
    }

    fn begin_block(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
        Ok(())
    }

    fn end_block(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
        Ok(())
    }

    fn output(&mut self, _ctx: &BlockContext, channel: Channel, buffer: &Buffer) -> EngineResult<()> {
        match channel {
            Channel::AudioLeft => {
                self.left.extend_from_slice(buffer.as_samples()?);
                Ok(())
            }
            Channel::AudioRight => {
                self.right.extend_from_slice(buffer.as_samples()?);
                Ok(())
            }
            Channel::Events => Ok(()),
        }
    }
}
