use engine_graph::Buffer;
use engine_rt::{EngineResult, EngineStatus};

use crate::{AudioBackend, BlockContext, Channel};

/// Delivers blocks to a real output device via `cpal`. `output()` stages
/// samples into per-channel scratch vectors; `end_block` interleaves them
/// and pushes the frame into a ring buffer the device's audio callback
/// drains, the same producer/consumer split `mixer_rt` uses for its command
/// and automation queues -- the RT thread driving `Realm::process_block`
/// never touches the device callback directly, it only ever pushes.
pub struct CpalBackend {
    #[cfg(feature = "cpal")]
    stream: Option<cpal::Stream>,
    #[cfg(feature = "cpal")]
    producer: Option<ringbuf::HeapProducer<f32>>,
    pending_left: Vec<f32>,
    pending_right: Vec<f32>,
    channels: usize,
}

impl Default for CpalBackend {
    fn default() -> Self {
        CpalBackend {
            #[cfg(feature = "cpal")]
            stream: None,
            #[cfg(feature = "cpal")]
            producer: None,
            pending_left: Vec::new(),
            pending_right: Vec::new(),
            channels: 2,
        }
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        CpalBackend::default()
    }
}

#[cfg(feature = "cpal")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    /// Ring buffer depth in frames; a few blocks' worth of headroom against
    /// scheduling jitter between the RT thread and the device callback.
    const RING_CAPACITY_FRAMES: usize = 8192;

    impl AudioBackend for CpalBackend {
        fn setup(&mut self, ctx: &BlockContext) -> EngineResult<()> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| EngineStatus::error("no default output device"))?;
            let mut supported = device
                .supported_output_configs()
                .map_err(|err| EngineStatus::error(format!("no supported output config: {err}")))?;
            let desired_rate = cpal::SampleRate(ctx.sample_rate);
            let range = supported
                .find(|range| {
                    range.min_sample_rate() <= desired_rate && range.max_sample_rate() >= desired_rate
                })
                .ok_or_else(|| EngineStatus::error("no output config matches requested sample rate"))?;
            let config = range.with_sample_rate(desired_rate).config();
            self.channels = config.channels as usize;

            let rb = ringbuf::HeapRb::<f32>::new(RING_CAPACITY_FRAMES * self.channels);
            let (producer, mut consumer) = rb.split();
            self.producer = Some(producer);

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for sample in data.iter_mut() {
                            *sample = consumer.pop().unwrap_or(0.0);
                        }
                    },
                    move |err| tracing::error!(%err, "cpal stream error"),
                    None,
                )
                .map_err(|err| EngineStatus::error(format!("failed to open output stream: {err}")))?;
            stream
                .play()
                .map_err(|err| EngineStatus::error(format!("failed to start output stream: {err}")))?;
            self.stream = Some(stream);
            Ok(())
        }

        fn cleanup(&mut self) {
            if let Some(stream) = self.stream.take() {
                let _ = stream.pause();
            }
            self.producer = None;
        }

        fn begin_block(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
            self.pending_left.clear();
            self.pending_right.clear();
            Ok(())
        }

        fn end_block(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
            let Some(producer) = self.producer.as_mut() else {
                return Err(EngineStatus::error("cpal backend used before setup"));
            };
            let frames = self.pending_left.len().max(self.pending_right.len());
            for i in 0..frames {
                let l = self.pending_left.get(i).copied().unwrap_or(0.0);
                let r = self.pending_right.get(i).copied().unwrap_or(0.0);
                let _ = producer.push(l);
                if self.channels > 1 {
                    let _ = producer.push(r);
                }
            }
            Ok(())
        }

        fn output(&mut self, _ctx: &BlockContext, channel: Channel, buffer: &Buffer) -> EngineResult<()> {
            match channel {
                Channel::AudioLeft => {
                    self.pending_left.extend_from_slice(buffer.as_samples()?);
                    Ok(())
                }
                Channel::AudioRight => {
                    self.pending_right.extend_from_slice(buffer.as_samples()?);
                    Ok(())
                }
                Channel::Events => Ok(()),
            }
        }
    }
}

#[cfg(not(feature = "cpal"))]
impl AudioBackend for CpalBackend {
    fn setup(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
        Err(EngineStatus::error(
            "cpal backend not compiled into this build (enable the `cpal` feature)",
        ))
    }

    fn cleanup(&mut self) {}

    fn begin_block(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
        Ok(())
    }

    fn end_block(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
        Ok(())
    }

    fn output(&mut self, _ctx: &BlockContext, _channel: Channel, _buffer: &Buffer) -> EngineResult<()> {
        Ok(())
    }
}
