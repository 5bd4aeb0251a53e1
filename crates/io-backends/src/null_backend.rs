use std::thread;
use std::time::Duration;

use engine_graph::Buffer;
use engine_rt::EngineResult;

use crate::{AudioBackend, BlockContext, Channel};

/// Discards every block. Paces itself against `time_scale` in `end_block`
/// so a program driven by a [`NullBackend`] still advances at something
/// close to real time when that is wanted, and as fast as the host can run
/// it when `time_scale` is `0.0` (offline smoke tests, benches).
#[derive(Debug, Default)]
pub struct NullBackend {
    blocks_rendered: u64,
}

impl NullBackend {
    pub fn new() -> Self {
        NullBackend::default()
    }

    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered
    }
}

impl AudioBackend for NullBackend {
    fn setup(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn begin_block(&mut self, _ctx: &BlockContext) -> EngineResult<()> {
        Ok(())
    }

    fn end_block(&mut self, ctx: &BlockContext) -> EngineResult<()> {
        self.blocks_rendered += 1;
        if ctx.time_scale > 0.0 {
            let block_seconds = ctx.block_size as f32 / ctx.sample_rate.max(1) as f32;
            let paced = Duration::from_secs_f32(block_seconds / ctx.time_scale);
            thread::sleep(paced);
        }
        Ok(())
    }

    fn output(&mut self, _ctx: &BlockContext, _channel: Channel, _buffer: &Buffer) -> EngineResult<()> {
        Ok(())
    }
}
