//! The backend boundary: delivers one rendered block to a sink
//! (device / file / null) per the three channels a `Program` ever writes
//! to. Concrete device I/O (`cpal`) is one variant among several; nothing
//! upstream of this crate ever reaches past the [`AudioBackend`] trait into
//! a concrete device API, which is also why it takes an
//! [`engine_graph::Buffer`] rather than a `Realm` directly -- the `Realm`
//! lives in `engine-core`, which depends on this crate to drive a backend,
//! so the dependency cannot run the other way.

pub mod cpal_backend;
pub mod null_backend;
pub mod renderer_backend;

use engine_graph::Buffer;
use engine_rt::EngineResult;

pub use cpal_backend::CpalBackend;
pub use null_backend::NullBackend;
pub use renderer_backend::RendererBackend;

/// The sink channels a block is ever delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    AudioLeft,
    AudioRight,
    Events,
}

/// Everything a backend needs about the block it is about to deliver.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    pub sample_rate: u32,
    pub block_size: usize,
    pub sample_pos: u64,
    /// Pacing factor a backend may honor in `end_block`: `1.0` paces to
    /// wall-clock real time, `0.0` renders as fast as possible (used by
    /// [`NullBackend`] and [`RendererBackend`] in tests and offline renders).
    pub time_scale: f32,
}

/// Delivers rendered blocks to a sink. The engine's RT loop calls
/// `begin_block`, one `output` per sink buffer the active `Program`
/// produced, then `end_block`, every block.
pub trait AudioBackend: Send {
    fn setup(&mut self, ctx: &BlockContext) -> EngineResult<()>;
    fn cleanup(&mut self);

    /// Delimits the start of a block.
    fn begin_block(&mut self, ctx: &BlockContext) -> EngineResult<()>;

    /// Delimits the end of a block. May sleep to honor `time_scale`. Always
    /// called, even when the block aborted partway through, since the
    /// engine drives it from a scope guard.
    fn end_block(&mut self, ctx: &BlockContext) -> EngineResult<()>;

    fn output(&mut self, ctx: &BlockContext, channel: Channel, buffer: &Buffer) -> EngineResult<()>;
}
