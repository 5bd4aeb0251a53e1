use std::sync::Arc;

use engine_rt::EngineStatus;
use musical_time::TimeMapper;

use crate::buffer::{Buffer, BufferArena, BufferArenaPool, BufferType};
use crate::spec::Spec;

/// An immutable `Spec` paired with the buffer storage and time mapping it
/// was compiled against. A `Realm` swaps `Program`s atomically; the VM only
/// ever sees one at a time.
pub struct Program {
    spec: Arc<Spec>,
    arena: BufferArena,
    time_mapper: TimeMapper,
    initialized: bool,
    version: u32,
}

impl Program {
    /// Builds a program with its own dedicated (unpooled) arena. Convenient
    /// for tests and one-off renders; `Realm::set_spec` uses
    /// [`Program::with_arena`] instead so arenas are pooled across swaps.
    pub fn new(spec: Arc<Spec>, sample_rate: u32, version: u32) -> Self {
        let types = Self::buffer_types(&spec);
        let arena = BufferArena::new(&types);
        Self::with_arena(spec, arena, sample_rate, version)
    }

    /// Builds a program against an arena acquired from a
    /// [`BufferArenaPool`], the path `Realm::set_spec` takes.
    pub fn from_pool(
        spec: Arc<Spec>,
        pool: &mut BufferArenaPool,
        sample_rate: u32,
        version: u32,
    ) -> Self {
        let types = Self::buffer_types(&spec);
        let requested: usize = types.iter().map(BufferType::size).sum();
        let arena = pool.acquire(requested, &types);
        Self::with_arena(spec, arena, sample_rate, version)
    }

    fn with_arena(spec: Arc<Spec>, arena: BufferArena, sample_rate: u32, version: u32) -> Self {
        let mut time_mapper = TimeMapper::new(sample_rate);
        time_mapper.set_bpm(spec.bpm());
        time_mapper.set_duration(spec.duration());
        Program {
            spec,
            arena,
            time_mapper,
            initialized: false,
            version,
        }
    }

    fn buffer_types(spec: &Spec) -> Vec<BufferType> {
        (0..spec.num_buffers()).map(|idx| spec.buffer(idx).ty).collect()
    }

    /// Releases this program's arena back into `pool` for reuse by the next
    /// swap. Called from the control thread once the program has been
    /// fully deactivated (`Realm::run_maintenance`).
    pub fn release_arena(self, pool: &mut BufferArenaPool) {
        pool.release(self.arena);
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn time_mapper(&self) -> &TimeMapper {
        &self.time_mapper
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn buffer(&self, idx: usize) -> &Buffer {
        &self.arena.buffers()[idx]
    }

    pub fn buffer_mut(&mut self, idx: usize) -> &mut Buffer {
        &mut self.arena.buffers_mut()[idx]
    }

    /// Splits the buffer slice so the VM can hold a `&mut` to one buffer and
    /// shared/mut references to others simultaneously (needed by `COPY`,
    /// `MIX` and `MUL`, which read one buffer while writing another).
    pub fn buffers_mut(&mut self) -> &mut [Buffer] {
        self.arena.buffers_mut()
    }

    pub fn buffer_by_name(&self, name: &str) -> Option<&Buffer> {
        self.spec
            .buffer_index(name)
            .map(|idx| &self.arena.buffers()[idx])
    }

    /// Returns `true` once a Program carries both mandatory sink buffers, the
    /// precondition `Realm::set_spec` enforces before accepting a Program.
    pub fn has_required_sinks(&self) -> bool {
        self.spec.buffer_index("sink:in:left").is_some()
            && self.spec.buffer_index("sink:in:right").is_some()
    }

    pub fn validate_sinks(&self) -> Result<(), EngineStatus> {
        if self.has_required_sinks() {
            Ok(())
        } else {
            Err(EngineStatus::error(
                "spec is missing sink:in:left/sink:in:right buffers",
            ))
        }
    }
}
