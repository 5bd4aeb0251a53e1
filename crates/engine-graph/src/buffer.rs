use std::sync::Arc;

use engine_rt::EngineStatus;
use parking_lot::{Condvar, Mutex};

/// Fixed size of an atom-data buffer (MIDI/event streams), matching the
/// original engine's LV2-atom scratch size.
pub const ATOM_DATA_SIZE: usize = 10_240;

/// The closed set of buffer kinds a [`crate::spec::Spec`] can allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    FloatControlValue,
    IntControlValue,
    FloatAudioBlock { block_size: usize },
    AtomData,
    PluginCondBuffer,
}

impl BufferType {
    pub fn size(&self) -> usize {
        match self {
            BufferType::FloatControlValue => 8,
            BufferType::IntControlValue => 8,
            BufferType::FloatAudioBlock { block_size } => block_size * 4,
            BufferType::AtomData => ATOM_DATA_SIZE,
            BufferType::PluginCondBuffer => 0,
        }
    }
}

/// A wait primitive a plugin host blocks on; owned by a `PluginCondBuffer`.
/// No concrete plugin host exists in this crate, so nothing currently parks
/// on it, but the shape exists for a future host to use.
#[derive(Clone)]
pub struct CondPair {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for CondPair {
    fn default() -> Self {
        CondPair {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }
}

impl CondPair {
    pub fn notify(&self) {
        let mut ready = self.inner.0.lock();
        *ready = true;
        self.inner.1.notify_one();
    }

    pub fn wait(&self) {
        let mut ready = self.inner.0.lock();
        if !*ready {
            self.inner.1.wait(&mut ready);
        }
        *ready = false;
    }
}

/// One runtime buffer. Storage is typed rather than an opaque byte blob:
/// `BufferType` already tells callers how to interpret it, so the Rust
/// rendering keeps that invariant in the type instead of re-deriving it from
/// a tag at every access site.
pub enum Buffer {
    Float { samples: Vec<f32> },
    ControlValue { value: f32, generation: u32 },
    IntControlValue { value: i32, generation: u32 },
    Atom { events: Vec<u8> },
    PluginCond { pair: CondPair },
}

impl Buffer {
    pub fn new(ty: BufferType) -> Self {
        match ty {
            BufferType::FloatAudioBlock { block_size } => Buffer::Float {
                samples: vec![0.0; block_size],
            },
            BufferType::FloatControlValue => Buffer::ControlValue {
                value: 0.0,
                generation: 0,
            },
            BufferType::IntControlValue => Buffer::IntControlValue {
                value: 0,
                generation: 0,
            },
            BufferType::AtomData => Buffer::Atom {
                events: Vec::with_capacity(ATOM_DATA_SIZE),
            },
            BufferType::PluginCondBuffer => Buffer::PluginCond {
                pair: CondPair::default(),
            },
        }
    }

    pub fn clear(&mut self) {
        match self {
            Buffer::Float { samples } => samples.fill(0.0),
            Buffer::ControlValue { value, .. } => *value = 0.0,
            Buffer::IntControlValue { value, .. } => *value = 0,
            Buffer::Atom { events } => events.clear(),
            Buffer::PluginCond { .. } => {}
        }
    }

    pub fn as_samples(&self) -> Result<&[f32], EngineStatus> {
        match self {
            Buffer::Float { samples } => Ok(samples),
            _ => Err(EngineStatus::error("buffer is not a float audio block")),
        }
    }

    pub fn as_samples_mut(&mut self) -> Result<&mut [f32], EngineStatus> {
        match self {
            Buffer::Float { samples } => Ok(samples),
            _ => Err(EngineStatus::error("buffer is not a float audio block")),
        }
    }

    pub fn copy_from(&mut self, src: &Buffer) -> Result<(), EngineStatus> {
        match (self, src) {
            (Buffer::Float { samples: dst }, Buffer::Float { samples: src }) => {
                if dst.len() != src.len() {
                    return Err(EngineStatus::error("buffer size mismatch in COPY"));
                }
                dst.copy_from_slice(src);
                Ok(())
            }
            (Buffer::Atom { events: dst }, Buffer::Atom { events: src }) => {
                dst.clear();
                dst.extend_from_slice(src);
                Ok(())
            }
            _ => Err(EngineStatus::error("buffer type mismatch in COPY")),
        }
    }

    /// Adds `src` onto `self` sample-wise for audio blocks, or appends
    /// `src`'s event sequence for atom buffers (a time-ordered merge would
    /// additionally sort by timestamp; this engine does not interpret event
    /// payloads, so it preserves arrival order instead).
    pub fn mix(&mut self, src: &Buffer) -> Result<(), EngineStatus> {
        match (self, src) {
            (Buffer::Float { samples: dst }, Buffer::Float { samples: src }) => {
                if dst.len() != src.len() {
                    return Err(EngineStatus::error("buffer size mismatch in MIX"));
                }
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d += s;
                }
                Ok(())
            }
            (Buffer::Atom { events: dst }, Buffer::Atom { events: src }) => {
                dst.extend_from_slice(src);
                Ok(())
            }
            _ => Err(EngineStatus::error("buffer type does not support MIX")),
        }
    }

    pub fn mul(&mut self, factor: f32) -> Result<(), EngineStatus> {
        match self {
            Buffer::Float { samples } => {
                for s in samples.iter_mut() {
                    *s *= factor;
                }
                Ok(())
            }
            _ => Err(EngineStatus::error("buffer type does not support MUL")),
        }
    }

    pub fn set_float(&mut self, value: f32) -> Result<(), EngineStatus> {
        match self {
            Buffer::Float { samples } => {
                if let Some(first) = samples.first_mut() {
                    *first = value;
                }
                Ok(())
            }
            Buffer::ControlValue { value: v, .. } => {
                *v = value;
                Ok(())
            }
            _ => Err(EngineStatus::error("buffer type does not support SET_FLOAT")),
        }
    }

    pub fn rms(&self) -> Result<f32, EngineStatus> {
        let samples = self.as_samples()?;
        if samples.is_empty() {
            return Ok(0.0);
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        Ok((sum_sq / samples.len() as f32).sqrt())
    }
}

/// One backing allocation a [`crate::program::Program`] is set up against.
///
/// The original engine carves each `Program`'s buffers as fixed-offset
/// byte slices of one arena allocation; this crate's [`Buffer`] is a typed
/// enum rather than a raw byte window (so opcodes and processors never
/// reinterpret-cast untyped memory), so `BufferArena` here tracks the
/// *capacity* a program's buffer set consumes rather than literally slicing
/// bytes out of a `Vec<u8>`. A [`crate::realm::Realm`] (in `engine-core`)
/// pools arenas by this capacity and reuses the smallest one that still
/// fits a new program: first fit over a sorted-by-size scan.
#[derive(Debug)]
pub struct BufferArena {
    capacity: usize,
    buffers: Vec<Buffer>,
}

impl BufferArena {
    /// Builds an arena sized for `types`, with each slot already `clear`-ed
    /// (every buffer handed to an opcode or processor must have been
    /// cleared at least once).
    pub fn new(types: &[BufferType]) -> Self {
        let capacity = types.iter().map(BufferType::size).sum();
        let buffers = types
            .iter()
            .map(|ty| {
                let mut buf = Buffer::new(*ty);
                buf.clear();
                buf
            })
            .collect();
        BufferArena { capacity, buffers }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `true` when this arena's capacity can serve a program that needs
    /// `requested` bytes without growing.
    pub fn fits(&self, requested: usize) -> bool {
        self.capacity >= requested
    }

    pub fn into_buffers(self) -> Vec<Buffer> {
        self.buffers
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [Buffer] {
        &mut self.buffers
    }
}

/// Pools [`BufferArena`]s by capacity so repeated program swaps of roughly
/// the same shape do not re-allocate every time: a Realm pools arenas and
/// reuses the smallest one that is still large enough.
#[derive(Debug, Default)]
pub struct BufferArenaPool {
    free: Vec<BufferArena>,
}

impl BufferArenaPool {
    pub fn new() -> Self {
        BufferArenaPool::default()
    }

    /// First-fit over a capacity-sorted scan: takes the smallest pooled
    /// arena that is still `>= requested`, or builds a fresh one from
    /// `types` if none fits.
    pub fn acquire(&mut self, requested: usize, types: &[BufferType]) -> BufferArena {
        self.free.sort_by_key(BufferArena::capacity);
        if let Some(pos) = self.free.iter().position(|arena| arena.fits(requested)) {
            return self.free.remove(pos);
        }
        BufferArena::new(types)
    }

    /// Returns a no-longer-referenced arena to the pool for reuse.
    pub fn release(&mut self, arena: BufferArena) {
        self.free.push(arena);
    }

    pub fn pooled_len(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_pool_reuses_smallest_fit() {
        let mut pool = BufferArenaPool::new();
        let small_types = vec![BufferType::FloatAudioBlock { block_size: 4 }];
        let big_types = vec![BufferType::FloatAudioBlock { block_size: 256 }];
        let small = BufferArena::new(&small_types);
        let big = BufferArena::new(&big_types);
        let small_cap = small.capacity();
        let big_cap = big.capacity();
        pool.release(small);
        pool.release(big);

        let reused = pool.acquire(small_cap, &small_types);
        assert_eq!(reused.capacity(), small_cap);
        assert_eq!(pool.pooled_len(), 1);

        let reused_big = pool.acquire(big_cap, &big_types);
        assert_eq!(reused_big.capacity(), big_cap);
        assert_eq!(pool.pooled_len(), 0);
    }

    #[test]
    fn arena_pool_builds_fresh_when_nothing_fits() {
        let mut pool = BufferArenaPool::new();
        let types = vec![BufferType::FloatAudioBlock { block_size: 8 }];
        let arena = pool.acquire(32, &types);
        assert_eq!(arena.capacity(), 32);
    }

    #[test]
    fn mix_adds_audio_blocks() {
        let mut a = Buffer::new(BufferType::FloatAudioBlock { block_size: 4 });
        let mut b = Buffer::new(BufferType::FloatAudioBlock { block_size: 4 });
        a.set_float(1.0).unwrap();
        a.as_samples_mut().unwrap().fill(1.0);
        b.as_samples_mut().unwrap().fill(2.0);
        a.mix(&b).unwrap();
        assert_eq!(a.as_samples().unwrap(), &[3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn mul_scales_audio_block() {
        let mut buf = Buffer::new(BufferType::FloatAudioBlock { block_size: 2 });
        buf.as_samples_mut().unwrap().fill(2.0);
        buf.mul(0.5).unwrap();
        assert_eq!(buf.as_samples().unwrap(), &[1.0, 1.0]);
    }

    #[test]
    fn mul_on_atom_buffer_is_an_error() {
        let mut buf = Buffer::new(BufferType::AtomData);
        assert!(buf.mul(1.0).is_err());
    }

    #[test]
    fn set_float_only_writes_first_sample() {
        let mut buf = Buffer::new(BufferType::FloatAudioBlock { block_size: 3 });
        buf.as_samples_mut().unwrap().fill(9.0);
        buf.set_float(1.0).unwrap();
        assert_eq!(buf.as_samples().unwrap(), &[1.0, 9.0, 9.0]);
    }

    #[test]
    fn control_value_tracks_generation_independently() {
        let mut buf = Buffer::new(BufferType::FloatControlValue);
        if let Buffer::ControlValue { generation, .. } = &mut buf {
            *generation = 3;
        }
        buf.set_float(0.75).unwrap();
        match buf {
            Buffer::ControlValue { value, generation } => {
                assert_eq!(value, 0.75);
                assert_eq!(generation, 3);
            }
            _ => panic!("expected control value"),
        }
    }

    proptest::proptest! {
        /// Whatever `acquire` hands back -- pooled or freshly built -- must
        /// be large enough for what was requested, and if a pooled arena
        /// fit, it must be the smallest one that did.
        #[test]
        fn acquire_never_returns_an_arena_smaller_than_requested(
            pooled_block_sizes in proptest::collection::vec(1usize..1024, 0..16),
            requested_block_size in 1usize..1024,
        ) {
            let mut pool = BufferArenaPool::new();
            let pooled_caps: Vec<usize> = pooled_block_sizes
                .iter()
                .map(|block_size| {
                    let arena = BufferArena::new(&[BufferType::FloatAudioBlock { block_size: *block_size }]);
                    let cap = arena.capacity();
                    pool.release(arena);
                    cap
                })
                .collect();

            let requested = BufferType::FloatAudioBlock { block_size: requested_block_size }.size();
            let acquired = pool.acquire(requested, &[BufferType::FloatAudioBlock { block_size: requested_block_size }]);
            proptest::prop_assert!(acquired.fits(requested));

            let smallest_fit = pooled_caps.iter().copied().filter(|c| *c >= requested).min();
            if let Some(smallest_fit) = smallest_fit {
                proptest::prop_assert_eq!(acquired.capacity(), smallest_fit);
            }
        }
    }
}
