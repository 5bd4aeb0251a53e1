use engine_rt::{EngineResult, EngineStatus, EventQueue, MessageBody};
use musical_time::{MusicalTime, SampleTime, TimeMapper, TimeMapperIter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::block_context::BlockContext;

/// Transport state a [`Player`] owns independently of any one `Program`:
/// whether the transport is running, its current musical-time position, and
/// loop bounds. Serialized verbatim into a
/// `MessageBody::PlayerState` after every `fill_time_map` call so a UI can
/// mirror it without polling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub playing: bool,
    pub current_time: MusicalTime,
    pub loop_enabled: bool,
    pub loop_start_time: MusicalTime,
    pub loop_end_time: MusicalTime,
}

impl Default for PlayerState {
    fn default() -> Self {
        PlayerState {
            playing: false,
            current_time: MusicalTime::zero(),
            loop_enabled: false,
            loop_start_time: MusicalTime::zero(),
            loop_end_time: MusicalTime::zero(),
        }
    }
}

/// A sparse update to [`PlayerState`]: only the fields present get applied,
/// so a UI can send "just toggle play" without clobbering loop bounds it
/// never touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerStateMutation {
    pub playing: Option<bool>,
    pub seek_to: Option<MusicalTime>,
    pub loop_enabled: Option<bool>,
    pub loop_start_time: Option<MusicalTime>,
    pub loop_end_time: Option<MusicalTime>,
}

/// Drives transport: accepts mutations off the control thread through a
/// bounded queue and renders them into a [`musical_time::SampleTime`] map the
/// VM's block-driven opcodes read from.
///
/// Keeps a single cached [`TimeMapperIter`] across blocks rather than calling
/// `TimeMapper::find` every sample -- reseeking only happens when a mutation
/// moves `current_time` explicitly, when looping wraps, or when the active
/// Program's tempo/duration changed underneath it (`TimeMapperIter::belongs_to`
/// catches that last case after a swap).
pub struct Player {
    state: Mutex<PlayerState>,
    mutations: EventQueue<PlayerStateMutation>,
    cached_iter: Mutex<Option<TimeMapperIter>>,
}

impl Player {
    pub fn new(queue_capacity: usize) -> Self {
        Player {
            state: Mutex::new(PlayerState::default()),
            mutations: EventQueue::new(queue_capacity),
            cached_iter: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    /// Enqueues a mutation from the control thread. Non-blocking; returns an
    /// error rather than stalling if the queue (capacity `>= 128` per
    /// configuration) is backed up.
    pub fn update_state(&self, mutation: PlayerStateMutation) -> EngineResult<()> {
        self.mutations
            .try_push(mutation)
            .map_err(|_| EngineStatus::error("player mutation queue is full"))
    }

    fn effective_loop_bounds(state: &PlayerState, time_mapper: &TimeMapper) -> (MusicalTime, MusicalTime) {
        let loop_start = if state.loop_enabled && !state.loop_start_time.is_negative() {
            state.loop_start_time
        } else {
            MusicalTime::zero()
        };
        let loop_end = if state.loop_enabled && !state.loop_end_time.is_negative() {
            state.loop_end_time
        } else {
            time_mapper.end_time()
        };
        (loop_start, loop_end)
    }

    /// Fills `ctx.time_map` with one `SampleTime` per frame and pushes a
    /// `PlayerState` snapshot onto `ctx.out_messages`.
    ///
    /// Drains every pending mutation first, then steps sample-by-sample:
    /// not playing writes the stopped sentinel, playing advances the cached
    /// iterator and clamps to `loop_end` when it overshoots. With looping
    /// enabled and well-formed bounds (`loop_start < loop_end`) that wraps
    /// back to `loop_start` instead of stopping; otherwise (looping disabled,
    /// or enabled with inverted bounds) the transport stops once `current_time`
    /// reaches `loop_end` -- which, with looping disabled, falls back to the
    /// Program's declared duration via `effective_loop_bounds`.
    pub fn fill_time_map(&self, time_mapper: &TimeMapper, ctx: &mut BlockContext) {
        let mut state = self.state.lock();
        let mut seeked = false;
        while let Ok(mutation) = self.mutations.try_pop() {
            if let Some(playing) = mutation.playing {
                state.playing = playing;
            }
            if let Some(seek_to) = mutation.seek_to {
                state.current_time = seek_to;
                seeked = true;
            }
            if let Some(enabled) = mutation.loop_enabled {
                state.loop_enabled = enabled;
            }
            if let Some(start) = mutation.loop_start_time {
                state.loop_start_time = start;
            }
            if let Some(end) = mutation.loop_end_time {
                state.loop_end_time = end;
            }
        }

        let mut cached = self.cached_iter.lock();
        let stale = cached.as_ref().map(|it| !it.belongs_to(time_mapper)).unwrap_or(true);
        let mut iter = if seeked || stale {
            time_mapper.find(state.current_time)
        } else {
            cached.take().expect("checked non-stale above")
        };

        let (loop_start, loop_end) = Self::effective_loop_bounds(&state, time_mapper);
        let can_loop = state.loop_enabled && loop_start < loop_end;

        for slot in ctx.time_map.iter_mut() {
            if !state.playing {
                *slot = SampleTime::stopped();
                continue;
            }

            let start_time = state.current_time;
            let next_tick = iter.next().expect("TimeMapperIter never ends");
            state.current_time = next_tick.min(loop_end);
            let end_time = state.current_time;

            if state.current_time >= loop_end {
                if can_loop {
                    state.current_time = loop_start;
                    iter = time_mapper.find(loop_start);
                } else {
                    state.playing = false;
                }
            }

            *slot = SampleTime { start_time, end_time };
        }

        *cached = Some(iter);
        let snapshot = *state;
        drop(state);

        if let Ok(bytes) = serde_json::to_vec(&snapshot) {
            ctx.out_messages.push(MessageBody::PlayerState(bytes));
        }
    }
}
