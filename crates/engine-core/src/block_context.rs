use std::collections::HashMap;

use engine_rt::{MessageQueue, PerfStats};
use musical_time::SampleTime;

/// Per-block scratch a [`crate::realm::Realm`] owns and reuses every block:
/// created once at setup, mutated only on the RT thread.
///
/// Holds the sample-by-sample musical time map [`Player`] fills, the
/// out-message queue `Realm::process_block` and the VM append to, the raw
/// input-event scratch, and a table of ad-hoc named buffers a backend or
/// processor may stash data in across block phases without a `Program`
/// buffer slot of their own. It does not hold a pointer back into the active
/// `Program`'s arena -- every call site that needs a `Program` buffer already
/// has the `Program` in hand (`Realm::process_block`, `Realm::get_buffer`),
/// so a redundant pointer here would just be one more thing that can go
/// stale across a swap.
///
/// [`Player`]: crate::player::Player
pub struct BlockContext {
    pub sample_pos: u64,
    pub perf: PerfStats,
    pub time_map: Vec<SampleTime>,
    pub out_messages: MessageQueue,
    pub input_events: Vec<u8>,
    pub ancillary_buffers: HashMap<String, engine_graph::Buffer>,
}

impl BlockContext {
    pub fn new(block_size: usize) -> Self {
        BlockContext {
            sample_pos: 0,
            perf: PerfStats::new(),
            time_map: vec![SampleTime::stopped(); block_size],
            out_messages: MessageQueue::new(),
            input_events: Vec::new(),
            ancillary_buffers: HashMap::new(),
        }
    }

    /// Resets stats and clears input events ahead of the next block. The
    /// time map is overwritten in full by
    /// `Player::fill_time_map` every block, so it is not cleared here.
    pub fn reset_for_next_block(&mut self) {
        self.perf.reset();
        self.input_events.clear();
    }
}
