use serde::{Deserialize, Serialize};

/// Which concrete [`io_backends::AudioBackend`] the engine should build at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    Null,
    Cpal,
    Renderer,
}

/// Serializable engine configuration: sample rate, block size and the queue
/// capacities the engine's design notes fix a floor for, plus backend
/// selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub backend: BackendKind,
    /// Player mutation queue capacity; the design notes require `>= 128`.
    pub player_queue_capacity: usize,
    /// Notification out-message queue's initial reservation per block.
    pub message_queue_capacity: usize,
    /// RT thread scheduling priority passed to `enter_hard_rt`.
    pub rt_priority: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 48_000,
            block_size: 256,
            backend: BackendKind::Null,
            player_queue_capacity: 128,
            message_queue_capacity: engine_rt::QUEUE_ALIGN,
            rt_priority: 10,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }
}
