use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide-in-spirit configuration, but explicitly constructed and
/// threaded through every call as an `Arc<HostSystem>` rather than a real
/// process-level static, per the engine's design notes on global state: the
/// RT thread only ever reads fields set up before the loop starts.
///
/// `capabilities` is the named-provider-slot mechanism the design notes call
/// for (`audio_file_loader` and similar); no concrete provider lives in this
/// crate since concrete DSP/backends are out of scope, so the slot is a
/// plain `Arc<dyn Any + Send + Sync>` registry rather than a fixed struct.
pub struct HostSystem {
    pub sample_rate: u32,
    pub block_size: usize,
    capabilities: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl HostSystem {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        HostSystem {
            sample_rate,
            block_size,
            capabilities: HashMap::new(),
        }
    }

    /// Registers a capability provider under `name`. Intended to be called
    /// once, during setup, before any `Arc<HostSystem>` handle reaches the RT
    /// thread.
    pub fn register_capability<T: Any + Send + Sync>(&mut self, name: &'static str, provider: Arc<T>) {
        self.capabilities.insert(name, provider);
    }

    /// Resolves a previously registered capability, downcast to `T`. Returns
    /// `None` if nothing was registered under `name` or the registered value
    /// is not a `T`.
    pub fn capability<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.capabilities.get(name)?.clone().downcast::<T>().ok()
    }
}
