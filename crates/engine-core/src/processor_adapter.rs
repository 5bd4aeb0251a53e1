use std::sync::Arc;

use engine_graph::Buffer;
use engine_plugin_host::Processor;
use engine_rt::EngineStatus;
use parking_lot::Mutex;

/// Bridges [`engine_plugin_host::Processor`] (which addresses ports by index,
/// the shape a compiled node description needs) onto
/// [`engine_graph::vm::ProgramProcessor`] (which the VM drives by port name,
/// since `CONNECT_PORT` carries the name straight out of the `Spec`). The VM
/// crate cannot depend on the processor-host crate's richer lifecycle (that
/// would invert the dependency the other direction), so this adapter is the
/// one place the two port-addressing conventions meet.
pub struct ProcessorAdapter {
    processor: Arc<Mutex<Box<dyn Processor>>>,
}

impl ProcessorAdapter {
    pub fn new(processor: Arc<Mutex<Box<dyn Processor>>>) -> Self {
        ProcessorAdapter { processor }
    }
}

impl engine_graph::vm::ProgramProcessor for ProcessorAdapter {
    fn connect_port(&mut self, port_name: &str, buffer_index: usize) {
        let mut processor = self.processor.lock();
        let port_idx = processor.base().description.port_index(port_name);
        match port_idx {
            Some(idx) => processor.connect_port(idx, buffer_index),
            None => tracing::error!(port_name, "CONNECT_PORT references an unknown port name"),
        }
    }

    fn process_block(&mut self, buffers: &mut [Buffer], frames: usize) -> Result<(), EngineStatus> {
        self.processor.lock().process_block(buffers, frames)
    }
}
