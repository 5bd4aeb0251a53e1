use std::collections::HashMap;

use engine_rt::EngineStatus;
use musical_time::MusicalDuration;

use crate::buffer::BufferType;
use crate::opcode::Instruction;

/// A named, typed slot a `Spec` allocates a [`crate::buffer::Buffer`] for.
#[derive(Debug, Clone)]
pub struct BufferSlot {
    pub name: String,
    pub ty: BufferType,
}

/// A processor the VM can `CALL` by index, identified the way the original
/// identifies nodes: a stable 64-bit id plus a human-readable name for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct ProcessorRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ControlValueRef {
    pub name: String,
    pub initial: f32,
}

#[derive(Debug, Clone)]
pub struct ChildRealmRef {
    pub name: String,
}

/// Sealed, immutable bytecode for one block-rendering pass.
///
/// `append_*` builds the name/id indices; `append_opcode` does not itself
/// re-validate that an instruction's operand indices are in range (that is
/// the compiler's job, the same division of labor as the original), but
/// every `append_*` call rejects a duplicate name up front so indices, once
/// handed out, never get silently reused.
#[derive(Debug, Clone, Default)]
pub struct Spec {
    bpm: u32,
    duration: MusicalDuration,

    opcodes: Vec<Instruction>,

    buffers: Vec<BufferSlot>,
    buffer_index: HashMap<String, usize>,

    processors: Vec<ProcessorRef>,
    processor_index: HashMap<u64, usize>,

    control_values: Vec<ControlValueRef>,
    control_value_index: HashMap<String, usize>,

    child_realms: Vec<ChildRealmRef>,
    child_realm_index: HashMap<String, usize>,
}

impl Spec {
    pub fn new(bpm: u32, duration: MusicalDuration) -> Self {
        Spec {
            bpm,
            duration,
            ..Default::default()
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn duration(&self) -> MusicalDuration {
        self.duration
    }

    pub fn append_opcode(&mut self, instruction: Instruction) -> usize {
        self.opcodes.push(instruction);
        self.opcodes.len() - 1
    }

    pub fn num_ops(&self) -> usize {
        self.opcodes.len()
    }

    pub fn opcode(&self, idx: usize) -> &Instruction {
        &self.opcodes[idx]
    }

    pub fn append_buffer(&mut self, name: &str, ty: BufferType) -> Result<usize, EngineStatus> {
        if self.buffer_index.contains_key(name) {
            return Err(EngineStatus::error(format!("duplicate buffer name {name}")));
        }
        let index = self.buffers.len();
        self.buffers.push(BufferSlot {
            name: name.to_string(),
            ty,
        });
        self.buffer_index.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer(&self, idx: usize) -> &BufferSlot {
        &self.buffers[idx]
    }

    pub fn buffer_index(&self, name: &str) -> Option<usize> {
        self.buffer_index.get(name).copied()
    }

    pub fn append_processor(&mut self, id: u64, name: &str) -> Result<usize, EngineStatus> {
        if self.processor_index.contains_key(&id) {
            return Err(EngineStatus::error(format!("duplicate processor id {id}")));
        }
        let index = self.processors.len();
        self.processors.push(ProcessorRef {
            id,
            name: name.to_string(),
        });
        self.processor_index.insert(id, index);
        Ok(index)
    }

    pub fn num_processors(&self) -> usize {
        self.processors.len()
    }

    pub fn processor(&self, idx: usize) -> &ProcessorRef {
        &self.processors[idx]
    }

    pub fn processor_index(&self, id: u64) -> Option<usize> {
        self.processor_index.get(&id).copied()
    }

    pub fn append_control_value(&mut self, name: &str, initial: f32) -> Result<usize, EngineStatus> {
        if self.control_value_index.contains_key(name) {
            return Err(EngineStatus::error(format!(
                "duplicate control value name {name}"
            )));
        }
        let index = self.control_values.len();
        self.control_values.push(ControlValueRef {
            name: name.to_string(),
            initial,
        });
        self.control_value_index.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn num_control_values(&self) -> usize {
        self.control_values.len()
    }

    pub fn control_value(&self, idx: usize) -> &ControlValueRef {
        &self.control_values[idx]
    }

    pub fn control_value_index(&self, name: &str) -> Option<usize> {
        self.control_value_index.get(name).copied()
    }

    /// Rejects a realm name already present, enforcing the no-duplicate
    /// child-realm invariant that keeps the realm graph a DAG.
    pub fn append_child_realm(&mut self, name: &str) -> Result<usize, EngineStatus> {
        if self.child_realm_index.contains_key(name) {
            return Err(EngineStatus::error(format!(
                "duplicate child realm name {name}"
            )));
        }
        let index = self.child_realms.len();
        self.child_realms.push(ChildRealmRef {
            name: name.to_string(),
        });
        self.child_realm_index.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn num_child_realms(&self) -> usize {
        self.child_realms.len()
    }

    pub fn child_realm(&self, idx: usize) -> &ChildRealmRef {
        &self.child_realms[idx]
    }

    pub fn child_realm_index(&self, name: &str) -> Option<usize> {
        self.child_realm_index.get(name).copied()
    }
}
