//! Closed-opcode buffer/program representation and the block-scheduled VM
//! that interprets it: a `Spec` is sealed bytecode, a `Program` is that
//! bytecode paired with its buffer storage and time mapping, and the VM
//! walks the bytecode once per block.

pub mod buffer;
pub mod opcode;
pub mod program;
pub mod spec;
pub mod vm;

pub use buffer::{Buffer, BufferArena, BufferArenaPool, BufferType, ATOM_DATA_SIZE};
pub use opcode::{Instruction, OpArg, OpCode};
pub use program::Program;
pub use spec::{BufferSlot, ChildRealmRef, ControlValueRef, ProcessorRef, Spec};
pub use vm::{run_block, ChildRealmExecutor, NoiseSource, ProgramProcessor, RandNoiseSource, VmContext};
