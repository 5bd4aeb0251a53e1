//! Processor lifecycle, port/message plumbing and the double-buffered
//! state manager shared by every graph node. Concrete DSP algorithms are
//! out of scope; the variants in [`kinds`] exist only to prove the
//! lifecycle/port/message contract.

pub mod double_buffer;
pub mod kinds;
pub mod processor;
pub mod state;

pub use double_buffer::{DoubleBufferedState, StateReplay};
pub use kinds::{ControlTrackProcessor, NoiseProcessor, NullProcessor, ProcessorKind, VumeterProcessor};
pub use processor::{
    NodeDescription, PortDirection, PortSpec, PortType, Processor, ProcessorBase, ProcessorId,
    StateChangeNotification,
};
pub use state::ProcessorState;
