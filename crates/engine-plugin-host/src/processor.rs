use std::collections::HashMap;

use engine_graph::Buffer;
use engine_rt::EngineStatus;

use crate::kinds::ProcessorKind;
use crate::state::ProcessorState;

pub type ProcessorId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Audio,
    Control,
    Events,
}

#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: String,
    pub direction: PortDirection,
    pub ty: PortType,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, direction: PortDirection, ty: PortType) -> Self {
        PortSpec {
            name: name.into(),
            direction,
            ty,
        }
    }
}

/// Ports plus the processor-type tag a `Spec` selects a concrete variant
/// from.
#[derive(Debug, Clone)]
pub struct NodeDescription {
    pub kind: ProcessorKind,
    pub ports: Vec<PortSpec>,
}

impl NodeDescription {
    pub fn new(kind: ProcessorKind, ports: Vec<PortSpec>) -> Self {
        NodeDescription { kind, ports }
    }

    pub fn port_index(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }
}

/// A notification emitted on every state transition. Collected by
/// `ProcessorBase` rather than fired through a direct callback, since state
/// transitions can happen on the RT thread (a `BROKEN` transition inside
/// `process_block`) and the engine's only RT-safe way to reach the
/// notification pump is the out-message queue -- `Realm` drains
/// `take_pending_notification` after every `process_block` call and turns it
/// into a `NodeStateChange` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeNotification {
    pub state: ProcessorState,
}

/// Shared fields every concrete processor variant embeds. Lifecycle,
/// port-connection and message/parameter plumbing operate uniformly on
/// this regardless of which `ProcessorKind` owns it.
pub struct ProcessorBase {
    pub id: ProcessorId,
    pub realm_name: String,
    pub node_id: String,
    pub description: NodeDescription,
    state: ProcessorState,
    pub muted: bool,
    /// Connected buffer index per port, indexed the same as `description.ports`.
    ports: Vec<Option<usize>>,
    pub parameters: HashMap<String, Vec<u8>>,
    pending_notification: Option<StateChangeNotification>,
}

impl ProcessorBase {
    pub fn new(id: ProcessorId, realm_name: impl Into<String>, node_id: impl Into<String>, description: NodeDescription) -> Self {
        let num_ports = description.ports.len();
        ProcessorBase {
            id,
            realm_name: realm_name.into(),
            node_id: node_id.into(),
            description,
            state: ProcessorState::Inactive,
            muted: false,
            ports: vec![None; num_ports],
            parameters: HashMap::new(),
            pending_notification: None,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    fn set_state(&mut self, state: ProcessorState) {
        self.state = state;
        self.pending_notification = Some(StateChangeNotification { state });
    }

    /// Drains the notification raised by the last state transition, if any.
    /// `Realm` calls this on the control thread after `setup`/`cleanup` and
    /// on the RT thread after `process_block`, turning it into a
    /// `NodeStateChange` out-message.
    pub fn take_pending_notification(&mut self) -> Option<StateChangeNotification> {
        self.pending_notification.take()
    }

    pub fn connected_buffer(&self, port_idx: usize) -> Option<usize> {
        self.ports.get(port_idx).copied().flatten()
    }
}

/// Uniform lifecycle and message/parameter plumbing shared by all graph
/// nodes. Subtypes implement only the `*_internal` hooks; the
/// default methods enforce the state-guard protocol identically for every
/// variant.
pub trait Processor: Send {
    fn base(&self) -> &ProcessorBase;
    fn base_mut(&mut self) -> &mut ProcessorBase;

    /// Subtype-specific setup. Returning `Err` transitions the processor to
    /// `BROKEN` instead of `RUNNING`.
    fn setup_internal(&mut self) -> Result<(), EngineStatus> {
        Ok(())
    }

    fn cleanup_internal(&mut self) {}

    /// Parses an opaque `ProcessorMessage` and dispatches to the subtype.
    /// The base class intercepts the built-in `mute`/`unmute` messages
    /// before this is reached.
    fn handle_message_internal(&mut self, _bytes: &[u8]) -> Result<(), EngineStatus> {
        Ok(())
    }

    fn set_parameters_internal(&mut self, _bytes: &[u8]) -> Result<(), EngineStatus> {
        Ok(())
    }

    /// Only called while `RUNNING` and not muted. Returning `Err`
    /// transitions the processor to `BROKEN` and clears its outputs this
    /// block (the caller, `process_block`, does the clearing).
    fn process_block_internal(&mut self, buffers: &mut [Buffer], frames: usize) -> Result<(), EngineStatus>;

    /// Always runs after `process_block_internal` (or after output-clearing
    /// when not running/muted), e.g. for metering sinks that only ever read.
    fn post_process_block_internal(&mut self, _buffers: &mut [Buffer], _frames: usize) {}

    fn id(&self) -> ProcessorId {
        self.base().id
    }

    fn state(&self) -> ProcessorState {
        self.base().state()
    }

    fn setup(&mut self) -> Result<(), EngineStatus> {
        self.base_mut().set_state(ProcessorState::Setup);
        match self.setup_internal() {
            Ok(()) => {
                self.base_mut().set_state(ProcessorState::Running);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(processor = self.id(), error = %err, "processor setup failed");
                self.base_mut().set_state(ProcessorState::Broken);
                Err(err)
            }
        }
    }

    /// Always drains to `INACTIVE`, regardless of the state entering this
    /// call.
    fn cleanup(&mut self) {
        self.cleanup_internal();
        self.base_mut().set_state(ProcessorState::Cleanup);
        self.base_mut().set_state(ProcessorState::Inactive);
    }

    fn handle_message(&mut self, bytes: &[u8]) -> Result<(), EngineStatus> {
        if bytes == b"mute" {
            self.base_mut().muted = true;
            return Ok(());
        }
        if bytes == b"unmute" {
            self.base_mut().muted = false;
            return Ok(());
        }
        self.handle_message_internal(bytes)
    }

    fn set_parameters(&mut self, bytes: &[u8]) -> Result<(), EngineStatus> {
        self.set_parameters_internal(bytes)
    }

    /// An out-of-range port index transitions the processor to `BROKEN`
    /// rather than panicking or returning an error: a malformed
    /// `CONNECT_PORT` opcode is a program-construction bug, not a recoverable
    /// runtime condition the caller can act on mid-block.
    fn connect_port(&mut self, port_idx: usize, buffer_idx: usize) {
        let num_ports = self.base().description.ports.len();
        if port_idx >= num_ports {
            tracing::error!(processor = self.id(), port_idx, "CONNECT_PORT index out of range");
            self.base_mut().set_state(ProcessorState::Broken);
            return;
        }
        let base = self.base_mut();
        if base.ports.len() <= port_idx {
            base.ports.resize(port_idx + 1, None);
        }
        base.ports[port_idx] = Some(buffer_idx);
    }

    /// Guards on state: `RUNNING` calls `process_block_internal`; any other
    /// state (or `muted`) clears every output port instead.
    /// `post_process_block_internal` always runs last.
    fn process_block(&mut self, buffers: &mut [Buffer], frames: usize) -> Result<(), EngineStatus> {
        let running = self.state() == ProcessorState::Running;
        let muted = self.base().muted;
        let result = if running && !muted {
            match self.process_block_internal(buffers, frames) {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::warn!(processor = self.id(), error = %err, "processor broke during process_block");
                    self.base_mut().set_state(ProcessorState::Broken);
                    self.clear_outputs(buffers);
                    Err(err)
                }
            }
        } else {
            self.clear_outputs(buffers);
            Ok(())
        };
        self.post_process_block_internal(buffers, frames);
        result
    }

    /// Clears every output port uniformly per its `BufferType` (audio ports
    /// fill with zeros, control ports write `0`, event ports write a valid
    /// empty event-sequence header) via `Buffer::clear`.
    fn clear_outputs(&self, buffers: &mut [Buffer]) {
        for (port_idx, port) in self.base().description.ports.iter().enumerate() {
            if port.direction != PortDirection::Output {
                continue;
            }
            if let Some(buf_idx) = self.base().connected_buffer(port_idx) {
                if let Some(buf) = buffers.get_mut(buf_idx) {
                    buf.clear();
                }
            }
        }
    }
}
