use serde::{Deserialize, Serialize};

/// Initial capacity (in messages) of a freshly constructed [`MessageQueue`].
pub const QUEUE_ALIGN: usize = 64;

/// One entry in the engine's out-message stream. Every variant here
/// corresponds to a message the realtime thread or a processor may need to
/// hand to the notification pump without blocking; `NodeMessage` carries an
/// opaque, processor-defined payload rather than a typed union so that new
/// processor kinds never require a MessageQueue change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageBody {
    EngineLoad { load: f32 },
    PerfStats(crate::perf::PerfStats),
    PlayerState(Vec<u8>),
    NodeMessage { node_id: String, payload: Vec<u8> },
    NodeStateChange { node_id: String, broken: bool },
    DeviceManager(Vec<u8>),
}

/// An append-only buffer of [`MessageBody`] values written on the RT thread
/// and drained on the notification pump thread.
///
/// Pushing never blocks and never shrinks the backing storage; it doubles
/// capacity when full, exactly as the allocation the RT thread must avoid
/// mid-block is instead paid for up front by [`MessageQueue::reserve`]
/// before `process_block` runs.
pub struct MessageQueue {
    messages: Vec<MessageBody>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue {
            messages: Vec::with_capacity(QUEUE_ALIGN),
        }
    }

    /// Grows the backing storage so that the next `capacity` pushes cannot
    /// trigger a reallocation. Call this from a non-RT thread before the
    /// block that is expected to produce that many messages.
    pub fn reserve(&mut self, capacity: usize) {
        self.messages.reserve(capacity);
    }

    /// Appends `message`. Doubles capacity first if the buffer is full; the
    /// caller is responsible for having called [`MessageQueue::reserve`]
    /// ahead of time on any path that must not allocate.
    pub fn push(&mut self, message: MessageBody) {
        if self.messages.len() == self.messages.capacity() {
            let grown = (self.messages.capacity() * 2).max(QUEUE_ALIGN);
            self.messages.reserve(grown - self.messages.len());
        }
        self.messages.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Drains and returns every pending message, in push order.
    pub fn drain(&mut self) -> Vec<MessageBody> {
        self.messages.drain(..).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageBody> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_preserves_order() {
        let mut queue = MessageQueue::new();
        queue.push(MessageBody::EngineLoad { load: 0.1 });
        queue.push(MessageBody::NodeStateChange {
            node_id: "osc1".into(),
            broken: true,
        });
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        match &drained[1] {
            MessageBody::NodeStateChange { node_id, broken } => {
                assert_eq!(node_id, "osc1");
                assert!(*broken);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn push_beyond_initial_capacity_grows() {
        let mut queue = MessageQueue::new();
        for i in 0..(QUEUE_ALIGN * 3) {
            queue.push(MessageBody::EngineLoad { load: i as f32 });
        }
        assert_eq!(queue.len(), QUEUE_ALIGN * 3);
    }

    #[test]
    fn clear_empties_without_draining() {
        let mut queue = MessageQueue::new();
        queue.push(MessageBody::EngineLoad { load: 0.5 });
        queue.clear();
        assert!(queue.is_empty());
    }
}
