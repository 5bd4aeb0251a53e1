//! Lock-free primitives shared across the control, realtime-audio and
//! notification-pump threads (see the concurrency model in the workspace
//! root design notes): the `{next, current, old}` triple buffer, bounded
//! SPSC event queues, the append-only out-message queue and perf spans.

pub mod message;
pub mod perf;
pub mod queue;
pub mod rt_guard;
pub mod status;
pub mod triple_buffer;

pub use message::{MessageBody, MessageQueue, QUEUE_ALIGN};
pub use perf::{Clock, MonotonicClock, PerfScope, PerfSpan, PerfStats};
pub use queue::{EventQueue, QueueError};
pub use rt_guard::enter_hard_rt;
pub use status::{EngineResult, EngineStatus};
pub use triple_buffer::{SwapSlots, TripleBuffer};
