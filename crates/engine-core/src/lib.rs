//! Realm/Player/Engine orchestration for Harmoniq: ties the opcode VM
//! (`engine-graph`), the processor lifecycle (`engine-plugin-host`) and a
//! backend (`io-backends`) into one running audio engine, plus the
//! control-thread-facing `HostSystem` and notification bus.

mod block_context;
mod config;
mod engine;
mod host;
mod notification;
mod player;
mod processor_adapter;
mod realm;

pub use config::{BackendKind, EngineConfig};
pub use engine::Engine;
pub use host::HostSystem;
pub use notification::NotificationBus;
pub use player::{Player, PlayerState, PlayerStateMutation};
pub use realm::Realm;
