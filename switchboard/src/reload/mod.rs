//! Cross-process configuration propagation.
//!
//! - `events`: the reload event and its subjects
//! - `broker`: publish/subscribe transports (NATS, in-memory)
//! - `consumer`: applies received events to the local pool

pub mod broker;
pub mod consumer;
pub mod events;

pub use broker::{InMemoryBroker, NatsReloadBroker, ReloadBroker, ReloadStream};
pub use consumer::ReloadConsumer;
pub use events::{ReloadAction, ReloadEvent, RELOAD_SUBJECT_PREFIX, RELOAD_WILDCARD};
