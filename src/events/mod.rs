//! Change events
//!
//! Provides:
//! - Public projections used inside change records
//! - The change record composer
//! - Event sinks (NATS, in-memory) and the retrying dispatcher

pub mod change;
pub mod dispatch;
pub mod model;

pub use change::{ChangeField, ChangeMap, ChangeValue};
pub use dispatch::{
    ChangeEvent, EventCondition, EventDispatcher, EventSink, EventType, MemoryEventSink,
    NatsEventSink,
};
pub use model::{EmoteSetModel, ObjectKind, UserConnectionModel, UserModel, UserPartialModel};
