//! Infrastructure: event store, command dispatch, serial registry,
//! read-model projections and the movement coordinators.
//!
//! Nothing in here contains business rules; domain decisions live in the
//! aggregate crates. This crate wires them to storage, distribution and
//! cross-aggregate orchestration.

pub mod command_dispatcher;
pub mod coordinators;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod serial_registry;


pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use read_model::{InMemoryTenantStore, TenantStore};
pub use serial_registry::SerialRegistry;
