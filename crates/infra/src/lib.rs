//! Infrastructure layer: event storage, command dispatch, read models.
//!
//! No durable backend ships here — the [`event_store::EventStore`] trait is
//! the seam a SQL/NoSQL implementation would plug into; the in-memory
//! implementation backs tests, development and the desktop build.

pub mod dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;

pub use dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use read_model::{InMemoryTenantStore, TenantStore};
