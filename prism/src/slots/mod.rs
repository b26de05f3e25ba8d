//! Backend slot contracts
//!
//! A slot is a named, typed socket in a pattern that accepts any backend
//! implementing the required capability set. Backends advertise their
//! capabilities through [`Backend::capabilities`]; binding a backend to a
//! slot checks the slot's requirements against that set before any data
//! flows.
//!
//! Reference backends live in [`memory`] (in-process) and [`sqlite`]
//! (table writer/reader over SQLite). Production drivers are external
//! collaborators and implement these same traits.

pub mod capability;
pub mod kv;
pub mod memory;
pub mod messaging;
pub mod object;
pub mod sqlite;
pub mod table;

pub use capability::{Capability, SlotRequirement};
pub use kv::{KeyValueAtomic, KeyValueBasic, KeyValueScan, KeyValueStore, KeyValueTtl};
pub use messaging::{PubSub, PubSubMessage, Queue};
pub use object::{ObjectMetadata, ObjectStore};
pub use table::{EventFilter, MailboxEvent, TableReader, TableStats, TableWriter};

/// Base trait implemented by every backend
///
/// The capability list is the runtime type-check used at slot-binding time:
/// a backend bound to a slot must cover the slot's declared capability set.
pub trait Backend: Send + Sync {
    /// Backend name as referenced by slot configuration
    fn name(&self) -> &str;

    /// Capabilities this backend supports
    fn capabilities(&self) -> &'static [Capability];
}
