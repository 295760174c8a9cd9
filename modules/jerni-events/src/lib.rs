//! Committed events and the contracts of the collaborators around them.
//!
//! Payloads are opaque JSON. Nothing here knows about HTTP, projections'
//! storage engines, or any domain concept.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{JerniPersistenceError, UnrecoverableError, WaitError};
pub use memory::MemoryEventDatabase;
pub use traits::{EventDatabase, Store};
pub use types::{last_id, CommittedEvent, NewEvent, INIT_EVENT_TYPE};
