//! Projection side of jerni.
//!
//! - [`waiter`]: per-store checkpoints and waits on all of them
//! - [`dispatcher`]: bisecting batch application with a skip policy
//! - [`journey`]: the facade tying log client, subscription and stores together

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod journey;
pub mod waiter;

pub use config::JourneyConfig;
pub use dispatcher::{dispatch, Dispatched, ErrorPolicy, ErrorResolution, NeverSkip};
pub use error::JourneyError;
pub use journey::{BatchOutput, Journey};
pub use waiter::{CheckpointWaiter, WaitLimit};
