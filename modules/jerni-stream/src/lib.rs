//! Event delivery from the log server.
//!
//! - [`parse`]: restartable SSE frame parser
//! - [`connector`]: one subscription attempt with idle / burst detection
//! - [`subscription`]: reconnect loop with backoff and adaptive batch size
//! - [`listener`]: buffered alternative with watermark flow control
//! - [`client`]: `events/latest` and `commit`

pub mod client;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod listener;
pub mod parse;
pub mod policy;
pub mod subscription;

pub use client::LogClient;
pub use config::StreamConfig;
pub use connection::SubscribeRequest;
pub use connector::{connect, BurstLimits, ConnectOptions, ConnectorSignal, INCOMING_EVENT};
pub use error::{ClientError, StreamError, SubscriptionError};
pub use listener::{BufferedListener, Watermarks};
pub use parse::{parse, Message, Parsed};
pub use policy::{Backoff, BatchSizePolicy, BACKOFF_LADDER_MS};
pub use subscription::Subscription;
