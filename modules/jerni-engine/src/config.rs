use std::env;

use jerni_stream::StreamConfig;
use typed_builder::TypedBuilder;

/// Everything a [`crate::Journey`] needs beyond its stores and event database.
#[derive(Debug, Clone, TypedBuilder)]
pub struct JourneyConfig {
    pub stream: StreamConfig,
    /// Events read from the EventDatabase per store per round trip.
    #[builder(default = 500)]
    pub page_size: usize,
}

impl JourneyConfig {
    /// Load from `JERNI_*` environment variables. See [`StreamConfig::from_env`].
    pub fn from_env() -> Self {
        let page_size = match env::var("JERNI_PAGE_SIZE") {
            Ok(raw) => raw
                .trim()
                .parse()
                .unwrap_or_else(|_| panic!("JERNI_PAGE_SIZE must be a number")),
            Err(_) => 500,
        };

        Self {
            stream: StreamConfig::from_env(),
            page_size,
        }
    }
}
