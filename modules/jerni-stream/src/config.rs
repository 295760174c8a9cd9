use std::env;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use tracing::info;
use typed_builder::TypedBuilder;

use crate::connector::BurstLimits;
use crate::listener::Watermarks;

/// Connection settings shared by the subscription loop and the buffered listener.
#[derive(Debug, Clone, TypedBuilder)]
pub struct StreamConfig {
    /// Base URL of the log server. Userinfo becomes Basic-Auth.
    pub server: Url,
    /// Event types to subscribe to. Empty means all.
    #[builder(default)]
    pub includes: Vec<String>,
    #[builder(default = Duration::from_secs(10))]
    pub idle_time: Duration,
    #[builder(default = Duration::from_secs(300))]
    pub max_idle_time: Duration,
    #[builder(default = 256)]
    pub batch_size: usize,
    #[builder(default = 8 * 1024 * 1024)]
    pub max_burst_bytes: usize,
    #[builder(default = 1_000)]
    pub max_burst_chunks: usize,
    #[builder(default = 1_000)]
    pub high_water_mark: usize,
    #[builder(default = 100)]
    pub low_water_mark: usize,
}

impl StreamConfig {
    /// Load from `JERNI_*` environment variables.
    /// Panics with a clear message if `JERNI_SERVER_URL` is missing or invalid.
    pub fn from_env() -> Self {
        let server = required_env("JERNI_SERVER_URL");
        let server = Url::parse(&server)
            .unwrap_or_else(|e| panic!("JERNI_SERVER_URL is not a valid URL: {e}"));

        Self {
            server,
            includes: env::var("JERNI_INCLUDES")
                .map(|csv| {
                    csv.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            idle_time: Duration::from_millis(env_or("JERNI_IDLE_MS", 10_000)),
            max_idle_time: Duration::from_millis(env_or("JERNI_MAX_IDLE_MS", 300_000)),
            batch_size: env_or("JERNI_BATCH_SIZE", 256),
            max_burst_bytes: env_or("JERNI_MAX_BURST_BYTES", 8 * 1024 * 1024),
            max_burst_chunks: env_or("JERNI_MAX_BURST_CHUNKS", 1_000),
            high_water_mark: env_or("JERNI_HIGH_WATER_MARK", 1_000),
            low_water_mark: env_or("JERNI_LOW_WATER_MARK", 100),
        }
    }

    pub fn burst_limits(&self) -> BurstLimits {
        BurstLimits {
            max_bytes: self.max_burst_bytes,
            max_chunks: self.max_burst_chunks,
        }
    }

    /// High/low marks with `1 <= low <= high`.
    pub fn watermarks(&self) -> Watermarks {
        let high = self.high_water_mark.max(1);
        Watermarks {
            high,
            low: self.low_water_mark.clamp(1, high),
        }
    }

    /// Server URL with the password masked, for logs.
    pub fn redacted_server(&self) -> String {
        let mut url = self.server.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }

    pub fn log_redacted(&self) {
        info!(
            server = %self.redacted_server(),
            includes = ?self.includes,
            idle_time = ?self.idle_time,
            batch_size = self.batch_size,
            "stream config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
