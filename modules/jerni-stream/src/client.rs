//! Request/response endpoints of the log server: latest event and commit.

use jerni_events::{CommittedEvent, NewEvent};
use reqwest::Url;
use tracing::debug;

use crate::connection::Endpoint;
use crate::error::ClientError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Clone)]
pub struct LogClient {
    http: reqwest::Client,
    server: Url,
}

impl LogClient {
    pub fn new(server: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            server,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn endpoint(&self, path: &[&str]) -> Result<Endpoint> {
        Endpoint::new(&self.server, path).ok_or_else(|| ClientError::InvalidUrl(self.server.to_string()))
    }

    /// Latest committed event, or `None` while the log is empty.
    pub async fn latest(&self) -> Result<Option<CommittedEvent>> {
        let resp = self.endpoint(&["events", "latest"])?.get(&self.http).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let event: CommittedEvent = serde_json::from_str(&body)?;
        Ok(Some(event).filter(|e| !e.is_init_sentinel()))
    }

    /// Append an event. Returns it as committed, with its server-assigned id.
    pub async fn commit(&self, event: &NewEvent) -> Result<CommittedEvent> {
        let resp = self
            .endpoint(&["commit"])?
            .post(&self.http)
            .json(event)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let committed: CommittedEvent = serde_json::from_str(&body)?;
        debug!(id = committed.id, event_type = %committed.event_type, "event committed");
        Ok(committed)
    }
}
