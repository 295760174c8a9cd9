//! One live `text/event-stream` response, read chunk by chunk into messages.

use reqwest::{RequestBuilder, Url};
use tracing::debug;

use crate::error::StreamError;
use crate::parse::{parse, Message};

/// Header carrying the requested burst size.
pub const BURST_COUNT_HEADER: &str = "burst-count";
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

// ---------------------------------------------------------------------------
// Endpoint: URL with userinfo lifted into Basic-Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl Endpoint {
    /// Append `path` to the server URL. Credentials in the userinfo are
    /// removed from the URL and sent as Basic-Auth instead.
    pub fn new(server: &Url, path: &[&str]) -> Option<Self> {
        let mut url = server.clone();
        let username = Some(url.username().to_string()).filter(|u| !u.is_empty());
        let password = url.password().map(str::to_string);
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.path_segments_mut().ok()?.pop_if_empty().extend(path);
        Some(Self {
            url,
            username,
            password,
        })
    }

    pub fn get(&self, http: &reqwest::Client) -> RequestBuilder {
        self.authorize(http.get(self.url.clone()))
    }

    pub fn post(&self, http: &reqwest::Client) -> RequestBuilder {
        self.authorize(http.post(self.url.clone()))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }
}

// ---------------------------------------------------------------------------
// SubscribeRequest
// ---------------------------------------------------------------------------

/// Parameters of one `GET {server}/subscribe` attempt.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub server: Url,
    pub includes: Vec<String>,
    /// Resume after this id (exclusive).
    pub last_event_id: i64,
    /// How many events the server may pack into one INCMSG frame.
    pub burst_count: usize,
}

impl SubscribeRequest {
    pub(crate) fn build(&self, http: &reqwest::Client) -> Result<RequestBuilder, StreamError> {
        let mut endpoint = Endpoint::new(&self.server, &["subscribe"])
            .ok_or_else(|| StreamError::InvalidUrl(self.server.to_string()))?;
        {
            let mut query = endpoint.url.query_pairs_mut();
            if !self.includes.is_empty() {
                query.append_pair("includes", &self.includes.join(","));
            }
            query.append_pair("lastEventId", &self.last_event_id.to_string());
        }

        Ok(endpoint
            .get(http)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(LAST_EVENT_ID_HEADER, self.last_event_id.to_string())
            .header(BURST_COUNT_HEADER, self.burst_count.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Utf8Decoder: chunk boundaries may split a code point
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much as possible, holding back an incomplete trailing sequence.
    /// Invalid bytes become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }
}

// ---------------------------------------------------------------------------
// SseConnection
// ---------------------------------------------------------------------------

/// What one body chunk produced.
#[derive(Debug)]
pub(crate) struct Read {
    pub bytes: usize,
    pub messages: Vec<Message>,
    /// Text received but not yet part of a finished message.
    pub unfinished: usize,
}

/// An open subscription response. Dropping it closes the connection.
pub(crate) struct SseConnection {
    response: reqwest::Response,
    decoder: Utf8Decoder,
    buffer: String,
}

impl SseConnection {
    pub async fn open(
        http: &reqwest::Client,
        request: &SubscribeRequest,
    ) -> Result<Self, StreamError> {
        let response = request.build(http)?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            last_event_id = request.last_event_id,
            burst_count = request.burst_count,
            "subscription opened"
        );

        Ok(Self {
            response,
            decoder: Utf8Decoder::default(),
            buffer: String::new(),
        })
    }

    /// Next body chunk, parsed. `None` once the server ends the body.
    pub async fn read(&mut self) -> Result<Option<Read>, StreamError> {
        let Some(chunk) = self.response.chunk().await? else {
            return Ok(None);
        };

        self.buffer.push_str(&self.decoder.decode(&chunk));
        let parsed = parse(&self.buffer);
        self.buffer = parsed.leftover;

        Ok(Some(Read {
            bytes: chunk.len(),
            messages: parsed.messages,
            unfinished: self.buffer.len(),
        }))
    }
}
