//! Broker session protocol
//!
//! The broker is a rendezvous service. A proxy registers a session id and
//! the broker holds the request open until a client arrives or its own poll
//! window expires. On a match the reply carries the client's offer; the
//! proxy later posts its answer under the same session id.
//!
//! The client is stateless apart from the normalized base URL. HTTP itself
//! is abstracted behind [`HttpTransport`] so the protocol logic can be
//! exercised natively; the browser implementation lives in [`fetch`].

use async_trait::async_trait;

use crate::error::{Result, SnowflakeError};

pub mod messages;
#[cfg(target_arch = "wasm32")]
pub mod fetch;

pub use messages::PollOutcome;
use messages::{
    AnswerRequest, AnswerResponse, ProxyPollRequest, ProxyPollResponse, STATUS_CLIENT_GONE,
    STATUS_SUCCESS,
};

/// Largest response body accepted from the broker
pub const MAX_RESPONSE_BODY: usize = 100_000;

/// Default broker location
pub const DEFAULT_BROKER_URL: &str = "snowflake-broker.freehaven.net";

/// A completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Minimal HTTP capability the broker client needs
///
/// Implementations return `Err` only when no response was obtained at all
/// (network failure, request blocked locally, ...). Any HTTP status is an
/// `Ok` response.
#[async_trait(?Send)]
pub trait HttpTransport {
    async fn post(&self, url: &str, body: String) -> Result<HttpResponse>;
}

/// Result of posting an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStatus {
    Delivered,
    /// The matched client gave up before the answer arrived
    ClientGone,
    Failed,
}

/// Normalize a configured broker address into a base URL
///
/// A `localhost` host gets `http://`, anything else without a scheme gets
/// `https://`; a trailing `/` is always present afterwards.
pub fn normalize_url(url: &str) -> String {
    let mut url = if url.starts_with("localhost") {
        format!("http://{}", url)
    } else if !url.starts_with("http") {
        format!("https://{}", url)
    } else {
        url.to_string()
    };
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

/// Client for the broker's proxy-facing endpoints
pub struct BrokerClient<T> {
    base_url: String,
    proxy_type: String,
    transport: T,
}

impl<T: HttpTransport> BrokerClient<T> {
    pub fn new(broker_url: &str, proxy_type: &str, transport: T) -> Self {
        let base_url = normalize_url(broker_url);
        log::info!("Using broker at {}", base_url);
        Self {
            base_url,
            proxy_type: proxy_type.to_string(),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}{}", self.base_url, name)
    }

    /// Register `sid` and wait for a client offer
    ///
    /// Fails with `BrokerTimeout` when the broker found no client, and with
    /// `BrokerUnexpected` for every other non-match outcome.
    pub async fn request_offer(&self, sid: &str) -> Result<String> {
        let body = ProxyPollRequest::new(sid, &self.proxy_type).encode()?;
        log::debug!("Broker poll for {}", sid);

        let resp = self
            .transport
            .post(&self.endpoint("proxy"), body)
            .await
            .map_err(|e| SnowflakeError::BrokerUnexpected(format!("poll not sent: {}", e)))?;

        if resp.status != 200 {
            return Err(SnowflakeError::BrokerUnexpected(format!(
                "poll returned HTTP {}",
                resp.status
            )));
        }
        check_size(&resp.body)?;

        match ProxyPollResponse::decode(&resp.body)? {
            PollOutcome::Match { offer } => {
                log::info!("Broker matched {} with a client", sid);
                Ok(offer)
            }
            PollOutcome::NoMatch => Err(SnowflakeError::BrokerTimeout),
        }
    }

    /// Deliver the answer for `sid`
    ///
    /// Never fails the caller; the outcome is logged and returned.
    pub async fn submit_answer(&self, sid: &str, answer: &str) -> AnswerStatus {
        let body = match AnswerRequest::new(sid, answer).encode() {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Cannot encode answer for {}: {}", sid, e);
                return AnswerStatus::Failed;
            }
        };

        let status = match self.transport.post(&self.endpoint("answer"), body).await {
            Ok(resp) => answer_status(&resp),
            Err(e) => {
                log::warn!("Answer for {} not sent: {}", sid, e);
                AnswerStatus::Failed
            }
        };

        match status {
            AnswerStatus::Delivered => log::debug!("Answer for {} delivered", sid),
            AnswerStatus::ClientGone => log::info!("Client for {} is gone", sid),
            AnswerStatus::Failed => log::warn!("Broker rejected answer for {}", sid),
        }
        status
    }
}

fn check_size(body: &str) -> Result<()> {
    if body.len() > MAX_RESPONSE_BODY {
        return Err(SnowflakeError::BrokerUnexpected(format!(
            "response of {} bytes exceeds limit",
            body.len()
        )));
    }
    Ok(())
}

fn answer_status(resp: &HttpResponse) -> AnswerStatus {
    match resp.status {
        410 => AnswerStatus::ClientGone,
        200 => {
            if check_size(&resp.body).is_err() {
                return AnswerStatus::Failed;
            }
            match serde_json::from_str::<AnswerResponse>(&resp.body) {
                Ok(r) if r.status == STATUS_SUCCESS => AnswerStatus::Delivered,
                Ok(r) if r.status == STATUS_CLIENT_GONE => AnswerStatus::ClientGone,
                _ => AnswerStatus::Failed,
            }
        }
        _ => AnswerStatus::Failed,
    }
}
