//! Broker wire messages
//!
//! Field names and order are fixed by deployed brokers and must not change.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnowflakeError};

pub const PROXY_POLL_VERSION: &str = "1.1";
pub const ANSWER_VERSION: &str = "1.0";

pub const STATUS_CLIENT_MATCH: &str = "client match";
pub const STATUS_NO_MATCH: &str = "no match";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_CLIENT_GONE: &str = "client gone";

/// Registration request sent to `<base>proxy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPollRequest {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Type")]
    pub proxy_type: String,
}

impl ProxyPollRequest {
    pub fn new(sid: &str, proxy_type: &str) -> Self {
        Self {
            version: PROXY_POLL_VERSION.to_string(),
            sid: sid.to_string(),
            proxy_type: proxy_type.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Broker reply to a registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPollResponse {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Offer", default, skip_serializing_if = "String::is_empty")]
    pub offer: String,
}

/// Outcome of a registration request, once decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Match { offer: String },
    NoMatch,
}

impl ProxyPollResponse {
    pub fn decode(body: &str) -> Result<PollOutcome> {
        let resp: ProxyPollResponse = serde_json::from_str(body)
            .map_err(|e| SnowflakeError::BrokerUnexpected(format!("bad poll response: {}", e)))?;
        match resp.status.as_str() {
            STATUS_CLIENT_MATCH if resp.offer.is_empty() => Err(
                SnowflakeError::BrokerUnexpected("client match without an offer".into()),
            ),
            STATUS_CLIENT_MATCH => Ok(PollOutcome::Match { offer: resp.offer }),
            STATUS_NO_MATCH => Ok(PollOutcome::NoMatch),
            other => Err(SnowflakeError::BrokerUnexpected(format!(
                "unknown poll status {:?}",
                other
            ))),
        }
    }
}

/// Answer submission sent to `<base>answer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Sid")]
    pub sid: String,
    /// JSON-encoded session description
    #[serde(rename = "Answer")]
    pub answer: String,
}

impl AnswerRequest {
    pub fn new(sid: &str, answer: &str) -> Self {
        Self {
            version: ANSWER_VERSION.to_string(),
            sid: sid.to_string(),
            answer: answer.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    #[serde(rename = "Status")]
    pub status: String,
}
