//! Transport layer for proxy pairs
//!
//! A proxy pair joins two legs: a WebRTC data channel towards the censored
//! client and a WebSocket towards the relay. The pair itself never touches
//! browser APIs. It talks to its legs through the traits below, and the
//! events those legs raise (open, message, close, error) are delivered back
//! to it by whoever owns the callbacks.
//!
//! In the browser, [`webrtc`] and [`websocket`] implement the traits on top
//! of `web-sys`; tests substitute in-memory fakes.

use std::net::IpAddr;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::proxy_pair::{PairEvent, SessionId};

pub mod sdp;
#[cfg(target_arch = "wasm32")]
pub mod webrtc;
#[cfg(target_arch = "wasm32")]
pub mod websocket;

pub use sdp::{remote_ip_from_sdp, strip_local_addresses, SdpType, SessionDescription};

/// Callback through which a leg reports its events to the owning pair
pub type EventSink = Rc<dyn Fn(PairEvent)>;

/// The client-facing leg: a peer connection and the data channel the client
/// opens on it
pub trait SignalingPeer {
    /// Apply the client's offer. An `Err` means the offer was rejected
    /// outright; asynchronous rejection arrives later as a leg error.
    fn set_remote_description(&mut self, offer: &SessionDescription) -> Result<()>;

    /// Create the local answer and start gathering candidates. Completion is
    /// signaled by the candidates-done event.
    fn create_answer(&mut self) -> Result<()>;

    /// The local description including every gathered candidate
    fn local_description(&self) -> Option<SessionDescription>;

    fn remote_description(&self) -> Option<SessionDescription>;

    /// Bytes queued in the data channel but not yet sent
    fn buffered_amount(&self) -> usize;

    fn send(&mut self, data: &[u8]) -> Result<()>;

    fn close(&mut self);
}

/// The relay-facing leg
pub trait RelaySocket {
    /// Bytes queued in the socket but not yet sent
    fn buffered_amount(&self) -> usize;

    fn send(&mut self, data: &[u8]) -> Result<()>;

    fn close(&mut self);
}

/// Factory for both legs of a session
pub trait Connector {
    fn new_peer(&self, sid: &SessionId) -> Result<Box<dyn SignalingPeer>>;

    /// Start connecting to the relay; the open event follows asynchronously
    fn dial_relay(&self, sid: &SessionId, url: &str) -> Result<Box<dyn RelaySocket>>;
}

/// Relay server address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
    /// Use `wss` instead of `ws`
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_secure() -> bool {
    true
}

impl Default for RelayTarget {
    fn default() -> Self {
        Self {
            host: "snowflake.freehaven.net".to_string(),
            port: 443,
            secure: true,
        }
    }
}

impl RelayTarget {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// WebSocket URL for one session, tagged with the client's address when
    /// it is known
    pub fn url(&self, client_ip: Option<IpAddr>) -> String {
        let ip = client_ip.map(|ip| ip.to_string());
        let params: Vec<(&str, &str)> = ip
            .as_deref()
            .map(|ip| vec![("client_ip", ip)])
            .unwrap_or_default();
        build_url(self.scheme(), &self.host, Some(self.port), "/", &params)
    }
}

impl std::fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registered default port for a URL scheme
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Assemble a URL from its parts, escaping each component
///
/// IPv6 literals are bracketed, the port is left out when it is the
/// scheme's default, and every path segment and query key/value is
/// percent-encoded.
pub fn build_url(
    scheme: &str,
    host: &str,
    port: Option<u16>,
    path: &str,
    params: &[(&str, &str)],
) -> String {
    let mut url = String::new();
    url.push_str(&encode_uri_component(scheme));
    url.push_str("://");

    if host.contains(':') && !host.contains('[') && !host.contains(']') {
        url.push('[');
        url.push_str(host);
        url.push(']');
    } else {
        url.push_str(&encode_uri_component(host));
    }

    if let Some(port) = port {
        if default_port(scheme) != Some(port) {
            url.push(':');
            url.push_str(&port.to_string());
        }
    }

    if !path.is_empty() {
        if !path.starts_with('/') {
            url.push('/');
        }
        let segments: Vec<String> = path.split('/').map(encode_uri_component).collect();
        url.push_str(&segments.join("/"));
    }

    if !params.is_empty() {
        url.push('?');
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode_uri_component(k), encode_uri_component(v)))
            .collect();
        url.push_str(&query.join("&"));
    }

    url
}

/// Percent-encode everything except the URI-component unreserved set
pub fn encode_uri_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
