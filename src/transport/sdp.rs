//! Session description helpers
//!
//! The broker carries session descriptions as JSON strings of the form
//! `{"type":"offer","sdp":"v=0\r\n..."}`. Beyond (de)serializing them, the
//! proxy only ever looks inside the SDP text for two things: the client's
//! connection address, and local host candidates that should not leak into
//! the answer.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnowflakeError};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// A signaling session description as exchanged through the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    /// Parse the JSON form used on the wire
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SnowflakeError::InvalidOffer(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn remote_ip_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // c=IN IP4 <addr>[/<ttl>[/<count>]]
            Regex::new(r"(?m)^c=IN IP4 ([\d.]+)(?:(?:/\d+)?/\d+)?(?::? |\r?$)")
                .expect("static IPv4 connection-data pattern"),
            // c=IN IP6 <addr>[/<count>]
            Regex::new(r"(?m)^c=IN IP6 ([0-9A-Fa-f:.]+)(?:/\d+)?(?::? |\r?$)")
                .expect("static IPv6 connection-data pattern"),
        ]
    })
}

/// Extract the peer address from the first connection-data (`c=`) line
///
/// See RFC 4566 section 5.7. Unparseable addresses yield `None`.
pub fn remote_ip_from_sdp(sdp: &str) -> Option<IpAddr> {
    for pattern in remote_ip_patterns() {
        if let Some(caps) = pattern.captures(sdp) {
            return caps.get(1).and_then(|m| m.as_str().parse().ok());
        }
    }
    None
}

/// Whether an address belongs to a private or otherwise non-routable range
pub fn is_local(ip: &IpAddr) -> bool {
    let v4 = match ip {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    };
    if let Some(v4) = v4 {
        let o = v4.octets();
        return o[0] == 10
            || (o[0] == 172 && o[1] & 0xf0 == 16)
            || (o[0] == 192 && o[1] == 168)
            // carrier-grade NAT, RFC 6598
            || (o[0] == 100 && o[1] & 0xc0 == 64)
            // link-local, RFC 3927
            || (o[0] == 169 && o[1] == 254);
    }
    match ip {
        // unique local, RFC 4193
        IpAddr::V6(v6) => v6.octets()[0] & 0xfe == 0xfc,
        IpAddr::V4(_) => false,
    }
}

/// Drop host candidates on local, loopback or unspecified addresses
///
/// Line endings of the remaining lines are preserved as they were.
pub fn strip_local_addresses(sdp: &str) -> String {
    sdp.split_inclusive('\n')
        .filter(|line| !is_local_host_candidate(line))
        .collect()
}

fn is_local_host_candidate(line: &str) -> bool {
    let Some(value) = line.trim_end().strip_prefix("a=candidate:") else {
        return false;
    };
    // foundation component transport priority address port "typ" type ...
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 8 || fields[6] != "typ" || fields[7] != "host" {
        return false;
    }
    match fields[4].parse::<IpAddr>() {
        Ok(ip) => is_local(&ip) || ip.is_unspecified() || ip.is_loopback(),
        // mDNS hostnames and the like stay
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both_endings(sdp: &str) -> [String; 2] {
        [sdp.to_string(), sdp.replace('\n', "\r\n")]
    }

    fn check(sdp: &str, expected: Option<&str>) {
        let expected: Option<IpAddr> = expected.map(|s| s.parse().unwrap());
        for variant in both_endings(sdp) {
            assert_eq!(remote_ip_from_sdp(&variant), expected, "sdp {:?}", variant);
        }
    }

    #[test]
    fn test_remote_ip_connection_lines() {
        check("c=IN IP4 224.2.1.1\n", Some("224.2.1.1"));
        check("c=IN IP4 224.2.1.1/127\n", Some("224.2.1.1"));
        check("c=IN IP4 224.2.1.1/127/3\n", Some("224.2.1.1"));
        check("c=IN IP6 FF15::101\n", Some("ff15::101"));
        check("c=IN IP6 FF15::101/3\n", Some("ff15::101"));
        check("c=IN IP4 1.2.3.4\nc=IN IP4 5.6.7.8", Some("1.2.3.4"));
    }

    #[test]
    fn test_remote_ip_on_last_line() {
        check("v=0\nc=IN IP4 1.2.3.4", Some("1.2.3.4"));
        check("c=IN IP6 FF15::101/3", Some("ff15::101"));
        check("c=IN IP4 224.2.1.1/127/3", Some("224.2.1.1"));
    }

    #[test]
    fn test_remote_ip_rejects_garbage() {
        check("c=IN IP4 224.2z.1.1", None);
        check("c=IN IP6 ff15:g::101", None);
        check("c=IN IP7 1.2.3.4\n", None);
    }

    #[test]
    fn test_remote_ip_missing_line() {
        let sdp = "v=0\n\
                   o=jdoe 2890844526 2890842807 IN IP4 10.47.16.5\n\
                   s=SDP Seminar\n\
                   t=2873397496 2873404696\n\
                   a=recvonly\n\
                   m=audio 49170 RTP/AVP 0\n";
        check(sdp, None);
    }

    #[test]
    fn test_remote_ip_in_browser_offer() {
        let sdp = "v=0\n\
                   o=- 7860378660295630295 2 IN IP4 127.0.0.1\n\
                   s=-\n\
                   t=0 0\n\
                   a=group:BUNDLE data\n\
                   m=application 54653 DTLS/SCTP 5000\n\
                   c=IN IP4 1.2.3.4\n\
                   a=candidate:3581707038 1 udp 2122260223 192.168.0.1 54653 typ host generation 0\n\
                   a=mid:data\n";
        check(sdp, Some("1.2.3.4"));
    }

    #[test]
    fn test_session_description_json() {
        let desc = SessionDescription::from_json(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(desc.kind, SdpType::Offer);
        assert_eq!(desc.sdp, "v=0\r\n");

        let answer = SessionDescription::new(SdpType::Answer, "v=0");
        assert_eq!(answer.to_json().unwrap(), r#"{"type":"answer","sdp":"v=0"}"#);
    }

    #[test]
    fn test_session_description_rejects_bad_input() {
        for bad in [
            r#"{"type":"offer"}"#,
            r#"{"sdp":"v=0"}"#,
            r#"{"type":"bogus","sdp":"v=0"}"#,
            "not json",
        ] {
            let err = SessionDescription::from_json(bad).unwrap_err();
            assert!(matches!(err, SnowflakeError::InvalidOffer(_)), "{}", bad);
        }
    }

    #[test]
    fn test_is_local() {
        for local in ["10.1.2.3", "172.16.0.1", "172.31.255.255", "192.168.1.1", "100.64.0.1", "169.254.3.4", "fd00::1"] {
            assert!(is_local(&local.parse().unwrap()), "{}", local);
        }
        for public in ["8.8.8.8", "172.32.0.1", "100.128.0.1", "2001:db8::1"] {
            assert!(!is_local(&public.parse().unwrap()), "{}", public);
        }
    }

    #[test]
    fn test_strip_local_addresses() {
        let sdp = "v=0\r\n\
                   a=candidate:1 1 udp 2122260223 192.168.0.1 54653 typ host generation 0\r\n\
                   a=candidate:2 1 udp 2122260223 127.0.0.1 54654 typ host generation 0\r\n\
                   a=candidate:3 1 udp 2122260223 0.0.0.0 54655 typ host generation 0\r\n\
                   a=candidate:4 1 udp 2122260223 abcd.local 54656 typ host generation 0\r\n\
                   a=candidate:5 1 udp 1686052607 1.2.3.4 54653 typ srflx raddr 192.168.0.1 rport 54653\r\n\
                   a=candidate:6 1 udp 2122260223 5.6.7.8 54657 typ host generation 0\r\n\
                   a=mid:data\r\n";
        let stripped = strip_local_addresses(sdp);
        assert!(!stripped.contains("192.168.0.1 54653 typ host"));
        assert!(!stripped.contains("127.0.0.1"));
        assert!(!stripped.contains("0.0.0.0"));
        assert!(stripped.contains("abcd.local"));
        assert!(stripped.contains("typ srflx"));
        assert!(stripped.contains("5.6.7.8"));
        assert!(stripped.ends_with("a=mid:data\r\n"));
        assert!(stripped.starts_with("v=0\r\n"));
    }
}
