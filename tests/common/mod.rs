//! In-memory collaborators for driving the proxy core natively

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use snowflake_wasm::proxy_pair::PairContext;
use snowflake_wasm::rate_limiter::{self, RateLimiterConfig};
use snowflake_wasm::{
    Clock, Connector, Leg, ManualClock, Observer, PairEvent, PairSettings, ProxyPair,
    RelaySocket, RelayTarget, Result, SdpType, SessionDescription, SessionId, SignalingPeer,
    SnowflakeError,
};

/// Client offer whose connection line names 1.2.3.4
pub const OFFER: &str = r#"{"type":"offer","sdp":"v=0\r\nc=IN IP4 1.2.3.4\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n"}"#;

/// Local description the fake peer produces
pub const ANSWER_SDP: &str = "v=0\r\n\
    a=candidate:1 1 udp 2122260223 192.168.0.1 54653 typ host generation 0\r\n\
    a=candidate:2 1 udp 1686052607 5.6.7.8 54653 typ srflx raddr 192.168.0.1 rport 54653\r\n";

#[derive(Debug, Default)]
pub struct PeerState {
    pub remote: Option<SessionDescription>,
    pub local: Option<SessionDescription>,
    pub reject_remote: bool,
    pub fail_send: bool,
    pub answers_created: u32,
    pub sent: Vec<Vec<u8>>,
    pub buffered: usize,
    pub closed: u32,
}

pub struct MockPeer(pub Rc<RefCell<PeerState>>);

impl SignalingPeer for MockPeer {
    fn set_remote_description(&mut self, offer: &SessionDescription) -> Result<()> {
        let mut st = self.0.borrow_mut();
        if st.reject_remote {
            return Err(SnowflakeError::InvalidOffer("rejected by peer".into()));
        }
        st.remote = Some(offer.clone());
        Ok(())
    }

    fn create_answer(&mut self) -> Result<()> {
        let mut st = self.0.borrow_mut();
        st.answers_created += 1;
        st.local = Some(SessionDescription::new(SdpType::Answer, ANSWER_SDP));
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.0.borrow().local.clone()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.0.borrow().remote.clone()
    }

    fn buffered_amount(&self) -> usize {
        self.0.borrow().buffered
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut st = self.0.borrow_mut();
        if st.fail_send {
            return Err(SnowflakeError::transport(Leg::Client, "send failed"));
        }
        st.sent.push(data.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed += 1;
    }
}

#[derive(Debug, Default)]
pub struct RelayState {
    pub url: String,
    pub fail_send: bool,
    pub sent: Vec<Vec<u8>>,
    pub buffered: usize,
    pub closed: u32,
}

pub struct MockRelay(pub Rc<RefCell<RelayState>>);

impl RelaySocket for MockRelay {
    fn buffered_amount(&self) -> usize {
        self.0.borrow().buffered
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut st = self.0.borrow_mut();
        if st.fail_send {
            return Err(SnowflakeError::transport(Leg::Relay, "send failed"));
        }
        st.sent.push(data.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed += 1;
    }
}

/// Hands out mock legs and remembers them by session
#[derive(Default)]
pub struct MockConnector {
    pub peers: RefCell<Vec<(SessionId, Rc<RefCell<PeerState>>)>>,
    pub relays: RefCell<Vec<(SessionId, Rc<RefCell<RelayState>>)>>,
    pub fail_peer: Cell<bool>,
    pub fail_relay: Cell<bool>,
}

impl MockConnector {
    pub fn peer(&self, sid: &SessionId) -> Rc<RefCell<PeerState>> {
        self.peers
            .borrow()
            .iter()
            .find(|(s, _)| s == sid)
            .map(|(_, p)| p.clone())
            .expect("no peer for session")
    }

    pub fn relay(&self, sid: &SessionId) -> Rc<RefCell<RelayState>> {
        self.relays
            .borrow()
            .iter()
            .find(|(s, _)| s == sid)
            .map(|(_, r)| r.clone())
            .expect("no relay for session")
    }

    pub fn has_relay(&self, sid: &SessionId) -> bool {
        self.relays.borrow().iter().any(|(s, _)| s == sid)
    }
}

impl Connector for MockConnector {
    fn new_peer(&self, sid: &SessionId) -> Result<Box<dyn SignalingPeer>> {
        if self.fail_peer.get() {
            return Err(SnowflakeError::transport(Leg::Client, "no WebRTC"));
        }
        let state = Rc::new(RefCell::new(PeerState::default()));
        self.peers.borrow_mut().push((sid.clone(), state.clone()));
        Ok(Box::new(MockPeer(state)))
    }

    fn dial_relay(&self, sid: &SessionId, url: &str) -> Result<Box<dyn RelaySocket>> {
        if self.fail_relay.get() {
            return Err(SnowflakeError::transport(Leg::Relay, "refused"));
        }
        let state = Rc::new(RefCell::new(RelayState {
            url: url.to_string(),
            ..RelayState::default()
        }));
        self.relays.borrow_mut().push((sid.clone(), state.clone()));
        Ok(Box::new(MockRelay(state)))
    }
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub statuses: RefCell<Vec<String>>,
    pub active: RefCell<Vec<bool>>,
    pub lines: RefCell<Vec<String>>,
}

impl RecordingObserver {
    pub fn last_status(&self) -> Option<String> {
        self.statuses.borrow().last().cloned()
    }

    pub fn last_active(&self) -> Option<bool> {
        self.active.borrow().last().copied()
    }
}

impl Observer for RecordingObserver {
    fn set_status(&self, status: &str) {
        self.statuses.borrow_mut().push(status.to_string());
    }

    fn set_active(&self, active: bool) {
        self.active.borrow_mut().push(active);
    }

    fn log(&self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}

pub fn relay_target() -> RelayTarget {
    RelayTarget::new("relay.test", 443, true)
}

/// A single pair wired to mocks and simulated time
pub struct PairHarness {
    pub pair: ProxyPair,
    pub connector: Rc<MockConnector>,
    pub observer: Rc<RecordingObserver>,
    pub clock: ManualClock,
}

impl PairHarness {
    pub fn new(rate: Option<RateLimiterConfig>) -> Self {
        let clock = ManualClock::new();
        clock.set_ms(1_000.0);
        let shared_clock: Rc<dyn Clock> = Rc::new(clock.clone());
        let connector = Rc::new(MockConnector::default());
        let observer = Rc::new(RecordingObserver::default());

        let ctx = PairContext {
            connector: connector.clone(),
            limiter: rate_limiter::from_config(rate, shared_clock.clone()),
            observer: observer.clone(),
            clock: shared_clock,
        };
        let settings = PairSettings {
            relay: relay_target(),
            relay_connect_timeout: Duration::from_secs(5),
            keep_local_addresses: false,
        };
        let pair = ProxyPair::new(SessionId::from("test-session"), settings, ctx);

        Self {
            pair,
            connector,
            observer,
            clock,
        }
    }

    pub fn sid(&self) -> SessionId {
        self.pair.sid().clone()
    }

    pub fn peer(&self) -> Rc<RefCell<PeerState>> {
        self.connector.peer(&self.sid())
    }

    pub fn relay(&self) -> Rc<RefCell<RelayState>> {
        self.connector.relay(&self.sid())
    }

    /// Drive the pair up to an open data channel with the relay dialing
    pub fn connect_client(&mut self) {
        self.pair.begin().expect("begin");
        assert!(self.pair.receive_offer(OFFER));
        self.pair.handle(PairEvent::CandidatesDone);
        self.pair.handle(PairEvent::ChannelOpen);
    }

    /// Drive the pair all the way to relaying
    pub fn open(&mut self) {
        self.connect_client();
        self.pair.handle(PairEvent::RelayOpen);
        self.pair.drain_effects();
    }

    pub fn advance(&self, by: Duration) -> f64 {
        self.clock.advance(by);
        self.clock.now_ms()
    }
}
