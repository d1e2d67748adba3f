//! One client-to-relay session
//!
//! ```text
//!    client <-- webrtc --> proxy pair <-- websocket --> relay
//! ```
//!
//! A pair is an explicit state machine. Everything that happens to it
//! arrives through [`ProxyPair::handle`] as a [`PairEvent`]; everything it
//! wants the outside world to do (send the answer to the broker, update
//! bookkeeping) leaves through [`ProxyPair::drain_effects`]. The pair never
//! sleeps. It exposes the earliest instant it wants to be woken at through
//! [`ProxyPair::next_deadline`] and does its timed work in
//! [`ProxyPair::handle_timeout`].
//!
//! ## Forwarding
//!
//! Inbound chunks are appended to one FIFO queue per direction. A flush pass
//! moves one chunk per direction per round, as long as the shared rate
//! limiter allows it, the destination leg is open and the destination's
//! buffered amount is below [`MAX_BUFFER`]. Whatever is left over is retried
//! when the limiter expects to have room again. At most one flush is ever
//! pending.

use std::collections::VecDeque;
use std::fmt;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::error::{Leg, Result, SnowflakeError};
use crate::observer::Observer;
use crate::rate_limiter::SharedRateLimit;
use crate::runtime::time::{millis, Clock};
use crate::transport::{
    remote_ip_from_sdp, strip_local_addresses, Connector, RelaySocket, RelayTarget, SdpType,
    SessionDescription, SignalingPeer,
};

/// Outbound buffer ceiling per leg (bytes)
pub const MAX_BUFFER: usize = 10 * 1024 * 1024;

/// Shortest delay between two scheduled flushes (ms)
pub const MIN_FLUSH_DELAY_MS: f64 = 4.0;

/// Random session identifier shared with the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// 16 random bytes, unpadded standard base64
    pub fn generate() -> Self {
        Self::from_rng(&mut rand::thread_rng())
    }

    pub fn from_rng<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        SessionId(STANDARD_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairState {
    /// Created, no peer connection yet
    Init,
    /// Peer connection ready, registered with the broker
    AwaitingOffer,
    /// Offer applied, gathering candidates for the answer
    Signaling,
    /// Answer handed to the broker
    HandshakeSent,
    ChannelOpen,
    RelayConnecting,
    Relaying,
    Closing,
    Closed,
}

impl PairState {
    /// A client is attached to this pair
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            PairState::ChannelOpen | PairState::RelayConnecting | PairState::Relaying
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PairState::Closing | PairState::Closed)
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Watchdogs that can abort a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watchdog {
    /// The client never opened its data channel
    Setup,
    /// The relay socket never opened
    RelayConnect,
}

/// Inputs of the pair state machine
#[derive(Debug, Clone, PartialEq)]
pub enum PairEvent {
    /// JSON session description from the broker
    Offer(String),
    /// The peer connection refused the offer after accepting it for processing
    OfferRejected(String),
    /// Candidate gathering finished
    CandidatesDone,
    ChannelOpen,
    ChannelMessage(Vec<u8>),
    ChannelClosed,
    RelayOpen,
    RelayMessage(Vec<u8>),
    RelayClosed,
    LegError(Leg, String),
    Timeout(Watchdog),
}

impl PairEvent {
    fn name(&self) -> &'static str {
        match self {
            PairEvent::Offer(_) => "offer",
            PairEvent::OfferRejected(_) => "offer-rejected",
            PairEvent::CandidatesDone => "candidates-done",
            PairEvent::ChannelOpen => "channel-open",
            PairEvent::ChannelMessage(_) => "channel-message",
            PairEvent::ChannelClosed => "channel-closed",
            PairEvent::RelayOpen => "relay-open",
            PairEvent::RelayMessage(_) => "relay-message",
            PairEvent::RelayClosed => "relay-closed",
            PairEvent::LegError(..) => "leg-error",
            PairEvent::Timeout(_) => "timeout",
        }
    }
}

/// Outputs of the pair state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairEffect {
    /// Deliver this JSON answer to the broker
    SendAnswer(String),
    /// The client's data channel opened
    Connected,
    /// The pair is gone; emitted exactly once
    Closed,
}

/// Per-pair settings copied from the proxy configuration
#[derive(Debug, Clone)]
pub struct PairSettings {
    pub relay: RelayTarget,
    pub relay_connect_timeout: Duration,
    pub keep_local_addresses: bool,
}

/// Shared handles every pair needs
#[derive(Clone)]
pub struct PairContext {
    pub connector: Rc<dyn Connector>,
    pub limiter: SharedRateLimit,
    pub observer: Rc<dyn Observer>,
    pub clock: Rc<dyn Clock>,
}

pub struct ProxyPair {
    sid: SessionId,
    state: PairState,
    settings: PairSettings,
    ctx: PairContext,

    peer: Option<Box<dyn SignalingPeer>>,
    relay: Option<Box<dyn RelaySocket>>,
    client_open: bool,
    relay_open: bool,

    c2r: VecDeque<Vec<u8>>,
    r2c: VecDeque<Vec<u8>>,
    c2r_bytes: u64,
    r2c_bytes: u64,

    flush_deadline: Option<f64>,
    relay_deadline: Option<f64>,

    answer_sent: bool,
    effects: Vec<PairEffect>,
}

impl ProxyPair {
    pub fn new(sid: SessionId, settings: PairSettings, ctx: PairContext) -> Self {
        Self {
            sid,
            state: PairState::Init,
            settings,
            ctx,
            peer: None,
            relay: None,
            client_open: false,
            relay_open: false,
            c2r: VecDeque::new(),
            r2c: VecDeque::new(),
            c2r_bytes: 0,
            r2c_bytes: 0,
            flush_deadline: None,
            relay_deadline: None,
            answer_sent: false,
            effects: Vec::new(),
        }
    }

    pub fn sid(&self) -> &SessionId {
        &self.sid
    }

    pub fn state(&self) -> PairState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Not yet registered with the broker
    pub fn is_idle(&self) -> bool {
        self.state == PairState::Init
    }

    /// Bytes waiting in (client-to-relay, relay-to-client)
    pub fn queued_bytes(&self) -> (usize, usize) {
        (
            self.c2r.iter().map(Vec::len).sum(),
            self.r2c.iter().map(Vec::len).sum(),
        )
    }

    /// Bytes handed to (relay, client) so far
    pub fn forwarded_bytes(&self) -> (u64, u64) {
        (self.c2r_bytes, self.r2c_bytes)
    }

    /// Create the peer connection and wait for an offer
    pub fn begin(&mut self) -> Result<()> {
        if self.state != PairState::Init {
            return Err(SnowflakeError::InvalidState(format!(
                "begin in state {}",
                self.state
            )));
        }
        match self.ctx.connector.new_peer(&self.sid) {
            Ok(peer) => {
                self.peer = Some(peer);
                self.state = PairState::AwaitingOffer;
                Ok(())
            }
            Err(e) => {
                log::warn!("{}: cannot create peer connection: {}", self.sid, e);
                self.close();
                Err(e)
            }
        }
    }

    /// Feed the broker's offer; false means the pair was aborted
    pub fn receive_offer(&mut self, offer: &str) -> bool {
        self.handle(PairEvent::Offer(offer.to_string()));
        self.state == PairState::Signaling
    }

    /// The single transition function
    pub fn handle(&mut self, event: PairEvent) {
        use PairState::*;

        match (self.state, event) {
            (Closing | Closed, event) => {
                log::trace!("{}: {} after close", self.sid, event.name());
            }

            (AwaitingOffer, PairEvent::Offer(json)) => match self.accept_offer(&json) {
                Ok(()) => {
                    log::debug!("{}: offer accepted, gathering candidates", self.sid);
                    self.state = Signaling;
                }
                Err(e) => self.fail(e),
            },

            (Signaling, PairEvent::CandidatesDone) => self.send_answer(),

            (Signaling, PairEvent::OfferRejected(reason)) => {
                self.fail(SnowflakeError::InvalidOffer(reason))
            }

            (HandshakeSent, PairEvent::ChannelOpen) => {
                log::info!("{}: data channel open", self.sid);
                self.state = ChannelOpen;
                self.client_open = true;
                self.effects.push(PairEffect::Connected);
                self.ctx.observer.set_status("connected");
                self.connect_relay();
            }

            (ChannelOpen | RelayConnecting | Relaying, PairEvent::ChannelMessage(data)) => {
                log::trace!("{}: webrtc --> relay {} bytes", self.sid, data.len());
                self.c2r.push_back(data);
                self.flush();
            }

            (RelayConnecting, PairEvent::RelayOpen) => {
                log::info!("{}: relay connected", self.sid);
                self.relay_deadline = None;
                self.relay_open = true;
                self.state = Relaying;
                self.flush();
            }

            (Relaying, PairEvent::RelayMessage(data)) => {
                log::trace!("{}: relay --> webrtc {} bytes", self.sid, data.len());
                self.r2c.push_back(data);
                self.flush();
            }

            (_, PairEvent::ChannelClosed) => {
                log::info!("{}: data channel closed", self.sid);
                self.ctx.observer.set_status("disconnected by webrtc.");
                self.client_open = false;
                self.flush();
                self.close();
            }

            (_, PairEvent::RelayClosed) => {
                log::info!("{}: relay closed", self.sid);
                self.ctx.observer.set_status("disconnected by relay.");
                self.relay_open = false;
                self.flush();
                self.close();
            }

            (_, PairEvent::LegError(leg, reason)) => {
                self.fail(SnowflakeError::transport(leg, reason));
            }

            (_, PairEvent::Timeout(Watchdog::Setup)) => self.fail(SnowflakeError::SetupTimeout),

            (RelayConnecting, PairEvent::Timeout(Watchdog::RelayConnect)) => {
                self.fail(SnowflakeError::RelayTimeout)
            }

            (state, event) => {
                log::debug!("{}: ignoring {} in state {}", self.sid, event.name(), state);
            }
        }
    }

    fn accept_offer(&mut self, json: &str) -> Result<()> {
        let offer = SessionDescription::from_json(json)?;
        if offer.kind != SdpType::Offer {
            return Err(SnowflakeError::InvalidOffer(format!(
                "expected an offer, got {:?}",
                offer.kind
            )));
        }
        let peer = self
            .peer
            .as_mut()
            .ok_or_else(|| SnowflakeError::InvalidState("no peer connection".into()))?;
        peer.set_remote_description(&offer)
            .map_err(|e| SnowflakeError::InvalidOffer(e.to_string()))?;
        peer.create_answer()
    }

    /// Hand the gathered local description to the broker, once
    fn send_answer(&mut self) {
        if self.answer_sent {
            return;
        }
        let local = self.peer.as_ref().and_then(|peer| peer.local_description());
        let Some(local) = local else {
            self.fail(SnowflakeError::InvalidState("no local description".into()));
            return;
        };

        let sdp = if self.settings.keep_local_addresses {
            local.sdp
        } else {
            strip_local_addresses(&local.sdp)
        };
        match SessionDescription::new(local.kind, sdp).to_json() {
            Ok(answer) => {
                log::debug!("{}: finished gathering candidates", self.sid);
                self.answer_sent = true;
                self.state = PairState::HandshakeSent;
                self.effects.push(PairEffect::SendAnswer(answer));
            }
            Err(e) => self.fail(e),
        }
    }

    fn client_ip(&self) -> Option<IpAddr> {
        self.peer
            .as_ref()
            .and_then(|peer| peer.remote_description())
            .and_then(|desc| remote_ip_from_sdp(&desc.sdp))
    }

    fn connect_relay(&mut self) {
        let url = self.settings.relay.url(self.client_ip());
        log::debug!("{}: connecting to relay {}", self.sid, url);
        match self.ctx.connector.dial_relay(&self.sid, &url) {
            Ok(relay) => {
                self.relay = Some(relay);
                self.state = PairState::RelayConnecting;
                self.relay_deadline =
                    Some(self.ctx.clock.now_ms() + millis(self.settings.relay_connect_timeout));
            }
            Err(e) => self.fail(e),
        }
    }

    /// Move as much queued data as the limiter and both legs allow
    pub fn flush(&mut self) {
        self.flush_deadline = None;
        if self.state == PairState::Closed {
            return;
        }

        let limiter = self.ctx.limiter.clone();
        let mut failure = None;
        let mut busy = true;

        while busy && !limiter.is_limited() {
            busy = false;

            // webrtc --> relay
            if let (true, Some(relay)) = (self.relay_open, self.relay.as_mut()) {
                if relay.buffered_amount() < MAX_BUFFER {
                    if let Some(chunk) = self.c2r.pop_front() {
                        limiter.update(chunk.len());
                        if let Err(e) = relay.send(&chunk) {
                            failure = Some(e);
                            break;
                        }
                        self.c2r_bytes += chunk.len() as u64;
                        busy = true;
                    }
                }
            }

            // relay --> webrtc
            if let (true, Some(peer)) = (self.client_open, self.peer.as_mut()) {
                if peer.buffered_amount() < MAX_BUFFER {
                    if let Some(chunk) = self.r2c.pop_front() {
                        limiter.update(chunk.len());
                        if let Err(e) = peer.send(&chunk) {
                            failure = Some(e);
                            break;
                        }
                        self.r2c_bytes += chunk.len() as u64;
                        busy = true;
                    }
                }
            }
        }

        if let Some(e) = failure {
            self.fail(e);
            return;
        }

        if self.state != PairState::Closing && self.has_pending_output() {
            let wait = (limiter.seconds_until_available() * 1000.0).max(MIN_FLUSH_DELAY_MS);
            self.flush_deadline = Some(self.ctx.clock.now_ms() + wait);
        }
    }

    /// Data or buffered bytes that an open leg still has to move
    fn has_pending_output(&self) -> bool {
        let relay_pending = self.relay_open
            && (!self.c2r.is_empty()
                || self.relay.as_ref().map_or(0, |r| r.buffered_amount()) > 0);
        let client_pending = self.client_open
            && (!self.r2c.is_empty()
                || self.peer.as_ref().map_or(0, |p| p.buffered_amount()) > 0);
        relay_pending || client_pending
    }

    fn fail(&mut self, err: SnowflakeError) {
        log::warn!("{}: {}", self.sid, err);
        self.ctx.observer.log(&format!("{}: {}", self.sid, err.user_message()));
        self.close();
    }

    /// Tear down both legs; repeated calls do nothing
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = PairState::Closing;
        self.flush_deadline = None;
        self.relay_deadline = None;

        if let Some(mut relay) = self.relay.take() {
            relay.close();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        self.relay_open = false;
        self.client_open = false;
        self.c2r.clear();
        self.r2c.clear();

        log::info!(
            "{}: closed after {} bytes to relay, {} bytes to client",
            self.sid,
            self.c2r_bytes,
            self.r2c_bytes
        );
        self.state = PairState::Closed;
        self.effects.push(PairEffect::Closed);
    }

    /// Earliest instant (ms) this pair wants [`ProxyPair::handle_timeout`]
    pub fn next_deadline(&self) -> Option<f64> {
        match (self.flush_deadline, self.relay_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run whatever timers have expired at `now`
    pub fn handle_timeout(&mut self, now: f64) {
        if self.relay_deadline.is_some_and(|d| d <= now) {
            self.relay_deadline = None;
            self.handle(PairEvent::Timeout(Watchdog::RelayConnect));
        }
        if self.flush_deadline.is_some_and(|d| d <= now) {
            self.flush();
        }
    }

    pub fn drain_effects(&mut self) -> Vec<PairEffect> {
        std::mem::take(&mut self.effects)
    }
}

impl fmt::Debug for ProxyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPair")
            .field("sid", &self.sid)
            .field("state", &self.state)
            .field("c2r_queued", &self.c2r.len())
            .field("r2c_queued", &self.r2c.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_session_id_format() {
        let sid = SessionId::generate();
        assert_eq!(sid.as_str().len(), 22);
        assert!(!sid.as_str().contains('='));
        assert!(STANDARD_NO_PAD.decode(sid.as_str()).is_ok());
    }

    #[test]
    fn test_session_id_seeded() {
        let a = SessionId::from_rng(&mut StdRng::seed_from_u64(7));
        let b = SessionId::from_rng(&mut StdRng::seed_from_u64(7));
        let c = SessionId::from_rng(&mut StdRng::seed_from_u64(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_state_predicates() {
        assert!(PairState::Relaying.is_connected());
        assert!(PairState::ChannelOpen.is_connected());
        assert!(!PairState::HandshakeSent.is_connected());
        assert!(PairState::Closed.is_terminal());
        assert!(!PairState::Init.is_terminal());
    }
}
