//! The proxy orchestrator
//!
//! [`Snowflake`] owns every live [`ProxyPair`], the shared rate limiter and
//! the broker poll schedule. Like the pairs it manages, it performs no I/O
//! of its own. Broker requests are queued as [`BrokerWork`] for the driver,
//! which performs them and reports back through [`Snowflake::offer_result`].
//! Timers are reduced to a single [`Snowflake::next_deadline`].
//!
//! ## Capacity
//!
//! Every pair belongs to a client slot. A poll that finds no idle pair opens
//! a new slot, and at most `maxNumClients` slots exist. When a pair of a slot
//! connects, idle pairs are created in that slot until it holds
//! `connectionsPerClient` pairs. A poll always hands an idle pair to the
//! broker before opening a slot. Idle pairs go away with the last busy pair
//! of their slot.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ProxyConfig;
use crate::error::{Result, SnowflakeError};
use crate::observer::Observer;
use crate::proxy_pair::{
    PairContext, PairEffect, PairEvent, PairSettings, ProxyPair, SessionId, Watchdog,
};
use crate::rate_limiter::{self, SharedRateLimit};
use crate::runtime::time::{millis, Clock};
use crate::transport::{Connector, RelayTarget};

/// Broker interaction the driver has to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerWork {
    /// Register the session and report the outcome via `offer_result`
    RequestOffer { sid: SessionId },
    /// Fire-and-forget answer delivery
    SubmitAnswer { sid: SessionId, answer: String },
}

/// How often the traffic summary is logged
pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Aggregate status for the UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnowflakeStats {
    /// Pairs in any state
    pub live: usize,
    /// Client slots with at least one connected pair
    pub active: usize,
    /// Connected pairs
    pub connections: usize,
    pub capacity: usize,
    /// Broker polls issued so far
    pub retries: u64,
    pub rate_limited: bool,
    pub bytes_to_relay: u64,
    pub bytes_to_client: u64,
    /// Connected pairs that have since closed
    pub connections_served: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Traffic {
    to_relay: u64,
    to_client: u64,
    connections: u64,
}

impl Traffic {
    fn add(&mut self, (to_relay, to_client): (u64, u64)) {
        self.to_relay += to_relay;
        self.to_client += to_client;
        self.connections += 1;
    }
}

/// Scale a byte count for display
fn format_traffic(bytes: u64) -> (u64, &'static str) {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024 && unit + 1 < UNITS.len() {
        value /= 1024;
        unit += 1;
    }
    (value, UNITS[unit])
}

struct Entry {
    pair: ProxyPair,
    /// Client slot, named after the pair that opened it
    slot: SessionId,
    connected: bool,
    setup_deadline: Option<f64>,
}

pub struct Snowflake {
    config: ProxyConfig,
    relay: RelayTarget,
    ctx: PairContext,
    pairs: Vec<Entry>,
    work: Vec<BrokerWork>,
    poll_deadline: Option<f64>,
    running: bool,
    disabled: bool,
    retries: u64,
    active: bool,
    total: Traffic,
    period: Traffic,
    summary_deadline: Option<f64>,
}

impl Snowflake {
    pub fn new(
        config: ProxyConfig,
        connector: Rc<dyn Connector>,
        observer: Rc<dyn Observer>,
        clock: Rc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let limiter: SharedRateLimit = rate_limiter::from_config(config.rate_limit(), clock.clone());
        Ok(Self {
            relay: config.relay.clone(),
            config,
            ctx: PairContext {
                connector,
                limiter,
                observer,
                clock,
            },
            pairs: Vec::new(),
            work: Vec::new(),
            poll_deadline: None,
            running: false,
            disabled: false,
            retries: 0,
            active: false,
            total: Traffic::default(),
            period: Traffic::default(),
            summary_deadline: None,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn relay_target(&self) -> &RelayTarget {
        &self.relay
    }

    /// Relay used by pairs created from now on
    pub fn set_relay_target(&mut self, relay: RelayTarget) {
        log::info!("Using relay {}", relay);
        self.relay = relay;
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    pub fn live(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn pair(&self, sid: &SessionId) -> Option<&ProxyPair> {
        self.pairs.iter().map(|e| &e.pair).find(|p| p.sid() == sid)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionId> + '_ {
        self.pairs.iter().map(|e| e.pair.sid())
    }

    fn now(&self) -> f64 {
        self.ctx.clock.now_ms()
    }

    /// Poll right away, then on every interval
    pub fn start(&mut self) {
        if self.disabled {
            log::warn!("Not starting a disabled proxy");
            return;
        }
        if self.running {
            return;
        }
        log::info!(
            "Starting proxy, polling every {:?} for up to {} pairs",
            self.config.poll_interval(),
            self.capacity()
        );
        self.running = true;
        self.poll_once();
        let now = self.now();
        self.poll_deadline = Some(now + millis(self.config.poll_interval()));
        self.summary_deadline = Some(now + millis(SUMMARY_INTERVAL));
    }

    /// Register one session with the broker if capacity allows
    pub fn poll_once(&mut self) {
        if self.disabled {
            return;
        }

        let idx = match self.pairs.iter().position(|e| e.pair.is_idle()) {
            Some(idx) => idx,
            None if self.slots_in_use().len() >= self.config.max_num_clients => {
                log::debug!("At capacity with {} pairs", self.pairs.len());
                self.ctx.observer.set_status("At client capacity.");
                return;
            }
            None => {
                self.pairs.push(self.make_entry(None));
                self.pairs.len() - 1
            }
        };

        self.retries += 1;
        self.ctx.observer.set_status(&format!(
            "Polling for client ... [retries: {}]",
            self.retries
        ));

        let pair = &mut self.pairs[idx].pair;
        match pair.begin() {
            Ok(()) => {
                let sid = pair.sid().clone();
                log::debug!("Polling broker for {}", sid);
                self.work.push(BrokerWork::RequestOffer { sid });
            }
            Err(e) => log::warn!("Cannot start session: {}", e),
        }
        self.process_effects();
    }

    /// New pair in `slot`, or in a slot of its own
    fn make_entry(&self, slot: Option<SessionId>) -> Entry {
        let settings = PairSettings {
            relay: self.relay.clone(),
            relay_connect_timeout: self.config.relay_connect_timeout(),
            keep_local_addresses: self.config.keep_local_addresses,
        };
        let sid = SessionId::generate();
        Entry {
            slot: slot.unwrap_or_else(|| sid.clone()),
            pair: ProxyPair::new(sid, settings, self.ctx.clone()),
            connected: false,
            setup_deadline: None,
        }
    }

    fn slots_in_use(&self) -> HashSet<&SessionId> {
        self.pairs.iter().map(|e| &e.slot).collect()
    }

    /// Outcome of a `RequestOffer`
    pub fn offer_result(&mut self, sid: &SessionId, result: Result<String>) {
        let setup_timeout = millis(self.config.setup_timeout());
        let now = self.now();
        let observer = self.ctx.observer.clone();

        let Some(entry) = self.pairs.iter_mut().find(|e| e.pair.sid() == sid) else {
            log::debug!("{}: offer for a session that is gone", sid);
            return;
        };

        match result {
            Ok(offer) => {
                if entry.pair.receive_offer(&offer) {
                    entry.setup_deadline = Some(now + setup_timeout);
                }
            }
            Err(SnowflakeError::BrokerTimeout) => {
                log::debug!("{}: no client matched", sid);
                entry.pair.close();
            }
            Err(e) => {
                log::warn!("{}: broker error: {}", sid, e);
                observer.set_status("broker error, will retry");
                entry.pair.close();
            }
        }
        self.process_effects();
    }

    /// Route a transport event to its pair
    pub fn deliver(&mut self, sid: &SessionId, event: PairEvent) {
        match self.pairs.iter_mut().find(|e| e.pair.sid() == sid) {
            Some(entry) => entry.pair.handle(event),
            None => {
                log::trace!("{}: event for a session that is gone", sid);
                return;
            }
        }
        self.process_effects();
    }

    /// Earliest instant (ms) anything here wants to run
    pub fn next_deadline(&self) -> Option<f64> {
        let pairs = self
            .pairs
            .iter()
            .flat_map(|e| [e.setup_deadline, e.pair.next_deadline()]);
        std::iter::once(self.poll_deadline)
            .chain(pairs)
            .flatten()
            .reduce(f64::min)
    }

    /// Fire every expired timer
    pub fn handle_timeout(&mut self) {
        let now = self.now();

        for entry in self.pairs.iter_mut() {
            if entry.setup_deadline.is_some_and(|d| d <= now) {
                entry.setup_deadline = None;
                entry.pair.handle(PairEvent::Timeout(Watchdog::Setup));
            }
            entry.pair.handle_timeout(now);
        }
        self.process_effects();

        if self.running && self.poll_deadline.is_some_and(|d| d <= now) {
            self.poll_deadline = Some(now + millis(self.config.poll_interval()));
            if self.summary_deadline.is_some_and(|d| d <= now) {
                self.summary_deadline = Some(now + millis(SUMMARY_INTERVAL));
                self.log_summary();
            }
            self.poll_once();
        }
    }

    fn log_summary(&mut self) {
        let period = std::mem::take(&mut self.period);
        let (up, up_unit) = format_traffic(period.to_relay);
        let (down, down_unit) = format_traffic(period.to_client);
        log::info!(
            "In the last {:?}, there were {} connections. Traffic relayed ↑ {} {}, ↓ {} {}.",
            SUMMARY_INTERVAL,
            period.connections,
            up,
            up_unit,
            down,
            down_unit
        );
    }

    /// Broker work queued since the last call
    pub fn take_pending_work(&mut self) -> Vec<BrokerWork> {
        std::mem::take(&mut self.work)
    }

    fn process_effects(&mut self) {
        let mut grown = Vec::new();

        for entry in self.pairs.iter_mut() {
            for effect in entry.pair.drain_effects() {
                match effect {
                    PairEffect::SendAnswer(answer) => {
                        self.work.push(BrokerWork::SubmitAnswer {
                            sid: entry.pair.sid().clone(),
                            answer,
                        });
                    }
                    PairEffect::Connected => {
                        entry.setup_deadline = None;
                        entry.connected = true;
                        grown.push(entry.slot.clone());
                    }
                    PairEffect::Closed => {
                        entry.setup_deadline = None;
                        if entry.connected {
                            let forwarded = entry.pair.forwarded_bytes();
                            self.total.add(forwarded);
                            self.period.add(forwarded);
                        }
                    }
                }
            }
        }
        self.pairs.retain(|e| !e.pair.is_closed());

        // idle pairs do not outlive the busy pairs of their slot
        let busy: HashSet<SessionId> = self
            .pairs
            .iter()
            .filter(|e| !e.pair.is_idle())
            .map(|e| e.slot.clone())
            .collect();
        self.pairs
            .retain(|e| !e.pair.is_idle() || busy.contains(&e.slot));

        if !self.disabled {
            for slot in grown {
                let held = self.pairs.iter().filter(|e| e.slot == slot).count();
                for _ in held..self.config.connections_per_client {
                    let entry = self.make_entry(Some(slot.clone()));
                    self.pairs.push(entry);
                }
            }
        }

        let active = self.pairs.iter().any(|e| e.pair.state().is_connected());
        if active != self.active {
            self.active = active;
            self.ctx.observer.set_active(active);
        }
    }

    /// Stop polling and close every pair; safe to repeat
    pub fn disable(&mut self) {
        if !self.disabled {
            log::info!("Disabling proxy");
        }
        self.disabled = true;
        self.running = false;
        self.poll_deadline = None;
        self.summary_deadline = None;

        for entry in self.pairs.iter_mut() {
            entry.pair.close();
        }
        self.process_effects();
        self.work.clear();
        self.ctx.observer.set_status("Snowflake disabled.");
    }

    pub fn stats(&self) -> SnowflakeStats {
        let connected: Vec<&Entry> = self
            .pairs
            .iter()
            .filter(|e| e.pair.state().is_connected())
            .collect();
        let active: HashSet<&SessionId> = connected.iter().map(|e| &e.slot).collect();
        let (to_relay, to_client) = self
            .pairs
            .iter()
            .map(|e| e.pair.forwarded_bytes())
            .fold((self.total.to_relay, self.total.to_client), |(r, c), (dr, dc)| {
                (r + dr, c + dc)
            });

        SnowflakeStats {
            live: self.pairs.len(),
            active: active.len(),
            connections: connected.len(),
            capacity: self.capacity(),
            retries: self.retries,
            rate_limited: self.ctx.limiter.is_limited(),
            bytes_to_relay: to_relay,
            bytes_to_client: to_client,
            connections_served: self.total.connections,
        }
    }
}

impl std::fmt::Debug for Snowflake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snowflake")
            .field("relay", &self.relay)
            .field("pairs", &self.pairs.len())
            .field("running", &self.running)
            .field("disabled", &self.disabled)
            .field("retries", &self.retries)
            .finish()
    }
}
