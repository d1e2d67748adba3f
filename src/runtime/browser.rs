//! Cooperative browser driver
//!
//! ## No Borrow Across Await
//!
//! The core lives in a `RefCell` and is only ever borrowed briefly:
//!
//! ```text
//! // Take work (brief borrow)
//! let work = { core.borrow_mut().take_pending_work() };
//! // Borrow released, do the I/O
//! let result = broker.request_offer(sid).await;
//! // Report the result (brief borrow)
//! { core.borrow_mut().offer_result(sid, result) };
//! ```
//!
//! Transport callbacks can fire while the core is borrowed (a close event
//! dispatched during `close()`, for example). Those events are deferred to
//! a fresh task instead of re-entering the core.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use gloo_timers::callback::Timeout;

use crate::broker::fetch::FetchTransport;
use crate::broker::BrokerClient;
use crate::config::{ProxyConfig, MAX_TIMER_DELAY_MS};
use crate::error::Result;
use crate::observer::Observer;
use crate::proxy_pair::{PairEvent, SessionId};
use crate::snowflake::{BrokerWork, Snowflake, SnowflakeStats};
use crate::transport::webrtc::WebRtcPeer;
use crate::transport::websocket::WebSocketRelay;
use crate::transport::{Connector, EventSink, RelaySocket, RelayTarget, SignalingPeer};

use super::time::{Clock, SystemClock};

pub struct BrowserRuntime {
    core: RefCell<Snowflake>,
    broker: BrokerClient<FetchTransport>,
    clock: SystemClock,
    timer: RefCell<Option<Timeout>>,
    armed_at: Cell<Option<f64>>,
    this: Weak<BrowserRuntime>,
}

impl BrowserRuntime {
    pub fn new(config: ProxyConfig, observer: Rc<dyn Observer>) -> Result<Rc<Self>> {
        config.validate()?;
        let link: Rc<RefCell<Weak<BrowserRuntime>>> = Rc::default();
        let connector = Rc::new(BrowserConnector {
            runtime: link.clone(),
            ice_servers: config.ice_servers.clone(),
        });
        let broker = BrokerClient::new(&config.broker_url, &config.proxy_type, FetchTransport);
        let core = Snowflake::new(config, connector, observer, Rc::new(SystemClock))?;

        let runtime = Rc::new_cyclic(|this| BrowserRuntime {
            core: RefCell::new(core),
            broker,
            clock: SystemClock,
            timer: RefCell::new(None),
            armed_at: Cell::new(None),
            this: this.clone(),
        });
        *link.borrow_mut() = Rc::downgrade(&runtime);
        Ok(runtime)
    }

    pub fn start(&self) {
        self.core.borrow_mut().start();
        self.pump();
    }

    pub fn disable(&self) {
        self.core.borrow_mut().disable();
        self.timer.borrow_mut().take();
        self.armed_at.set(None);
    }

    pub fn set_relay_target(&self, relay: RelayTarget) {
        self.core.borrow_mut().set_relay_target(relay);
    }

    pub fn stats(&self) -> SnowflakeStats {
        self.core.borrow().stats()
    }

    /// Route a transport event into the core
    pub fn deliver(&self, sid: SessionId, event: PairEvent) {
        match self.core.try_borrow_mut() {
            Ok(mut core) => core.deliver(&sid, event),
            Err(_) => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                wasm_bindgen_futures::spawn_local(async move {
                    this.deliver(sid, event);
                });
                return;
            }
        }
        self.pump();
    }

    /// Start queued broker work and re-arm the timer
    fn pump(&self) {
        let work = { self.core.borrow_mut().take_pending_work() };
        if let Some(this) = self.this.upgrade() {
            for item in work {
                wasm_bindgen_futures::spawn_local(this.clone().perform(item));
            }
        }
        self.rearm();
    }

    async fn perform(self: Rc<Self>, work: BrokerWork) {
        match work {
            BrokerWork::RequestOffer { sid } => {
                let result = self.broker.request_offer(sid.as_str()).await;
                {
                    self.core.borrow_mut().offer_result(&sid, result);
                }
                self.pump();
            }
            BrokerWork::SubmitAnswer { sid, answer } => {
                self.broker.submit_answer(sid.as_str(), &answer).await;
            }
        }
    }

    fn rearm(&self) {
        let next = { self.core.borrow().next_deadline() };
        if next == self.armed_at.get() {
            return;
        }
        self.armed_at.set(next);

        // Dropping a gloo Timeout cancels it
        let mut slot = self.timer.borrow_mut();
        slot.take();
        let Some(deadline) = next else {
            return;
        };

        let delay = (deadline - self.clock.now_ms())
            .ceil()
            .clamp(0.0, MAX_TIMER_DELAY_MS as f64) as u32;
        let weak = self.this.clone();
        *slot = Some(Timeout::new(delay, move || {
            if let Some(this) = weak.upgrade() {
                this.on_timer();
            }
        }));
    }

    fn on_timer(&self) {
        self.timer.borrow_mut().take();
        self.armed_at.set(None);
        {
            self.core.borrow_mut().handle_timeout();
        }
        self.pump();
    }
}

/// Creates browser legs whose events flow back into the runtime
pub struct BrowserConnector {
    /// Filled in once the runtime exists
    runtime: Rc<RefCell<Weak<BrowserRuntime>>>,
    ice_servers: Vec<String>,
}

impl BrowserConnector {
    fn sink(&self, sid: &SessionId) -> EventSink {
        let runtime = self.runtime.borrow().clone();
        let sid = sid.clone();
        Rc::new(move |event: PairEvent| {
            if let Some(rt) = runtime.upgrade() {
                rt.deliver(sid.clone(), event);
            }
        })
    }
}

impl Connector for BrowserConnector {
    fn new_peer(&self, sid: &SessionId) -> Result<Box<dyn SignalingPeer>> {
        Ok(Box::new(WebRtcPeer::new(&self.ice_servers, self.sink(sid))?))
    }

    fn dial_relay(&self, sid: &SessionId, url: &str) -> Result<Box<dyn RelaySocket>> {
        Ok(Box::new(WebSocketRelay::connect(url, self.sink(sid))?))
    }
}
