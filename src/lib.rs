//! # Snowflake WASM Proxy
//!
//! A volunteer Snowflake proxy compiled to WebAssembly.
//!
//! A censored client reaches a fixed relay through this proxy: the client
//! connects over WebRTC, the proxy forwards its bytes over a WebSocket to
//! the relay. The broker matches waiting proxies with incoming clients and
//! carries the signaling messages between them.
//!
//! ## Architecture
//!
//! ```text
//! SnowflakeProxy (JS surface)
//!   ↓
//! BrowserRuntime (timers, fetch, callbacks)
//!   ↓
//! Snowflake (capacity, broker polling, watchdogs)
//!   ↓
//! ProxyPair × N ── shared RateLimit
//!   ↓                ↓
//! WebRTC leg       WebSocket leg
//! ```
//!
//! Everything below the runtime is synchronous and platform agnostic, so it
//! builds and is tested natively with simulated time and fake transports.

pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod observer;
pub mod proxy_pair;
pub mod rate_limiter;
pub mod runtime;
pub mod snowflake;
pub mod transport;

#[cfg(target_arch = "wasm32")]
pub mod bindings;

pub use broker::{normalize_url, AnswerStatus, BrokerClient, HttpResponse, HttpTransport};
pub use config::{Deployment, ProxyConfig};
pub use error::{ErrorCode, ErrorInfo, Leg, Result, SnowflakeError};
pub use observer::{LogObserver, NullObserver, Observer};
pub use proxy_pair::{
    PairEffect, PairEvent, PairSettings, PairState, ProxyPair, SessionId, Watchdog, MAX_BUFFER,
};
pub use rate_limiter::{
    BucketRateLimit, DummyRateLimit, RateLimit, RateLimiterConfig, RateLimiterStats,
    SharedRateLimit,
};
pub use runtime::time::{Clock, ManualClock, SystemClock};
pub use snowflake::{BrokerWork, Snowflake, SnowflakeStats};
pub use transport::{
    build_url, Connector, RelaySocket, RelayTarget, SdpType, SessionDescription, SignalingPeer,
};

#[cfg(target_arch = "wasm32")]
pub use bindings::SnowflakeProxy;

/// Initialize the Snowflake WASM module
///
/// This sets up logging and any global state needed.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn init() {
    logging::init(log::Level::Info);
    log::info!("Snowflake proxy module initialized");
}
