//! Runtime support for the proxy core
//!
//! The core ([`crate::snowflake::Snowflake`] and its pairs) is synchronous
//! and deadline driven. In the browser, [`BrowserRuntime`] drives it: it
//! performs the broker requests the core asks for, routes transport
//! callbacks back in, and keeps one timer armed at the core's next deadline.

pub mod time;
#[cfg(target_arch = "wasm32")]
mod browser;

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserConnector, BrowserRuntime};
pub use time::{Clock, ManualClock, SystemClock};
