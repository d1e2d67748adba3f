//! Status reporting towards the embedding UI
//!
//! Observers are called synchronously from the proxy core and must neither
//! block nor panic.

/// Capability set the UI offers to the proxy
pub trait Observer {
    fn set_status(&self, _status: &str) {}

    /// Whether at least one client is currently connected
    fn set_active(&self, _active: bool) {}

    fn log(&self, _line: &str) {}
}

/// Headless operation
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Forwards everything to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn set_status(&self, status: &str) {
        log::info!("Status: {}", status);
    }

    fn set_active(&self, active: bool) {
        log::debug!("Active: {}", active);
    }

    fn log(&self, line: &str) {
        log::info!("{}", line);
    }
}
