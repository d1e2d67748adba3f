//! JavaScript surface
//!
//! ```js
//! const proxy = new SnowflakeProxy({ maxNumClients: 2 }, {
//!   setStatus: (s) => badge.textContent = s,
//!   setActive: (on) => badge.classList.toggle("on", on),
//! });
//! proxy.start();
//! ```

use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::config::ProxyConfig;
use crate::error::{ErrorInfo, SnowflakeError};
use crate::observer::{LogObserver, Observer};
use crate::runtime::BrowserRuntime;
use crate::transport::RelayTarget;

/// Observer backed by a plain JS object
///
/// Any of `setStatus`, `setActive` and `log` may be missing. Exceptions
/// thrown by the callbacks are swallowed.
struct JsObserver {
    target: JsValue,
}

impl JsObserver {
    fn call(&self, method: &str, arg: &JsValue) {
        let Ok(f) = js_sys::Reflect::get(&self.target, &method.into()) else {
            return;
        };
        if let Some(f) = f.dyn_ref::<js_sys::Function>() {
            if let Err(e) = f.call1(&self.target, arg) {
                log::debug!("observer {} threw: {:?}", method, e);
            }
        }
    }
}

impl Observer for JsObserver {
    fn set_status(&self, status: &str) {
        self.call("setStatus", &JsValue::from_str(status));
    }

    fn set_active(&self, active: bool) {
        self.call("setActive", &JsValue::from_bool(active));
    }

    fn log(&self, line: &str) {
        self.call("log", &JsValue::from_str(&crate::logging::scrub(line)));
    }
}

/// Browser-hosted Snowflake proxy
#[wasm_bindgen]
pub struct SnowflakeProxy {
    runtime: Rc<BrowserRuntime>,
}

#[wasm_bindgen]
impl SnowflakeProxy {
    /// Create a proxy from an optional config object and an optional observer
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue, observer: JsValue) -> Result<SnowflakeProxy, JsValue> {
        let config: ProxyConfig = if config.is_undefined() || config.is_null() {
            ProxyConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)
                .map_err(|e| SnowflakeError::Config(e.to_string()))?
        };

        let observer: Rc<dyn Observer> = if observer.is_object() {
            Rc::new(JsObserver { target: observer })
        } else {
            Rc::new(LogObserver)
        };

        let runtime = BrowserRuntime::new(config, observer)?;
        Ok(SnowflakeProxy { runtime })
    }

    /// Poll the broker now and on every interval
    #[wasm_bindgen]
    pub fn start(&self) {
        self.runtime.start();
    }

    /// Stop polling and close every session
    #[wasm_bindgen]
    pub fn disable(&self) {
        self.runtime.disable();
    }

    /// Relay used for sessions created from now on
    #[wasm_bindgen(js_name = setRelay)]
    pub fn set_relay(&self, host: String, port: u16, secure: bool) -> Result<(), JsValue> {
        if host.trim().is_empty() || port == 0 {
            let err = SnowflakeError::InvalidUrl(format!("{}:{}", host, port));
            return Err(serde_wasm_bindgen::to_value(&ErrorInfo::from(&err))?);
        }
        self.runtime
            .set_relay_target(RelayTarget::new(host, port, secure));
        Ok(())
    }

    /// Counters as in [`crate::SnowflakeStats`], with snake_case keys
    #[wasm_bindgen(js_name = getStatus)]
    pub fn get_status(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(&self.runtime.stats())?)
    }
}
