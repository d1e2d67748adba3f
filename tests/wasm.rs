//! Browser tests for the JavaScript surface
//!
//! Run with: wasm-pack test --headless --chrome
//! (or --firefox)

#![cfg(target_arch = "wasm32")]

use js_sys::{Function, Object, Reflect};
use snowflake_wasm::SnowflakeProxy;
use wasm_bindgen::prelude::*;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn field(obj: &JsValue, name: &str) -> JsValue {
    Reflect::get(obj, &name.into()).expect("readable field")
}

fn config(json: &str) -> JsValue {
    js_sys::JSON::parse(json).expect("valid JSON")
}

/// Observer whose callbacks record into `window.__status`
fn recording_observer() -> JsValue {
    let observer = Object::new();
    let set_status = Function::new_with_args("s", "globalThis.__status = s;");
    Reflect::set(&observer, &"setStatus".into(), &set_status).unwrap();
    observer.into()
}

#[wasm_bindgen_test]
fn default_config_when_missing() {
    let proxy = SnowflakeProxy::new(JsValue::UNDEFINED, JsValue::UNDEFINED).unwrap();
    let status = proxy.get_status().unwrap();
    assert_eq!(field(&status, "capacity").as_f64(), Some(1.0));
    assert_eq!(field(&status, "live").as_f64(), Some(0.0));
    assert_eq!(field(&status, "rate_limited").as_bool(), Some(false));
}

#[wasm_bindgen_test]
fn capacity_from_config() {
    let proxy = SnowflakeProxy::new(
        config(r#"{"maxNumClients": 3, "connectionsPerClient": 2}"#),
        JsValue::NULL,
    )
    .unwrap();
    let status = proxy.get_status().unwrap();
    assert_eq!(field(&status, "capacity").as_f64(), Some(6.0));
}

#[wasm_bindgen_test]
fn invalid_config_is_rejected() {
    assert!(SnowflakeProxy::new(config(r#"{"maxNumClients": 0}"#), JsValue::NULL).is_err());
    assert!(SnowflakeProxy::new(config(r#"{"rateLimitBytes": 1}"#), JsValue::NULL).is_err());
}

#[wasm_bindgen_test]
fn set_relay_validates_target() {
    let proxy = SnowflakeProxy::new(JsValue::UNDEFINED, JsValue::UNDEFINED).unwrap();
    assert!(proxy.set_relay("relay.example".into(), 443, true).is_ok());
    assert!(proxy.set_relay("".into(), 443, true).is_err());
    assert!(proxy.set_relay("relay.example".into(), 0, false).is_err());
}

#[wasm_bindgen_test]
fn disable_reports_status() {
    let proxy = SnowflakeProxy::new(JsValue::UNDEFINED, recording_observer()).unwrap();
    proxy.disable();
    proxy.disable();

    let status = field(&js_sys::global().into(), "__status");
    assert_eq!(status.as_string().as_deref(), Some("Snowflake disabled."));
    assert_eq!(field(&proxy.get_status().unwrap(), "live").as_f64(), Some(0.0));
}

#[wasm_bindgen_test]
fn throwing_observer_is_tolerated() {
    let observer = Object::new();
    let boom = Function::new_no_args("throw new Error('boom');");
    Reflect::set(&observer, &"setStatus".into(), &boom).unwrap();

    let proxy = SnowflakeProxy::new(JsValue::UNDEFINED, observer.into()).unwrap();
    proxy.disable();
}

#[wasm_bindgen_test]
fn scrubbed_lines_reach_the_console() {
    snowflake_wasm::logging::init(log::Level::Debug);
    log::info!("client at 1.2.3.4:5678 connected");
    log::warn!("relay [2001:db8::1]:443 closed");
    assert_eq!(
        snowflake_wasm::logging::scrub("client at 1.2.3.4:5678 connected"),
        "client at [scrubbed] connected"
    );
}
