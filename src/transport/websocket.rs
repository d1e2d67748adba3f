//! Browser WebSocket leg towards the relay

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BinaryType, MessageEvent, WebSocket};

use super::{EventSink, RelaySocket};
use crate::error::{Leg, Result, SnowflakeError};
use crate::proxy_pair::PairEvent;

/// Relay connection reporting open/message/close/error to the pair
pub struct WebSocketRelay {
    ws: WebSocket,
    callbacks: Vec<Closure<dyn FnMut(JsValue)>>,
}

impl WebSocketRelay {
    /// Start connecting; the open event follows through `sink`
    pub fn connect(url: &str, sink: EventSink) -> Result<Self> {
        let ws = WebSocket::new(url).map_err(|e| {
            SnowflakeError::transport(Leg::Relay, format!("WebSocket failed: {:?}", e))
        })?;
        ws.set_binary_type(BinaryType::Arraybuffer);

        let mut callbacks = Vec::with_capacity(4);

        let s = sink.clone();
        let on_open = Closure::wrap(Box::new(move |_: JsValue| {
            s(PairEvent::RelayOpen);
        }) as Box<dyn FnMut(JsValue)>);
        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));
        callbacks.push(on_open);

        let s = sink.clone();
        let on_message = Closure::wrap(Box::new(move |event: JsValue| {
            let event: MessageEvent = event.unchecked_into();
            if let Ok(buffer) = event.data().dyn_into::<js_sys::ArrayBuffer>() {
                s(PairEvent::RelayMessage(js_sys::Uint8Array::new(&buffer).to_vec()));
            }
        }) as Box<dyn FnMut(JsValue)>);
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
        callbacks.push(on_message);

        let s = sink.clone();
        let on_close = Closure::wrap(Box::new(move |_: JsValue| {
            s(PairEvent::RelayClosed);
        }) as Box<dyn FnMut(JsValue)>);
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));
        callbacks.push(on_close);

        let s = sink;
        let on_error = Closure::wrap(Box::new(move |_: JsValue| {
            s(PairEvent::LegError(Leg::Relay, "websocket error".into()));
        }) as Box<dyn FnMut(JsValue)>);
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        callbacks.push(on_error);

        Ok(Self { ws, callbacks })
    }

    fn detach(&self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onclose(None);
        self.ws.set_onerror(None);
    }
}

impl RelaySocket for WebSocketRelay {
    fn buffered_amount(&self) -> usize {
        self.ws.buffered_amount() as usize
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let array = js_sys::Uint8Array::new_with_length(data.len() as u32);
        array.copy_from(data);
        self.ws.send_with_array_buffer(&array.buffer()).map_err(|e| {
            SnowflakeError::transport(Leg::Relay, format!("send failed: {:?}", e))
        })
    }

    fn close(&mut self) {
        self.detach();
        if self.ws.ready_state() != WebSocket::CLOSED {
            let _ = self.ws.close();
        }

        // close() may run inside one of these callbacks; drop them later
        let callbacks = std::mem::take(&mut self.callbacks);
        wasm_bindgen_futures::spawn_local(async move {
            drop(callbacks);
        });
    }
}

impl Drop for WebSocketRelay {
    fn drop(&mut self) {
        self.detach();
    }
}
