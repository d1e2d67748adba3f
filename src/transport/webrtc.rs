//! Browser WebRTC leg
//!
//! Wraps an `RTCPeerConnection` answering a client's offer and the data
//! channel the client opens on it. All browser callbacks are translated into
//! [`PairEvent`]s and handed to the session's [`EventSink`]; the peer itself
//! keeps no protocol state.

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    MessageEvent, RtcConfiguration, RtcDataChannel, RtcDataChannelEvent, RtcDataChannelType,
    RtcPeerConnection, RtcPeerConnectionIceEvent, RtcSdpType, RtcSessionDescriptionInit,
};

use super::{EventSink, SdpType, SessionDescription, SignalingPeer};
use crate::error::{Leg, Result, SnowflakeError};
use crate::proxy_pair::PairEvent;

type Callbacks = Rc<RefCell<Vec<Closure<dyn FnMut(JsValue)>>>>;

fn rtc_error(what: &str, e: JsValue) -> SnowflakeError {
    SnowflakeError::transport(Leg::Client, format!("{}: {:?}", what, e))
}

fn to_rtc_type(kind: SdpType) -> RtcSdpType {
    match kind {
        SdpType::Offer => RtcSdpType::Offer,
        SdpType::Pranswer => RtcSdpType::Pranswer,
        SdpType::Answer => RtcSdpType::Answer,
        SdpType::Rollback => RtcSdpType::Rollback,
    }
}

fn from_rtc_type(kind: RtcSdpType) -> Option<SdpType> {
    match kind {
        RtcSdpType::Offer => Some(SdpType::Offer),
        RtcSdpType::Pranswer => Some(SdpType::Pranswer),
        RtcSdpType::Answer => Some(SdpType::Answer),
        RtcSdpType::Rollback => Some(SdpType::Rollback),
        _ => None,
    }
}

/// Message payload as bytes; text frames are passed through as UTF-8
fn message_bytes(event: &MessageEvent) -> Option<Vec<u8>> {
    let data = event.data();
    if let Ok(buffer) = data.clone().dyn_into::<js_sys::ArrayBuffer>() {
        return Some(js_sys::Uint8Array::new(&buffer).to_vec());
    }
    data.as_string().map(String::into_bytes)
}

pub struct WebRtcPeer {
    pc: RtcPeerConnection,
    channel: Rc<RefCell<Option<RtcDataChannel>>>,
    remote: Option<SessionDescription>,
    pending_remote: Option<js_sys::Promise>,
    callbacks: Callbacks,
    sink: EventSink,
}

impl WebRtcPeer {
    pub fn new(ice_servers: &[String], sink: EventSink) -> Result<Self> {
        let config = RtcConfiguration::new();
        let servers = js_sys::Array::new();
        for url in ice_servers {
            let server = js_sys::Object::new();
            js_sys::Reflect::set(&server, &"urls".into(), &url.as_str().into())
                .map_err(|e| rtc_error("ICE server config", e))?;
            servers.push(&server);
        }
        config.set_ice_servers(&servers);

        let pc = RtcPeerConnection::new_with_configuration(&config)
            .map_err(|e| rtc_error("RTCPeerConnection failed", e))?;

        let peer = Self {
            pc,
            channel: Rc::new(RefCell::new(None)),
            remote: None,
            pending_remote: None,
            callbacks: Rc::new(RefCell::new(Vec::new())),
            sink,
        };
        peer.setup_handlers();
        Ok(peer)
    }

    fn setup_handlers(&self) {
        // Gathering is over once the browser reports a null candidate
        {
            let sink = self.sink.clone();
            let cb = Closure::wrap(Box::new(move |event: JsValue| {
                let event: RtcPeerConnectionIceEvent = event.unchecked_into();
                if event.candidate().is_none() {
                    sink(PairEvent::CandidatesDone);
                }
            }) as Box<dyn FnMut(JsValue)>);
            self.pc
                .set_onicecandidate(Some(cb.as_ref().unchecked_ref()));
            self.callbacks.borrow_mut().push(cb);
        }

        // The client opens the data channel
        {
            let sink = self.sink.clone();
            let slot = self.channel.clone();
            let callbacks = self.callbacks.clone();
            let cb = Closure::wrap(Box::new(move |event: JsValue| {
                let event: RtcDataChannelEvent = event.unchecked_into();
                let channel = event.channel();
                log::debug!("Data channel {} established", channel.label());
                prepare_channel(&channel, &sink, &callbacks);
                *slot.borrow_mut() = Some(channel);
            }) as Box<dyn FnMut(JsValue)>);
            self.pc
                .set_ondatachannel(Some(cb.as_ref().unchecked_ref()));
            self.callbacks.borrow_mut().push(cb);
        }
    }

    fn detach(&self) {
        self.pc.set_onicecandidate(None);
        self.pc.set_ondatachannel(None);
        if let Some(channel) = self.channel.borrow().as_ref() {
            channel.set_onopen(None);
            channel.set_onclose(None);
            channel.set_onerror(None);
            channel.set_onmessage(None);
        }
    }
}

fn prepare_channel(channel: &RtcDataChannel, sink: &EventSink, callbacks: &Callbacks) {
    channel.set_binary_type(RtcDataChannelType::Arraybuffer);
    let mut callbacks = callbacks.borrow_mut();

    let s = sink.clone();
    let on_open = Closure::wrap(Box::new(move |_: JsValue| {
        s(PairEvent::ChannelOpen);
    }) as Box<dyn FnMut(JsValue)>);
    channel.set_onopen(Some(on_open.as_ref().unchecked_ref()));
    callbacks.push(on_open);

    let s = sink.clone();
    let on_close = Closure::wrap(Box::new(move |_: JsValue| {
        s(PairEvent::ChannelClosed);
    }) as Box<dyn FnMut(JsValue)>);
    channel.set_onclose(Some(on_close.as_ref().unchecked_ref()));
    callbacks.push(on_close);

    let s = sink.clone();
    let on_error = Closure::wrap(Box::new(move |_: JsValue| {
        s(PairEvent::LegError(Leg::Client, "data channel error".into()));
    }) as Box<dyn FnMut(JsValue)>);
    channel.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    callbacks.push(on_error);

    let s = sink.clone();
    let on_message = Closure::wrap(Box::new(move |event: JsValue| {
        let event: MessageEvent = event.unchecked_into();
        if let Some(data) = message_bytes(&event) {
            s(PairEvent::ChannelMessage(data));
        }
    }) as Box<dyn FnMut(JsValue)>);
    channel.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
    callbacks.push(on_message);
}

impl SignalingPeer for WebRtcPeer {
    fn set_remote_description(&mut self, offer: &SessionDescription) -> Result<()> {
        let init = RtcSessionDescriptionInit::new(to_rtc_type(offer.kind));
        init.set_sdp(&offer.sdp);
        self.pending_remote = Some(self.pc.set_remote_description(&init));
        self.remote = Some(offer.clone());
        Ok(())
    }

    fn create_answer(&mut self) -> Result<()> {
        let pending = self
            .pending_remote
            .take()
            .ok_or_else(|| SnowflakeError::InvalidState("answer before offer".into()))?;
        let pc = self.pc.clone();
        let sink = self.sink.clone();

        wasm_bindgen_futures::spawn_local(async move {
            let result: std::result::Result<(), SnowflakeError> = async {
                JsFuture::from(pending)
                    .await
                    .map_err(|e| SnowflakeError::InvalidOffer(format!("{:?}", e)))?;
                let answer = JsFuture::from(pc.create_answer())
                    .await
                    .map_err(|e| rtc_error("createAnswer failed", e))?;
                let answer: RtcSessionDescriptionInit = answer.unchecked_into();
                JsFuture::from(pc.set_local_description(&answer))
                    .await
                    .map_err(|e| rtc_error("setLocalDescription failed", e))?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => {}
                Err(SnowflakeError::InvalidOffer(reason)) => {
                    sink(PairEvent::OfferRejected(reason));
                }
                Err(e) => sink(PairEvent::LegError(Leg::Client, e.to_string())),
            }
        });
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description()?;
        let kind = from_rtc_type(desc.type_())?;
        Some(SessionDescription::new(kind, desc.sdp()))
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.clone()
    }

    fn buffered_amount(&self) -> usize {
        self.channel
            .borrow()
            .as_ref()
            .map_or(0, |c| c.buffered_amount() as usize)
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let channel = self.channel.borrow();
        let channel = channel
            .as_ref()
            .ok_or_else(|| SnowflakeError::transport(Leg::Client, "no data channel"))?;
        let array = js_sys::Uint8Array::new_with_length(data.len() as u32);
        array.copy_from(data);
        channel
            .send_with_array_buffer(&array.buffer())
            .map_err(|e| rtc_error("send failed", e))
    }

    fn close(&mut self) {
        self.detach();
        if let Some(channel) = self.channel.borrow_mut().take() {
            channel.close();
        }
        self.pc.close();

        // close() may run inside one of these callbacks; drop them later
        let callbacks = std::mem::take(&mut *self.callbacks.borrow_mut());
        wasm_bindgen_futures::spawn_local(async move {
            drop(callbacks);
        });
    }
}

impl Drop for WebRtcPeer {
    fn drop(&mut self) {
        self.detach();
    }
}
