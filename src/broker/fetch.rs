//! Browser `fetch` transport for the broker client

use async_trait::async_trait;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, RequestMode, Response};

use super::{HttpResponse, HttpTransport};
use crate::error::{Result, SnowflakeError};

/// Issues broker requests with `window.fetch`
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchTransport;

impl FetchTransport {
    pub fn new() -> Self {
        Self
    }
}

fn unexpected(what: &str, e: wasm_bindgen::JsValue) -> SnowflakeError {
    SnowflakeError::BrokerUnexpected(format!("{}: {:?}", what, e))
}

#[async_trait(?Send)]
impl HttpTransport for FetchTransport {
    async fn post(&self, url: &str, body: String) -> Result<HttpResponse> {
        let opts = RequestInit::new();
        opts.set_method("POST");
        opts.set_mode(RequestMode::Cors);
        opts.set_body(&wasm_bindgen::JsValue::from_str(&body));

        // Construction throws when a content policy blocks the URL
        let request = Request::new_with_str_and_init(url, &opts)
            .map_err(|e| unexpected("Request::new failed", e))?;

        let window = web_sys::window()
            .ok_or_else(|| SnowflakeError::BrokerUnexpected("no window object".into()))?;

        let resp_value = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(|e| unexpected("fetch failed", e))?;

        let resp: Response = resp_value
            .dyn_into()
            .map_err(|_| SnowflakeError::BrokerUnexpected("response is not a Response".into()))?;

        let text = JsFuture::from(resp.text().map_err(|e| unexpected("text failed", e))?)
            .await
            .map_err(|e| unexpected("await text failed", e))?;

        Ok(HttpResponse {
            status: resp.status(),
            body: text.as_string().unwrap_or_default(),
        })
    }
}
