// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP collector transport.
//!
//! Redirects are not followed by the client: a 3xx with a `Location` header is
//! handed back as [`CollectorResponse::Redirect`] so the retry controller can count
//! it and re-point the transport with [`Transport::redirect`].

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Client, Response, StatusCode, Url};
use tracing::debug;

use crate::error::TransportError;
use crate::settings::CollectorSettings;
use crate::transport::{Batch, CollectorResponse, Transport};

pub const API_KEY_HEADER: &str = "X-Api-Key";

const EVENTS_ENDPOINT: &str = "/events";
const SETTINGS_ENDPOINT: &str = "/settings";
const PING_ENDPOINT: &str = "/ping";

#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    /// Scheme, host and port of the current collector, without a trailing slash.
    base_url: RwLock<String>,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = normalize_collector_url(base_url)?;
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(HttpTransport {
            client,
            base_url: RwLock::new(base_url),
            api_key,
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{endpoint}", self.base_url());
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }
}

/// Accepts `scheme://host[:port]` or a bare `host:port` (https assumed) and returns
/// the origin.
fn normalize_collector_url(target: &str) -> Result<String, TransportError> {
    let target = target.trim();
    let candidate = if target.contains("://") {
        target.to_string()
    } else {
        format!("https://{target}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| TransportError::InvalidRedirect(format!("{target}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(TransportError::InvalidRedirect(target.to_string()));
    }
    Ok(url.origin().ascii_serialization())
}

/// Maps a non-success status to a collector response. `Ok(None)` means the body
/// carries the payload.
fn classify_status<T>(response: &Response) -> Result<Option<CollectorResponse<T>>, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(None);
    }
    if status.is_redirection() {
        return match response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            Some(location) => Ok(Some(CollectorResponse::Redirect(location.to_string()))),
            None => Err(TransportError::Status(status.as_u16())),
        };
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Ok(Some(CollectorResponse::TryLater)),
        StatusCode::PAYLOAD_TOO_LARGE => Ok(Some(CollectorResponse::LimitExceeded)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Ok(Some(CollectorResponse::InvalidApiKey))
        }
        _ => Err(TransportError::Status(status.as_u16())),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_events(&self, batch: &Batch) -> Result<CollectorResponse, TransportError> {
        let response = self
            .request(reqwest::Method::POST, EVENTS_ENDPOINT)
            .header(CONTENT_TYPE, "application/json")
            .body(batch.to_json_array())
            .send()
            .await?;
        Ok(classify_status(&response)?.unwrap_or(CollectorResponse::Ok(())))
    }

    async fn get_settings(
        &self,
    ) -> Result<CollectorResponse<CollectorSettings>, TransportError> {
        let response = self
            .request(reqwest::Method::GET, SETTINGS_ENDPOINT)
            .send()
            .await?;
        if let Some(other) = classify_status(&response)? {
            return Ok(other);
        }
        let settings = response
            .json::<CollectorSettings>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(CollectorResponse::Ok(settings))
    }

    async fn ping(&self) -> Result<CollectorResponse, TransportError> {
        let response = self
            .request(reqwest::Method::POST, PING_ENDPOINT)
            .send()
            .await?;
        Ok(classify_status(&response)?.unwrap_or(CollectorResponse::Ok(())))
    }

    fn redirect(&self, target: &str) -> Result<(), TransportError> {
        let base_url = normalize_collector_url(target)?;
        debug!("Reporter | Collector address changed to {base_url}");
        *self
            .base_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = base_url;
        Ok(())
    }
}
