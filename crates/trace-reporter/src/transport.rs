// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::error::TransportError;
use crate::settings::CollectorSettings;

/// Encoded events sent to the collector in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    events: Vec<Vec<u8>>,
    size: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, encoded: Vec<u8>) {
        self.size += encoded.len();
        self.events.push(encoded);
    }

    pub fn events(&self) -> &[Vec<u8>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total encoded bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Length of [`Batch::to_json_array`]: the events, the brackets and one comma
    /// between each pair of events.
    pub fn json_len(&self) -> usize {
        self.size + self.events.len().max(1) + 1
    }

    /// JSON array of the encoded events.
    pub fn to_json_array(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.json_len());
        body.push(b'[');
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                body.push(b',');
            }
            body.extend_from_slice(event);
        }
        body.push(b']');
        body
    }
}

/// Result of a call that reached the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorResponse<T = ()> {
    Ok(T),
    /// Collector asked us to come back later.
    TryLater,
    /// Collector refused the payload for exceeding its limits.
    LimitExceeded,
    InvalidApiKey,
    /// Collector moved; the target is the new collector address.
    Redirect(String),
}

/// The collector as seen by the reporter. Encoding and transport are up to the
/// implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_events(&self, batch: &Batch) -> Result<CollectorResponse, TransportError>;

    async fn get_settings(&self)
        -> Result<CollectorResponse<CollectorSettings>, TransportError>;

    async fn ping(&self) -> Result<CollectorResponse, TransportError>;

    /// Points subsequent calls at a new collector address.
    fn redirect(&self, target: &str) -> Result<(), TransportError>;
}
