// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock collector transport for testing

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use trace_reporter::error::TransportError;
use trace_reporter::settings::CollectorSettings;
use trace_reporter::transport::{Batch, CollectorResponse, Transport};

/// Collector that records every posted batch, decoded as JSON.
#[derive(Default)]
pub struct MockCollector {
    batches: Mutex<Vec<Vec<JsonValue>>>,
    settings: Mutex<Option<CollectorSettings>>,
    /// Posts sleep this long before answering.
    post_delay: Mutex<Option<Duration>>,
    fail_posts: AtomicBool,
    post_calls: AtomicU32,
    pings: AtomicU32,
}

impl MockCollector {
    pub fn with_settings(settings: CollectorSettings) -> Self {
        MockCollector {
            settings: Mutex::new(Some(settings)),
            ..Default::default()
        }
    }

    /// Collector whose settings endpoint always fails.
    pub fn without_settings() -> Self {
        MockCollector::default()
    }

    pub fn set_post_delay(&self, delay: Duration) {
        *self.post_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::Relaxed);
    }

    pub fn batches(&self) -> Vec<Vec<JsonValue>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<JsonValue> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn post_calls(&self) -> u32 {
        self.post_calls.load(Ordering::Relaxed)
    }

    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockCollector {
    async fn post_events(&self, batch: &Batch) -> Result<CollectorResponse, TransportError> {
        self.post_calls.fetch_add(1, Ordering::Relaxed);
        let delay = *self.post_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_posts.load(Ordering::Relaxed) {
            return Err(TransportError::Status(503));
        }
        let events: Vec<JsonValue> = serde_json::from_slice(&batch.to_json_array())
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        self.batches.lock().unwrap().push(events);
        Ok(CollectorResponse::Ok(()))
    }

    async fn get_settings(
        &self,
    ) -> Result<CollectorResponse<CollectorSettings>, TransportError> {
        let settings = self.settings.lock().unwrap().clone();
        match settings {
            Some(settings) => Ok(CollectorResponse::Ok(settings)),
            None => Err(TransportError::Status(503)),
        }
    }

    async fn ping(&self) -> Result<CollectorResponse, TransportError> {
        self.pings.fetch_add(1, Ordering::Relaxed);
        Ok(CollectorResponse::Ok(()))
    }

    fn redirect(&self, _target: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
