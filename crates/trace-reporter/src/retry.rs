// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ReporterOptions;
use crate::error::{ReporterError, TransportError};
use crate::settings::CollectorSettings;
use crate::transport::{Batch, CollectorResponse, Transport};

/// Delay before the given retry (1-based): the initial delay doubled per retry,
/// capped at `max`.
pub fn backoff_delay(initial: Duration, max: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    initial.saturating_mul(1u32 << exponent).min(max)
}

/// Wraps every collector call with retries, exponential backoff and redirect
/// following. Limits are read from the options on each attempt so live updates
/// apply to calls already in flight.
#[derive(Clone)]
pub struct RetryController {
    options: Arc<ReporterOptions>,
    transport: Arc<dyn Transport>,
    cancel_token: CancellationToken,
}

impl RetryController {
    pub fn new(
        options: Arc<ReporterOptions>,
        transport: Arc<dyn Transport>,
        cancel_token: CancellationToken,
    ) -> Self {
        RetryController {
            options,
            transport,
            cancel_token,
        }
    }

    pub async fn send(&self, batch: &Batch) -> Result<(), ReporterError> {
        debug!(
            "Reporter | Sending batch of {} events ({} bytes)",
            batch.len(),
            batch.size()
        );
        self.invoke("post_events", || self.transport.post_events(batch))
            .await
    }

    /// Each attempt is bounded by the settings timeout. The retry budget applies
    /// across attempts as for any other call.
    pub async fn get_settings(&self) -> Result<CollectorSettings, ReporterError> {
        self.invoke("get_settings", move || async move {
            let limit = self.options.settings_timeout();
            timeout(limit, self.transport.get_settings())
                .await
                .unwrap_or(Err(TransportError::Timeout(limit)))
        })
        .await
    }

    pub async fn ping(&self) -> Result<(), ReporterError> {
        self.invoke("ping", || self.transport.ping()).await
    }

    async fn invoke<T, F, Fut>(&self, method: &'static str, mut call: F) -> Result<T, ReporterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CollectorResponse<T>, TransportError>>,
    {
        let mut retries: u32 = 0;
        let mut redirects: u32 = 0;

        loop {
            let failure = match call().await {
                Ok(CollectorResponse::Ok(value)) => {
                    if retries > 0 {
                        debug!("Reporter | {method} succeeded after {retries} retries");
                    }
                    return Ok(value);
                }
                Ok(CollectorResponse::Redirect(target)) => {
                    redirects += 1;
                    let max = self.options.redirect_max();
                    if redirects > max {
                        error!("Reporter | {method} exceeded {max} redirects, last target {target}");
                        return Err(ReporterError::TooManyRedirects { method, max });
                    }
                    match self.transport.redirect(&target) {
                        Ok(()) => {
                            debug!("Reporter | {method} redirected to {target}");
                            continue;
                        }
                        Err(e) => e.to_string(),
                    }
                }
                Ok(CollectorResponse::InvalidApiKey) => {
                    error!("Reporter | {method} rejected by the collector: invalid API key");
                    return Err(ReporterError::InvalidApiKey { method });
                }
                Ok(CollectorResponse::TryLater) => "collector asked to try later".to_string(),
                Ok(CollectorResponse::LimitExceeded) => "collector limit exceeded".to_string(),
                Err(e) => e.to_string(),
            };

            retries += 1;
            if retries > self.options.max_retries() {
                error!("Reporter | {method} failed after {retries} attempts, dropping: {failure}");
                return Err(ReporterError::RetriesExhausted {
                    method,
                    attempts: retries,
                    last: failure,
                });
            }

            let delay = backoff_delay(
                self.options.retry_delay_initial(),
                self.options.retry_delay_max(),
                retries,
            );
            if retries > self.options.retry_log_threshold() {
                warn!("Reporter | {method} still failing after {retries} retries, next attempt in {delay:?}: {failure}");
            } else {
                debug!("Reporter | Retrying {method} in {delay:?} (retry {retries}): {failure}");
            }

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.cancel_token.cancelled() => {
                    debug!("Reporter | {method} abandoned during backoff, shutting down");
                    return Err(ReporterError::Shutdown);
                }
            }
        }
    }
}
