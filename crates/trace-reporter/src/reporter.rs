// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The reporter owns every background task: the send lanes, the settings refresh
//! poller and the keep-alive ping. All of them observe one cancellation token,
//! cancelled by [`Reporter::close`].

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batcher::{BatcherStats, EventBatcher};
use crate::config::ReporterOptions;
use crate::error::ConfigError;
use crate::event::Event;
use crate::request::{Sampler, SettingsSampler};
use crate::retry::RetryController;
use crate::settings::{Settings, SettingsStore};
use crate::transport::Transport;
use crate::trigger_trace::{Decision, TraceOptions, TriggerTraceDecider};

/// Counters returned by [`Reporter::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSummary {
    /// Events accepted by the collector over the reporter's lifetime.
    pub sent: u64,
    /// Every event that never reached the collector.
    pub dropped: u64,
    /// The part of `dropped` still unsent when the close deadline passed.
    pub dropped_at_close: u64,
}

pub struct Reporter {
    options: Arc<ReporterOptions>,
    settings: Arc<SettingsStore>,
    decider: TriggerTraceDecider,
    sampler: Arc<dyn Sampler>,
    controller: RetryController,
    batcher: EventBatcher,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Reporter {
    /// Starts the reporter with the default settings-driven sampler. Must be
    /// called from within a tokio runtime.
    pub fn start(
        options: Arc<ReporterOptions>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        Self::start_with_sampler(options, transport, Arc::new(SettingsSampler))
    }

    /// Fails without spawning anything if the options do not validate.
    pub fn start_with_sampler(
        options: Arc<ReporterOptions>,
        transport: Arc<dyn Transport>,
        sampler: Arc<dyn Sampler>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let cancel_token = CancellationToken::new();
        let settings = Arc::new(SettingsStore::new());
        let controller =
            RetryController::new(Arc::clone(&options), transport, cancel_token.clone());
        let batcher = EventBatcher::start(
            Arc::clone(&options),
            controller.clone(),
            cancel_token.clone(),
        );

        let tasks = vec![
            tokio::spawn(run_settings_poller(
                controller.clone(),
                Arc::clone(&settings),
                Arc::clone(&options),
                cancel_token.clone(),
            )),
            tokio::spawn(run_ping(
                controller.clone(),
                Arc::clone(&options),
                cancel_token.clone(),
            )),
        ];

        info!(
            "Reporter | Started with {} send lanes",
            options.send_lanes().max(1)
        );

        Ok(Reporter {
            decider: TriggerTraceDecider::new(Arc::clone(&options), Arc::clone(&settings)),
            options,
            settings,
            sampler,
            controller,
            batcher,
            cancel_token,
            tasks,
        })
    }

    pub fn options(&self) -> &Arc<ReporterOptions> {
        &self.options
    }

    pub fn sampler(&self) -> &dyn Sampler {
        self.sampler.as_ref()
    }

    /// Current settings snapshot, absent if none was received or it went stale.
    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.settings.current()
    }

    pub fn settings_store(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn stats(&self) -> Arc<BatcherStats> {
        self.batcher.stats()
    }

    /// Queues an event for delivery. Never blocks; returns false if the event was
    /// dropped.
    pub fn report(&self, event: Event) -> bool {
        self.batcher.report(event)
    }

    pub fn decide(
        &self,
        directive: &TraceOptions,
        existing_trace_sampled: Option<bool>,
    ) -> Decision {
        self.decider.decide(directive, existing_trace_sampled)
    }

    /// Sends every buffered event now and waits for the lanes to finish.
    pub async fn flush(&self) {
        self.batcher.flush().await;
    }

    /// Fetches settings once, outside the regular schedule.
    pub async fn refresh_settings(&self) -> bool {
        refresh_settings(&self.controller, &self.settings, &self.options).await
    }

    /// Stops the background tasks, drains queued events and waits for outstanding
    /// sends until `deadline`. Tasks still running then are aborted.
    pub async fn close(self, deadline: Instant) -> CloseSummary {
        debug!("Reporter | Closing");
        self.cancel_token.cancel();

        let stats = self.batcher.stats();
        let dropped_at_close = self.batcher.close(deadline).await;

        for mut task in self.tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
            }
        }

        let summary = CloseSummary {
            sent: stats.sent(),
            dropped: stats.dropped(),
            dropped_at_close,
        };
        info!(
            "Reporter | Closed: {} events sent, {} dropped",
            summary.sent, summary.dropped
        );
        summary
    }
}

async fn refresh_settings(
    controller: &RetryController,
    settings: &SettingsStore,
    options: &ReporterOptions,
) -> bool {
    match controller.get_settings().await {
        Ok(fetched) => {
            settings.ingest(fetched.into_settings(SystemTime::now(), options.settings_ttl()));
            true
        }
        Err(e) => {
            warn!("Reporter | Failed to refresh settings: {e}");
            false
        }
    }
}

async fn run_settings_poller(
    controller: RetryController,
    settings: Arc<SettingsStore>,
    options: Arc<ReporterOptions>,
    cancel_token: CancellationToken,
) {
    let mut next_delay = Duration::ZERO;
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                debug!("Reporter | Settings poller shutting down");
                break;
            }
            _ = sleep(next_delay) => {
                refresh_settings(&controller, &settings, &options).await;
                next_delay = options.get_settings_interval();
            }
        }
    }
}

async fn run_ping(
    controller: RetryController,
    options: Arc<ReporterOptions>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                debug!("Reporter | Keep-alive shutting down");
                break;
            }
            _ = sleep(options.ping_interval()) => {
                if let Err(e) = controller.ping().await {
                    warn!("Reporter | Keep-alive ping failed: {e}");
                }
            }
        }
    }
}
