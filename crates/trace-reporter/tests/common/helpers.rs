// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::Value as JsonValue;
use tokio::time::{sleep, timeout, Instant};
use trace_reporter::request::{InboundHeaders, RequestTrace};
use trace_reporter::settings::{CollectorSettings, RateLimit, TracingMode};
use trace_reporter::transport::Transport;
use trace_reporter::{Reporter, ReporterOptions};

use super::mocks::MockCollector;

pub fn collector_settings(capacity: f64, rate: f64) -> CollectorSettings {
    CollectorSettings {
        tracing_mode: TracingMode::Enabled,
        trigger_trace_mode: TracingMode::Enabled,
        rate_limit: RateLimit { capacity, rate },
        ttl_secs: Some(600),
    }
}

/// Reporter over a mock collector with settings already ingested. Periodic flushes
/// are pushed far out so tests control delivery with `flush`.
pub fn start_reporter(
    collector: &Arc<MockCollector>,
    settings: Option<CollectorSettings>,
) -> Reporter {
    let options = Arc::new(ReporterOptions::default());
    options.set_event_flush_interval(Duration::from_secs(3600));
    options.set_max_retries(0);
    start_reporter_with(options, collector, settings)
}

pub fn start_reporter_with(
    options: Arc<ReporterOptions>,
    collector: &Arc<MockCollector>,
    settings: Option<CollectorSettings>,
) -> Reporter {
    let transport: Arc<dyn Transport> = collector.clone();
    let reporter = Reporter::start(options, transport).expect("failed to start reporter");
    if let Some(settings) = settings {
        let ttl = reporter.options().settings_ttl();
        reporter
            .settings_store()
            .ingest(settings.into_settings(SystemTime::now(), ttl));
    }
    reporter
}

/// Runs one request through the tracing lifecycle and returns its response headers.
pub fn traced_request(
    reporter: &Reporter,
    x_trace: Option<&str>,
    trace_options: Option<&str>,
) -> Vec<(&'static str, String)> {
    let headers = InboundHeaders {
        x_trace: x_trace.map(str::to_string),
        trace_options: trace_options.map(str::to_string),
    };
    let trace = RequestTrace::start(reporter, "http", &headers);
    let response = trace.response_headers();
    trace.finish();
    response
}

pub fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Polls until the collector holds at least `count` events.
pub async fn wait_for_events(collector: &MockCollector, count: usize) -> Vec<JsonValue> {
    let _ = timeout(Duration::from_secs(5), async {
        while collector.events().len() < count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    collector.events()
}

pub fn deadline_in(after: Duration) -> Instant {
    Instant::now() + after
}
