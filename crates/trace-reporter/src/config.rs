// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reporter options shared by every background task.
//!
//! Each option lives in its own atomic. Updating one field never blocks tasks
//! reading another, and readers pick up new values on their next cycle.

use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::settings::TracingMode;

pub const ENV_EVENTS_FLUSH_INTERVAL: &str = "TRACE_REPORTER_EVENTS_FLUSH_INTERVAL";
pub const ENV_EVENTS_BATCH_SIZE: &str = "TRACE_REPORTER_EVENTS_BATCHSIZE";
pub const ENV_TRACING_MODE: &str = "TRACE_REPORTER_TRACING_MODE";
pub const ENV_TRIGGER_TRACE: &str = "TRACE_REPORTER_TRIGGER_TRACE";

const DEFAULT_EVENT_FLUSH_INTERVAL_SECS: u64 = 2;
const DEFAULT_EVENT_FLUSH_BATCH_SIZE_KB: u64 = 2000;
const DEFAULT_GET_SETTINGS_INTERVAL_SECS: u64 = 30;
const DEFAULT_SETTINGS_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SETTINGS_TTL_SECS: u64 = 120;
const DEFAULT_PING_INTERVAL_SECS: u64 = 20;
const DEFAULT_RETRY_DELAY_INITIAL_MS: u64 = 500;
const DEFAULT_RETRY_DELAY_MAX_SECS: u64 = 60;
const DEFAULT_REDIRECT_MAX: u32 = 20;
const DEFAULT_RETRY_LOG_THRESHOLD: u32 = 10;
const DEFAULT_MAX_RETRIES: u32 = 20;
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_SEND_LANES: usize = 4;

#[derive(Debug)]
pub struct ReporterOptions {
    /// Events flush interval, in milliseconds
    event_flush_interval_ms: AtomicU64,
    /// Encoded bytes, in KiB, that trigger a flush and bound a single batch
    event_flush_batch_size_kb: AtomicU64,
    get_settings_interval_ms: AtomicU64,
    /// Bound on a single settings request, retries excluded
    settings_timeout_ms: AtomicU64,
    /// Lifetime of a snapshot whose collector document carries no TTL
    settings_ttl_ms: AtomicU64,
    ping_interval_ms: AtomicU64,
    retry_delay_initial_ms: AtomicU64,
    retry_delay_max_ms: AtomicU64,
    redirect_max: AtomicU32,
    /// Retries past this count are logged at warn level
    retry_log_threshold: AtomicU32,
    max_retries: AtomicU32,
    /// Read once when the reporter starts
    event_queue_capacity: AtomicUsize,
    /// Read once when the reporter starts
    send_lanes: AtomicUsize,
    tracing_mode_enabled: AtomicBool,
    trigger_trace_enabled: AtomicBool,
}

impl Default for ReporterOptions {
    fn default() -> Self {
        ReporterOptions {
            event_flush_interval_ms: AtomicU64::new(DEFAULT_EVENT_FLUSH_INTERVAL_SECS * 1000),
            event_flush_batch_size_kb: AtomicU64::new(DEFAULT_EVENT_FLUSH_BATCH_SIZE_KB),
            get_settings_interval_ms: AtomicU64::new(DEFAULT_GET_SETTINGS_INTERVAL_SECS * 1000),
            settings_timeout_ms: AtomicU64::new(DEFAULT_SETTINGS_TIMEOUT_SECS * 1000),
            settings_ttl_ms: AtomicU64::new(DEFAULT_SETTINGS_TTL_SECS * 1000),
            ping_interval_ms: AtomicU64::new(DEFAULT_PING_INTERVAL_SECS * 1000),
            retry_delay_initial_ms: AtomicU64::new(DEFAULT_RETRY_DELAY_INITIAL_MS),
            retry_delay_max_ms: AtomicU64::new(DEFAULT_RETRY_DELAY_MAX_SECS * 1000),
            redirect_max: AtomicU32::new(DEFAULT_REDIRECT_MAX),
            retry_log_threshold: AtomicU32::new(DEFAULT_RETRY_LOG_THRESHOLD),
            max_retries: AtomicU32::new(DEFAULT_MAX_RETRIES),
            event_queue_capacity: AtomicUsize::new(DEFAULT_EVENT_QUEUE_CAPACITY),
            send_lanes: AtomicUsize::new(DEFAULT_SEND_LANES),
            tracing_mode_enabled: AtomicBool::new(true),
            trigger_trace_enabled: AtomicBool::new(true),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Reads a duration option, treating zero as unset so a live update to zero
/// cannot turn a schedule into a busy loop.
fn duration_or_default(ms: &AtomicU64, default_secs: u64) -> Duration {
    match ms.load(Ordering::Relaxed) {
        0 => Duration::from_secs(default_secs),
        ms => Duration::from_millis(ms),
    }
}

fn is_zero(ms: &AtomicU64) -> bool {
    ms.load(Ordering::Relaxed) == 0
}

impl ReporterOptions {
    /// Default options with environment overrides applied.
    pub fn from_env() -> Self {
        let options = ReporterOptions::default();
        options.load_envs();
        options
    }

    /// Refreshes the options that can be overridden through the environment.
    /// Values that are missing or fail to parse leave the current value untouched.
    pub fn load_envs(&self) {
        if let Some(secs) = env_parse::<u64>(ENV_EVENTS_FLUSH_INTERVAL) {
            self.set_event_flush_interval(Duration::from_secs(secs));
        }
        if let Some(kb) = env_parse::<u64>(ENV_EVENTS_BATCH_SIZE) {
            self.set_event_flush_batch_size_kb(kb);
        }
        if let Some(mode) = env_parse::<TracingMode>(ENV_TRACING_MODE) {
            self.set_tracing_mode(mode);
        }
        if let Some(enabled) = env_parse::<bool>(ENV_TRIGGER_TRACE) {
            self.set_trigger_trace_enabled(enabled);
        }
    }

    /// Checks the stored values. [`crate::Reporter::start`] refuses options that
    /// fail here; later updates to zero fall back to the defaults instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_zero(&self.event_flush_interval_ms) {
            return Err(ConfigError::Zero("event_flush_interval"));
        }
        if self.event_flush_batch_size_kb() == 0 {
            return Err(ConfigError::Zero("event_flush_batch_size"));
        }
        if is_zero(&self.get_settings_interval_ms) {
            return Err(ConfigError::Zero("get_settings_interval"));
        }
        if is_zero(&self.settings_timeout_ms) {
            return Err(ConfigError::Zero("settings_timeout"));
        }
        if is_zero(&self.settings_ttl_ms) {
            return Err(ConfigError::Zero("settings_ttl"));
        }
        if is_zero(&self.ping_interval_ms) {
            return Err(ConfigError::Zero("ping_interval"));
        }
        if self.event_queue_capacity() == 0 {
            return Err(ConfigError::Zero("event_queue_capacity"));
        }
        if self.send_lanes() == 0 {
            return Err(ConfigError::Zero("send_lanes"));
        }
        let initial = self.retry_delay_initial();
        let max = self.retry_delay_max();
        if initial > max {
            return Err(ConfigError::RetryDelayOrder { initial, max });
        }
        Ok(())
    }

    pub fn event_flush_interval(&self) -> Duration {
        duration_or_default(
            &self.event_flush_interval_ms,
            DEFAULT_EVENT_FLUSH_INTERVAL_SECS,
        )
    }

    pub fn set_event_flush_interval(&self, interval: Duration) {
        self.event_flush_interval_ms
            .store(millis(interval), Ordering::Relaxed);
    }

    pub fn event_flush_batch_size_kb(&self) -> u64 {
        self.event_flush_batch_size_kb.load(Ordering::Relaxed)
    }

    /// Batch ceiling in bytes.
    pub fn event_flush_batch_size_bytes(&self) -> usize {
        usize::try_from(self.event_flush_batch_size_kb().saturating_mul(1024))
            .unwrap_or(usize::MAX)
    }

    pub fn set_event_flush_batch_size_kb(&self, kb: u64) {
        self.event_flush_batch_size_kb.store(kb, Ordering::Relaxed);
    }

    pub fn get_settings_interval(&self) -> Duration {
        duration_or_default(
            &self.get_settings_interval_ms,
            DEFAULT_GET_SETTINGS_INTERVAL_SECS,
        )
    }

    pub fn set_get_settings_interval(&self, interval: Duration) {
        self.get_settings_interval_ms
            .store(millis(interval), Ordering::Relaxed);
    }

    pub fn settings_timeout(&self) -> Duration {
        duration_or_default(&self.settings_timeout_ms, DEFAULT_SETTINGS_TIMEOUT_SECS)
    }

    pub fn set_settings_timeout(&self, timeout: Duration) {
        self.settings_timeout_ms
            .store(millis(timeout), Ordering::Relaxed);
    }

    pub fn settings_ttl(&self) -> Duration {
        duration_or_default(&self.settings_ttl_ms, DEFAULT_SETTINGS_TTL_SECS)
    }

    pub fn set_settings_ttl(&self, ttl: Duration) {
        self.settings_ttl_ms.store(millis(ttl), Ordering::Relaxed);
    }

    pub fn ping_interval(&self) -> Duration {
        duration_or_default(&self.ping_interval_ms, DEFAULT_PING_INTERVAL_SECS)
    }

    pub fn set_ping_interval(&self, interval: Duration) {
        self.ping_interval_ms
            .store(millis(interval), Ordering::Relaxed);
    }

    pub fn retry_delay_initial(&self) -> Duration {
        Duration::from_millis(self.retry_delay_initial_ms.load(Ordering::Relaxed))
    }

    pub fn set_retry_delay_initial(&self, delay: Duration) {
        self.retry_delay_initial_ms
            .store(millis(delay), Ordering::Relaxed);
    }

    pub fn retry_delay_max(&self) -> Duration {
        Duration::from_millis(self.retry_delay_max_ms.load(Ordering::Relaxed))
    }

    pub fn set_retry_delay_max(&self, delay: Duration) {
        self.retry_delay_max_ms
            .store(millis(delay), Ordering::Relaxed);
    }

    pub fn redirect_max(&self) -> u32 {
        self.redirect_max.load(Ordering::Relaxed)
    }

    pub fn set_redirect_max(&self, max: u32) {
        self.redirect_max.store(max, Ordering::Relaxed);
    }

    pub fn retry_log_threshold(&self) -> u32 {
        self.retry_log_threshold.load(Ordering::Relaxed)
    }

    pub fn set_retry_log_threshold(&self, threshold: u32) {
        self.retry_log_threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::Relaxed)
    }

    pub fn set_max_retries(&self, max: u32) {
        self.max_retries.store(max, Ordering::Relaxed);
    }

    pub fn event_queue_capacity(&self) -> usize {
        self.event_queue_capacity.load(Ordering::Relaxed)
    }

    pub fn set_event_queue_capacity(&self, capacity: usize) {
        self.event_queue_capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn send_lanes(&self) -> usize {
        self.send_lanes.load(Ordering::Relaxed)
    }

    pub fn set_send_lanes(&self, lanes: usize) {
        self.send_lanes.store(lanes, Ordering::Relaxed);
    }

    pub fn tracing_mode(&self) -> TracingMode {
        if self.tracing_mode_enabled.load(Ordering::Relaxed) {
            TracingMode::Enabled
        } else {
            TracingMode::Disabled
        }
    }

    pub fn set_tracing_mode(&self, mode: TracingMode) {
        self.tracing_mode_enabled
            .store(mode == TracingMode::Enabled, Ordering::Relaxed);
    }

    pub fn trigger_trace_enabled(&self) -> bool {
        self.trigger_trace_enabled.load(Ordering::Relaxed)
    }

    pub fn set_trigger_trace_enabled(&self, enabled: bool) {
        self.trigger_trace_enabled.store(enabled, Ordering::Relaxed);
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_lowercase().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("Reporter | Ignoring invalid value {raw:?} for {key}");
            None
        }
    }
}
