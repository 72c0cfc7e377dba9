// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingMode {
    Enabled,
    Disabled,
}

impl FromStr for TracingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(TracingMode::Enabled),
            "disabled" => Ok(TracingMode::Disabled),
            other => Err(format!("unknown tracing mode: {other}")),
        }
    }
}

/// Token bucket parameters for trigger-trace admissions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum number of tokens the bucket holds.
    pub capacity: f64,
    /// Tokens added per second.
    pub rate: f64,
}

/// Collector-issued policy snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tracing_mode: TracingMode,
    pub trigger_trace_mode: TracingMode,
    pub rate_limit: RateLimit,
    pub fetched_at: SystemTime,
    pub ttl: Duration,
}

impl Settings {
    /// A snapshot is fresh strictly before `fetched_at + ttl`. A wall clock that moved
    /// backwards past `fetched_at` counts as no time elapsed.
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        let age = now.duration_since(self.fetched_at).unwrap_or_default();
        age < self.ttl
    }
}

/// Settings document as returned by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorSettings {
    pub tracing_mode: TracingMode,
    pub trigger_trace_mode: TracingMode,
    pub rate_limit: RateLimit,
    /// Snapshot lifetime. Absent means the reporter's configured settings TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl CollectorSettings {
    pub fn into_settings(self, fetched_at: SystemTime, default_ttl: Duration) -> Settings {
        Settings {
            tracing_mode: self.tracing_mode,
            trigger_trace_mode: self.trigger_trace_mode,
            rate_limit: self.rate_limit,
            fetched_at,
            ttl: self.ttl_secs.map_or(default_ttl, Duration::from_secs),
        }
    }
}

/// Holds the latest settings snapshot. Staleness is computed on read.
#[derive(Debug, Default)]
pub struct SettingsStore {
    current: RwLock<Option<Arc<Settings>>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, or `None` if nothing was ingested yet or it went stale.
    pub fn current(&self) -> Option<Arc<Settings>> {
        self.current_at(SystemTime::now())
    }

    pub fn current_at(&self, now: SystemTime) -> Option<Arc<Settings>> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|settings| settings.is_fresh_at(now))
            .map(Arc::clone)
    }

    /// Replaces the snapshot as a whole.
    pub fn ingest(&self, settings: Settings) {
        debug!(
            "Reporter | Ingesting settings: tracing {:?}, trigger trace {:?}, ttl {:?}",
            settings.tracing_mode, settings.trigger_trace_mode, settings.ttl
        );
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(settings));
    }
}
