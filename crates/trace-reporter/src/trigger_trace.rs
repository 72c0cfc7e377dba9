// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trigger-trace directives and the admission decision.
//!
//! Clients ask for a trace on demand with the `X-Trace-Options` header. The
//! decision walks an ordered rule list (first match wins) and, when every rule
//! passes, consults the shared token bucket. The outcome is echoed back in
//! `X-Trace-Options-Response`.
//!
//! Ignored keys are reported as: unknown keys in the order they were first seen,
//! followed by recognized keys that were malformed (a flag carrying a value, a
//! value key without one), also in first-seen order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::ReporterOptions;
use crate::rate_limiter::TokenBucket;
use crate::settings::{Settings, SettingsStore, TracingMode};

pub const TRACE_OPTIONS_HEADER: &str = "X-Trace-Options";
pub const TRACE_OPTIONS_RESPONSE_HEADER: &str = "X-Trace-Options-Response";

const TRIGGER_TRACE_KEY: &str = "trigger_trace";
const PD_KEYS_KEY: &str = "pd_keys";
pub const CUSTOM_KEY_PREFIX: &str = "custom_";

/// Parsed `X-Trace-Options` directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceOptions {
    pub trigger_trace_requested: bool,
    pub custom_keys: BTreeMap<String, String>,
    pub pd_keys: Vec<String>,
    pub ignored_keys: Vec<String>,
}

fn is_custom_key(key: &str) -> bool {
    key.len() > CUSTOM_KEY_PREFIX.len() && key.starts_with(CUSTOM_KEY_PREFIX)
}

fn push_once(keys: &mut Vec<String>, key: &str) {
    if !keys.iter().any(|k| k == key) {
        keys.push(key.to_string());
    }
}

impl TraceOptions {
    pub fn parse(header: &str) -> Self {
        let mut options = TraceOptions::default();
        let mut unknown = Vec::new();
        let mut malformed = Vec::new();

        for token in header.split(';') {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (token.trim(), None),
            };
            if key.is_empty() {
                continue;
            }

            match (key, value) {
                (TRIGGER_TRACE_KEY, None) => options.trigger_trace_requested = true,
                (TRIGGER_TRACE_KEY, Some(_)) => push_once(&mut malformed, key),
                (PD_KEYS_KEY, Some(v)) if !v.is_empty() => options.pd_keys.extend(
                    v.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                ),
                (PD_KEYS_KEY, _) => push_once(&mut malformed, key),
                (k, Some(v)) if is_custom_key(k) => {
                    options.custom_keys.insert(k.to_string(), v.to_string());
                }
                (k, None) if is_custom_key(k) => push_once(&mut malformed, k),
                (k, _) => push_once(&mut unknown, k),
            }
        }

        // a key that also appeared well formed is not ignored
        malformed.retain(|k| !options.accepted(k));
        options.ignored_keys = unknown;
        options.ignored_keys.extend(malformed);
        options
    }

    fn accepted(&self, key: &str) -> bool {
        match key {
            TRIGGER_TRACE_KEY => self.trigger_trace_requested,
            PD_KEYS_KEY => !self.pd_keys.is_empty(),
            k => self.custom_keys.contains_key(k),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    RateExceeded,
    NotRequested,
    SettingsNotAvailable,
    Disabled,
    TracingDisabled,
    Ignored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::RateExceeded => "rate-exceeded",
            Outcome::NotRequested => "not-requested",
            Outcome::SettingsNotAvailable => "settings-not-available",
            Outcome::Disabled => "disabled",
            Outcome::TracingDisabled => "tracing-disabled",
            Outcome::Ignored => "ignored",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    /// Value for `X-Trace-Options-Response`, if any.
    pub response: Option<String>,
}

impl Decision {
    /// The sampled flag this decision imposes on the trace. `None` leaves it to the
    /// inbound trace (`ignored`) or to regular sampling (`not-requested`).
    pub fn sampled(&self) -> Option<bool> {
        match self.outcome {
            Outcome::Ok => Some(true),
            Outcome::Ignored | Outcome::NotRequested => None,
            _ => Some(false),
        }
    }
}

/// Builds the response header value. `not-requested` is never echoed, and a
/// directive yielding neither an outcome nor ignored keys yields no header.
pub fn response_header(outcome: Outcome, ignored_keys: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(2);
    if outcome != Outcome::NotRequested {
        parts.push(format!("{TRIGGER_TRACE_KEY}={outcome}"));
    }
    if !ignored_keys.is_empty() {
        parts.push(format!("ignored={}", ignored_keys.join(",")));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(";"))
    }
}

struct DecisionInput<'a> {
    directive: &'a TraceOptions,
    existing_trace_sampled: Option<bool>,
    options: &'a ReporterOptions,
    settings: Option<&'a Settings>,
}

type Rule = fn(&DecisionInput<'_>) -> bool;

fn already_sampled(input: &DecisionInput<'_>) -> bool {
    input.existing_trace_sampled.is_some() && input.directive.trigger_trace_requested
}

fn not_requested(input: &DecisionInput<'_>) -> bool {
    !input.directive.trigger_trace_requested
}

fn tracing_disabled(input: &DecisionInput<'_>) -> bool {
    input.options.tracing_mode() == TracingMode::Disabled
        || input
            .settings
            .is_some_and(|s| s.tracing_mode == TracingMode::Disabled)
}

fn trigger_trace_disabled(input: &DecisionInput<'_>) -> bool {
    !input.options.trigger_trace_enabled()
        || input
            .settings
            .is_some_and(|s| s.trigger_trace_mode == TracingMode::Disabled)
}

fn settings_unavailable(input: &DecisionInput<'_>) -> bool {
    input.settings.is_none()
}

/// Precedence of the non-admission outcomes, first match wins.
const RULES: [(Rule, Outcome); 5] = [
    (already_sampled, Outcome::Ignored),
    (not_requested, Outcome::NotRequested),
    (tracing_disabled, Outcome::TracingDisabled),
    (trigger_trace_disabled, Outcome::Disabled),
    (settings_unavailable, Outcome::SettingsNotAvailable),
];

pub struct TriggerTraceDecider {
    options: Arc<ReporterOptions>,
    settings: Arc<SettingsStore>,
    limiter: TokenBucket,
}

impl TriggerTraceDecider {
    pub fn new(options: Arc<ReporterOptions>, settings: Arc<SettingsStore>) -> Self {
        TriggerTraceDecider {
            options,
            settings,
            limiter: TokenBucket::new(),
        }
    }

    /// Decides a directive. `existing_trace_sampled` is the sampled flag of a valid
    /// inbound trace identifier, if the request carried one.
    pub fn decide(
        &self,
        directive: &TraceOptions,
        existing_trace_sampled: Option<bool>,
    ) -> Decision {
        let settings = self.settings.current();
        let input = DecisionInput {
            directive,
            existing_trace_sampled,
            options: &self.options,
            settings: settings.as_deref(),
        };

        let outcome = RULES
            .iter()
            .find(|(rule, _)| rule(&input))
            .map(|(_, outcome)| *outcome)
            .unwrap_or_else(|| match input.settings {
                Some(s) if self.limiter.admit(&s.rate_limit) => Outcome::Ok,
                _ => Outcome::RateExceeded,
            });

        if outcome != Outcome::NotRequested {
            debug!("Reporter | Trigger trace outcome: {outcome}");
        }

        Decision {
            outcome,
            response: response_header(outcome, &directive.ignored_keys),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::settings::RateLimit;

    fn settings(capacity: f64) -> Settings {
        Settings {
            tracing_mode: TracingMode::Enabled,
            trigger_trace_mode: TracingMode::Enabled,
            rate_limit: RateLimit {
                capacity,
                rate: 0.0,
            },
            fetched_at: SystemTime::now(),
            ttl: Duration::from_secs(60),
        }
    }

    fn decider(settings: Option<Settings>) -> (TriggerTraceDecider, Arc<ReporterOptions>) {
        let options = Arc::new(ReporterOptions::default());
        let store = Arc::new(SettingsStore::new());
        if let Some(s) = settings {
            store.ingest(s);
        }
        (
            TriggerTraceDecider::new(Arc::clone(&options), store),
            options,
        )
    }

    #[test]
    fn test_parse_recognized_keys() {
        let options = TraceOptions::parse("trigger_trace;pd_keys=lo:se,check-id:123");
        assert!(options.trigger_trace_requested);
        assert_eq!(options.pd_keys, vec!["lo:se", "check-id:123"]);
        assert!(options.custom_keys.is_empty());
        assert!(options.ignored_keys.is_empty());
    }

    #[test]
    fn test_parse_custom_and_unknown_keys() {
        let options =
            TraceOptions::parse(" trigger_trace ; foo=bar;custom_key1 = value1;app_id=123");
        assert!(options.trigger_trace_requested);
        assert_eq!(
            options.custom_keys.get("custom_key1").map(String::as_str),
            Some("value1")
        );
        assert_eq!(options.ignored_keys, vec!["foo", "app_id"]);
    }

    #[test]
    fn test_parse_malformed_recognized_keys_follow_unknown_keys() {
        let options = TraceOptions::parse("trigger_trace=1;tigger_trace");
        assert!(!options.trigger_trace_requested);
        assert_eq!(options.ignored_keys, vec!["tigger_trace", "trigger_trace"]);

        let options = TraceOptions::parse("pd_keys;custom_x;foo;foo;;=v");
        assert_eq!(options.ignored_keys, vec!["foo", "pd_keys", "custom_x"]);
    }

    #[test]
    fn test_every_key_lands_in_exactly_one_place() {
        let options = TraceOptions::parse("trigger_trace;custom_a=1;pd_keys=x;bogus;custom_b");
        assert!(options.trigger_trace_requested);
        assert_eq!(options.custom_keys.len(), 1);
        assert_eq!(options.pd_keys, vec!["x"]);
        assert_eq!(options.ignored_keys, vec!["bogus", "custom_b"]);
    }

    #[test]
    fn test_repeated_key_accepted_once_is_not_ignored() {
        let options = TraceOptions::parse("trigger_trace;trigger_trace=1");
        assert!(options.trigger_trace_requested);
        assert!(options.ignored_keys.is_empty());

        let options = TraceOptions::parse("custom_a=1;custom_a");
        assert_eq!(
            options.custom_keys.get("custom_a").map(String::as_str),
            Some("1")
        );
        assert!(options.ignored_keys.is_empty());

        let options = TraceOptions::parse("pd_keys=;pd_keys=lo:se;bogus");
        assert_eq!(options.pd_keys, vec!["lo:se"]);
        assert_eq!(options.ignored_keys, vec!["bogus"]);
    }

    #[test]
    fn test_response_header() {
        assert_eq!(
            response_header(Outcome::Ok, &[]),
            Some("trigger_trace=ok".to_string())
        );
        assert_eq!(
            response_header(
                Outcome::SettingsNotAvailable,
                &["foo".to_string(), "app_id".to_string()]
            ),
            Some("trigger_trace=settings-not-available;ignored=foo,app_id".to_string())
        );
        assert_eq!(
            response_header(Outcome::NotRequested, &["tigger_trace".to_string()]),
            Some("ignored=tigger_trace".to_string())
        );
        assert_eq!(response_header(Outcome::NotRequested, &[]), None);
    }

    #[test]
    fn test_decide_ok() {
        let (decider, _) = decider(Some(settings(5.0)));
        let decision = decider.decide(&TraceOptions::parse("trigger_trace"), None);
        assert_eq!(decision.outcome, Outcome::Ok);
        assert_eq!(decision.sampled(), Some(true));
        assert_eq!(decision.response.as_deref(), Some("trigger_trace=ok"));
    }

    #[test]
    fn test_decide_ignored_when_trace_exists() {
        let (decider, _) = decider(Some(settings(5.0)));
        let decision = decider.decide(&TraceOptions::parse("trigger_trace"), Some(false));
        assert_eq!(decision.outcome, Outcome::Ignored);
        assert_eq!(decision.sampled(), None);
        assert_eq!(decision.response.as_deref(), Some("trigger_trace=ignored"));
    }

    #[test]
    fn test_decide_not_requested() {
        let (decider, _) = decider(Some(settings(5.0)));
        let decision = decider.decide(&TraceOptions::parse("pd_keys=a;custom_k=v"), None);
        assert_eq!(decision.outcome, Outcome::NotRequested);
        assert_eq!(decision.response, None);

        let decision = decider.decide(&TraceOptions::parse("pd_keys=a"), Some(true));
        assert_eq!(decision.outcome, Outcome::NotRequested);
    }

    #[test]
    fn test_decide_tracing_disabled_takes_precedence() {
        let (decider, options) = decider(None);
        options.set_tracing_mode(TracingMode::Disabled);
        options.set_trigger_trace_enabled(false);
        let decision = decider.decide(&TraceOptions::parse("trigger_trace"), None);
        assert_eq!(decision.outcome, Outcome::TracingDisabled);
        assert_eq!(decision.sampled(), Some(false));
    }

    #[test]
    fn test_decide_tracing_disabled_by_settings() {
        let mut s = settings(5.0);
        s.tracing_mode = TracingMode::Disabled;
        let (decider, _) = decider(Some(s));
        let decision = decider.decide(&TraceOptions::parse("trigger_trace"), None);
        assert_eq!(decision.outcome, Outcome::TracingDisabled);
    }

    #[test]
    fn test_decide_trigger_trace_disabled() {
        let (locally_disabled, options) = decider(Some(settings(5.0)));
        options.set_trigger_trace_enabled(false);
        let decision = locally_disabled.decide(&TraceOptions::parse("trigger_trace"), None);
        assert_eq!(decision.outcome, Outcome::Disabled);
        assert_eq!(decision.response.as_deref(), Some("trigger_trace=disabled"));

        let mut s = settings(5.0);
        s.trigger_trace_mode = TracingMode::Disabled;
        let (snapshot_disabled, _) = decider(Some(s));
        let decision = snapshot_disabled.decide(&TraceOptions::parse("trigger_trace"), None);
        assert_eq!(decision.outcome, Outcome::Disabled);
    }

    #[test]
    fn test_decide_settings_not_available_keeps_ignored_keys() {
        let (decider, _) = decider(None);
        let decision = decider.decide(&TraceOptions::parse("trigger_trace;foo=bar"), None);
        assert_eq!(decision.outcome, Outcome::SettingsNotAvailable);
        assert_eq!(
            decision.response.as_deref(),
            Some("trigger_trace=settings-not-available;ignored=foo")
        );
    }

    #[test]
    fn test_decide_stale_settings_are_unavailable() {
        let mut s = settings(5.0);
        s.fetched_at = SystemTime::now() - Duration::from_secs(120);
        let (decider, _) = decider(Some(s));
        let decision = decider.decide(&TraceOptions::parse("trigger_trace"), None);
        assert_eq!(decision.outcome, Outcome::SettingsNotAvailable);
    }

    #[test]
    fn test_decide_rate_exceeded() {
        let (decider, _) = decider(Some(settings(2.0)));
        let directive = TraceOptions::parse("trigger_trace;custom_key1=value1");
        let outcomes: Vec<Outcome> = (0..5)
            .map(|_| decider.decide(&directive, None).outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![
                Outcome::Ok,
                Outcome::Ok,
                Outcome::RateExceeded,
                Outcome::RateExceeded,
                Outcome::RateExceeded
            ]
        );
    }
}
