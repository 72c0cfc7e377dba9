// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-request tracing: reads the inbound trace headers, applies the trigger-trace
//! decision, reports the entry and exit events and produces the response headers.

use tracing::debug;

use crate::event::{Event, Label, Value};
use crate::reporter::Reporter;
use crate::settings::{Settings, TracingMode};
use crate::trigger_trace::{
    Decision, Outcome, TraceOptions, TRACE_OPTIONS_HEADER, TRACE_OPTIONS_RESPONSE_HEADER,
};
use crate::xtrace::{XTrace, XTRACE_HEADER};

pub const PD_KEYS_ATTRIBUTE: &str = "PDKeys";
pub const TRIGGERED_TRACE_ATTRIBUTE: &str = "TriggeredTrace";

/// Sampling of requests that did not force a trace.
pub trait Sampler: Send + Sync {
    fn sample(&self, layer: &str, settings: Option<&Settings>) -> bool;
}

/// Samples every request while a fresh snapshot has tracing enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsSampler;

impl Sampler for SettingsSampler {
    fn sample(&self, _layer: &str, settings: Option<&Settings>) -> bool {
        settings.is_some_and(|s| s.tracing_mode == TracingMode::Enabled)
    }
}

/// Trace headers of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct InboundHeaders {
    pub x_trace: Option<String>,
    pub trace_options: Option<String>,
}

impl InboundHeaders {
    /// Builds from a case-insensitive header lookup.
    pub fn from_lookup<'a, F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        InboundHeaders {
            x_trace: lookup(XTRACE_HEADER).map(str::to_string),
            trace_options: lookup(TRACE_OPTIONS_HEADER).map(str::to_string),
        }
    }
}

/// An in-flight traced request. Dropping it without [`RequestTrace::finish`]
/// leaves the trace without an exit event.
pub struct RequestTrace<'a> {
    reporter: &'a Reporter,
    layer: String,
    entry: XTrace,
    exit: XTrace,
    decision: Option<Decision>,
    exit_attributes: Vec<(String, Value)>,
}

impl<'a> RequestTrace<'a> {
    pub fn start(
        reporter: &'a Reporter,
        layer: impl Into<String>,
        headers: &InboundHeaders,
    ) -> Self {
        let layer = layer.into();
        let inbound = headers.x_trace.as_deref().and_then(|raw| match raw.parse::<XTrace>() {
            Ok(xtrace) => Some(xtrace),
            Err(e) => {
                debug!("Reporter | Ignoring invalid {XTRACE_HEADER} header: {e}");
                None
            }
        });
        let directive = headers.trace_options.as_deref().map(TraceOptions::parse);
        let decision = directive
            .as_ref()
            .map(|d| reporter.decide(d, inbound.map(|x| x.is_sampled())));

        let settings = reporter.settings();
        let tracing_enabled = reporter.options().tracing_mode() == TracingMode::Enabled;
        let entry = match inbound {
            Some(parent) => parent.next_op().with_sampled(tracing_enabled && parent.is_sampled()),
            None => {
                let sampled = match decision.as_ref().and_then(Decision::sampled) {
                    Some(forced) => forced,
                    None => {
                        tracing_enabled && reporter.sampler().sample(&layer, settings.as_deref())
                    }
                };
                XTrace::new_trace(sampled)
            }
        };

        if entry.is_sampled() {
            let mut event = Event::new(entry, layer.as_str(), Label::Entry);
            if let Some(parent) = &inbound {
                event.add_edge(parent);
            }
            if let Some(directive) = &directive {
                for (key, value) in &directive.custom_keys {
                    event.add_attribute(key.as_str(), value.as_str());
                }
                if !directive.pd_keys.is_empty() {
                    event.add_attribute(PD_KEYS_ATTRIBUTE, directive.pd_keys.join(","));
                }
            }
            if decision.as_ref().is_some_and(|d| d.outcome == Outcome::Ok) {
                event.add_attribute(TRIGGERED_TRACE_ATTRIBUTE, true);
            }
            reporter.report(event);
        }

        RequestTrace {
            reporter,
            layer,
            exit: entry.next_op(),
            entry,
            decision,
            exit_attributes: Vec::new(),
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.entry.is_sampled()
    }

    pub fn entry(&self) -> &XTrace {
        &self.entry
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.decision.as_ref().map(|d| d.outcome)
    }

    /// Attribute attached to the exit event.
    pub fn add_exit_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.exit_attributes.push((key.into(), value.into()));
    }

    /// Headers to set on the response: the exit `X-Trace` always, and the
    /// trigger-trace response when the request carried a directive that produced
    /// one.
    pub fn response_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(XTRACE_HEADER, self.exit.to_string())];
        if let Some(response) = self.decision.as_ref().and_then(|d| d.response.clone()) {
            headers.push((TRACE_OPTIONS_RESPONSE_HEADER, response));
        }
        headers
    }

    /// Reports the exit event, linked to the entry.
    pub fn finish(self) {
        if !self.entry.is_sampled() {
            return;
        }
        let mut event = Event::new(self.exit, self.layer, Label::Exit);
        for (key, value) in self.exit_attributes {
            event.add_attribute(key, value);
        }
        event.add_edge(&self.entry);
        self.reporter.report(event);
    }
}
