// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process trace event reporter.
//!
//! Instrumented code reports [`event::Event`]s through a [`reporter::Reporter`],
//! which batches them per trace and ships them to a collector in the background.
//! The reporter also keeps the collector-issued [`settings::Settings`] fresh and
//! decides trigger-trace requests (`X-Trace-Options`) against them.
//!
//! - [`request`]: per-request entry/exit events and response headers
//! - [`trigger_trace`]: directive parsing and the admission decision
//! - [`batcher`]: send lanes, batching and flush scheduling
//! - [`retry`]: retries, backoff and redirect following for collector calls
//! - [`http`]: reqwest-based collector transport

#![deny(clippy::all)]

pub mod batcher;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod rate_limiter;
pub mod reporter;
pub mod request;
pub mod retry;
pub mod settings;
pub mod transport;
pub mod trigger_trace;
pub mod xtrace;

pub use config::ReporterOptions;
pub use error::{ConfigError, ReporterError, TransportError};
pub use event::{Event, Label, Value};
pub use http::HttpTransport;
pub use reporter::{CloseSummary, Reporter};
pub use request::{InboundHeaders, RequestTrace, Sampler, SettingsSampler};
pub use settings::{CollectorSettings, RateLimit, Settings, TracingMode};
pub use transport::{Batch, CollectorResponse, Transport};
pub use trigger_trace::{Decision, Outcome, TraceOptions};
pub use xtrace::XTrace;
