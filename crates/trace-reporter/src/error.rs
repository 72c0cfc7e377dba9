// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Failures reported by a collector transport for a single call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("collector responded with status {0}")]
    Status(u16),

    #[error("failed to decode collector response: {0}")]
    Decode(String),

    #[error("invalid redirect target: {0}")]
    InvalidRedirect(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

/// Errors surfaced by the reporter. None of them are fatal to the traced request.
#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("{method} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: &'static str,
        attempts: u32,
        last: String,
    },

    #[error("{method} exceeded the maximum of {max} redirects")]
    TooManyRedirects { method: &'static str, max: u32 },

    #[error("{method} rejected: invalid API key")]
    InvalidApiKey { method: &'static str },

    #[error("reporter is shutting down")]
    Shutdown,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rejected option values.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("initial retry delay {initial:?} exceeds maximum retry delay {max:?}")]
    RetryDelayOrder { initial: Duration, max: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ReporterError::RetriesExhausted {
            method: "post_events",
            attempts: 3,
            last: "collector responded with status 503".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "post_events failed after 3 attempts: collector responded with status 503"
        );

        let error = ConfigError::Zero("event_flush_interval");
        assert_eq!(
            error.to_string(),
            "event_flush_interval must be greater than zero"
        );
    }

    #[test]
    fn test_redirect_error_display() {
        let error = ReporterError::TooManyRedirects {
            method: "ping",
            max: 20,
        };
        assert_eq!(error.to_string(), "ping exceeded the maximum of 20 redirects");
    }
}
