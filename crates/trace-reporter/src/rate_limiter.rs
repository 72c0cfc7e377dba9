// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::settings::RateLimit;

#[derive(Debug, Default)]
struct BucketState {
    tokens: f64,
    last_refill: Option<Instant>,
    limit: Option<RateLimit>,
}

/// Token bucket shared by every request context.
///
/// Capacity and refill rate come from the settings snapshot handed to each call, so a
/// new snapshot takes effect on the next admission. Refill is continuous: the tokens
/// earned since the previous call are added before a withdrawal is attempted. The
/// whole state is one unit behind a short critical section that never awaits.
#[derive(Debug, Default)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Withdraws one token if available. Never blocks beyond the state lock.
    pub fn admit(&self, limit: &RateLimit) -> bool {
        self.admit_at(limit, Instant::now())
    }

    pub fn admit_at(&self, limit: &RateLimit, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match state.limit {
            // a fresh bucket starts full
            None => state.tokens = limit.capacity,
            Some(current) if current != *limit => {
                state.tokens = state.tokens.min(limit.capacity);
            }
            Some(_) => {}
        }
        state.limit = Some(*limit);

        match state.last_refill {
            Some(last) if now > last => {
                let earned = now.duration_since(last).as_secs_f64() * limit.rate.max(0.0);
                state.tokens = (state.tokens + earned).min(limit.capacity);
                state.last_refill = Some(now);
            }
            Some(_) => {}
            None => state.last_refill = Some(now),
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
