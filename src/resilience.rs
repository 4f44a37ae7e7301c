// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: retry back-off and error log sampling.
//!
//! - [`RetryDelays`]: how long a peer worker waits before the next exchange
//!   after a retryable [`ProcessingResult`]
//! - [`ErrorLogSampler`]: token bucket that lets one network error line
//!   through per interval, so a dead peer does not flood the log
//!
//! # Example
//!
//! ```rust
//! use peer_replication::resilience::{ErrorLogSampler, RetryDelays};
//! use peer_replication::processor::ProcessingResult;
//! use std::time::Duration;
//!
//! let delays = RetryDelays::default();
//! assert_eq!(delays.delay_for(ProcessingResult::Congestion), Some(Duration::from_secs(1)));
//!
//! let sampler = ErrorLogSampler::new(Duration::from_secs(10));
//! assert!(sampler.should_log());  // first error is always logged
//! assert!(!sampler.should_log()); // the rest of the window is suppressed
//! ```

use crate::processor::ProcessingResult;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::time::Duration;

/// Back-off applied by a peer worker between exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelays {
    /// Wait after a network-level failure that is still retryable.
    pub transient: Duration,

    /// Wait after the peer reported it is busy (503 / read timeout).
    pub congestion: Duration,
}

impl Default for RetryDelays {
    fn default() -> Self {
        Self {
            transient: Duration::from_millis(100),
            congestion: Duration::from_millis(1000),
        }
    }
}

impl RetryDelays {
    /// Fast retries for tests.
    pub fn testing() -> Self {
        Self {
            transient: Duration::from_millis(5),
            congestion: Duration::from_millis(10),
        }
    }

    /// Delay before retrying after `result`, or `None` if the result is
    /// terminal and nothing should be retried.
    pub fn delay_for(&self, result: ProcessingResult) -> Option<Duration> {
        match result {
            ProcessingResult::TransientError => Some(self.transient),
            ProcessingResult::Congestion => Some(self.congestion),
            ProcessingResult::Success | ProcessingResult::PermanentError => None,
        }
    }
}

// =============================================================================
// Error Log Sampling
// =============================================================================

/// Lets at most one error log line through per interval.
///
/// A zero interval disables sampling (everything is logged).
pub struct ErrorLogSampler {
    limiter: Option<GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
    interval: Duration,
}

impl ErrorLogSampler {
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(GovLimiter::direct);
        Self { limiter, interval }
    }

    /// Returns `true` if the caller should emit its error line now.
    pub fn should_log(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Debug for ErrorLogSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLogSampler")
            .field("interval", &self.interval)
            .finish()
    }
}
