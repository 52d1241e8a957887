//! Retry policies for ad hoc calls and the poll loop.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::{InvocationError, TransportErrorKind};

/// Controls how the caller reacts when a call fails.
pub trait RetryPolicy: Send + Sync + 'static {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration>;
}

/// Context passed to [`RetryPolicy::should_retry`] on each failure.
pub struct RetryContext {
    pub fail_count:   NonZeroU32,
    pub slept_so_far: Duration,
    pub error:        InvocationError,
}

/// Never retry.
pub struct NoRetries;
impl RetryPolicy for NoRetries {
    fn should_retry(&self, _: &RetryContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Capped exponential backoff on transient failures.
///
/// The n-th consecutive failure waits `initial * factor^(n-1)`, never more
/// than `max`. Service exceptions and a closed transport are not transient
/// and are never retried.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    pub initial:      Duration,
    pub factor:       u32,
    pub max:          Duration,
    /// Give up after this many consecutive failures; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial:      Duration::from_secs(1),
            factor:       2,
            max:          Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Delay before retrying after the `fail_count`-th consecutive failure.
    pub fn delay(&self, fail_count: NonZeroU32) -> Duration {
        let exp = fail_count.get() - 1;
        let mult = self.factor.checked_pow(exp).unwrap_or(u32::MAX);
        self.initial.checked_mul(mult).map_or(self.max, |d| d.min(self.max))
    }
}

impl RetryPolicy for Backoff {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration> {
        let permanent = match &ctx.error {
            InvocationError::Service(_) | InvocationError::Dropped => true,
            InvocationError::Transport(t) => t.kind == TransportErrorKind::Closed,
            _ => false,
        };
        if permanent {
            return ControlFlow::Break(());
        }
        if self.max_attempts.is_some_and(|max| ctx.fail_count.get() > max) {
            return ControlFlow::Break(());
        }
        let d = self.delay(ctx.fail_count);
        log::info!("[legy] {}; retrying in {:?}", ctx.error, d);
        ControlFlow::Continue(d)
    }
}
