//! Rate budgets for strategies that call out to remote services.
//!
//! A budget of capacity `C` over window `W` grants at most `C` permits in
//! any trailing window of length `W`, however many tasks race for them. A
//! full window after the last grant the whole capacity is available again.
//!
//! The hard bound is a log of grant instants. A governor direct limiter
//! with burst `C` that replenishes one permit every `W / C` paces grants
//! inside it.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use wren_core::{BudgetPolicy, ConfigError};

/// Type alias for the rate limiter we use.
type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// No permit is available right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExhausted {
    /// Earliest time a permit may become available.
    pub retry_after: Duration,
}

/// Shared per-strategy call budget.
pub struct RateBudget {
    name: String,
    capacity: NonZeroU32,
    window: Duration,
    limiter: DirectRateLimiter,
    /// Grant instants inside the trailing window, oldest first.
    grants: Mutex<VecDeque<Instant>>,
    /// Set when the remote side reported a rate limit.
    closed_until: Mutex<Option<Instant>>,
}

impl RateBudget {
    /// At most `capacity` permits in any window of length `window`.
    pub fn new(name: impl Into<String>, capacity: u32, window: Duration) -> Result<Self, ConfigError> {
        let name = name.into();
        let capacity = NonZeroU32::new(capacity).ok_or_else(|| ConfigError::InvalidValue {
            field: format!("{}.capacity", name),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        })?;
        if window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.window", name),
                value: format!("{:?}", window),
                reason: "must be positive".to_string(),
            });
        }
        let refill = (window / capacity.get()).max(Duration::from_nanos(1));
        let quota = Quota::with_period(refill)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: format!("{}.window", name),
                value: format!("{:?}", window),
                reason: "must be positive".to_string(),
            })?
            .allow_burst(capacity);

        Ok(Self {
            name,
            capacity,
            window,
            limiter: RateLimiter::direct(quota),
            grants: Mutex::new(VecDeque::with_capacity(capacity.get() as usize)),
            closed_until: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn penalty_remaining(&self) -> Option<Duration> {
        let guard = self.closed_until.lock().unwrap_or_else(|e| e.into_inner());
        let until = (*guard)?;
        until.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
    }

    /// Take a permit without waiting.
    pub fn try_acquire(&self) -> Result<(), BudgetExhausted> {
        if let Some(retry_after) = self.penalty_remaining() {
            return Err(BudgetExhausted { retry_after });
        }

        let now = Instant::now();
        let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
        while grants
            .front()
            .is_some_and(|granted| now.saturating_duration_since(*granted) >= self.window)
        {
            grants.pop_front();
        }
        if grants.len() >= self.capacity.get() as usize {
            let oldest = grants.front().copied().unwrap_or(now);
            return Err(BudgetExhausted {
                retry_after: (oldest + self.window).saturating_duration_since(now),
            });
        }

        self.limiter.check().map_err(|not_until| BudgetExhausted {
            retry_after: not_until.wait_time_from(DefaultClock::default().now()),
        })?;
        grants.push_back(now);
        Ok(())
    }

    /// Take a permit, waiting at most `max_wait` for one.
    ///
    /// Fails immediately when the next permit is further away than the
    /// remaining wait.
    pub async fn acquire_within(&self, max_wait: Duration) -> Result<(), BudgetExhausted> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(exhausted) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if exhausted.retry_after > remaining {
                        return Err(exhausted);
                    }
                    // Another waiter may take the permit first; retry until the deadline.
                    tokio::time::sleep(exhausted.retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Acquire according to the pipeline's budget policy.
    pub async fn acquire(&self, policy: BudgetPolicy) -> Result<(), BudgetExhausted> {
        match policy {
            BudgetPolicy::Skip => self.try_acquire(),
            BudgetPolicy::Wait { max_wait_secs } => {
                self.acquire_within(Duration::from_secs(max_wait_secs)).await
            }
        }
    }

    /// Close the budget until `retry_after` has elapsed, after the remote
    /// side reported a rate limit. An existing later deadline is kept.
    pub fn penalize(&self, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        let mut guard = self.closed_until.lock().unwrap_or_else(|e| e.into_inner());
        if guard.map_or(true, |current| current < until) {
            *guard = Some(until);
        }
        tracing::warn!(
            budget = %self.name,
            retry_after_secs = retry_after.as_secs(),
            "Remote rate limit reported; budget closed"
        );
    }
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
