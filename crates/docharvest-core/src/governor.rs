//! Per-source adaptive rate governor.
//!
//! Every request to a source goes through [`RateGovernor::before_request`], and every
//! response is reported back through [`RateGovernor::on_response`]. The governor keeps a
//! delay floor per source that grows multiplicatively on throttling signals and decays
//! on success. A streak of throttling signals opens the source's circuit for a cooldown
//! window, after which a single probe request is allowed (half-open).
//!
//! State is per process. Running more workers multiplies the aggregate request rate,
//! so ceilings and quotas must be set conservatively.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ::governor::clock::{Clock, DefaultClock};
use ::governor::state::direct::NotKeyed;
use ::governor::state::InMemoryState;
use ::governor::{Quota, RateLimiter};

use crate::{ConfigError, FetchOutcome, SourceId};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Hard request quota: at most `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub window: Duration,
    pub limit: u32,
}

/// Backoff and cooldown parameters for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernorPolicy {
    /// Lowest spacing between consecutive requests.
    pub min_delay: Duration,
    /// Ceiling for the delay floor.
    pub max_delay: Duration,
    /// Floor multiplier applied on `RateLimited` or `Blocked`.
    pub backoff_multiplier: f64,
    /// Floor multiplier applied on recovery, in `(0, 1]`.
    pub decay_factor: f64,
    /// Consecutive successes required per decay step.
    pub recovery_streak: u32,
    /// Failure streak at which the source is paused.
    pub cooldown_threshold: u32,
    /// Length of the pause.
    pub cooldown: Duration,
    /// Fixed wait before retrying after a network error.
    pub network_retry_delay: Duration,
    /// Upper bound of the random jitter added to each wait.
    pub jitter: Duration,
    pub quota: Option<QuotaPolicy>,
}

impl Default for GovernorPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            decay_factor: 0.85,
            recovery_streak: 1,
            cooldown_threshold: 5,
            cooldown: Duration::from_secs(120),
            network_retry_delay: Duration::from_secs(2),
            jitter: Duration::from_millis(500),
            quota: None,
        }
    }
}

impl GovernorPolicy {
    /// Reject bounds that would make the floor arithmetic meaningless.
    pub fn validate(&self, source_id: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidGovernorPolicy {
            source_id: source_id.to_owned(),
            reason: reason.to_owned(),
        };

        if self.min_delay > self.max_delay {
            return Err(invalid("min_delay must not exceed max_delay"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(invalid("backoff_multiplier must be greater than 1"));
        }
        if !self.decay_factor.is_finite() || self.decay_factor <= 0.0 || self.decay_factor > 1.0 {
            return Err(invalid("decay_factor must be in (0, 1]"));
        }
        if self.recovery_streak == 0 {
            return Err(invalid("recovery_streak must be at least 1"));
        }
        if self.cooldown_threshold == 0 {
            return Err(invalid("cooldown_threshold must be at least 1"));
        }
        if let Some(quota) = self.quota {
            if quota.limit == 0 || quota.window.is_zero() {
                return Err(invalid("quota needs a non-zero limit and window"));
            }
        }
        Ok(())
    }

    /// Longest single wait this policy can impose before a request.
    pub fn longest_wait(&self) -> Duration {
        let quota_cell = self.quota.map_or(Duration::ZERO, |quota| {
            quota.window / quota.limit.max(1)
        });
        self.cooldown
            .max(self.max_delay + self.jitter)
            .max(self.network_retry_delay + self.jitter)
            .max(quota_cell)
    }

    fn grow(&self, floor: Duration) -> Duration {
        let base = floor.max(self.min_delay).as_secs_f64();
        let grown = (base * self.backoff_multiplier).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(grown).clamp(self.min_delay, self.max_delay)
    }

    fn decay(&self, floor: Duration) -> Duration {
        let decayed = floor.as_secs_f64() * self.decay_factor;
        Duration::from_secs_f64(decayed).clamp(self.min_delay, self.max_delay)
    }
}

/// Circuit state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow, spaced by the delay floor.
    Closed,
    /// Source paused until the cooldown ends.
    Open,
    /// Cooldown over; the next failure reopens immediately.
    HalfOpen,
}

/// Governor decision after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The request went through.
    Proceed,
    /// Transient failure; the next request waits at least `after`.
    Retry { after: Duration },
    /// Sustained throttling; the source is paused for `pause`.
    Cooldown { pause: Duration },
}

struct SourceState {
    delay_floor: Duration,
    failure_streak: u32,
    success_streak: u32,
    circuit: CircuitState,
    cooldown_until: Option<Instant>,
    retry_after: Option<Instant>,
    next_slot: Option<Instant>,
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl SourceState {
    fn new(policy: &GovernorPolicy) -> Self {
        Self {
            delay_floor: policy.min_delay,
            failure_streak: 0,
            success_streak: 0,
            circuit: CircuitState::Closed,
            cooldown_until: None,
            retry_after: None,
            next_slot: None,
            limiter: policy
                .quota
                .map(|quota| Arc::new(RateLimiter::direct(quota_from_policy(quota)))),
        }
    }
}

/// Snapshot of one source's governor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub delay_floor: Duration,
    pub failure_streak: u32,
    pub circuit: CircuitState,
}

/// Thread-safe per-source rate governor.
pub struct RateGovernor {
    default_policy: GovernorPolicy,
    overrides: HashMap<SourceId, GovernorPolicy>,
    states: Mutex<HashMap<SourceId, SourceState>>,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(GovernorPolicy::default())
    }
}

impl RateGovernor {
    pub fn new(default_policy: GovernorPolicy) -> Self {
        Self {
            default_policy,
            overrides: HashMap::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_source_policy(mut self, source: SourceId, policy: GovernorPolicy) -> Self {
        self.overrides.insert(source, policy);
        self
    }

    /// Validate the default policy and every override.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_policy.validate("default")?;
        for (source, policy) in &self.overrides {
            policy.validate(source.as_str())?;
        }
        Ok(())
    }

    /// Longest wait any configured policy can impose.
    pub fn longest_wait(&self) -> Duration {
        self.overrides
            .values()
            .map(GovernorPolicy::longest_wait)
            .fold(self.default_policy.longest_wait(), Duration::max)
    }

    pub fn policy(&self, source: &SourceId) -> &GovernorPolicy {
        self.overrides.get(source).unwrap_or(&self.default_policy)
    }

    /// How long to wait before the next request to `source`.
    ///
    /// Reserves the request slot, so consecutive calls space requests by the delay floor
    /// even when the caller has not slept yet. After sleeping, the caller must still get
    /// the request through [`RateGovernor::admit`] before sending it.
    ///
    /// # Panics
    /// Panics if the governor state mutex is poisoned.
    pub fn before_request(&self, source: &SourceId) -> Duration {
        let policy = self.policy(source);
        let now = Instant::now();
        let mut states = self.states.lock().expect("governor state lock is not poisoned");
        let state = states
            .entry(source.clone())
            .or_insert_with(|| SourceState::new(policy));

        let mut wait = Duration::ZERO;

        if state.circuit == CircuitState::Open {
            match state.cooldown_until {
                Some(until) if until > now => wait = wait.max(until - now),
                _ => {
                    state.circuit = CircuitState::HalfOpen;
                    state.cooldown_until = None;
                    tracing::info!(source = %source, "cooldown over, probing source");
                }
            }
        }

        if let Some(slot) = state.next_slot {
            wait = wait.max(slot.saturating_duration_since(now));
        }
        if let Some(retry_after) = state.retry_after.take() {
            wait = wait.max(retry_after.saturating_duration_since(now));
        }

        if !policy.jitter.is_zero() {
            let jitter_ms = u64::try_from(policy.jitter.as_millis()).unwrap_or(u64::MAX);
            wait += Duration::from_millis(fastrand::u64(0..=jitter_ms));
        }

        let fires_at = now + wait;
        state.next_slot = Some(fires_at + state.delay_floor);
        wait
    }

    /// Take one request from the source's hard quota, right before sending.
    ///
    /// `Err` carries how long to wait before asking again. A denied call books nothing,
    /// so the request must not be sent until a later call returns `Ok`.
    ///
    /// # Panics
    /// Panics if the governor state mutex is poisoned.
    pub fn admit(&self, source: &SourceId) -> Result<(), Duration> {
        let policy = self.policy(source);
        let mut states = self.states.lock().expect("governor state lock is not poisoned");
        let state = states
            .entry(source.clone())
            .or_insert_with(|| SourceState::new(policy));

        if let Some(limiter) = state.limiter.as_ref() {
            if let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                return Err(wait.max(Duration::from_millis(1)));
            }
        }

        // A quota wait may have pushed the send past the slot booked by `before_request`.
        let earliest = Instant::now() + state.delay_floor;
        push_next_slot(state, earliest);
        Ok(())
    }

    /// Record the outcome of a request to `source`.
    ///
    /// # Panics
    /// Panics if the governor state mutex is poisoned.
    pub fn on_response(&self, source: &SourceId, outcome: FetchOutcome) -> Verdict {
        let policy = self.policy(source);
        let now = Instant::now();
        let mut states = self.states.lock().expect("governor state lock is not poisoned");
        let state = states
            .entry(source.clone())
            .or_insert_with(|| SourceState::new(policy));

        match outcome {
            FetchOutcome::Success => {
                if state.circuit != CircuitState::Closed || state.failure_streak > 0 {
                    tracing::debug!(source = %source, "source recovered");
                }
                state.failure_streak = 0;
                state.circuit = CircuitState::Closed;
                state.success_streak = state.success_streak.saturating_add(1);
                if state.success_streak >= policy.recovery_streak {
                    state.delay_floor = policy.decay(state.delay_floor);
                    state.success_streak = 0;
                }
                Verdict::Proceed
            }
            FetchOutcome::NotFound => {
                // The source answered normally; nothing to back off from.
                state.failure_streak = 0;
                state.circuit = CircuitState::Closed;
                Verdict::Proceed
            }
            FetchOutcome::RateLimited | FetchOutcome::Blocked => {
                state.success_streak = 0;
                state.failure_streak = state.failure_streak.saturating_add(1);
                state.delay_floor = policy.grow(state.delay_floor);
                let earliest = now + state.delay_floor;
                push_next_slot(state, earliest);

                if state.circuit == CircuitState::HalfOpen
                    || state.failure_streak >= policy.cooldown_threshold
                {
                    state.circuit = CircuitState::Open;
                    state.cooldown_until = Some(now + policy.cooldown);
                    tracing::warn!(
                        source = %source,
                        outcome = %outcome,
                        failure_streak = state.failure_streak,
                        cooldown_ms = duration_ms(policy.cooldown),
                        "source paused"
                    );
                    return Verdict::Cooldown {
                        pause: policy.cooldown,
                    };
                }

                tracing::debug!(
                    source = %source,
                    outcome = %outcome,
                    failure_streak = state.failure_streak,
                    delay_floor_ms = duration_ms(state.delay_floor),
                    "backing off"
                );
                Verdict::Retry {
                    after: state.delay_floor,
                }
            }
            FetchOutcome::NetworkError => {
                state.retry_after = Some(now + policy.network_retry_delay);
                Verdict::Retry {
                    after: policy.network_retry_delay,
                }
            }
        }
    }

    /// Current delay floor for `source`; the policy minimum for unseen sources.
    pub fn delay_floor(&self, source: &SourceId) -> Duration {
        self.snapshot(source).delay_floor
    }

    /// # Panics
    /// Panics if the governor state mutex is poisoned.
    pub fn snapshot(&self, source: &SourceId) -> SourceSnapshot {
        let states = self.states.lock().expect("governor state lock is not poisoned");
        match states.get(source) {
            Some(state) => SourceSnapshot {
                delay_floor: state.delay_floor,
                failure_streak: state.failure_streak,
                circuit: state.circuit,
            },
            None => SourceSnapshot {
                delay_floor: self.policy(source).min_delay,
                failure_streak: 0,
                circuit: CircuitState::Closed,
            },
        }
    }
}

fn push_next_slot(state: &mut SourceState, earliest: Instant) {
    state.next_slot = Some(state.next_slot.map_or(earliest, |slot| slot.max(earliest)));
}

fn quota_from_policy(quota: QuotaPolicy) -> Quota {
    let burst = NonZeroU32::new(quota.limit).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (quota.window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
