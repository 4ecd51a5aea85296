//! Circuit breakers per endpoint group.
//!
//! A breaker stops the executor from hammering a failing backend. Callers obtain a
//! [`BreakerPermit`] before each attempt and settle it with the attempt's outcome.
//! State lives behind a [`std::sync::Mutex`] that is only held for the transition
//! itself, never across the network call.

use crate::error::{Error, Result};
use crate::types::ResourceKind;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Default consecutive failures before a circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default wait before an open circuit admits a trial request, in seconds
pub const DEFAULT_RECOVERY_TIMEOUT: u64 = 30;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through
    Closed,
    /// Requests are rejected without a network call
    Open,
    /// A single trial request decides between `Closed` and `Open`
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Breaker tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive breaker-relevant failures that open the circuit
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a trial request
    pub recovery_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Create a breaker configuration; a zero threshold is treated as one.
    #[must_use]
    pub const fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: if failure_threshold == 0 {
                1
            } else {
                failure_threshold
            },
            recovery_timeout,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT),
        )
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive breaker-relevant failures
    pub failure_count: u32,
    /// When the circuit last opened (or re-opened)
    pub last_failure_at: Option<Instant>,
    /// Whether a half-open trial is in flight
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding one endpoint group.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Endpoint group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker tunables.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current stored state. An open circuit reports `Open` until a request
    /// arrives after the recovery timeout.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current state and counters.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            trial_in_flight: inner.trial_in_flight,
        }
    }

    /// Ask for permission to send one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] while the circuit is open, or while it is
    /// half-open with the single trial already in flight.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map_or(self.config.recovery_timeout, |at| at.elapsed());
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(group = %self.name, "circuit half-open, admitting trial request");
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(self.rejection())
                }
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(BreakerPermit::new(self, true))
            }
            CircuitState::HalfOpen => Err(self.rejection()),
        }
    }

    /// Force the breaker back to `Closed`.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;
        info!(group = %self.name, previous = %previous, "circuit reset");
    }

    fn rejection(&self) -> Error {
        Error::circuit_open(self.name.clone())
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                info!(group = %self.name, "circuit closed after successful trial");
            }
            // Late results from requests admitted before the circuit opened.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure_at = Some(Instant::now());
                    warn!(
                        group = %self.name,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Open;
                inner.last_failure_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!(group = %self.name, "trial request failed, circuit re-opened");
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.failure_count = inner.failure_count.saturating_add(1);
            }
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State updates are single assignments, so a poisoned lock still holds
        // a consistent value.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission to send one attempt through a breaker.
///
/// Dropping an unsettled trial permit (e.g. when the call's deadline elapses)
/// frees the trial slot without changing state.
#[derive(Debug)]
#[must_use = "settle the permit with record_success or record_failure"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit is the half-open trial.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// The backend answered in a way that says nothing against its health.
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    /// The attempt failed with a breaker-relevant classification.
    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

/// One breaker per resource kind, created up front.
#[derive(Debug)]
pub struct CircuitBreakers {
    breakers: HashMap<ResourceKind, CircuitBreaker>,
}

impl CircuitBreakers {
    /// Create closed breakers for every resource kind.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let breakers = ResourceKind::all()
            .iter()
            .map(|kind| (*kind, CircuitBreaker::new(kind.name(), config)))
            .collect();
        Self { breakers }
    }

    /// Breaker for an endpoint group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no breaker exists for `kind`.
    pub fn get(&self, kind: ResourceKind) -> Result<&CircuitBreaker> {
        self.breakers
            .get(&kind)
            .ok_or_else(|| Error::Configuration(format!("No circuit breaker for `{kind}`")))
    }

    /// Current state for an endpoint group.
    #[must_use]
    pub fn state(&self, kind: ResourceKind) -> Option<CircuitState> {
        self.breakers.get(&kind).map(CircuitBreaker::state)
    }

    /// Close the breaker for an endpoint group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no breaker exists for `kind`.
    pub fn reset(&self, kind: ResourceKind) -> Result<()> {
        self.get(kind)?.reset();
        Ok(())
    }
}
