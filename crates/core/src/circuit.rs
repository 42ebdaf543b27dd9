//! Per-provider circuit breaker.
//!
//! Each worker process tracks vendor health independently; circuit state is
//! never persisted, so a restart clears all circuits. Cross-process circuit
//! coordination was considered and rejected in favor of the simpler
//! per-process isolation (see DESIGN.md).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Consecutive failures that open a circuit.
pub const FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit refuses dispatch after the last failure.
pub const RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Gate state for a single provider key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; failures are counted.
    Closed,
    /// Dispatch refused until the reset timeout elapses.
    Open,
    /// One probe job allowed through; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }
}

/// Process-local registry of circuit breakers, one per provider key.
///
/// Circuits are created lazily on first reference. All methods take `&self`;
/// the registry is shared behind an `Arc` across concurrently processed jobs.
pub struct CircuitRegistry {
    circuits: Mutex<HashMap<String, Circuit>>,
    threshold: u32,
    reset_timeout: Duration,
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitRegistry {
    /// Registry with the production threshold and reset timeout.
    pub fn new() -> Self {
        Self::with_settings(FAILURE_THRESHOLD, RESET_TIMEOUT)
    }

    /// Registry with custom settings (tests use small values).
    pub fn with_settings(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            threshold,
            reset_timeout,
        }
    }

    /// Whether a job for `key` may be dispatched right now.
    ///
    /// The first check of an open circuit after the reset timeout moves it to
    /// half-open and admits exactly one probe; further checks are refused
    /// until the probe reports back.
    pub fn allows(&self, key: &str) -> bool {
        self.allows_at(key, Instant::now())
    }

    /// Record a vendor failure for `key`.
    ///
    /// In half-open this reopens the circuit and resets the failure timer.
    /// Refused dispatch must not call this — refusal is not vendor feedback.
    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now());
    }

    /// Record a vendor success for `key`: the circuit closes and the failure
    /// counter zeroes, from any state. There is no gradual decay.
    pub fn record_success(&self, key: &str) {
        let mut circuits = self.lock();
        circuits.insert(key.to_string(), Circuit::default());
    }

    /// Current state for `key` (closed if never referenced).
    pub fn state(&self, key: &str) -> CircuitState {
        self.lock()
            .get(key)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Current failure count for `key`.
    pub fn failure_count(&self, key: &str) -> u32 {
        self.lock().get(key).map(|c| c.failure_count).unwrap_or(0)
    }

    fn allows_at(&self, key: &str, now: Instant) -> bool {
        let mut circuits = self.lock();
        let circuit = circuits.entry(key.to_string()).or_default();
        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let elapsed = circuit
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.reset_timeout {
                    circuit.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_failure_at(&self, key: &str, now: Instant) {
        let mut circuits = self.lock();
        let circuit = circuits.entry(key.to_string()).or_default();
        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                if circuit.failure_count >= self.threshold {
                    circuit.state = CircuitState::Open;
                    circuit.last_failure = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                // The probe failed: reopen and restart the reset timer.
                circuit.state = CircuitState::Open;
                circuit.last_failure = Some(now);
            }
            CircuitState::Open => {
                circuit.last_failure = Some(now);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|e| e.into_inner())
    }
}
