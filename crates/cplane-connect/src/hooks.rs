//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Connector seams and simulated connectors."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;
use tracing::debug;

/// Error raised by [`InjectionHooks::before_call`] when the partial-failure
/// interceptor decides the call must fail.
#[derive(Debug, thiserror::Error)]
#[error("induced failure: {0}")]
pub struct InducedFailure(pub String);

/// In-process fault hooks consulted by a connector before every outbound
/// call.
///
/// The chaos injector arms these when the corresponding fault is active:
/// an optional per-call delay (latency fallback when the network proxy is
/// unavailable) and a percent-based induced failure (partial-failure fault,
/// always available).
#[derive(Debug)]
pub struct InjectionHooks {
    latency_active: AtomicBool,
    latency_ms: AtomicU64,
    failure_active: AtomicBool,
    failure_rate_percent: AtomicU32,
    rng: Mutex<StdRng>,
}

impl InjectionHooks {
    /// Build hooks with a time-derived seed.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Build hooks with a fixed seed for deterministic tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            latency_active: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            failure_active: AtomicBool::new(false),
            failure_rate_percent: AtomicU32::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Arm the in-process latency delay.
    pub fn arm_latency(&self, delay_ms: u64) {
        self.latency_ms.store(delay_ms, Ordering::SeqCst);
        self.latency_active.store(true, Ordering::SeqCst);
    }

    /// Disarm the in-process latency delay.
    pub fn disarm_latency(&self) {
        self.latency_active.store(false, Ordering::SeqCst);
        self.latency_ms.store(0, Ordering::SeqCst);
    }

    /// Arm percent-based induced failures.
    pub fn arm_partial_failure(&self, rate_percent: u32) {
        self.failure_rate_percent
            .store(rate_percent.min(100), Ordering::SeqCst);
        self.failure_active.store(true, Ordering::SeqCst);
    }

    /// Disarm percent-based induced failures.
    pub fn disarm_partial_failure(&self) {
        self.failure_active.store(false, Ordering::SeqCst);
        self.failure_rate_percent.store(0, Ordering::SeqCst);
    }

    /// Whether the latency delay is armed.
    pub fn latency_armed(&self) -> bool {
        self.latency_active.load(Ordering::SeqCst)
    }

    /// Whether induced failures are armed.
    pub fn partial_failure_armed(&self) -> bool {
        self.failure_active.load(Ordering::SeqCst)
    }

    /// Currently armed failure rate in percent.
    pub fn failure_rate_percent(&self) -> u32 {
        self.failure_rate_percent.load(Ordering::SeqCst)
    }

    /// Apply the armed faults to one outbound call: sleep through any armed
    /// latency, then roll against the armed failure rate.
    pub async fn before_call(&self) -> Result<(), InducedFailure> {
        if self.latency_active.load(Ordering::SeqCst) {
            let delay = self.latency_ms.load(Ordering::SeqCst);
            if delay > 0 {
                debug!(delay_ms = delay, "applying in-process latency");
                sleep(Duration::from_millis(delay)).await;
            }
        }
        if self.failure_active.load(Ordering::SeqCst) {
            let rate = self.failure_rate_percent.load(Ordering::SeqCst);
            let roll = self.rng.lock().gen_range(0..100);
            if roll < rate {
                return Err(InducedFailure(format!(
                    "partial failure injection ({rate}% rate)"
                )));
            }
        }
        Ok(())
    }
}

impl Default for InjectionHooks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disarmed_hooks_pass_every_call() {
        let hooks = InjectionHooks::with_seed(7);
        for _ in 0..50 {
            hooks.before_call().await.unwrap();
        }
    }

    #[tokio::test]
    async fn full_rate_fails_every_call() {
        let hooks = InjectionHooks::with_seed(7);
        hooks.arm_partial_failure(100);
        assert!(hooks.before_call().await.is_err());
        hooks.disarm_partial_failure();
        assert!(hooks.before_call().await.is_ok());
    }

    #[tokio::test]
    async fn partial_rate_fails_roughly_that_share() {
        let hooks = InjectionHooks::with_seed(42);
        hooks.arm_partial_failure(50);
        let mut failures = 0;
        for _ in 0..200 {
            if hooks.before_call().await.is_err() {
                failures += 1;
            }
        }
        assert!((50..=150).contains(&failures), "failures = {failures}");
    }

    #[tokio::test(start_paused = true)]
    async fn armed_latency_delays_the_call() {
        let hooks = InjectionHooks::with_seed(1);
        hooks.arm_latency(250);
        let started = tokio::time::Instant::now();
        hooks.before_call().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
