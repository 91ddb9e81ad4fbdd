//! Deterministic environment for simulation.
//!
//! Time is tokio's clock, so a runtime started with `start_paused = true`
//! gives every test a virtual clock that only moves when the runtime is idle
//! or the test calls `tokio::time::advance`. Randomness is a ChaCha stream
//! seeded per test, so temp ids and backoff jitter replay exactly.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use kinship_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;

/// Wall-clock origin for simulated message timestamps (2023-11-14).
pub const DEFAULT_EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Simulation environment: virtual clock and seeded randomness.
///
/// Clones share one RNG stream, so two components built from the same
/// `SimEnv` draw distinct values in a reproducible order.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    origin: Instant,
    epoch_millis: u64,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            origin: Instant::now(),
            epoch_millis: DEFAULT_EPOCH_MILLIS,
        }
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        Instant::now().duration_since(self.origin)
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.epoch_millis.saturating_add(elapsed)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
