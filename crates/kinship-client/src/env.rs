//! Production environment.

use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use kinship_core::Environment;
use rand::RngCore;
use tokio::time::Instant;

/// Environment backed by the tokio clock and the thread-local RNG.
///
/// Uses `tokio::time::Instant` so paused-clock tests drive reconnect and
/// typing timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
