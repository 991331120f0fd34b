//! Single-slot rate gate.
//!
//! Admits one caller at a time and keeps a minimum delay between the end of
//! one outbound call and the start of the next. Waiters are admitted in FIFO
//! order (tokio's mutex is fair).

use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    /// When the previous admitted call finished.
    last_finished: Mutex<Option<Instant>>,
}

/// Held for the duration of one outbound call; records its end on drop.
pub struct RateGateGuard<'a> {
    slot: MutexGuard<'a, Option<Instant>>,
}

impl Drop for RateGateGuard<'_> {
    fn drop(&mut self) {
        *self.slot = Some(Instant::now());
    }
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_finished: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the slot and for the interval since the previous call to elapse.
    pub async fn acquire(&self) -> RateGateGuard<'_> {
        let slot = self.last_finished.lock().await;
        if let Some(last) = *slot {
            let ready = last + self.min_interval;
            if ready > Instant::now() {
                tokio::time::sleep_until(ready).await;
            }
        }
        RateGateGuard { slot }
    }
}
