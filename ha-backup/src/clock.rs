//! Time source for polling waits and status timestamps.

use chrono::{DateTime, Local};
use std::time::Duration;

pub trait Clock {
    fn now(&self) -> DateTime<Local>;

    /// Block the current thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
