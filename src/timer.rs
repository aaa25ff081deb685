use std::time::{Duration, Instant};

/// Elapsed-time measurement started by [`Stopwatch::start`].
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whole milliseconds since [`Stopwatch::start`].
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed().as_millis()
    }
}
