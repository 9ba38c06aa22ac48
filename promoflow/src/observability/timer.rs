//! Span timing helper.

use std::time::Instant;

/// Measures the wall-clock duration of a stage, action, or approval wait.
#[derive(Debug)]
pub struct SpanTimer {
    name: String,
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the timer, logs the duration at debug level, and returns it.
    pub fn finish(self) -> f64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!(span = %self.name, duration_ms = elapsed, "Span finished");
        elapsed
    }
}
