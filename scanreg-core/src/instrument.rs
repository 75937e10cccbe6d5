//! Timing and progress reporting for pipeline stages

use std::time::{Duration, Instant};

/// Stopwatch handed explicitly to pipeline stages
///
/// Stages receive it as `Option<&mut Instrumentation>`; it only logs and
/// never feeds back into any computation.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    start: Instant,
    last: Instant,
    laps: Vec<(String, Duration)>,
}

impl Instrumentation {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            laps: Vec::new(),
        }
    }

    /// Record the time spent since the previous checkpoint
    pub fn checkpoint(&mut self, label: &str) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        log::info!("{}: {:.3}s", label, elapsed.as_secs_f64());
        self.laps.push((label.to_string(), elapsed));
        elapsed
    }

    /// Report progress of a batch stage
    pub fn progress(&self, stage: &str, done: usize, total: usize) {
        log::debug!("{}: {}/{}", stage, done, total);
    }

    /// Log and return the time since creation
    pub fn finish(&self, label: &str) -> Duration {
        let total = self.start.elapsed();
        log::info!("{}: {:.3}s", label, total.as_secs_f64());
        total
    }

    /// Recorded `(label, duration)` laps, in order
    pub fn laps(&self) -> &[(String, Duration)] {
        &self.laps
    }
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::new()
    }
}

/// Checkpoint helper for optional instrumentation
pub fn checkpoint(instrumentation: &mut Option<&mut Instrumentation>, label: &str) {
    if let Some(instr) = instrumentation.as_deref_mut() {
        instr.checkpoint(label);
    }
}
