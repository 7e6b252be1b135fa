use std::fmt::Display;
use std::time::Duration;

/// Accumulated wall time spent in each phase of running a set of jobs
#[derive(Debug, Default)]
pub struct Timer {
    pub writing_input: Duration,
    pub submitting: Duration,
    pub waiting: Duration,
    pub reading: Duration,
}

impl Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1} s writing input, {:.1} s submitting, {:.1} s waiting, \
             {:.1} s reading",
            self.writing_input.as_millis() as f64 / 1000.0,
            self.submitting.as_millis() as f64 / 1000.0,
            self.waiting.as_millis() as f64 / 1000.0,
            self.reading.as_millis() as f64 / 1000.0,
        )
    }
}
