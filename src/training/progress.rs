//! Progress line sink of the agent

use std::fmt;

use tracing::info;

/// Caller-supplied line consumer
pub type LineSink = Box<dyn Fn(&str) + Send + Sync>;

enum Sink {
    Silent,
    Tracing,
    Custom(LineSink),
}

/// Destination of the agent's human-readable progress lines
///
/// Lines become `info` events with target `clagent::progress` unless a custom
/// sink is installed. A non-positive print frequency silences every line.
pub struct ProgressLog {
    sink: Sink,
}

impl ProgressLog {
    /// Sink that emits tracing events, or nothing when `print_freq <= 0`
    pub fn new(print_freq: i64) -> Self {
        let sink = if print_freq > 0 { Sink::Tracing } else { Sink::Silent };
        Self { sink }
    }

    /// Sink that forwards lines to `f`, or nothing when `print_freq <= 0`
    pub fn with_sink(print_freq: i64, f: LineSink) -> Self {
        let sink = if print_freq > 0 { Sink::Custom(f) } else { Sink::Silent };
        Self { sink }
    }

    /// Whether lines go anywhere
    pub fn is_enabled(&self) -> bool {
        !matches!(self.sink, Sink::Silent)
    }

    /// Emit one line
    pub fn log(&self, line: impl AsRef<str>) {
        match &self.sink {
            Sink::Silent => {}
            Sink::Tracing => info!(target: "clagent::progress", "{}", line.as_ref()),
            Sink::Custom(f) => f(line.as_ref()),
        }
    }
}

impl fmt::Debug for ProgressLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sink {
            Sink::Silent => "silent",
            Sink::Tracing => "tracing",
            Sink::Custom(_) => "custom",
        };
        f.debug_struct("ProgressLog").field("sink", &kind).finish()
    }
}
