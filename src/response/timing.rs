//! Response timeline and time units.

use std::time::Instant;

/// Divisor applied to elapsed nanoseconds when reporting latency or duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
}

impl TimeUnit {
    /// Nanoseconds per unit.
    pub const fn nanos(self) -> f64 {
        match self {
            TimeUnit::Nanosecond => 1.0,
            TimeUnit::Microsecond => 1e3,
            TimeUnit::Millisecond => 1e6,
            TimeUnit::Second => 1e9,
        }
    }
}

/// The three instants of a response's life.
///
/// `start` is stamped when dispatch begins, `first_byte` when the status is
/// written and `end` after every body write. Once all three are set,
/// `start <= first_byte <= end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
    pub start: Option<Instant>,
    pub first_byte: Option<Instant>,
    pub end: Option<Instant>,
}

impl Timeline {
    pub fn started_at(start: Instant) -> Self {
        Self {
            start: Some(start),
            ..Self::default()
        }
    }

    /// Time from `start` to `first_byte` in `unit`; zero while either is unset.
    pub fn latency(&self, unit: TimeUnit) -> f64 {
        elapsed(self.start, self.first_byte, unit)
    }

    /// Time from `first_byte` to `end` in `unit`; zero while either is unset.
    pub fn duration(&self, unit: TimeUnit) -> f64 {
        elapsed(self.first_byte, self.end, unit)
    }
}

fn elapsed(from: Option<Instant>, to: Option<Instant>, unit: TimeUnit) -> f64 {
    match (from, to) {
        (Some(from), Some(to)) => to.saturating_duration_since(from).as_nanos() as f64 / unit.nanos(),
        _ => 0.0,
    }
}
