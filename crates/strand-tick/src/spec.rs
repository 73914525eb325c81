//! Tick timing.

use std::time::{Duration, Instant};

use serde::Deserialize;

/// Unit of a tick's delay and period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    #[default]
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// `amount` of this unit as a duration, saturating on overflow.
    #[must_use]
    pub const fn duration(self, amount: u64) -> Duration {
        match self {
            Self::Nanoseconds => Duration::from_nanos(amount),
            Self::Microseconds => Duration::from_micros(amount),
            Self::Milliseconds => Duration::from_millis(amount),
            Self::Seconds => Duration::from_secs(amount),
            Self::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            Self::Hours => Duration::from_secs(amount.saturating_mul(60 * 60)),
            Self::Days => Duration::from_secs(amount.saturating_mul(24 * 60 * 60)),
        }
    }
}

/// How the next firing is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// One period after the previous *scheduled* time, however long the
    /// handler ran. A late loop catches up.
    #[default]
    FixedRate,
    /// One period after the previous firing *completed*.
    FixedDelay,
}

impl TickMode {
    /// When to fire next, given the previous scheduled time and the moment
    /// the handler returned.
    #[must_use]
    pub fn next_fire(self, scheduled: Instant, completed: Instant, period: Duration) -> Instant {
        let base = match self {
            Self::FixedRate => scheduled,
            Self::FixedDelay => completed,
        };
        base.checked_add(period).unwrap_or(base)
    }
}

/// Timing of a periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct TickSpec {
    /// Wait before the first firing, in `unit`s.
    #[serde(default)]
    pub delay: u64,
    /// Interval between firings, in `unit`s. Must be non-zero.
    pub period: u64,
    #[serde(default)]
    pub unit: TimeUnit,
    #[serde(default)]
    pub mode: TickMode,
}

impl TickSpec {
    /// Fixed-rate every `period` `unit`s, starting one period from now.
    #[must_use]
    pub const fn every(period: u64, unit: TimeUnit) -> Self {
        Self {
            delay: period,
            period,
            unit,
            mode: TickMode::FixedRate,
        }
    }

    /// Fixed-rate every `period` milliseconds.
    #[must_use]
    pub const fn every_millis(period: u64) -> Self {
        Self::every(period, TimeUnit::Milliseconds)
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: TickMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn fixed_delay(self) -> Self {
        self.with_mode(TickMode::FixedDelay)
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.unit.duration(self.delay)
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.unit.duration(self.period)
    }

    /// Assert the spec is usable.
    ///
    /// # Panics
    ///
    /// Panics if the period is zero.
    #[track_caller]
    pub fn validate(&self) {
        assert!(
            !self.interval().is_zero(),
            "tick period must be non-zero: {self:?}"
        );
    }
}
