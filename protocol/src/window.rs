//! Wall-clock partitioning into fixed-length windows
//!
//! Sequence rotation and session expiry both work on window indices rather
//! than exact timestamps, so two clocks that agree on the current window
//! agree on everything else.

use crate::error::ProtocolError;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    secs: u64,
}

impl TimeWindow {
    pub fn new(length: Duration) -> Result<Self, ProtocolError> {
        Self::from_secs(length.as_secs())
    }

    pub fn from_secs(secs: u64) -> Result<Self, ProtocolError> {
        if secs == 0 {
            return Err(ProtocolError::InvalidWindow);
        }
        Ok(Self { secs })
    }

    pub fn length(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// Index of the window containing `at`, i.e. `floor(unix_seconds / length)`.
    ///
    /// Timestamps before the epoch all fall into window 0.
    pub fn index(&self, at: DateTime<Utc>) -> u64 {
        u64::try_from(at.timestamp()).unwrap_or(0) / self.secs
    }

    /// First instant of the window with the given index
    pub fn start_of(&self, index: u64) -> DateTime<Utc> {
        let secs = index.saturating_mul(self.secs).min(i64::MAX as u64) as i64;
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `at` truncated to the start of its window
    pub fn start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of(self.index(at))
    }

    /// First instant of the window following the one containing `at`
    pub fn end(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of(self.index(at).saturating_add(1))
    }

    /// Time left in the window containing `at`
    pub fn remaining(&self, at: DateTime<Utc>) -> Duration {
        (self.end(at) - at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Number of window boundaries crossed between `earlier` and `later`
    pub fn elapsed(&self, earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
        self.index(later).saturating_sub(self.index(earlier))
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            secs: crate::constants::DEFAULT_WINDOW_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(TimeWindow::from_secs(0).is_err());
        assert!(TimeWindow::new(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn test_index_truncates() {
        let window = TimeWindow::from_secs(30).unwrap();
        assert_eq!(window.index(at(0)), 0);
        assert_eq!(window.index(at(29)), 0);
        assert_eq!(window.index(at(30)), 1);
        assert_eq!(window.index(at(3_000_015)), 100_000);
    }

    #[test]
    fn test_start_end_remaining() {
        let window = TimeWindow::from_secs(30).unwrap();
        assert_eq!(window.start(at(95)), at(90));
        assert_eq!(window.end(at(95)), at(120));
        assert_eq!(window.remaining(at(95)), Duration::from_secs(25));
        assert_eq!(window.remaining(at(90)), Duration::from_secs(30));
    }

    #[test]
    fn test_elapsed_counts_boundaries() {
        let window = TimeWindow::from_secs(30).unwrap();
        assert_eq!(window.elapsed(at(59), at(60)), 1);
        assert_eq!(window.elapsed(at(60), at(89)), 0);
        assert_eq!(window.elapsed(at(89), at(30)), 0);
    }
}
