//! Per-secret validation state
//!
//! Each enrolled secret carries the sequence expected for the current
//! window and a consumed flag that blocks a second full match within the
//! same window.

use crate::secret::Secret;
use crate::sequence::{self, KnockSequence};
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Result of checking an observed sequence against one secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMatch {
    /// The expected sequence rotated during a multi-knock attempt
    Rotated,
    /// A full match already happened in this window
    Consumed,
    /// More ports observed than the expected sequence holds
    Overflow,
    Mismatch,
    /// Valid prefix, more ports needed
    Prefix,
    /// Full-length match; the state is now consumed
    Complete,
}

#[derive(Debug)]
struct StateInner {
    expected: KnockSequence,
    window_index: u64,
    consumed: bool,
}

#[derive(Debug)]
pub struct SecretState {
    secret: Arc<Secret>,
    window: TimeWindow,
    inner: Mutex<StateInner>,
}

impl SecretState {
    /// Build the state with the sequence for the window containing `now`
    pub fn new(secret: Arc<Secret>, window: TimeWindow, now: DateTime<Utc>) -> Self {
        let window_index = window.index(now);
        let expected = sequence::generate(secret.as_bytes(), window_index);
        Self {
            secret,
            window,
            inner: Mutex::new(StateInner {
                expected,
                window_index,
                consumed: false,
            }),
        }
    }

    pub fn secret_id(&self) -> &str {
        self.secret.id()
    }

    /// Regenerate the expected sequence if `now` lies in a later window
    ///
    /// Returns true when a regeneration happened. Clears the consumed flag.
    pub fn refresh_if_stale(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner, now)
    }

    /// Block further full matches until the window rolls over. Idempotent.
    pub fn mark_consumed(&self) {
        let mut inner = self.inner.lock();
        Self::consume_locked(&mut inner);
    }

    pub fn is_consumed(&self) -> bool {
        self.inner.lock().consumed
    }

    pub fn expected(&self) -> KnockSequence {
        self.inner.lock().expected
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window.start_of(self.inner.lock().window_index)
    }

    /// Check `observed` against this secret, refreshing first if stale
    ///
    /// Refresh, the consumed check and consumption on a full match happen
    /// under one lock, so two simultaneous full matches cannot both succeed.
    pub fn evaluate(&self, observed: &[u16], now: DateTime<Utc>) -> StateMatch {
        let mut inner = self.inner.lock();

        if self.refresh_locked(&mut inner, now) && observed.len() > 1 {
            return StateMatch::Rotated;
        }
        if inner.consumed {
            return StateMatch::Consumed;
        }
        if observed.len() > inner.expected.len() {
            return StateMatch::Overflow;
        }
        if !inner.expected.is_prefix(observed) {
            return StateMatch::Mismatch;
        }
        if observed.len() == inner.expected.len() {
            Self::consume_locked(&mut inner);
            return StateMatch::Complete;
        }
        StateMatch::Prefix
    }

    /// Read-only variant of `evaluate` that never consumes
    pub(crate) fn would_match(&self, observed: &[u16], now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        if self.refresh_locked(&mut inner, now) && observed.len() > 1 {
            return false;
        }
        !inner.consumed && inner.expected.is_prefix(observed)
    }

    fn consume_locked(inner: &mut StateInner) {
        inner.consumed = true;
    }

    fn refresh_locked(&self, inner: &mut StateInner, now: DateTime<Utc>) -> bool {
        let index = self.window.index(now);
        if index <= inner.window_index {
            return false;
        }
        inner.expected = sequence::generate(self.secret.as_bytes(), index);
        inner.window_index = index;
        inner.consumed = false;
        true
    }
}
