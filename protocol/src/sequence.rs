//! Knock sequence derivation
//!
//! The expected sequence for a secret is the SHA-512 digest of
//! `secret || be64(window_index)`, read as 32 consecutive big-endian `u16`
//! port values.

use crate::constants::{DIGEST_SIZE, SEQUENCE_LEN};
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};

/// Ordered list of ports a client must knock, in order, within one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KnockSequence([u16; SEQUENCE_LEN]);

impl KnockSequence {
    pub fn ports(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Element-wise equality against the same-length leading part of this sequence
    ///
    /// An observed sequence longer than this one is never a prefix.
    pub fn is_prefix(&self, observed: &[u16]) -> bool {
        observed.len() <= self.0.len() && self.0[..observed.len()] == *observed
    }
}

impl AsRef<[u16]> for KnockSequence {
    fn as_ref(&self) -> &[u16] {
        &self.0
    }
}

/// Derive the expected sequence for `secret` in window `window_index`
pub fn generate(secret: &[u8], window_index: u64) -> KnockSequence {
    let mut hasher = Sha512::new();
    hasher.update(secret);
    hasher.update(window_index.to_be_bytes());
    let digest = hasher.finalize();
    debug_assert_eq!(digest.len(), DIGEST_SIZE);

    let mut ports = [0u16; SEQUENCE_LEN];
    for (port, pair) in ports.iter_mut().zip(digest.chunks_exact(2)) {
        *port = u16::from_be_bytes([pair[0], pair[1]]);
    }

    KnockSequence(ports)
}

/// Derive the expected sequence for the window containing `at`
pub fn generate_at(secret: &[u8], window: TimeWindow, at: DateTime<Utc>) -> KnockSequence {
    generate(secret, window.index(at))
}
