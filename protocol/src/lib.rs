//! Thered Protocol Library
//!
//! Knock-sequence authentication core shared by the Thered server and client.
//! A client proves possession of a shared secret by sending UDP datagrams to
//! a time-rotating sequence of destination ports derived from that secret.
//! This crate derives the sequences, tracks per-source knock sessions and
//! decides whether an observed sequence is a prefix, a completed proof or a
//! failure.

pub mod constants;
pub mod error;
pub mod matcher;
pub mod secret;
pub mod sequence;
pub mod session;
pub mod validation;
pub mod window;

pub use constants::*;
pub use error::ProtocolError;
pub use matcher::{KnockEngine, Verdict};
pub use secret::{Secret, SecretStore};
pub use sequence::KnockSequence;
pub use session::{KnockSession, SessionTable};
pub use window::TimeWindow;
