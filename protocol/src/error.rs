//! Protocol error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to read secret directory {path:?}: {source}")]
    SecretDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read secret file {path:?}: {source}")]
    SecretUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret in {path:?} is too short: expected at least {expected} bytes, got {actual}")]
    SecretTooShort {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid window length: must be at least one second")]
    InvalidWindow,
}
