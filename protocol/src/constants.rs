//! Protocol constants and defaults

/// Default file extension identifying secret files
pub const DEFAULT_PREFIX: &str = "thered";

/// Default secret length in bytes
pub const DEFAULT_KEY_LENGTH: usize = 64;

/// Default time-window length in seconds
pub const DEFAULT_WINDOW_SECS: u64 = 30;

/// SHA-512 digest size in bytes
pub const DIGEST_SIZE: usize = 64;

/// Number of ports in an expected sequence (one per 2 digest bytes)
pub const SEQUENCE_LEN: usize = DIGEST_SIZE / 2;

/// Width of a session table key (IPv4 addresses are stored IPv4-mapped)
pub const ADDRESS_KEY_SIZE: usize = 16;

/// Number of independently locked session table shards
pub const SESSION_SHARDS: usize = 64;
