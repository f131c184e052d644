//! Knock session tracking
//!
//! Sessions are keyed by source address and spread over independently locked
//! shards, so packets from unrelated sources never contend on one lock while
//! updates for the same source are serialized.

use crate::constants::{ADDRESS_KEY_SIZE, SESSION_SHARDS};
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::net::{IpAddr, Ipv6Addr};
use tracing::debug;

/// Fixed-width table key shared by IPv4 (mapped) and IPv6 sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey([u8; ADDRESS_KEY_SIZE]);

impl AddressKey {
    pub fn octets(&self) -> [u8; ADDRESS_KEY_SIZE] {
        self.0
    }

    pub fn to_ip(&self) -> IpAddr {
        Ipv6Addr::from(self.0).to_canonical()
    }
}

impl From<IpAddr> for AddressKey {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self(v4.to_ipv6_mapped().octets()),
            IpAddr::V6(v6) => Self(v6.octets()),
        }
    }
}

/// In-progress knock attempt from one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnockSession {
    pub source: IpAddr,
    pub first_knock: DateTime<Utc>,
    pub ports: Vec<u16>,
}

impl KnockSession {
    pub fn new(source: IpAddr, first_knock: DateTime<Utc>) -> Self {
        Self {
            source,
            first_knock,
            ports: Vec::new(),
        }
    }

    /// A session survives the rest of its starting window plus one full window
    pub fn is_expired(&self, now: DateTime<Utc>, window: TimeWindow) -> bool {
        window.elapsed(self.first_knock, now) >= 2
    }
}

/// What to do with a session once an in-place update finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Keep,
    Remove,
}

type Shard = Mutex<HashMap<AddressKey, KnockSession>>;

pub struct SessionTable {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::with_shards(SESSION_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &AddressKey) -> &Shard {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    pub fn load(&self, source: IpAddr) -> Option<KnockSession> {
        let key = AddressKey::from(source);
        self.shard(&key).lock().get(&key).cloned()
    }

    pub fn store(&self, source: IpAddr, session: KnockSession) {
        let key = AddressKey::from(source);
        self.shard(&key).lock().insert(key, session);
    }

    pub fn delete(&self, source: IpAddr) -> Option<KnockSession> {
        let key = AddressKey::from(source);
        self.shard(&key).lock().remove(&key)
    }

    /// Load-or-create, mutate and store back as one critical section
    ///
    /// A missing session is created with `now` as its first-knock time. The
    /// session is removed afterwards if `f` returns `SessionAction::Remove`.
    pub fn update<R>(
        &self,
        source: IpAddr,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut KnockSession) -> (SessionAction, R),
    ) -> R {
        let key = AddressKey::from(source);
        let mut shard = self.shard(&key).lock();

        let session = shard
            .entry(key)
            .or_insert_with(|| KnockSession::new(source, now));
        let (action, result) = f(session);

        if action == SessionAction::Remove {
            shard.remove(&key);
        }
        result
    }

    /// Evict every session whose starting window ended more than a window ago
    ///
    /// Returns the number of evicted sessions.
    pub fn sweep(&self, now: DateTime<Utc>, window: TimeWindow) -> usize {
        let mut evicted = 0;
        for shard in self.shards.iter() {
            shard.lock().retain(|_, session| {
                if session.is_expired(now, window) {
                    debug!(
                        "Evicting knock session from {} ({} ports)",
                        session.source,
                        session.ports.len()
                    );
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
