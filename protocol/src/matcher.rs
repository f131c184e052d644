//! Knock sequence matching
//!
//! `KnockEngine` ties the session table to the per-secret validation states:
//! every observed port is appended to its source's session and the grown
//! sequence is checked against each secret in enrollment order.

use crate::secret::SecretStore;
use crate::session::{SessionAction, SessionTable};
use crate::validation::{SecretState, StateMatch};
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Outcome of one observed datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The sequence so far is a valid prefix for `secret_id`
    Partial {
        secret_id: String,
        received: usize,
        expected: usize,
    },
    /// The full sequence for `secret_id` was knocked
    Complete { secret_id: String },
    /// No enrolled secret matches; the session was dropped
    Rejected,
    /// More ports than any sequence holds; the session was dropped
    ProtocolError { received: usize },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Partial { .. } | Verdict::Complete { .. })
    }
}

pub struct KnockEngine {
    sessions: SessionTable,
    states: Vec<SecretState>,
    window: TimeWindow,
}

impl KnockEngine {
    /// Build validation states for every enrolled secret at `now`
    pub fn new(store: &SecretStore, window: TimeWindow, now: DateTime<Utc>) -> Self {
        Self::with_sessions(store, window, now, SessionTable::new())
    }

    pub fn with_sessions(
        store: &SecretStore,
        window: TimeWindow,
        now: DateTime<Utc>,
        sessions: SessionTable,
    ) -> Self {
        let states = store
            .iter()
            .map(|secret| SecretState::new(secret.clone(), window, now))
            .collect();
        Self {
            sessions,
            states,
            window,
        }
    }

    /// Record `port` for `source` and decide what the grown sequence means
    ///
    /// The session is kept only for a `Partial` verdict.
    pub fn observe(&self, source: IpAddr, port: u16, now: DateTime<Utc>) -> Verdict {
        self.sessions.update(source, now, |session| {
            session.ports.push(port);
            let verdict = self.evaluate(&session.ports, now);
            let action = match verdict {
                Verdict::Partial { .. } => SessionAction::Keep,
                _ => SessionAction::Remove,
            };
            (action, verdict)
        })
    }

    /// Evict sessions that outlived their window
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.sessions.sweep(now, self.window)
    }

    /// Rotate every secret whose window has elapsed, returning how many did
    pub fn refresh_states(&self, now: DateTime<Utc>) -> usize {
        self.states
            .iter()
            .filter(|state| state.refresh_if_stale(now))
            .count()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn states(&self) -> &[SecretState] {
        &self.states
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    fn evaluate(&self, observed: &[u16], now: DateTime<Utc>) -> Verdict {
        for (index, state) in self.states.iter().enumerate() {
            match state.evaluate(observed, now) {
                StateMatch::Rotated | StateMatch::Consumed | StateMatch::Mismatch => continue,
                StateMatch::Overflow => {
                    return Verdict::ProtocolError {
                        received: observed.len(),
                    };
                }
                StateMatch::Prefix => {
                    self.check_ambiguity(index, observed, now, false);
                    return Verdict::Partial {
                        secret_id: state.secret_id().to_string(),
                        received: observed.len(),
                        expected: state.expected().len(),
                    };
                }
                StateMatch::Complete => {
                    self.check_ambiguity(index, observed, now, true);
                    return Verdict::Complete {
                        secret_id: state.secret_id().to_string(),
                    };
                }
            }
        }
        Verdict::Rejected
    }

    /// Report later secrets that would also accept `observed`; the first match still wins
    fn check_ambiguity(&self, winner: usize, observed: &[u16], now: DateTime<Utc>, complete: bool) {
        let winner_id = self.states[winner].secret_id();
        for state in &self.states[winner + 1..] {
            if !state.would_match(observed, now) {
                continue;
            }
            if complete {
                warn!(
                    "Knock sequence matched both {} and {}, accepting {}",
                    winner_id,
                    state.secret_id(),
                    winner_id
                );
            } else {
                debug!(
                    "Knock prefix of {} ports matches both {} and {}",
                    observed.len(),
                    winner_id,
                    state.secret_id()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::Secret;
    use crate::sequence;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    const W: i64 = 30;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn client(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, last))
    }

    fn engine(secrets: Vec<Secret>, now: DateTime<Utc>) -> KnockEngine {
        let store = SecretStore::from_secrets(secrets);
        KnockEngine::new(&store, TimeWindow::from_secs(W as u64).unwrap(), now)
    }

    fn single(now: DateTime<Utc>) -> (KnockEngine, Vec<u16>) {
        let engine = engine(vec![Secret::new("ab", vec![0xAB; 64])], now);
        let ports = sequence::generate(&[0xAB; 64], (now.timestamp() / W) as u64)
            .ports()
            .to_vec();
        (engine, ports)
    }

    fn partial(id: &str, received: usize) -> Verdict {
        Verdict::Partial {
            secret_id: id.to_string(),
            received,
            expected: 32,
        }
    }

    #[test]
    fn test_prefix_accumulates() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);
        let src = client(1);

        for (i, port) in ports.iter().take(3).enumerate() {
            assert_eq!(engine.observe(src, *port, now), partial("ab", i + 1));
        }
        assert_eq!(engine.sessions().load(src).unwrap().ports, ports[..3].to_vec());
    }

    #[test]
    fn test_wrong_port_rejects_and_drops_session() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);
        let src = client(2);

        assert!(engine.observe(src, ports[0], now).is_accepted());
        assert_eq!(engine.observe(src, ports[1].wrapping_add(1), now), Verdict::Rejected);
        assert!(engine.sessions().load(src).is_none());
    }

    #[test]
    fn test_full_sequence_completes() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);
        let src = client(3);

        for port in &ports[..31] {
            assert!(matches!(engine.observe(src, *port, now), Verdict::Partial { .. }));
        }
        assert_eq!(
            engine.observe(src, ports[31], now),
            Verdict::Complete {
                secret_id: "ab".to_string()
            }
        );
        assert!(engine.sessions().load(src).is_none());
        assert!(engine.states()[0].is_consumed());
    }

    #[test]
    fn test_replay_in_same_window_rejected() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);

        for port in &ports {
            engine.observe(client(4), *port, now);
        }
        assert_eq!(engine.observe(client(5), ports[0], now), Verdict::Rejected);
    }

    #[test]
    fn test_next_window_succeeds_again() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);
        for port in &ports {
            engine.observe(client(6), *port, now);
        }

        let later = now + chrono::Duration::seconds(W);
        let next = sequence::generate(&[0xAB; 64], (later.timestamp() / W) as u64);
        let mut last = Verdict::Rejected;
        for port in next.ports() {
            last = engine.observe(client(6), *port, later);
        }
        assert_eq!(
            last,
            Verdict::Complete {
                secret_id: "ab".to_string()
            }
        );
    }

    #[test]
    fn test_overflow_abandons_attempt() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);
        let src = client(7);

        // Pre-seed a full-length session that has not been evaluated yet
        let mut session = crate::session::KnockSession::new(src, now);
        session.ports = ports.clone();
        engine.sessions().store(src, session);

        assert_eq!(
            engine.observe(src, ports[0], now),
            Verdict::ProtocolError { received: 33 }
        );
        assert!(engine.sessions().load(src).is_none());
        assert!(!engine.states()[0].is_consumed());
    }

    #[test]
    fn test_two_secrets_match_independently() {
        let now = at(1_699_999_980);
        let s1 = vec![0x01; 64];
        let s2 = vec![0x02; 64];
        let engine = engine(
            vec![Secret::new("one", s1.clone()), Secret::new("two", s2.clone())],
            now,
        );
        let window_index = (now.timestamp() / W) as u64;
        let seq1 = sequence::generate(&s1, window_index);
        let seq2 = sequence::generate(&s2, window_index);
        assert_ne!(seq1.ports()[0], seq2.ports()[0]);

        for (i, port) in seq2.ports().iter().take(5).enumerate() {
            assert_eq!(engine.observe(client(8), *port, now), partial("two", i + 1));
        }
        assert!(!engine.states()[0].is_consumed());
        assert!(!engine.states()[1].is_consumed());
    }

    #[test]
    fn test_first_secret_wins_on_identical_sequences() {
        let now = at(1_699_999_980);
        let engine = engine(
            vec![
                Secret::new("first", vec![0x07; 64]),
                Secret::new("second", vec![0x07; 64]),
            ],
            now,
        );
        let ports = sequence::generate(&[0x07; 64], (now.timestamp() / W) as u64);

        let mut last = Verdict::Rejected;
        for port in ports.ports() {
            last = engine.observe(client(9), *port, now);
        }
        assert_eq!(
            last,
            Verdict::Complete {
                secret_id: "first".to_string()
            }
        );
        assert!(engine.states()[0].is_consumed());
        assert!(!engine.states()[1].is_consumed());

        // The twin secret still accepts one attempt this window
        for port in ports.ports() {
            last = engine.observe(client(10), *port, now);
        }
        assert_eq!(
            last,
            Verdict::Complete {
                secret_id: "second".to_string()
            }
        );
    }

    #[test]
    fn test_no_secrets_rejects_everything() {
        let now = at(0);
        let engine = engine(Vec::new(), now);
        assert_eq!(engine.observe(client(11), 1234, now), Verdict::Rejected);
        assert!(engine.sessions().is_empty());
    }

    #[test]
    fn test_rotation_mid_attempt_rejects() {
        let now = at(1_699_999_980 + 29);
        let (engine, ports) = single(now);
        let src = client(12);

        assert!(engine.observe(src, ports[0], now).is_accepted());
        let later = now + chrono::Duration::seconds(1);
        assert_eq!(engine.observe(src, ports[1], later), Verdict::Rejected);
    }

    #[test]
    fn test_sessions_are_per_source() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);

        assert!(engine.observe(client(13), ports[0], now).is_accepted());
        assert!(engine.observe(client(14), ports[0], now).is_accepted());
        assert!(engine.observe(client(13), ports[1], now).is_accepted());
        assert_eq!(engine.sessions().len(), 2);
    }

    #[test]
    fn test_refresh_states_rotates_and_rearms() {
        let now = at(1_699_999_980);
        let (engine, ports) = single(now);
        for port in &ports {
            engine.observe(client(16), *port, now);
        }
        assert!(engine.states()[0].is_consumed());
        assert_eq!(engine.refresh_states(now), 0);

        let later = now + chrono::Duration::seconds(W);
        assert_eq!(engine.refresh_states(later), 1);
        assert!(!engine.states()[0].is_consumed());
        assert_eq!(engine.refresh_states(later), 0);

        // A two-port attempt right after a proactive rotation is evaluated normally
        let next = sequence::generate(&[0xAB; 64], (later.timestamp() / W) as u64);
        assert!(engine.observe(client(17), next.ports()[0], later).is_accepted());
        assert!(engine.observe(client(17), next.ports()[1], later).is_accepted());
    }

    #[test]
    fn test_sweep_evicts_idle_partial_session() {
        let t0 = at(1_699_999_980 + 10);
        let (engine, ports) = single(t0);
        let src = client(15);
        engine.observe(src, ports[0], t0);

        assert_eq!(engine.sweep(t0 + chrono::Duration::seconds(W - 1)), 0);
        assert!(engine.sessions().load(src).is_some());
        assert_eq!(engine.sweep(t0 + chrono::Duration::seconds(2 * W)), 1);
        assert!(engine.sessions().load(src).is_none());
    }
}
