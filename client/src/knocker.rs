//! Sending knock sequences
//!
//! Each port of the current sequence receives one empty UDP datagram, in
//! order. The whole sequence has to land within one window, so a knock that
//! would straddle a window boundary waits for the next window first.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use protocol::{KnockSequence, Secret, TimeWindow, sequence};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::{debug, info};

/// Headroom kept before a window boundary
const BOUNDARY_SLACK: Duration = Duration::from_millis(500);

pub struct Knocker {
    socket: UdpSocket,
    target: IpAddr,
    delay: Duration,
    window: TimeWindow,
}

impl Knocker {
    pub fn new(host: &str, delay: Duration, window: TimeWindow) -> Result<Self> {
        let target = (host, 0)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve host: {}", host))?
            .next()
            .map(|addr| addr.ip())
            .with_context(|| format!("No address found for host: {}", host))?;

        let bind: SocketAddr = match target {
            IpAddr::V4(_) => "0.0.0.0:0".parse()?,
            IpAddr::V6(_) => "[::]:0".parse()?,
        };
        let socket = UdpSocket::bind(bind).context("Failed to bind UDP socket")?;

        info!("Knocking {} ({})", host, target);

        Ok(Self {
            socket,
            target,
            delay,
            window,
        })
    }

    /// Knock the full sequence for `secret`, returning the sequence sent
    ///
    /// With `fit_window` set, windows that are about to roll over or whose
    /// sequence holds the unsendable port 0 are skipped.
    pub fn knock(&self, secret: &Secret, fit_window: bool) -> Result<KnockSequence> {
        let needed = time_needed(protocol::SEQUENCE_LEN, self.delay);

        let sequence = loop {
            let now = Utc::now();
            let sequence = sequence::generate_at(secret.as_bytes(), self.window, now);
            if !fit_window {
                break sequence;
            }
            match wait_for_fit(self.window, now, needed, &sequence) {
                None => break sequence,
                Some(wait) => {
                    info!("Waiting {:.1}s for the next window", wait.as_secs_f64());
                    std::thread::sleep(wait);
                }
            }
        };

        self.send(&sequence)?;
        Ok(sequence)
    }

    /// Send every port of `sequence` in order
    ///
    /// Nothing is sent if any port is 0, since the kernel refuses it and the
    /// server would never see the full sequence.
    pub fn send(&self, sequence: &KnockSequence) -> Result<()> {
        if let Some(position) = sequence.ports().iter().position(|&port| port == 0) {
            anyhow::bail!(
                "Sequence for this window has port 0 at position {}, knock again next window",
                position
            );
        }

        for (i, port) in sequence.ports().iter().enumerate() {
            if i > 0 {
                std::thread::sleep(self.delay);
            }
            self.socket
                .send_to(&[], (self.target, *port))
                .with_context(|| format!("Failed to send knock to port {}", port))?;
            debug!("Knock {}/{} -> {}:{}", i + 1, sequence.len(), self.target, port);
        }

        Ok(())
    }
}

/// Time from the first to the last knock, plus headroom
pub fn time_needed(knocks: usize, delay: Duration) -> Duration {
    let gaps = u32::try_from(knocks.saturating_sub(1)).unwrap_or(u32::MAX);
    delay.saturating_mul(gaps) + BOUNDARY_SLACK
}

/// How long to wait before `sequence` can be knocked
///
/// `None` when the rest of the current window is long enough and the
/// sequence is sendable; otherwise the time left until the next window.
pub fn wait_for_fit(
    window: TimeWindow,
    now: DateTime<Utc>,
    needed: Duration,
    sequence: &KnockSequence,
) -> Option<Duration> {
    let remaining = window.remaining(now);
    if remaining > needed && !sequence.ports().contains(&0) {
        None
    } else {
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ZERO_WINDOW: u64 = 56_668_116;

    fn at(secs: i64, millis: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, millis * 1_000_000).unwrap()
    }

    #[test]
    fn test_time_needed() {
        assert_eq!(time_needed(32, Duration::from_millis(100)), Duration::from_millis(3600));
        assert_eq!(time_needed(1, Duration::from_secs(5)), BOUNDARY_SLACK);
    }

    #[test]
    fn test_wait_for_fit() {
        let window = TimeWindow::from_secs(30).unwrap();
        let needed = Duration::from_secs(4);
        let sequence = sequence::generate(&[0x42; 64], 2);
        assert!(!sequence.ports().contains(&0));

        assert_eq!(wait_for_fit(window, at(60, 0), needed, &sequence), None);
        assert_eq!(wait_for_fit(window, at(85, 0), needed, &sequence), None);
        assert_eq!(
            wait_for_fit(window, at(87, 500), needed, &sequence),
            Some(Duration::from_millis(2500))
        );
    }

    #[test]
    fn test_wait_for_fit_skips_zero_port_window() {
        let window = TimeWindow::from_secs(30).unwrap();
        let needed = time_needed(32, Duration::from_millis(50));
        let secret = [0xAB; 64];

        // Window 56_668_116 has port 0 at position 22 for this secret
        let zero = sequence::generate(&secret, ZERO_WINDOW);
        assert_eq!(zero.ports()[22], 0);
        let start = ZERO_WINDOW as i64 * 30;
        assert_eq!(
            wait_for_fit(window, at(start, 0), needed, &zero),
            Some(Duration::from_secs(30))
        );

        let next = sequence::generate(&secret, ZERO_WINDOW + 1);
        assert_eq!(wait_for_fit(window, at(start + 30, 0), needed, &next), None);
    }

    #[test]
    fn test_send_refuses_zero_port_sequence() {
        let window = TimeWindow::from_secs(30).unwrap();
        let knocker = Knocker::new("127.0.0.1", Duration::ZERO, window).unwrap();
        let zero = sequence::generate(&[0xAB; 64], ZERO_WINDOW);

        let err = knocker.send(&zero).unwrap_err();
        assert!(err.to_string().contains("position 22"));
    }

    #[test]
    fn test_knock_sends_current_sequence() {
        let window = TimeWindow::from_secs(3600).unwrap();
        let knocker = Knocker::new("127.0.0.1", Duration::ZERO, window).unwrap();
        let secret = Secret::new("t", vec![0x42; 64]);

        let before = window.index(Utc::now());
        let result = knocker.knock(&secret, false);
        let after = window.index(Utc::now());

        let candidates = [
            sequence::generate(secret.as_bytes(), before),
            sequence::generate(secret.as_bytes(), after),
        ];
        match result {
            Ok(sent) => {
                assert_eq!(sent.len(), 32);
                assert!(candidates.contains(&sent));
            }
            // Only a window holding port 0 may refuse to knock
            Err(_) => assert!(candidates.iter().any(|c| c.ports().contains(&0))),
        }
    }
}
