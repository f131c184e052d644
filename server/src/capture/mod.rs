//! Packet acquisition
//!
//! Raw `IPPROTO_UDP` sockets see every inbound UDP datagram regardless of
//! whether anything listens on the destination port. Each datagram is
//! reduced to its source address and destination port and handed to the
//! async side over a channel.

use crate::config::CaptureConfig;
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const IPV4_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;
const PROTO_UDP: u8 = 17;

/// One observed knock: who sent it and which port it hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Knock {
    pub source: IpAddr,
    pub port: u16,
}

impl Knock {
    /// Drops unspecified sources and port zero
    pub fn new(source: IpAddr, port: u16) -> Option<Self> {
        if source.is_unspecified() || port == 0 {
            return None;
        }
        Some(Self { source, port })
    }
}

/// Parse a raw IPv4 datagram as delivered by an `AF_INET` raw socket
pub fn parse_ipv4(datagram: &[u8]) -> Option<Knock> {
    if datagram.len() < IPV4_MIN_HEADER || datagram[0] >> 4 != 4 {
        return None;
    }

    let header_len = usize::from(datagram[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER || datagram[9] != PROTO_UDP {
        return None;
    }

    // Non-first fragments carry no UDP header
    let fragment_offset = u16::from_be_bytes([datagram[6], datagram[7]]) & 0x1fff;
    if fragment_offset != 0 {
        return None;
    }

    let udp = datagram.get(header_len..header_len + UDP_HEADER)?;
    let source = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    let port = u16::from_be_bytes([udp[2], udp[3]]);

    Knock::new(IpAddr::V4(source), port)
}

/// Parse the UDP header delivered by an `AF_INET6` raw socket
pub fn parse_ipv6(source: Ipv6Addr, segment: &[u8]) -> Option<Knock> {
    let udp = segment.get(..UDP_HEADER)?;
    let port = u16::from_be_bytes([udp[2], udp[3]]);
    Knock::new(IpAddr::V6(source), port)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn domain(self) -> Domain {
        match self {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        }
    }
}

fn open_raw(family: Family) -> Result<UdpSocket> {
    let socket = Socket::new(family.domain(), Type::RAW, Some(Protocol::UDP))
        .with_context(|| format!("Failed to open raw {:?} UDP socket (needs CAP_NET_RAW)", family))?;
    // Raw sockets share recvfrom semantics with datagram sockets
    Ok(socket.into())
}

/// Open the configured raw sockets and forward knocks on dedicated threads
///
/// Fails only if no family could be opened.
pub fn spawn(config: &CaptureConfig, tx: mpsc::Sender<Knock>) -> Result<Vec<JoinHandle<()>>> {
    let mut families = Vec::new();
    if config.ipv4 {
        families.push(Family::V4);
    }
    if config.ipv6 {
        families.push(Family::V6);
    }

    let mut handles = Vec::new();
    for family in families {
        let socket = match open_raw(family) {
            Ok(socket) => socket,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };

        let tx = tx.clone();
        let buffer_size = config.buffer_size;
        let handle = std::thread::Builder::new()
            .name(format!("capture-{:?}", family).to_lowercase())
            .spawn(move || capture_loop(family, socket, buffer_size, tx))
            .context("Failed to spawn capture thread")?;

        info!("Capturing {:?} UDP traffic", family);
        handles.push(handle);
    }

    if handles.is_empty() {
        anyhow::bail!("No capture socket could be opened");
    }
    Ok(handles)
}

fn capture_loop(family: Family, socket: UdpSocket, buffer_size: usize, tx: mpsc::Sender<Knock>) {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                error!("Error receiving {:?} datagram: {}", family, e);
                continue;
            }
        };

        let knock = match (family, from) {
            (Family::V4, _) => parse_ipv4(&buf[..len]),
            (Family::V6, SocketAddr::V6(from)) => parse_ipv6(*from.ip(), &buf[..len]),
            (Family::V6, SocketAddr::V4(_)) => None,
        };

        let Some(knock) = knock else {
            continue;
        };

        if tx.blocking_send(knock).is_err() {
            debug!("Knock channel closed, stopping {:?} capture", family);
            return;
        }
    }
}
