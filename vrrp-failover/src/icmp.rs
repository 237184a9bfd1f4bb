// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ICMP echo ("ping") probes

use async_trait::async_trait;
use socket2::Domain;
use socket2::Protocol;
use socket2::SockAddr;
use socket2::Socket;
use socket2::Type;
use std::io::Read;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMP_HEADER_LEN: usize = 8;
const PAYLOAD: &[u8] = b"vrrp-failover ping";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpStatus {
    Up,
    Down,
}

/// Checks whether a host answers ICMP echo requests
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, ip: IpAddr) -> Result<IcmpStatus, std::io::Error>;
}

/// [`Pinger`] that sends one echo request per call
///
/// Uses an unprivileged datagram ICMP socket where the OS allows it, falling
/// back to a raw socket.
pub struct IcmpPinger {
    reply_timeout: Duration,
    identifier: u16,
    sequence: AtomicU16,
}

impl IcmpPinger {
    pub fn new(reply_timeout: Duration) -> IcmpPinger {
        IcmpPinger {
            reply_timeout,
            identifier: std::process::id() as u16,
            sequence: AtomicU16::new(0),
        }
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ping(&self, ip: IpAddr) -> Result<IcmpStatus, std::io::Error> {
        let probe = EchoProbe {
            ip,
            identifier: self.identifier,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            reply_timeout: self.reply_timeout,
        };
        tokio::task::spawn_blocking(move || probe.run())
            .await
            .map_err(std::io::Error::other)?
    }
}

struct EchoProbe {
    ip: IpAddr,
    identifier: u16,
    sequence: u16,
    reply_timeout: Duration,
}

impl EchoProbe {
    fn run(&self) -> Result<IcmpStatus, std::io::Error> {
        let (domain, protocol) = match self.ip {
            IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
            IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
        };
        let (socket, raw) =
            match Socket::new(domain, Type::DGRAM, Some(protocol)) {
                Ok(socket) => (socket, false),
                Err(_) => {
                    (Socket::new(domain, Type::RAW, Some(protocol))?, true)
                }
            };

        // Connecting filters out replies from other hosts.
        socket.connect(&SockAddr::from(SocketAddr::new(self.ip, 0)))?;
        let request =
            echo_request(self.ip.is_ipv4(), self.identifier, self.sequence);
        socket.send(&request)?;

        let deadline = Instant::now() + self.reply_timeout;
        let mut buf = [0u8; 1500];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(IcmpStatus::Down);
            }
            socket.set_read_timeout(Some(remaining))?;
            let n = match (&socket).read(&mut buf) {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(IcmpStatus::Down);
                }
                Err(e) => return Err(e),
            };
            if self.is_reply(&buf[..n], raw) {
                return Ok(IcmpStatus::Up);
            }
        }
    }

    fn is_reply(&self, packet: &[u8], raw: bool) -> bool {
        let icmp = if raw && self.ip.is_ipv4() {
            // Raw IPv4 sockets deliver the IP header too.
            match packet.first() {
                Some(b) => {
                    let ihl = usize::from(b & 0x0f) * 4;
                    packet.get(ihl..).unwrap_or_default()
                }
                None => return false,
            }
        } else {
            packet
        };
        // The kernel rewrites the identifier on datagram sockets, so it's
        // only meaningful on raw ones.
        let identifier = if raw { Some(self.identifier) } else { None };
        parse_echo_reply(icmp, self.ip.is_ipv4(), identifier)
            == Some(self.sequence)
    }
}

/// Builds an ICMP echo request
///
/// ICMPv6 checksums cover a pseudo-header the kernel fills in, so those are
/// left zero here.
fn echo_request(ipv4: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + PAYLOAD.len());
    packet.push(if ipv4 { ICMPV4_ECHO_REQUEST } else { ICMPV6_ECHO_REQUEST });
    packet.push(0);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(PAYLOAD);
    if ipv4 {
        let checksum = internet_checksum::checksum(&packet);
        packet[2..4].copy_from_slice(&checksum);
    }
    packet
}

/// Returns the sequence number of an echo reply, or `None` if `icmp` is not
/// an echo reply (with the given identifier, when one is given)
fn parse_echo_reply(
    icmp: &[u8],
    ipv4: bool,
    identifier: Option<u16>,
) -> Option<u16> {
    if icmp.len() < ICMP_HEADER_LEN {
        return None;
    }
    let reply_type = if ipv4 { ICMPV4_ECHO_REPLY } else { ICMPV6_ECHO_REPLY };
    if icmp[0] != reply_type || icmp[1] != 0 {
        return None;
    }
    if let Some(identifier) = identifier {
        if u16::from_be_bytes([icmp[4], icmp[5]]) != identifier {
            return None;
        }
    }
    Some(u16::from_be_bytes([icmp[6], icmp[7]]))
}
