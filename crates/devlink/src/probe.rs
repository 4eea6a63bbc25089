// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote liveness probing for the reconnect supervisor.
//!
//! The supervisor only asks "is this host reachable right now?" before
//! spending a connect attempt. [`IcmpProbe`] answers with an ICMP echo on an
//! unprivileged datagram socket; when the OS refuses such a socket (no
//! `ping_group_range` permission, unsupported platform) the probe reports
//! the host as reachable and lets the connect attempt decide.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::{Duration, Instant};

/// Default echo timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(700);

/// Echo payload length (zero-filled).
const ECHO_PAYLOAD_LEN: usize = 8;
const ICMP_HEADER_LEN: usize = 8;
const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const IPV4_MIN_HEADER_LEN: usize = 20;

/// Opaque "is the remote host reachable" check.
pub trait LivenessProbe: Send + Sync {
    fn is_reachable(&self, addr: IpAddr) -> bool;
}

impl<F> LivenessProbe for F
where
    F: Fn(IpAddr) -> bool + Send + Sync,
{
    fn is_reachable(&self, addr: IpAddr) -> bool {
        self(addr)
    }
}

/// Probe that never blocks a connect attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysReachable;

impl LivenessProbe for AlwaysReachable {
    fn is_reachable(&self, _addr: IpAddr) -> bool {
        true
    }
}

// ============================================================================
// ICMP echo probe
// ============================================================================

/// ICMP echo probe over an unprivileged `SOCK_DGRAM` ICMP socket.
#[derive(Debug)]
pub struct IcmpProbe {
    timeout: Duration,
    sequence: AtomicU16,
    /// Logged once when the OS refuses ICMP sockets
    unavailable_logged: AtomicBool,
}

impl IcmpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sequence: AtomicU16::new(1),
            unavailable_logged: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn echo(&self, addr: IpAddr) -> io::Result<bool> {
        let (domain, protocol, request_type, reply_type) = match addr {
            IpAddr::V4(_) => (
                Domain::IPV4,
                Protocol::ICMPV4,
                ICMPV4_ECHO_REQUEST,
                ICMPV4_ECHO_REPLY,
            ),
            IpAddr::V6(_) => (
                Domain::IPV6,
                Protocol::ICMPV6,
                ICMPV6_ECHO_REQUEST,
                ICMPV6_ECHO_REPLY,
            ),
        };

        let mut socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.connect(&SocketAddr::new(addr, 0).into())?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let request = build_echo_request(request_type, sequence);
        socket.send(&request)?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 128];
        while Instant::now() < deadline {
            let n = match socket.read(&mut buf) {
                Ok(n) => n,
                Err(e) if is_timeout(&e) => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if is_echo_reply(&buf[..n], reply_type) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl LivenessProbe for IcmpProbe {
    fn is_reachable(&self, addr: IpAddr) -> bool {
        match self.echo(addr) {
            Ok(alive) => alive,
            Err(e) if is_socket_refused(&e) => {
                if !self.unavailable_logged.swap(true, Ordering::Relaxed) {
                    log::debug!(
                        "[PROBE] ICMP sockets unavailable ({}), treating hosts as reachable",
                        e
                    );
                }
                true
            }
            Err(e) => {
                log::debug!("[PROBE] echo to {} failed: {}", addr, e);
                false
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn is_socket_refused(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
    ) {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            e.raw_os_error(),
            Some(libc::EACCES | libc::EPERM | libc::EPROTONOSUPPORT | libc::EAFNOSUPPORT)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Echo request: type, code, checksum, identifier, sequence, payload.
///
/// The kernel rewrites the identifier on datagram ICMP sockets.
fn build_echo_request(request_type: u8, sequence: u16) -> [u8; ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN] {
    let mut packet = [0u8; ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN];
    packet[0] = request_type;
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// Some platforms deliver the IPv4 header in front of the ICMP message.
fn is_echo_reply(packet: &[u8], reply_type: u8) -> bool {
    if packet.first() == Some(&reply_type) {
        return true;
    }
    if reply_type == ICMPV4_ECHO_REPLY
        && packet.len() > IPV4_MIN_HEADER_LEN
        && packet[0] >> 4 == 4
    {
        let header_len = usize::from(packet[0] & 0x0f) * 4;
        return packet.get(header_len) == Some(&ICMPV4_ECHO_REPLY);
    }
    false
}

/// RFC 1071 ones' complement checksum.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += u32::from(word);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_closure_probe() {
        let probe = |addr: IpAddr| addr.is_loopback();
        assert!(probe.is_reachable(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!probe.is_reachable(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }

    #[test]
    fn test_always_reachable() {
        assert!(AlwaysReachable.is_reachable(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
    }

    #[test]
    fn test_echo_request_layout() {
        let packet = build_echo_request(ICMPV4_ECHO_REQUEST, 0x0102);
        assert_eq!(packet.len(), 16);
        assert_eq!(packet[0], 8);
        assert_eq!(&packet[6..8], &[0x01, 0x02]);
        assert!(packet[8..].iter().all(|&b| b == 0));
        // A correct checksum makes the whole packet sum to zero.
        assert_eq!(internet_checksum(&packet), 0);
    }

    #[test]
    fn test_checksum_known_vector() {
        // RFC 1071 example words.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn test_reply_detection() {
        assert!(is_echo_reply(&[0, 0, 0, 0], ICMPV4_ECHO_REPLY));
        assert!(!is_echo_reply(&[3, 1, 0, 0], ICMPV4_ECHO_REPLY));
        assert!(is_echo_reply(&[129, 0], ICMPV6_ECHO_REPLY));

        let mut with_ip_header = vec![0x45u8];
        with_ip_header.extend_from_slice(&[0u8; 19]);
        with_ip_header.extend_from_slice(&[ICMPV4_ECHO_REPLY, 0, 0, 0]);
        assert!(is_echo_reply(&with_ip_header, ICMPV4_ECHO_REPLY));
    }

    #[test]
    fn test_loopback_probe_does_not_hang() {
        let probe = IcmpProbe::new(Duration::from_millis(200));
        let start = Instant::now();
        // Either a real echo reply or the permission fallback: both say reachable
        // or, at worst, time out quickly.
        let _ = probe.is_reachable(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
