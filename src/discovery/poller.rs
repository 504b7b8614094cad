//! Client side of the multicast discovery exchange (spec §4.C).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::config::ServerConfig;
use crate::discovery::frame::DiscoveryFrame;
use crate::discovery::responder::DiscoveryCodes;

/// A discovered server endpoint, resolved from a [`DiscoveryFrame`]. Distinct
/// from [`crate::config::ServerNode`], which is a configured cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    pub address: IpAddr,
    pub port: u16,
    pub ssl_enabled: bool,
}

#[derive(Debug)]
pub enum PollError {
    Io(std::io::Error),
    NoResponse { attempts: u32 },
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Io(err) => write!(f, "multicast poll I/O error: {err}"),
            PollError::NoResponse { attempts } => {
                write!(f, "no discovery response after {attempts} attempt(s)")
            }
        }
    }
}

impl std::error::Error for PollError {}

impl From<std::io::Error> for PollError {
    fn from(value: std::io::Error) -> Self {
        PollError::Io(value)
    }
}

/// Sends a discovery request to the configured multicast group and waits
/// for the first well-formed reply, retrying up to `attempts` times.
pub async fn discover(
    config: &ServerConfig,
    codes: DiscoveryCodes,
    attempt_timeout: Duration,
    attempts: u32,
) -> Result<DiscoveredNode, PollError> {
    let group = config.multicast_group(config.multicast_family_v6);
    let target = SocketAddr::new(group, config.multicast_port);
    let socket = bind_client_socket(group)?;
    let socket = UdpSocket::from_std(socket.into())?;

    let request = DiscoveryFrame {
        code: codes.request_code,
        hostname: String::new(),
        ssl_enabled: false,
        tcp_port: 0,
    }
    .encode()
    .expect("request frame always encodes");

    let mut buf = vec![0u8; crate::discovery::frame::MAX_FRAME_LEN];
    for _ in 0..attempts.max(1) {
        socket.send_to(&request, target).await?;
        let deadline = tokio::time::Instant::now() + attempt_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let recv = tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await;
            let (len, peer) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => break,
            };
            let frame = match DiscoveryFrame::decode(&buf[..len]) {
                Ok(frame) if frame.code == codes.response_code => frame,
                _ => continue,
            };
            let address = resolve_address(&frame.hostname, peer.ip());
            return Ok(DiscoveredNode {
                address,
                port: frame.tcp_port,
                ssl_enabled: frame.ssl_enabled,
            });
        }
    }
    Err(PollError::NoResponse { attempts })
}

/// If the embedded address is any-local (`0.0.0.0`/`::`) or unparsable,
/// fall back to the datagram's source address (spec §4.C).
fn resolve_address(hostname: &str, source: IpAddr) -> IpAddr {
    match hostname.parse::<IpAddr>() {
        Ok(addr) if !addr.is_unspecified() => addr,
        _ => source,
    }
}

fn bind_client_socket(group: IpAddr) -> std::io::Result<Socket> {
    let domain = if group.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    let any = if group.is_ipv6() {
        SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
    };
    socket.bind(&any.into())?;
    if group.is_ipv6() {
        socket.set_multicast_hops_v6(1)?;
    } else {
        socket.set_multicast_ttl_v4(1)?;
    }
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_local_address_falls_back_to_source() {
        let source: IpAddr = "203.0.113.9".parse().unwrap();
        assert_eq!(resolve_address("0.0.0.0", source), source);
        assert_eq!(resolve_address("::", source), source);
        let explicit: IpAddr = "198.51.100.4".parse().unwrap();
        assert_eq!(resolve_address("198.51.100.4", source), explicit);
    }
}
