//! Server side of the multicast discovery exchange: binds the configured
//! group, and answers any datagram carrying the expected request code with
//! this node's TCP endpoint (spec §4.C).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::config::ServerConfig;
use crate::discovery::frame::DiscoveryFrame;
use crate::discovery::interface;

pub struct MulticastResponder {
    running: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Request/response code pair agreed out-of-band (spec §6 example: 230/235).
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryCodes {
    pub request_code: u32,
    pub response_code: u32,
}

impl MulticastResponder {
    /// Binds the group from `config` and starts answering requests in the
    /// background. Returns `Ok(None)` if `config.multicast_enabled` is
    /// false (spec §6).
    pub async fn start(
        config: &ServerConfig,
        codes: DiscoveryCodes,
        tcp_port: u16,
    ) -> std::io::Result<Option<Self>> {
        if !config.multicast_enabled {
            return Ok(None);
        }
        let group = config.multicast_group(config.multicast_family_v6);
        let socket = bind_multicast(group, config.multicast_port, config.if_name.as_deref())?;
        socket.set_recv_buffer_size(config.so_rcv_buf)?;
        let socket = UdpSocket::from_std(socket.into())?;

        let hostname = config
            .this_node()
            .map(|node| node.hostname.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let ssl_enabled = config.ssl.is_secure();

        let running = Arc::new(AtomicBool::new(true));
        let task_running = Arc::clone(&running);
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; crate::discovery::frame::MAX_FRAME_LEN];
            while task_running.load(Ordering::Acquire) {
                let (len, peer) = match socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::warn!("multicast responder recv failed: {err}");
                        continue;
                    }
                };
                if !DiscoveryFrame::has_code(&buf[..len], codes.request_code) {
                    continue;
                }
                let reply = DiscoveryFrame {
                    code: codes.response_code,
                    hostname: hostname.clone(),
                    ssl_enabled,
                    tcp_port,
                };
                match reply.encode() {
                    Ok(bytes) => {
                        if let Err(err) = socket.send_to(&bytes, peer).await {
                            log::warn!("multicast responder reply to {peer} failed: {err}");
                        }
                    }
                    Err(err) => log::warn!("failed to encode discovery reply: {err}"),
                }
            }
        });

        Ok(Some(Self {
            running,
            task: Some(task),
        }))
    }

    /// Stops the responder loop (spec §4.H step 6).
    pub async fn halt(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Picks the local interface address to join the IPv4 group on: an
/// explicit `if_name` already pins the socket to that device via
/// `bind_device`, so the OS resolves the join against it regardless of
/// which address is passed here. With no explicit name, join on the
/// interface associated with the local host's primary address rather
/// than leaving it to the OS's default-route interface (spec §4.C
/// "else pick the interface associated with the local host's primary
/// address").
fn join_interface_v4(if_name: Option<&str>) -> Ipv4Addr {
    if if_name.is_some() {
        return Ipv4Addr::UNSPECIFIED;
    }
    // Falls back to "any interface" if the host has no usable default
    // route (e.g. a loopback-only sandbox) rather than failing the bind.
    match interface::primary_local_addr() {
        Ok(IpAddr::V4(addr)) => addr,
        _ => Ipv4Addr::UNSPECIFIED,
    }
}

fn bind_multicast(group: IpAddr, port: u16, if_name: Option<&str>) -> std::io::Result<Socket> {
    match group {
        IpAddr::V4(group_v4) => {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            socket.set_reuse_address(true)?;
            #[cfg(unix)]
            if let Some(name) = if_name {
                socket.bind_device(Some(name.as_bytes()))?;
            }
            socket.set_nonblocking(true)?;
            socket.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port).into())?;
            let join_addr = join_interface_v4(if_name);
            socket.join_multicast_v4(&group_v4, &join_addr)?;
            Ok(socket)
        }
        IpAddr::V6(group_v6) => {
            let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
            socket.set_reuse_address(true)?;
            #[cfg(unix)]
            if let Some(name) = if_name {
                socket.bind_device(Some(name.as_bytes()))?;
            }
            socket.set_nonblocking(true)?;
            socket.bind(&SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port).into())?;
            let ifindex = interface::resolve_ifindex(if_name)?;
            socket.join_multicast_v6(&group_v6, ifindex)?;
            Ok(socket)
        }
    }
}
