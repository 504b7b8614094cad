//! Server configuration (spec §6).
//!
//! Shaped like the teacher crate's `WriterConfig`/`ReaderConfig`: a plain
//! struct with a `Default` impl matching the documented defaults, usable
//! either built up programmatically or loaded from a config file via
//! `serde`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One entry in the cluster's node list; a server instance picks
/// `nodes[instance]` (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNode {
    pub id: String,
    pub hostname: String,
    pub port: u16,
}

/// Whether accepted sockets are wrapped in TLS (spec §4.F, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SslConfig {
    Plain,
    Secure {
        cert_chain_path: String,
        private_key_path: String,
    },
}

impl SslConfig {
    pub fn is_secure(&self) -> bool {
        matches!(self, SslConfig::Secure { .. })
    }
}

impl Default for SslConfig {
    fn default() -> Self {
        SslConfig::Plain
    }
}

/// Client-side socket options advertised to replica connections (spec §6).
/// The server applies these to each accepted socket before handing it to
/// the Agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientSocketOptions {
    pub tcp_no_delay: bool,
    pub keep_alive: bool,
    pub so_snd_buf: usize,
    pub so_linger: Option<Duration>,
}

impl Default for ClientSocketOptions {
    fn default() -> Self {
        Self {
            tcp_no_delay: true,
            keep_alive: true,
            so_snd_buf: 8 * 1024,
            so_linger: Some(Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bridge heartbeat tick cadence (`H` in spec §4.B).
    pub heartbeat_frequency: Duration,
    pub multicast_enabled: bool,
    pub multicast_address: Option<IpAddr>,
    /// Selects the IPv6 default multicast group instead of the IPv4 one
    /// when `multicast_address` is not set (spec §4.C family selection).
    pub multicast_family_v6: bool,
    pub multicast_port: u16,
    pub so_rcv_buf: usize,
    pub if_name: Option<String>,
    pub ssl: SslConfig,
    pub nodes: Vec<ServerNode>,
    /// Which entry of `nodes` this process instance is.
    pub instance: usize,
    pub client_socket_options: ClientSocketOptions,
    /// Per-subscription, per-writer-index bounded queue depth for the
    /// event bridge (added; not named explicitly in spec §6 but required
    /// to realize "bounded queue" from spec §4.B).
    pub bridge_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_frequency: Duration::from_millis(1000),
            multicast_enabled: true,
            multicast_address: None,
            multicast_family_v6: false,
            multicast_port: 4446,
            so_rcv_buf: 1024 * 1024,
            if_name: None,
            ssl: SslConfig::default(),
            nodes: Vec::new(),
            instance: 0,
            client_socket_options: ClientSocketOptions::default(),
            bridge_queue_capacity: 1024,
        }
    }
}

pub const DEFAULT_MULTICAST_GROUP_V4: Ipv4Addr = Ipv4Addr::new(230, 100, 12, 4);
pub const DEFAULT_MULTICAST_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 0, 0x0231, 0x4500);

impl ServerConfig {
    /// This instance's node entry, if `nodes`/`instance` are configured.
    pub fn this_node(&self) -> Option<&ServerNode> {
        self.nodes.get(self.instance)
    }

    /// Resolves the multicast group for `family`, honoring an explicit
    /// override, else the address-family default (spec §4.C).
    pub fn multicast_group(&self, family_is_v6: bool) -> IpAddr {
        if let Some(addr) = self.multicast_address {
            return addr;
        }
        if family_is_v6 {
            IpAddr::V6(DEFAULT_MULTICAST_GROUP_V6)
        } else {
            IpAddr::V4(DEFAULT_MULTICAST_GROUP_V4)
        }
    }

    /// Fails with a configuration error if anything required is missing.
    /// Mirrors the teacher's constructor-time validation in
    /// `ControlFile::create`/`wait_ready` (checked fields, explicit
    /// error variant) rather than panicking.
    pub fn validate(&self) -> Result<(), crate::error::ServerError> {
        if self.nodes.is_empty() {
            return Err(crate::error::ServerError::Configuration(
                "nodes list must not be empty".to_string(),
            ));
        }
        if self.this_node().is_none() {
            return Err(crate::error::ServerError::Configuration(format!(
                "instance {} out of range for {} configured nodes",
                self.instance,
                self.nodes.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_frequency, Duration::from_millis(1000));
        assert!(cfg.multicast_enabled);
        assert_eq!(cfg.multicast_port, 4446);
        assert_eq!(cfg.so_rcv_buf, 1024 * 1024);
        assert!(cfg.client_socket_options.tcp_no_delay);
        assert!(cfg.client_socket_options.keep_alive);
        assert_eq!(cfg.client_socket_options.so_snd_buf, 8 * 1024);
        assert_eq!(cfg.client_socket_options.so_linger, Some(Duration::ZERO));
    }

    #[test]
    fn multicast_group_defaults_by_family() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.multicast_group(false), IpAddr::V4(DEFAULT_MULTICAST_GROUP_V4));
        assert_eq!(cfg.multicast_group(true), IpAddr::V6(DEFAULT_MULTICAST_GROUP_V6));
    }

    #[test]
    fn validate_rejects_out_of_range_instance() {
        let mut cfg = ServerConfig::default();
        cfg.nodes.push(ServerNode {
            id: "a".into(),
            hostname: "localhost".into(),
            port: 9000,
        });
        cfg.instance = 1;
        assert!(cfg.validate().is_err());
    }
}
