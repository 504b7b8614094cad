//! Listens for replica connections and hands each one a [`BoxedChannel`],
//! wrapping it in TLS first when configured (spec §4.F).
//!
//! The accept loop itself lives here; dispatching an accepted connection to
//! a Handler task is the Server's job (spec §4.H) — this component does not
//! itself decide to halt the server on a fatal accept error, it only
//! reports one via `AcceptedConnection`'s `Err` arm and keeps listening
//! where recoverable.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::{Certificate, PrivateKey, ServerConfig as RustlsServerConfig};
use tokio_rustls::TlsAcceptor;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::config::{ClientSocketOptions, SslConfig};
use crate::connection::{BoxedChannel, ConnectionHolder, ConnectionId};
use crate::error::ServerError;

pub struct Acceptor {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    socket_options: ClientSocketOptions,
    next_id: AtomicU64,
}

impl Acceptor {
    pub async fn bind(
        addr: SocketAddr,
        ssl: &SslConfig,
        socket_options: ClientSocketOptions,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let tls = match ssl {
            SslConfig::Plain => None,
            SslConfig::Secure {
                cert_chain_path,
                private_key_path,
            } => Some(build_tls_acceptor(cert_chain_path, private_key_path)?),
        };
        Ok(Self {
            listener,
            tls,
            socket_options,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one connection, applying the configured client socket
    /// options and completing the TLS handshake if configured. A
    /// handshake failure is logged and the caller should keep accepting
    /// rather than treat it as fatal to the listener.
    pub async fn accept(&self) -> std::io::Result<std::sync::Arc<ConnectionHolder>> {
        loop {
            let (stream, remote_addr) = self.listener.accept().await?;
            if let Err(err) = apply_socket_options(&stream, &self.socket_options) {
                log::warn!("failed to apply client socket options to {remote_addr}: {err}");
            }
            #[cfg(unix)]
            let raw_fd = stream.as_raw_fd();

            let channel: BoxedChannel = match &self.tls {
                None => Box::new(stream),
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => Box::new(tls_stream),
                    Err(err) => {
                        log::warn!("TLS handshake with {remote_addr} failed: {err}");
                        continue;
                    }
                },
            };

            let id: ConnectionId = self.next_id.fetch_add(1, Ordering::Relaxed);
            #[cfg(unix)]
            let holder = ConnectionHolder::new(id, remote_addr, raw_fd, channel);
            #[cfg(not(unix))]
            let holder = ConnectionHolder::new(id, remote_addr, channel);
            return Ok(holder);
        }
    }
}

/// Applies the configured client-side socket options to an accepted
/// stream before it is handed to the Agent (spec §6 "client-side socket
/// options"). `SockRef` borrows the stream's file descriptor rather than
/// taking ownership of it, the same interop shape the teacher crate
/// avoids needing because it never wraps foreign sockets; here it lets
/// `socket2` apply options tokio's `TcpStream` doesn't expose directly.
fn apply_socket_options(stream: &TcpStream, options: &ClientSocketOptions) -> std::io::Result<()> {
    let socket = SockRef::from(stream);
    socket.set_nodelay(options.tcp_no_delay)?;
    if options.keep_alive {
        socket.set_tcp_keepalive(&socket2::TcpKeepalive::new())?;
    }
    socket.set_send_buffer_size(options.so_snd_buf)?;
    socket.set_linger(options.so_linger)?;
    Ok(())
}

fn build_tls_acceptor(
    cert_chain_path: &str,
    private_key_path: &str,
) -> Result<TlsAcceptor, ServerError> {
    let certs = load_certs(cert_chain_path)?;
    let key = load_private_key(private_key_path)?;
    let config = RustlsServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| ServerError::Configuration(format!("invalid TLS certificate/key: {err}")))?;
    Ok(TlsAcceptor::from(std::sync::Arc::new(config)))
}

fn load_certs(path: &str) -> Result<Vec<Certificate>, ServerError> {
    let file = File::open(path)
        .map_err(|err| ServerError::Configuration(format!("cannot open {path}: {err}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .map_err(|err| ServerError::Configuration(format!("invalid certificate chain {path}: {err}")))
        .map(|certs| certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &str) -> Result<PrivateKey, ServerError> {
    let file = File::open(path)
        .map_err(|err| ServerError::Configuration(format!("cannot open {path}: {err}")))?;
    let mut reader = BufReader::new(file);
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|err| ServerError::Configuration(format!("invalid private key {path}: {err}")))?;
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| ServerError::Configuration(format!("no private key found in {path}")))
}
