//! Owns one byte channel plus its remote address; closes idempotently
//! (spec §4.D).
//!
//! Force-close has to be able to unblock a Handler that is suspended
//! inside `Agent::process` on a read from this exact socket, from a
//! different task. Rather than taking a lock the suspended read already
//! holds (which would deadlock), this shuts the raw fd down directly —
//! the same trick the teacher crate's `notifier.rs` uses to wake a thread
//! blocked in `poll()` by writing to an eventfd from another thread: an
//! OS-level primitive that is safe to signal concurrently with whatever
//! is blocked on it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Marker trait for anything the Agent can read/write as its connection
/// channel. The concrete type (plain TCP or TLS-wrapped) is erased here —
/// spec §1 treats the wire codec as an external collaborator.
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Channel for T {}

pub type BoxedChannel = Box<dyn Channel>;

pub type ConnectionId = u64;

pub struct ConnectionHolder {
    id: ConnectionId,
    remote_addr: SocketAddr,
    #[cfg(unix)]
    raw_fd: RawFd,
    channel: Mutex<Option<BoxedChannel>>,
    closed: AtomicBool,
}

impl ConnectionHolder {
    #[cfg(unix)]
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        raw_fd: RawFd,
        channel: BoxedChannel,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            remote_addr,
            raw_fd,
            channel: Mutex::new(Some(channel)),
            closed: AtomicBool::new(false),
        })
    }

    #[cfg(not(unix))]
    pub fn new(id: ConnectionId, remote_addr: SocketAddr, channel: BoxedChannel) -> Arc<Self> {
        Arc::new(Self {
            id,
            remote_addr,
            channel: Mutex::new(Some(channel)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Exclusively hands the channel over to the caller. The Handler
    /// calls this exactly once, right after the Acceptor registers the
    /// holder (spec §3 invariant on channel ownership).
    pub fn take_channel(&self) -> Option<BoxedChannel> {
        self.channel.lock().unwrap().take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent close. `forced` distinguishes a Handler-initiated
    /// disconnect from a Server-initiated force-close during `halt`
    /// (spec §4.D). Errors are swallowed to a warning; the holder is
    /// unusable thereafter regardless.
    pub fn close(&self, forced: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.shutdown_socket() {
            log::warn!(
                "closing connection {} ({}) failed: {err}",
                self.id,
                self.remote_addr
            );
        }
        if forced {
            log::info!("connection {} ({}) forced closed", self.id, self.remote_addr);
        } else {
            log::info!("connection {} ({}) disconnected", self.id, self.remote_addr);
        }
    }

    #[cfg(unix)]
    fn shutdown_socket(&self) -> std::io::Result<()> {
        let rc = unsafe { libc::shutdown(self.raw_fd, libc::SHUT_RDWR) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOTCONN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn shutdown_socket(&self) -> std::io::Result<()> {
        Ok(())
    }
}
