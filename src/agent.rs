//! The wire protocol itself is out of scope (spec §1 Non-goals); this
//! module only defines the seam an external protocol implementation
//! plugs into, plus the authorization callback the Handler consults
//! before honoring a subscription request (spec §4.E / §4.I).
//!
//! Both traits below return a boxed future by hand instead of using
//! `async fn` in the trait: the Server holds these behind `Box<dyn Agent>`
//! / `Arc<dyn AuthorizationHook>`, and native `async fn` in traits is not
//! object-safe.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use crate::connection::BoxedChannel;
use crate::error::AgentError;
use crate::registry::JournalKey;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One connection's protocol state machine. `process` is called
/// repeatedly by the Handler until it returns `Err`; a clean
/// disconnect is reported as [`AgentError::Disconnected`], not `Ok`.
pub trait Agent: Send {
    fn process<'a>(&'a mut self, channel: &'a mut BoxedChannel) -> BoxFuture<'a, Result<(), AgentError>>;

    /// Always called exactly once when the Handler loop exits, success or
    /// failure, so the Agent can release resources (spec §4.G).
    fn close<'a>(&'a mut self) -> BoxFuture<'a, ()>;
}

/// Consulted once a client has authenticated and named the journals it
/// wants to follow; denying a request surfaces as
/// [`AgentError::AuthorizationDenied`] (spec §4.I).
pub trait AuthorizationHook: Send + Sync {
    fn authorize<'a>(
        &'a self,
        remote_addr: SocketAddr,
        requested: &'a [JournalKey],
    ) -> BoxFuture<'a, bool>;
}

/// Default hook used where no external policy is configured.
pub struct AllowAll;

impl AuthorizationHook for AllowAll {
    fn authorize<'a>(
        &'a self,
        _remote_addr: SocketAddr,
        _requested: &'a [JournalKey],
    ) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
}

#[cfg(test)]
pub(crate) mod test_doubles {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;

    /// Disconnects on the first poll, without touching the channel.
    pub struct NullAgent;

    impl Agent for NullAgent {
        fn process<'a>(
            &'a mut self,
            _channel: &'a mut BoxedChannel,
        ) -> BoxFuture<'a, Result<(), AgentError>> {
            Box::pin(async { Err(AgentError::Disconnected) })
        }

        fn close<'a>(&'a mut self) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    /// Reads whatever the peer sends until EOF, recording it, then
    /// reports a clean disconnect. Used by lifecycle integration tests
    /// that need to observe a real Handler loop end to end.
    pub struct RecordingAgent {
        pub received: Arc<Mutex<Vec<u8>>>,
        pub closed: Arc<Mutex<bool>>,
    }

    impl RecordingAgent {
        pub fn new() -> Self {
            Self {
                received: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl Agent for RecordingAgent {
        fn process<'a>(
            &'a mut self,
            channel: &'a mut BoxedChannel,
        ) -> BoxFuture<'a, Result<(), AgentError>> {
            Box::pin(async move {
                let mut buf = [0u8; 256];
                let n = channel.read(&mut buf).await?;
                if n == 0 {
                    return Err(AgentError::Disconnected);
                }
                self.received.lock().unwrap().extend_from_slice(&buf[..n]);
                Ok(())
            })
        }

        fn close<'a>(&'a mut self) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                *self.closed.lock().unwrap() = true;
            })
        }
    }

    #[tokio::test]
    async fn allow_all_authorizes_everything() {
        let hook = AllowAll;
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let keys = vec![JournalKey {
            id: "j".into(),
            location: None,
        }];
        assert!(hook.authorize(addr, &keys).await);
    }
}
