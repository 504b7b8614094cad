use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use journal_replicator::{Agent, AgentError, BoxedChannel, DiscoveryCodes, ServerConfig};
use journal_replicator::config::ServerNode;
use tokio::io::AsyncReadExt;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub fn test_config(port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.multicast_enabled = false;
    config.nodes.push(ServerNode {
        id: "n0".into(),
        hostname: "127.0.0.1".into(),
        port,
    });
    config.instance = 0;
    config
}

pub fn test_codes() -> DiscoveryCodes {
    DiscoveryCodes {
        request_code: 230,
        response_code: 235,
    }
}

/// Records whatever bytes the peer sends, then reports a clean
/// disconnect once the peer closes its end.
struct RecordingAgent {
    received: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl Agent for RecordingAgent {
    fn process<'a>(
        &'a mut self,
        channel: &'a mut BoxedChannel,
    ) -> BoxFuture<'a, Result<(), AgentError>> {
        Box::pin(async move {
            let mut buf = [0u8; 4096];
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

type AgentFactory = Box<dyn Fn(SocketAddr) -> Box<dyn Agent> + Send + Sync>;

/// A factory plus the shared state its eventual `RecordingAgent`
/// instances will populate, so the test can observe what the Handler saw.
pub fn recording_agent_factory() -> (AgentFactory, Arc<Mutex<Vec<u8>>>, Arc<Mutex<bool>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(false));
    let received_for_factory = Arc::clone(&received);
    let closed_for_factory = Arc::clone(&closed);
    let factory: AgentFactory = Box::new(move |_addr| {
        Box::new(RecordingAgent {
            received: Arc::clone(&received_for_factory),
            closed: Arc::clone(&closed_for_factory),
        }) as Box<dyn Agent>
    });
    (factory, received, closed)
}
