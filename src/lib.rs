//! Replication server for an append-only time-series journal store:
//! long-lived replica connections, a cluster quorum self-halt signal, and
//! on-demand multicast discovery of this node's TCP endpoint.

pub mod acceptor;
pub mod agent;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod handler;
#[cfg(feature = "cli")]
pub mod logging;
pub mod registry;
pub mod server;

pub use agent::{Agent, AllowAll, AuthorizationHook};
pub use bridge::{BridgeEvent, CommitEvent, EventBridge, NextEventOutcome, SubscriptionHandle};
pub use config::ServerConfig;
pub use connection::{BoxedChannel, ConnectionHolder};
pub use discovery::{DiscoveredNode, DiscoveryCodes, DiscoveryFrame, MulticastResponder};
pub use error::{AgentError, ServerError};
pub use registry::{CommitListener, JournalKey, Writer, WriterIndex, WriterRegistry, NOT_FOUND};
pub use server::{Server, ServerState};
