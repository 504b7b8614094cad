use std::fmt;

/// Errors the [`crate::agent::Agent`] contract may raise from a single
/// `process` step. See spec §4.E / §7.
#[derive(Debug)]
pub enum AgentError {
    /// The peer hung up; the connection ends normally.
    Disconnected,
    /// A cluster peer claims authority; the whole server must halt.
    ClusterLoss { peer_instance_id: u32 },
    /// A non-recoverable transport error; the connection ends.
    Network(std::io::Error),
    /// The authorization hook denied the connecting identity.
    AuthorizationDenied,
    /// Any other per-connection failure (malformed frame, etc).
    Protocol(anyhow::Error),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Disconnected => write!(f, "peer disconnected"),
            AgentError::ClusterLoss { peer_instance_id } => {
                write!(f, "lost cluster vote to instance {peer_instance_id}")
            }
            AgentError::Network(err) => write!(f, "network error: {err}"),
            AgentError::AuthorizationDenied => write!(f, "authorization denied"),
            AgentError::Protocol(err) => write!(f, "protocol error: {err}"),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Network(err) => Some(err),
            AgentError::Protocol(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(value: std::io::Error) -> Self {
        AgentError::Network(value)
    }
}

/// Server-level error taxonomy (spec §7).
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server is not in the expected state for this operation")]
    InvalidState,

    #[error("handler submission rejected, pool is shutting down")]
    SubmissionRejected,
}

pub type Result<T> = std::result::Result<T, ServerError>;
