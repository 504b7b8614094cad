//! Drives one [`Agent`] over one [`ConnectionHolder`] until it disconnects,
//! errors, or is force-closed (spec §4.G).

use std::sync::Arc;

use crate::agent::Agent;
use crate::connection::ConnectionHolder;
use crate::error::AgentError;
use crate::server::HaltHandle;

/// Runs the cooperative `Agent::process` loop for one connection to
/// completion. Always closes the holder and calls `Agent::close` on the
/// way out, whichever branch got it there (spec §4.G invariant).
pub async fn run(
    holder: Arc<ConnectionHolder>,
    mut agent: Box<dyn Agent>,
    halt_handle: Arc<HaltHandle>,
) {
    let mut channel = match holder.take_channel() {
        Some(channel) => channel,
        None => return,
    };

    loop {
        if holder.is_closed() {
            break;
        }
        match agent.process(&mut channel).await {
            Ok(()) => continue,
            Err(AgentError::Disconnected) => {
                holder.close(false);
                break;
            }
            Err(AgentError::ClusterLoss { peer_instance_id }) => {
                log::warn!(
                    "connection {} reported cluster loss to instance {peer_instance_id}, requesting halt",
                    holder.remote_addr()
                );
                halt_handle.request_cluster_loss();
                holder.close(false);
                break;
            }
            Err(AgentError::AuthorizationDenied) => {
                log::warn!("connection {} denied authorization", holder.remote_addr());
                holder.close(false);
                break;
            }
            Err(AgentError::Network(err)) => {
                log::warn!("connection {} network error: {err}", holder.remote_addr());
                holder.close(false);
                break;
            }
            Err(AgentError::Protocol(err)) => {
                log::warn!("connection {} protocol error: {err}", holder.remote_addr());
                holder.close(false);
                break;
            }
        }
    }

    agent.close().await;
}
