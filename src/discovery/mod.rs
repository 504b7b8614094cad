//! On-demand multicast discovery: lets clients find this server's TCP
//! endpoint without prior configuration (spec §4.C).

pub mod frame;
pub mod interface;
pub mod poller;
pub mod responder;

pub use frame::DiscoveryFrame;
pub use poller::{discover, DiscoveredNode, PollError};
pub use responder::{DiscoveryCodes, MulticastResponder};
