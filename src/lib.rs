//! `nodes-hub`: a test-harness network hub that interposes on
//! peer-to-peer traffic between a set of locally-running blockchain
//! nodes.
//!
//! It lets an experimenter build an arbitrary directed connectivity graph
//! between nodes, inject per-edge artificial latency, and rewrite the
//! advertised listening port inside each node's handshake message, so that
//! nodes discovering peers through the hub reach those peers *via the
//! hub* rather than directly.
//!
//! The node implementation itself, the double-SHA256 hashing primitive,
//! and the node-index-to-port allocation convention are all external
//! collaborators this crate is handed through [`hub::HubConfig`] and
//! [`hub::NodeController`], not concerns of this crate.

pub mod async_runtime;
pub mod communication;
pub mod crypto;
pub mod error;
pub mod hub;

pub use communication::{DirectedEdge, NodeIndex};
pub use hub::{AddNodeMode, Hub, HubConfig, InProcessController, NodeController, NullController};
