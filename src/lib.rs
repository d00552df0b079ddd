//! Client implementation of the Cardano Ouroboros node-to-node (NtN) wire
//! stack: a version-negotiating handshake, an 8-byte SDU multiplexer
//! carrying several mini-protocols over one TCP connection, and a one-shot
//! ChainSync intersect query to recover a producer's current tip, with
//! optional PeerSharing.

pub mod bearer;
pub mod orchestrator;
pub mod plexer;

pub mod miniprotocols;

pub use orchestrator::{fetch_tip, Endpoint, Error, FetchTipReport, Options, PeerClient};
