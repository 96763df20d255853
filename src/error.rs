//! Main Crate Error

use std::net::SocketAddr;

use crate::common::messages::{
    ERROR_ID_IN_USE, ERROR_LOOKUP_TIMEOUT, ERROR_NOT_OWNER, ERROR_NO_OWNER,
    ERROR_PEER_UNREACHABLE, ERROR_RING_INCONSISTENCY,
};
use crate::common::{ErrorSpecific, Id};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors locating owners, reading and writing values, or rewiring the ring.
pub enum RingError {
    /// Dialing or calling a node failed.
    #[error("Peer unreachable: {address}")]
    PeerUnreachable { address: SocketAddr },

    /// There is no entry node, so the ring is empty.
    #[error("No owner: the ring is empty")]
    NoOwner,

    /// The responder does not own the requested key (or is leaving).
    #[error("Node {responder} does not own the requested key")]
    NotOwner { responder: SocketAddr },

    /// A routing hop did not answer in time.
    #[error("Lookup timed out at {address} after {hops} hops")]
    LookupTimeout { address: SocketAddr, hops: usize },

    /// The successor cycle is broken.
    #[error("Ring inconsistency: {0}")]
    RingInconsistency(String),

    /// A node with the joining node's id is already part of the ring.
    #[error("Id {0} is already in use")]
    IdInUse(Id),

    /// Any other error returned by a remote node.
    #[error("Remote error {}: {}", .0.code, .0.description)]
    Remote(ErrorSpecific),
}

impl RingError {
    /// Rebuild an error received from `address`.
    pub(crate) fn from_remote(error: ErrorSpecific, address: SocketAddr) -> Self {
        match error.code {
            ERROR_NOT_OWNER => RingError::NotOwner { responder: address },
            ERROR_RING_INCONSISTENCY => RingError::RingInconsistency(error.description),
            ERROR_ID_IN_USE => match error.description.parse::<u32>() {
                Ok(id) => RingError::IdInUse(Id(id)),
                Err(_) => RingError::Remote(error),
            },
            ERROR_PEER_UNREACHABLE => match error.description.parse() {
                Ok(address) => RingError::PeerUnreachable { address },
                Err(_) => RingError::Remote(error),
            },
            ERROR_LOOKUP_TIMEOUT => match error.description.parse() {
                Ok(address) => RingError::LookupTimeout { address, hops: 0 },
                Err(_) => RingError::Remote(error),
            },
            ERROR_NO_OWNER => RingError::NoOwner,
            _ => RingError::Remote(error),
        }
    }
}

impl From<RingError> for ErrorSpecific {
    fn from(error: RingError) -> Self {
        match error {
            RingError::PeerUnreachable { address } => {
                ErrorSpecific::new(ERROR_PEER_UNREACHABLE, address.to_string())
            }
            RingError::NoOwner => ErrorSpecific::new(ERROR_NO_OWNER, "No owner"),
            RingError::NotOwner { .. } => ErrorSpecific::new(ERROR_NOT_OWNER, "Not owner"),
            RingError::LookupTimeout { address, .. } => {
                ErrorSpecific::new(ERROR_LOOKUP_TIMEOUT, address.to_string())
            }
            RingError::RingInconsistency(reason) => {
                ErrorSpecific::new(ERROR_RING_INCONSISTENCY, reason)
            }
            RingError::IdInUse(id) => ErrorSpecific::new(ERROR_ID_IN_USE, id.to_string()),
            RingError::Remote(error) => error,
        }
    }
}
