#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

mod actor;
mod client;
mod common;
mod core;
mod dht;
mod error;

#[cfg(feature = "async")]
pub mod async_dht;
pub mod transport;

pub use crate::actor::config::{Config, DEFAULT_MAINTENANCE_INTERVAL, DEFAULT_MAX_REDIRECTS};
pub use crate::actor::Info;
pub use crate::client::Client;
pub use crate::common::{messages, Id, IdSpace, Node, DEFAULT_ID_BITS, MAX_ID_BITS};
pub use crate::core::router::Lookup;
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder, Testnet};

pub mod errors {
    //! Exported errors
    pub use super::common::messages::DecodeError;
    pub use super::common::InvalidIdSpace;
    pub use super::dht::{BuildError, DhtError, DhtWasShutdown};
    pub use super::error::RingError;
    pub use super::transport::{CallError, DialError};
}
