use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{Id, DEFAULT_ID_BITS};
use crate::transport::{Transport, DEFAULT_REQUEST_TIMEOUT};

/// Default interval between stabilization rounds.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
/// Default number of times a request refused with `NotOwner` is routed again.
pub const DEFAULT_MAX_REDIRECTS: usize = 3;

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// This node's position on the ring.
    ///
    /// Defaults to None, where the hash of the served address is used.
    pub id: Option<Id>,
    /// Width of identifiers in bits, every node of a ring must agree on it.
    ///
    /// Defaults to [DEFAULT_ID_BITS]
    pub bits: u8,
    /// Address to serve on. Port `0` picks any free port.
    ///
    /// Defaults to `127.0.0.1:0`
    pub address: SocketAddr,
    /// Address of any node of an existing ring to join on startup.
    ///
    /// Defaults to None, where the node starts a ring of its own.
    pub bootstrap: Option<SocketAddr>,
    /// Timeout of a single remote call.
    ///
    /// A routing hop that exceeds it fails the lookup with `LookupTimeout`,
    /// any other call with `PeerUnreachable`.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Interval between periodic stabilization rounds.
    ///
    /// Defaults to [DEFAULT_MAINTENANCE_INTERVAL], None disables periodic
    /// stabilization.
    pub maintenance_interval: Option<Duration>,
    /// Route through fingers. When `false` every hop goes to the successor and
    /// fingers are never populated.
    ///
    /// Defaults to `true`
    pub finger_routing: bool,
    /// How many times a `NotOwner` refusal is routed again before it is returned.
    ///
    /// Defaults to [DEFAULT_MAX_REDIRECTS]
    pub max_redirects: usize,
    /// How to reach other nodes.
    ///
    /// Defaults to None, where a new [crate::transport::TcpTransport] is used.
    pub transport: Option<Arc<dyn Transport>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            bits: DEFAULT_ID_BITS,
            address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            bootstrap: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            maintenance_interval: Some(DEFAULT_MAINTENANCE_INTERVAL),
            finger_routing: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            transport: None,
        }
    }
}
