//! In-process transport, every node of a [crate::Testnet] shares one.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use super::{
    await_answer, CallError, Connection, DialError, Inbox, IncomingRequest, Responder, Transport,
};
use crate::common::{RequestSpecific, ResponseSpecific};

const FIRST_PORT: u16 = 10_000;

type Registry = HashMap<SocketAddr, Arc<dyn Inbox>>;

#[derive(Clone, Default)]
/// A map of served addresses to inboxes. Clones share the same map.
///
/// Served addresses are fake `127.0.0.1` ports, nothing is bound.
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    registry: Mutex<Registry>,
    next_port: AtomicU16,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `address` unreachable without telling the node behind it, like a crash
    /// or a network partition.
    pub fn disconnect(&self, address: SocketAddr) {
        self.registry().remove(&address);
    }

    /// Number of served addresses.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_address(&self) -> SocketAddr {
        let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);

        SocketAddr::from((Ipv4Addr::LOCALHOST, FIRST_PORT.wrapping_add(port)))
    }
}

impl Transport for LocalNetwork {
    fn dial(&self, address: SocketAddr) -> Result<Box<dyn Connection>, DialError> {
        let inbox = self
            .registry()
            .get(&address)
            .cloned()
            .ok_or(DialError::Unreachable(address))?;

        Ok(Box::new(LocalConnection { address, inbox }))
    }

    fn serve(
        &self,
        address: SocketAddr,
        inbox: Box<dyn Inbox>,
    ) -> Result<SocketAddr, std::io::Error> {
        let mut registry = self.registry();

        let address = if address.port() == 0 {
            let mut address = self.next_address();
            while registry.contains_key(&address) {
                address = self.next_address();
            }
            address
        } else {
            address
        };

        if registry.contains_key(&address) {
            return Err(std::io::Error::new(
                ErrorKind::AddrInUse,
                format!("{address} is already served"),
            ));
        }

        registry.insert(address, Arc::from(inbox));

        Ok(address)
    }

    fn stop(&self, address: SocketAddr) {
        self.disconnect(address);
    }
}

impl Debug for LocalNetwork {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "LocalNetwork{{ served: {} }}", self.len())
    }
}

struct LocalConnection {
    address: SocketAddr,
    inbox: Arc<dyn Inbox>,
}

impl Connection for LocalConnection {
    fn call(
        &mut self,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific, CallError> {
        trace!(context = "local_request", address = ?self.address, method = request.method());

        let (responder, answer) = Responder::new();

        let delivered = self.inbox.deliver(IncomingRequest {
            from: None,
            request,
            responder,
        });

        if !delivered {
            return Err(CallError::ConnectionLost);
        }

        await_answer(&answer, timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::common::Id;

    fn echo(network: &LocalNetwork) -> SocketAddr {
        let (sender, receiver) = flume::unbounded::<IncomingRequest>();
        let address = network
            .serve("127.0.0.1:0".parse().unwrap(), Box::new(sender))
            .unwrap();

        thread::spawn(move || {
            for incoming in receiver.iter() {
                incoming.responder.respond(Ok(ResponseSpecific::Pong {
                    responder_id: Id(7),
                }));
            }
        });

        address
    }

    #[test]
    fn call_served_address() {
        let network = LocalNetwork::new();
        let address = echo(&network);

        let mut connection = network.dial(address).unwrap();
        let response = connection
            .call(RequestSpecific::Ping, Duration::from_secs(1))
            .unwrap();

        assert_eq!(
            response,
            ResponseSpecific::Pong {
                responder_id: Id(7)
            }
        );
    }

    #[test]
    fn ports_are_allocated() {
        let network = LocalNetwork::new();

        let a = echo(&network);
        let b = echo(&network);

        assert_ne!(a, b);
        assert_eq!(network.len(), 2);
    }

    #[test]
    fn disconnected_address_is_unreachable() {
        let network = LocalNetwork::new();
        let address = echo(&network);

        network.disconnect(address);

        assert!(matches!(
            network.dial(address),
            Err(DialError::Unreachable(unreachable)) if unreachable == address
        ));
    }

    #[test]
    fn silent_node_times_out() {
        let network = LocalNetwork::new();
        let (sender, _receiver) = flume::unbounded::<IncomingRequest>();
        let address = network
            .serve("127.0.0.1:0".parse().unwrap(), Box::new(sender))
            .unwrap();

        let mut connection = network.dial(address).unwrap();

        assert!(matches!(
            connection.call(RequestSpecific::Ping, Duration::from_millis(10)),
            Err(CallError::Timeout)
        ));
    }

    #[test]
    fn dropped_node_loses_connection() {
        let network = LocalNetwork::new();
        let (sender, receiver) = flume::unbounded::<IncomingRequest>();
        let address = network
            .serve("127.0.0.1:0".parse().unwrap(), Box::new(sender))
            .unwrap();

        drop(receiver);

        let mut connection = network.dial(address).unwrap();

        assert!(matches!(
            connection.call(RequestSpecific::Ping, Duration::from_secs(1)),
            Err(CallError::ConnectionLost)
        ));
    }

    #[test]
    fn address_in_use() {
        let network = LocalNetwork::new();
        let address = echo(&network);
        let (sender, _receiver) = flume::unbounded::<IncomingRequest>();

        let error = network.serve(address, Box::new(sender)).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::AddrInUse);
    }
}
