//! Reaching a ring from outside of it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::actor::client::RpcClient;
use crate::actor::config::DEFAULT_MAX_REDIRECTS;
use crate::common::{Id, IdSpace, Node, RequestSpecific, ResponseSpecific};
use crate::core::router::{locate_owner, Lookup};
use crate::error::RingError;
use crate::transport::{TcpTransport, Transport, DEFAULT_REQUEST_TIMEOUT};

#[derive(Debug, Clone)]
/// Locates owners and reads or writes values through any node of a ring,
/// without being a member of it.
///
/// Requests refused with [RingError::NotOwner], because the ring was rewired
/// between routing and the request, are routed again from the refusing node.
pub struct Client {
    rpc: RpcClient,
    entry: Option<SocketAddr>,
    max_redirects: usize,
}

impl Client {
    /// Create a client over TCP, entering the ring at `entry`.
    ///
    /// With no entry the ring is considered empty and every operation returns
    /// [RingError::NoOwner].
    pub fn new(entry: Option<SocketAddr>) -> Self {
        Self::with_transport(Arc::new(TcpTransport::new()), entry)
    }

    /// Create a client over any [Transport].
    pub fn with_transport(transport: Arc<dyn Transport>, entry: Option<SocketAddr>) -> Self {
        Client {
            rpc: RpcClient::new(transport, IdSpace::default(), DEFAULT_REQUEST_TIMEOUT),
            entry,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Set the identifier space of the ring, it has to match the nodes'.
    pub fn with_space(mut self, space: IdSpace) -> Self {
        self.rpc.space = space;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.rpc.request_timeout = request_timeout;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    // === Getters ===

    pub fn entry(&self) -> Option<SocketAddr> {
        self.entry
    }

    pub fn space(&self) -> &IdSpace {
        &self.rpc.space
    }

    pub(crate) fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    // === Public Methods ===

    /// Find the node owning `key`.
    pub fn locate_owner(&self, key: Id) -> Result<Lookup, RingError> {
        let entry = self.entry_node()?;

        locate_owner(&self.rpc, &self.rpc.space, entry, key)
    }

    /// Read the value stored under `key`, `None` if there is none.
    pub fn lookup(&self, key: Id) -> Result<Option<Bytes>, RingError> {
        self.with_owner(key, |owner| self.rpc.lookup(owner.address, key))
    }

    /// Store `value` under `key`, overwriting any previous value.
    ///
    /// Returns the node that stored it.
    pub fn store(&self, key: Id, value: impl Into<Bytes>) -> Result<Node, RingError> {
        let value = value.into();

        self.with_owner(key, |owner| {
            self.rpc.store(owner.address, key, value.clone())?;
            Ok(*owner)
        })
    }

    /// Successor of the node at `address`.
    pub fn successor_of(&self, address: SocketAddr) -> Result<Node, RingError> {
        self.rpc.get_successor(address)
    }

    /// Predecessor of the node at `address`, if it knows one.
    pub fn predecessor_of(&self, address: SocketAddr) -> Result<Option<Node>, RingError> {
        self.rpc.get_predecessor(address)
    }

    /// Finger `index` of the node at `address`, if populated.
    pub fn finger_of(&self, address: SocketAddr, index: u8) -> Result<Option<Node>, RingError> {
        self.rpc.get_finger(address, index)
    }

    /// Returns the id of the node at `address`.
    pub fn ping(&self, address: SocketAddr) -> Result<Id, RingError> {
        self.rpc.ping(address)
    }

    /// Send any request to the node at `address`.
    pub fn request(
        &self,
        address: SocketAddr,
        request: RequestSpecific,
    ) -> Result<ResponseSpecific, RingError> {
        self.rpc.request(address, request)
    }

    // === Private Methods ===

    fn entry_node(&self) -> Result<Node, RingError> {
        let address = self.entry.ok_or(RingError::NoOwner)?;
        let id = self.rpc.ping(address)?;

        Ok(Node::new(id, address))
    }

    fn with_owner<T, F>(&self, key: Id, operation: F) -> Result<T, RingError>
    where
        F: Fn(&Node) -> Result<T, RingError>,
    {
        let mut entry = self.entry_node()?;
        let mut redirects = 0;

        loop {
            let owner = locate_owner(&self.rpc, &self.rpc.space, entry, key)?.owner;

            match operation(&owner) {
                Err(RingError::NotOwner { responder }) if redirects < self.max_redirects => {
                    redirects += 1;
                    debug!(?key, ?responder, redirects, "Owner refused, routing again");

                    entry = owner;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use crate::common::messages::ERROR_NOT_OWNER;
    use crate::common::{
        ErrorSpecific, Id, IdSpace, Node, RequestSpecific, ResponseSpecific, Step,
    };
    use crate::error::RingError;
    use crate::transport::{IncomingRequest, LocalNetwork, Transport};

    use super::Client;

    /// A lone node that claims every key, but refuses the first `refusals` lookups.
    fn stubborn(network: &LocalNetwork, refusals: usize) -> SocketAddr {
        let (sender, receiver) = flume::unbounded::<IncomingRequest>();
        let address = network
            .serve("127.0.0.1:0".parse().unwrap(), Box::new(sender))
            .unwrap();
        let me = Node::new(Id(7), address);

        std::thread::spawn(move || {
            let mut refused = 0;

            for incoming in receiver.iter() {
                let result = match incoming.request {
                    RequestSpecific::Ping => Ok(ResponseSpecific::Pong { responder_id: me.id }),
                    RequestSpecific::FindSuccessor { .. } => {
                        Ok(ResponseSpecific::Step(Step::Owner {
                            predecessor: me,
                            owner: me,
                        }))
                    }
                    RequestSpecific::Lookup { .. } if refused < refusals => {
                        refused += 1;
                        Err(ErrorSpecific::new(ERROR_NOT_OWNER, "Not owner"))
                    }
                    RequestSpecific::Lookup { .. } => Ok(ResponseSpecific::NotFound),
                    _ => Err(ErrorSpecific::new(ERROR_NOT_OWNER, "Not owner")),
                };

                incoming.responder.respond(result);
            }
        });

        address
    }

    #[test]
    fn no_entry_means_no_owner() {
        let client = Client::with_transport(Arc::new(LocalNetwork::new()), None);

        assert_eq!(client.lookup(Id(1)), Err(RingError::NoOwner));
        assert_eq!(
            client.locate_owner(Id(1)).map(|lookup| lookup.owner),
            Err(RingError::NoOwner)
        );
    }

    #[test]
    fn unreachable_entry() {
        let network = LocalNetwork::new();
        let address: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let client = Client::with_transport(Arc::new(network), Some(address));

        assert_eq!(
            client.lookup(Id(1)),
            Err(RingError::PeerUnreachable { address })
        );
    }

    #[test]
    fn not_owner_is_routed_again() {
        let network = LocalNetwork::new();
        let address = stubborn(&network, 2);

        let client = Client::with_transport(Arc::new(network), Some(address))
            .with_space(IdSpace::new(8).unwrap());

        assert_eq!(client.lookup(Id(3)), Ok(None));
    }

    #[test]
    fn redirects_are_bounded() {
        let network = LocalNetwork::new();
        let address = stubborn(&network, 10);

        let client = Client::with_transport(Arc::new(network), Some(address))
            .with_space(IdSpace::new(8).unwrap())
            .with_max_redirects(1);

        assert_eq!(
            client.lookup(Id(3)),
            Err(RingError::NotOwner { responder: address })
        );
    }
}
