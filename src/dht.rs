//! Dht node.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use crate::actor::config::Config;
use crate::actor::{stabilization, Actor, ActorMessage, Info};
use crate::client::Client;
use crate::common::{Id, IdSpace, InvalidIdSpace, Node};
use crate::core::router::Lookup;
use crate::error::RingError;
use crate::transport::{LocalNetwork, TcpTransport, Transport};

#[derive(Debug, Clone)]
/// A ring node running on its own thread.
///
/// Clones are handles to the same node.
pub struct Dht {
    pub(crate) sender: flume::Sender<ActorMessage>,
    /// Disconnects once the actor thread is done.
    pub(crate) stopped: flume::Receiver<()>,
    node: Node,
    client: Client,
}

#[derive(Debug, Default, Clone)]
/// A builder for the [Dht] node.
pub struct DhtBuilder(Config);

impl DhtBuilder {
    /// Set this node's position on the ring.
    pub fn id(&mut self, id: Id) -> &mut Self {
        self.0.id = Some(id);

        self
    }

    /// Set the width of identifiers in bits.
    pub fn bits(&mut self, bits: u8) -> &mut Self {
        self.0.bits = bits;

        self
    }

    /// Set the address to serve on.
    pub fn address(&mut self, address: SocketAddr) -> &mut Self {
        self.0.address = address;

        self
    }

    /// Join the ring of the node at `bootstrap` once started.
    pub fn bootstrap(&mut self, bootstrap: SocketAddr) -> &mut Self {
        self.0.bootstrap = Some(bootstrap);

        self
    }

    /// Set the timeout of a single remote call.
    pub fn request_timeout(&mut self, request_timeout: Duration) -> &mut Self {
        self.0.request_timeout = request_timeout;

        self
    }

    /// Set the interval between stabilization rounds, None disables them.
    pub fn maintenance_interval(&mut self, interval: Option<Duration>) -> &mut Self {
        self.0.maintenance_interval = interval;

        self
    }

    /// Route through fingers, or only through successors.
    pub fn finger_routing(&mut self, finger_routing: bool) -> &mut Self {
        self.0.finger_routing = finger_routing;

        self
    }

    /// Set how many times a `NotOwner` refusal is routed again.
    pub fn max_redirects(&mut self, max_redirects: usize) -> &mut Self {
        self.0.max_redirects = max_redirects;

        self
    }

    /// Set the [Transport], defaults to a new [TcpTransport].
    pub fn transport(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
        self.0.transport = Some(transport);

        self
    }

    /// Create a node, joining the bootstrap ring if one was set.
    pub fn build(&self) -> Result<Dht, BuildError> {
        Dht::new(self.0.clone())
    }
}

impl Dht {
    /// Create a new Dht node.
    ///
    /// Without a bootstrap address the node forms a ring of its own.
    pub fn new(config: Config) -> Result<Self, BuildError> {
        let space = IdSpace::new(config.bits)?;

        if let Some(id) = config.id {
            if !space.contains(id) {
                return Err(BuildError::IdOutOfRange(id));
            }
        }

        let transport: Arc<dyn Transport> = match &config.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(TcpTransport::new()),
        };

        let (node, sender, stopped) = Actor::spawn(&config, space, transport.clone())?;

        let client = Client::with_transport(transport, Some(node.address))
            .with_space(space)
            .with_request_timeout(config.request_timeout)
            .with_max_redirects(config.max_redirects);

        let dht = Dht {
            sender,
            stopped,
            node,
            client,
        };

        if let Some(bootstrap) = config.bootstrap {
            if let Err(error) = dht.join(bootstrap) {
                dht.shutdown();

                return Err(error.into());
            }
        }

        Ok(dht)
    }

    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    // === Getters ===

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn id(&self) -> Id {
        self.node.id
    }

    /// Address this node is served on.
    pub fn address(&self) -> SocketAddr {
        self.node.address
    }

    /// A [Client] entering the ring at this node.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Information about this node's links, fingers and store.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.sender
            .send(ActorMessage::Info(sender))
            .map_err(|_| DhtWasShutdown)?;

        flume::Selector::new()
            .recv(&receiver, |info| info.map_err(|_| DhtWasShutdown))
            .recv(&self.stopped, |_| Err(DhtWasShutdown))
            .wait()
    }

    pub fn successor(&self) -> Result<Node, DhtWasShutdown> {
        Ok(*self.info()?.successor())
    }

    pub fn predecessor(&self) -> Result<Option<Node>, DhtWasShutdown> {
        Ok(self.info()?.predecessor().copied())
    }

    /// Finger `index`, None if it is not populated or out of range.
    pub fn finger(&self, index: u8) -> Result<Option<Node>, DhtWasShutdown> {
        Ok(self
            .info()?
            .fingers()
            .get(index as usize)
            .copied()
            .flatten())
    }

    // === Public Methods ===

    /// Read the value stored under `key`, routing from this node.
    ///
    /// Returns `Ok(None)` if the owner has no such value.
    pub fn lookup(&self, key: Id) -> Result<Option<Bytes>, DhtError> {
        self.check_running()?;

        Ok(self.client.lookup(key)?)
    }

    /// Store `value` under `key`, overwriting any previous value.
    ///
    /// Returns the node that owns it.
    pub fn store(&self, key: Id, value: impl Into<Bytes>) -> Result<Node, DhtError> {
        self.check_running()?;

        Ok(self.client.store(key, value)?)
    }

    /// Find the owner of `key`, routing from this node.
    pub fn locate_owner(&self, key: Id) -> Result<Lookup, DhtError> {
        self.check_running()?;

        Ok(self.client.locate_owner(key)?)
    }

    /// Join the ring of the node at `bootstrap`.
    ///
    /// This node has to be alone in its own ring.
    pub fn join(&self, bootstrap: SocketAddr) -> Result<(), DhtError> {
        self.check_running()?;

        self.client.rpc().join(bootstrap, self.node)?;

        info!(node = ?self.node, ?bootstrap, "Joined ring");

        Ok(())
    }

    /// Hand this node's values to its successor, leave the ring and shut down.
    pub fn leave(&self) -> Result<(), DhtError> {
        self.check_running()?;

        self.client.rpc().leave(self.node.address, self.node.id)?;
        self.shutdown();

        Ok(())
    }

    /// Run one stabilization round now: verify the successor, notify it, and check
    /// the predecessor.
    pub fn stabilize(&self) -> Result<(), DhtError> {
        self.check_running()?;

        stabilization::stabilize(self.client.rpc(), self.node)?;
        stabilization::check_predecessor(self.client.rpc(), self.node)?;

        Ok(())
    }

    /// Refresh every finger now.
    pub fn fix_fingers(&self) -> Result<(), DhtError> {
        self.check_running()?;

        if self.info()?.finger_routing() {
            stabilization::fix_fingers(self.client.rpc(), self.node)?;
        }

        Ok(())
    }

    /// Stop serving and shut down the actor thread loop.
    ///
    /// The node disappears without a handoff, like a crash. Use [Dht::leave] to
    /// hand its values over first.
    pub fn shutdown(&self) {
        let _ = self.sender.send(ActorMessage::Shutdown);
        let _ = self.stopped.recv();
    }

    // === Private Methods ===

    fn check_running(&self) -> Result<(), DhtWasShutdown> {
        if self.sender.is_disconnected() {
            return Err(DhtWasShutdown);
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
/// Failed to create a [Dht] node.
pub enum BuildError {
    #[error(transparent)]
    IdSpace(#[from] InvalidIdSpace),

    #[error("Id {0} does not fit the configured number of bits")]
    IdOutOfRange(Id),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    Io(#[from] std::io::Error),

    #[error("Failed to join the bootstrap ring: {0}")]
    Join(#[from] DhtError),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Dht Actor thread was shutdown.
#[error("Dht node was shutdown")]
pub struct DhtWasShutdown;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors returned by [Dht] operations.
pub enum DhtError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Shutdown(#[from] DhtWasShutdown),
}

/// Create a testnet of Dht nodes in one process, over a [LocalNetwork].
///
/// Nodes run no periodic stabilization, so the ring only changes through joins,
/// leaves and explicit [Dht::stabilize] calls. All nodes are shut down on drop.
#[derive(Debug)]
pub struct Testnet {
    pub nodes: Vec<Dht>,
    network: LocalNetwork,
    space: IdSpace,
    finger_routing: bool,
}

impl Testnet {
    /// Create a ring of `count` nodes with random ids on 32 bits.
    pub fn new(count: usize) -> Result<Testnet, BuildError> {
        let space = IdSpace::default();

        let mut ids = HashSet::with_capacity(count);
        while ids.len() < count {
            ids.insert(space.random());
        }
        let ids: Vec<Id> = ids.into_iter().collect();

        Self::with_config(space.bits(), &ids, true)
    }

    /// Create a ring of nodes with the given ids, joined in order.
    pub fn with_ids(bits: u8, ids: &[u32]) -> Result<Testnet, BuildError> {
        let ids: Vec<Id> = ids.iter().copied().map(Id).collect();

        Self::with_config(bits, &ids, true)
    }

    /// Create a ring of nodes with the given ids, optionally without fingers.
    pub fn with_config(bits: u8, ids: &[Id], finger_routing: bool) -> Result<Testnet, BuildError> {
        let mut testnet = Testnet {
            nodes: Vec::with_capacity(ids.len()),
            network: LocalNetwork::new(),
            space: IdSpace::new(bits)?,
            finger_routing,
        };

        for id in ids {
            testnet.add(*id)?;
        }

        Ok(testnet)
    }

    /// Start a node with `id` and join it to the ring.
    pub fn add(&mut self, id: Id) -> Result<&Dht, BuildError> {
        let mut builder = self.node_builder();
        builder.id(id);

        let node = builder.build()?;
        self.nodes.push(node);

        Ok(&self.nodes[self.nodes.len() - 1])
    }

    /// A builder for a node of this testnet, bootstrapping off its first node.
    pub fn node_builder(&self) -> DhtBuilder {
        let mut builder = Dht::builder();
        builder
            .bits(self.space.bits())
            .maintenance_interval(None)
            .finger_routing(self.finger_routing)
            .transport(Arc::new(self.network.clone()));

        if let Some(bootstrap) = self.bootstrap() {
            builder.bootstrap(bootstrap);
        }

        builder
    }

    /// The network every node of this testnet is served on.
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    pub fn nodes(&self) -> &[Dht] {
        &self.nodes
    }

    pub fn space(&self) -> &IdSpace {
        &self.space
    }

    /// Address of the first node, if any.
    pub fn bootstrap(&self) -> Option<SocketAddr> {
        self.nodes.first().map(|node| node.address())
    }

    /// A [Client] entering the ring at the first node.
    pub fn client(&self) -> Client {
        Client::with_transport(Arc::new(self.network.clone()), self.bootstrap())
            .with_space(self.space)
    }
}

impl Drop for Testnet {
    fn drop(&mut self) {
        for node in &self.nodes {
            node.shutdown();
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::error::RingError;

    use super::*;

    #[test]
    fn shutdown() {
        let testnet = Testnet::with_ids(8, &[10]).unwrap();
        let dht = testnet.nodes[0].clone();

        let clone = dht.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));

            clone.shutdown();
        });
        handle.join().unwrap();

        assert_eq!(dht.lookup(Id(1)), Err(DhtError::Shutdown(DhtWasShutdown)));
        assert!(matches!(dht.info(), Err(DhtWasShutdown)));
        assert_eq!(testnet.network().len(), 0);
    }

    #[test]
    fn lone_node_owns_everything() {
        let testnet = Testnet::with_ids(8, &[10]).unwrap();
        let dht = &testnet.nodes[0];

        for key in [0, 10, 11, 255] {
            assert_eq!(dht.locate_owner(Id(key)).unwrap().owner, *dht.node());
        }

        let info = dht.info().unwrap();
        assert_eq!(info.successor(), dht.node());
        assert_eq!(info.predecessor(), Some(dht.node()));
        assert!(info.fingers().iter().all(|finger| finger == &Some(*dht.node())));
    }

    #[test]
    fn store_and_lookup() {
        let testnet = Testnet::with_ids(8, &[10, 100, 200]).unwrap();

        let owner = testnet.nodes[0].store(Id(150), "hello").unwrap();
        assert_eq!(owner.id, Id(200));

        for node in &testnet.nodes {
            assert_eq!(
                node.lookup(Id(150)).unwrap(),
                Some(Bytes::from_static(b"hello"))
            );
        }

        assert_eq!(testnet.nodes[1].lookup(Id(151)).unwrap(), None);
    }

    #[test]
    fn builder_validates_id() {
        let result = Dht::builder()
            .bits(8)
            .id(Id(256))
            .transport(Arc::new(LocalNetwork::new()))
            .build();

        assert!(matches!(result, Err(BuildError::IdOutOfRange(Id(256)))));

        let result = Dht::builder()
            .bits(0)
            .transport(Arc::new(LocalNetwork::new()))
            .build();

        assert!(matches!(result, Err(BuildError::IdSpace(_))));
    }

    #[test]
    fn join_unreachable_bootstrap() {
        let network = LocalNetwork::new();
        let address: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let result = Dht::builder()
            .bits(8)
            .id(Id(1))
            .maintenance_interval(None)
            .transport(Arc::new(network.clone()))
            .bootstrap(address)
            .build();

        assert!(matches!(
            result,
            Err(BuildError::Join(DhtError::Ring(RingError::PeerUnreachable { .. })))
        ));
        // The failed node was shut down.
        assert!(network.is_empty());
    }

    #[test]
    fn leave_shuts_down() {
        let mut testnet = Testnet::with_ids(8, &[10, 100]).unwrap();
        let leaving = testnet.nodes.remove(1);

        leaving.leave().unwrap();

        assert_eq!(leaving.lookup(Id(1)), Err(DhtError::Shutdown(DhtWasShutdown)));
        assert_eq!(testnet.nodes[0].successor().unwrap(), *testnet.nodes[0].node());
    }
}
