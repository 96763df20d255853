//! AsyncDht node.

use std::net::SocketAddr;
use std::thread;

use bytes::Bytes;

use crate::{
    actor::{ActorMessage, Info},
    common::{Id, Node},
    core::router::Lookup,
    dht::{Dht, DhtError, DhtWasShutdown},
};

impl Dht {
    /// Return an async version of the Dht node.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    /// Return the blocking version of this node.
    pub fn as_sync(self) -> Dht {
        self.0
    }

    // === Getters ===

    pub fn node(&self) -> &Node {
        self.0.node()
    }

    pub fn id(&self) -> Id {
        self.0.id()
    }

    pub fn address(&self) -> SocketAddr {
        self.0.address()
    }

    /// Information about this node's links, fingers and store.
    pub async fn info(&self) -> Result<Info, DhtWasShutdown> {
        self.blocking(|dht| Ok(dht.info()?))
            .await
            .map_err(|_| DhtWasShutdown)
    }

    pub async fn successor(&self) -> Result<Node, DhtWasShutdown> {
        Ok(*self.info().await?.successor())
    }

    pub async fn predecessor(&self) -> Result<Option<Node>, DhtWasShutdown> {
        Ok(self.info().await?.predecessor().copied())
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&self) {
        let _ = self.0.sender.send(ActorMessage::Shutdown);
        let _ = self.0.stopped.recv_async().await;
    }

    /// Async version of [Dht::lookup]
    pub async fn lookup(&self, key: Id) -> Result<Option<Bytes>, DhtError> {
        self.blocking(move |dht| dht.lookup(key)).await
    }

    /// Async version of [Dht::store]
    pub async fn store(&self, key: Id, value: impl Into<Bytes>) -> Result<Node, DhtError> {
        let value = value.into();

        self.blocking(move |dht| dht.store(key, value)).await
    }

    /// Async version of [Dht::locate_owner]
    pub async fn locate_owner(&self, key: Id) -> Result<Lookup, DhtError> {
        self.blocking(move |dht| dht.locate_owner(key)).await
    }

    /// Async version of [Dht::join]
    pub async fn join(&self, bootstrap: SocketAddr) -> Result<(), DhtError> {
        self.blocking(move |dht| dht.join(bootstrap)).await
    }

    /// Async version of [Dht::leave]
    pub async fn leave(&self) -> Result<(), DhtError> {
        self.blocking(|dht| dht.leave()).await
    }

    /// Async version of [Dht::stabilize]
    pub async fn stabilize(&self) -> Result<(), DhtError> {
        self.blocking(|dht| dht.stabilize()).await
    }

    /// Async version of [Dht::fix_fingers]
    pub async fn fix_fingers(&self) -> Result<(), DhtError> {
        self.blocking(|dht| dht.fix_fingers()).await
    }

    // === Private Methods ===

    /// Routing blocks on remote calls, so it runs on its own thread while the
    /// caller awaits the result.
    async fn blocking<T, F>(&self, work: F) -> Result<T, DhtError>
    where
        T: Send + 'static,
        F: FnOnce(&Dht) -> Result<T, DhtError> + Send + 'static,
    {
        let (sender, receiver) = flume::bounded::<Result<T, DhtError>>(1);
        let dht = self.0.clone();

        thread::spawn(move || {
            let _ = sender.send(work(&dht));
        });

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)?
    }
}

#[cfg(test)]
mod test {
    use crate::dht::Testnet;

    use super::*;

    #[test]
    fn shutdown() {
        async fn test() {
            let testnet = Testnet::with_ids(8, &[10]).unwrap();
            let dht = testnet.nodes[0].clone().as_async();

            let a = dht.clone();

            dht.shutdown().await;

            let result = a.lookup(Id(1)).await;

            assert!(matches!(result, Err(DhtError::Shutdown(DhtWasShutdown))))
        }
        futures::executor::block_on(test());
    }

    #[test]
    fn store_lookup() {
        async fn test() {
            let testnet = Testnet::with_ids(8, &[10, 100, 200]).unwrap();

            let a = testnet.nodes[0].clone().as_async();
            let b = testnet.nodes[2].clone().as_async();

            let owner = a.store(Id(50), "async").await.unwrap();
            assert_eq!(owner.id, Id(100));

            let value = b.lookup(Id(50)).await.unwrap();
            assert_eq!(value, Some(Bytes::from_static(b"async")));

            assert_eq!(b.info().await.unwrap().stored(), 0);
        }

        futures::executor::block_on(test());
    }
}
