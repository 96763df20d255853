//! Actor implementation - one thread per ring node, owning its state.
//!
//! Requests are served one at a time from a single mailbox. Anything that needs
//! remote calls (joins, leaves, stabilization) runs on another thread and talks
//! back to this node through the transport like any other peer would.

pub(crate) mod client;
pub(crate) mod config;
mod info;
pub(crate) mod stabilization;
pub(crate) mod topology;

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, trace};

use crate::common::{ErrorSpecific, IdSpace, Node, ResponseSpecific};
use crate::core::maintenance::Maintenance;
use crate::core::server::{NodeState, Outcome};
use crate::error::RingError;
use crate::transport::{Inbox, IncomingRequest, Responder, Transport};

use client::RpcClient;
use config::Config;
use topology::LeaveError;

pub use info::Info;

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Request(IncomingRequest),
    Info(flume::Sender<Info>),
    Shutdown,
}

impl Inbox for flume::Sender<ActorMessage> {
    fn deliver(&self, request: IncomingRequest) -> bool {
        self.send(ActorMessage::Request(request)).is_ok()
    }
}

#[derive(Debug)]
/// Internal Actor called in the node's thread loop.
pub(crate) struct Actor {
    state: NodeState,
    rpc: RpcClient,
    mailbox: flume::Sender<ActorMessage>,
    /// Dropping this stops the stabilization thread.
    stabilization: Option<flume::Sender<()>>,
    /// Never sent on, handles see it disconnect once the node is down.
    _running: flume::Sender<()>,
}

impl Actor {
    /// Serve a new lone node on `config.address` and start its thread.
    ///
    /// Returns the node, the sender of its mailbox and a receiver that
    /// disconnects when the node stops.
    pub(crate) fn spawn(
        config: &Config,
        space: IdSpace,
        transport: Arc<dyn Transport>,
    ) -> Result<(Node, flume::Sender<ActorMessage>, flume::Receiver<()>), std::io::Error> {
        let (sender, receiver) = flume::unbounded();
        let (running, stopped) = flume::bounded::<()>(0);

        let address = transport.serve(config.address, Box::new(sender.clone()))?;
        let id = config.id.unwrap_or_else(|| space.from_address(address));
        let me = Node::new(id, address);

        let rpc = RpcClient::new(transport, space, config.request_timeout);

        let stabilization = match config.maintenance_interval {
            Some(interval) => {
                let (stop, stopped) = flume::bounded::<()>(1);
                let maintenance = Maintenance::new(interval, space.bits(), config.finger_routing);
                let rpc = rpc.clone();

                thread::Builder::new()
                    .name(format!("chordline-stabilize-{id}"))
                    .spawn(move || stabilization::run(rpc, me, maintenance, stopped))?;

                Some(stop)
            }
            None => None,
        };

        let actor = Actor {
            state: NodeState::new(me, space, config.finger_routing),
            rpc,
            mailbox: sender.clone(),
            stabilization,
            _running: running,
        };

        thread::Builder::new()
            .name(format!("chordline-node-{id}"))
            .spawn(move || actor.run(receiver))?;

        info!(node = ?me, bits = space.bits(), "Node started");

        Ok((me, sender, stopped))
    }

    // === Getters ===

    pub(crate) fn state(&self) -> &NodeState {
        &self.state
    }

    fn address(&self) -> SocketAddr {
        self.state.me().address
    }

    // === Private Methods ===

    fn run(mut self, receiver: flume::Receiver<ActorMessage>) {
        while let Ok(message) = receiver.recv() {
            match message {
                ActorMessage::Request(request) => self.handle(request),
                ActorMessage::Info(sender) => {
                    let _ = sender.send(Info::from(&self));
                }
                ActorMessage::Shutdown => break,
            }
        }

        self.rpc.transport.stop(self.address());
        self.stabilization.take();

        // Anything still queued is dropped, waiters give up on `stopped`.
        drop(receiver);

        debug!(node = ?self.state.me(), "Node shut down");
    }

    fn handle(&mut self, incoming: IncomingRequest) {
        let IncomingRequest {
            from,
            request,
            responder,
        } = incoming;

        trace!(
            context = "actor_request",
            node = ?self.state.me(),
            ?from,
            method = request.method()
        );

        match self.state.handle_request(request) {
            Outcome::Respond(result) => responder.respond(result),
            Outcome::Join(candidate) => {
                let rpc = self.rpc.clone();
                let entry = *self.state.me();
                let finger_routing = self.state.finger_routing();

                self.spawn_worker("join", responder, move || {
                    topology::join(&rpc, entry, candidate, finger_routing)
                });
            }
            Outcome::Leave => {
                let rpc = self.rpc.clone();
                let me = *self.state.me();
                let finger_routing = self.state.finger_routing();
                let mailbox = self.mailbox.clone();

                self.spawn_worker("leave", responder, move || {
                    let result = topology::leave(&rpc, me, finger_routing);

                    // Only an aborted leave keeps the node in its ring.
                    if !matches!(result, Err(LeaveError::Aborted(_))) {
                        let _ = mailbox.send(ActorMessage::Shutdown);
                    }

                    result.map_err(RingError::from)
                });
            }
        }
    }

    /// Run `task` on its own thread, answering `responder` with its result.
    fn spawn_worker<F>(&self, task: &'static str, responder: Responder, work: F)
    where
        F: FnOnce() -> Result<(), RingError> + Send + 'static,
    {
        let node = *self.state.me();

        let spawned = thread::Builder::new()
            .name(format!("chordline-{task}-{}", node.id))
            .spawn(move || {
                let result = work();
                if let Err(error) = &result {
                    debug!(?node, task, ?error, "Worker failed");
                }

                responder.respond(
                    result
                        .map(|()| ResponseSpecific::Ok)
                        .map_err(ErrorSpecific::from),
                );
            });

        // The responder was dropped with the closure, so the caller sees a lost connection.
        if let Err(error) = spawned {
            error!(?node, task, ?error, "Failed to spawn worker thread");
        }
    }
}
