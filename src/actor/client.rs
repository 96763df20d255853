//! Typed remote calls.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::messages::ERROR_PROTOCOL;
use crate::common::{
    Entry, ErrorSpecific, Id, IdSpace, Node, RequestSpecific, ResponseSpecific, Step,
};
use crate::core::router::Hop;
use crate::error::RingError;
use crate::transport::{CallError, Transport};

/// Join and leave requests wait for a whole orchestration, not a single round trip.
const ORCHESTRATION_TIMEOUT_FACTOR: u32 = 30;

#[derive(Debug, Clone)]
/// Sends requests through a [Transport] and maps every failure to a [RingError].
pub(crate) struct RpcClient {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) space: IdSpace,
    pub(crate) request_timeout: Duration,
}

impl RpcClient {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        space: IdSpace,
        request_timeout: Duration,
    ) -> Self {
        RpcClient {
            transport,
            space,
            request_timeout,
        }
    }

    // === Public Methods ===

    /// Send a request to the given address and wait for its response.
    pub(crate) fn request(
        &self,
        address: SocketAddr,
        request: RequestSpecific,
    ) -> Result<ResponseSpecific, RingError> {
        self.request_with_timeout(address, request, self.request_timeout)
            .map_err(|error| match error {
                Failure::TimedOut => RingError::PeerUnreachable { address },
                Failure::Ring(error) => error,
            })
    }

    pub(crate) fn ping(&self, address: SocketAddr) -> Result<Id, RingError> {
        match self.request(address, RequestSpecific::Ping)? {
            ResponseSpecific::Pong { responder_id } => Ok(responder_id),
            response => Err(unexpected("ping", &response)),
        }
    }

    pub(crate) fn lookup(&self, address: SocketAddr, key: Id) -> Result<Option<Bytes>, RingError> {
        match self.request(address, RequestSpecific::Lookup { key })? {
            ResponseSpecific::Value { value } => Ok(Some(value)),
            ResponseSpecific::NotFound => Ok(None),
            response => Err(unexpected("lookup", &response)),
        }
    }

    pub(crate) fn store(
        &self,
        address: SocketAddr,
        key: Id,
        value: Bytes,
    ) -> Result<(), RingError> {
        let response = self.request(address, RequestSpecific::Store { key, value })?;
        expect_ok("store", response)
    }

    pub(crate) fn get_successor(&self, address: SocketAddr) -> Result<Node, RingError> {
        match self.request(address, RequestSpecific::GetSuccessor)? {
            ResponseSpecific::Node { node: Some(node) } => Ok(node),
            response => Err(unexpected("get_successor", &response)),
        }
    }

    pub(crate) fn get_predecessor(&self, address: SocketAddr) -> Result<Option<Node>, RingError> {
        match self.request(address, RequestSpecific::GetPredecessor)? {
            ResponseSpecific::Node { node } => Ok(node),
            response => Err(unexpected("get_predecessor", &response)),
        }
    }

    pub(crate) fn get_finger(
        &self,
        address: SocketAddr,
        index: u8,
    ) -> Result<Option<Node>, RingError> {
        match self.request(address, RequestSpecific::GetFinger { index })? {
            ResponseSpecific::Node { node } => Ok(node),
            response => Err(unexpected("get_finger", &response)),
        }
    }

    /// Ask the node at `address` to splice `candidate` into its ring.
    pub(crate) fn join(&self, address: SocketAddr, candidate: Node) -> Result<(), RingError> {
        let response = self.orchestrate(address, RequestSpecific::Join { candidate })?;
        expect_ok("join", response)
    }

    /// Ask the node at `address`, whose id is `id`, to leave its ring.
    pub(crate) fn leave(&self, address: SocketAddr, id: Id) -> Result<(), RingError> {
        let response = self.orchestrate(address, RequestSpecific::Leave { id })?;
        expect_ok("leave", response)
    }

    pub(crate) fn notify(
        &self,
        address: SocketAddr,
        candidate: Node,
    ) -> Result<(bool, Vec<Entry>), RingError> {
        match self.request(address, RequestSpecific::Notify { candidate })? {
            ResponseSpecific::Accepted { accepted, entries } => Ok((accepted, entries)),
            response => Err(unexpected("notify", &response)),
        }
    }

    pub(crate) fn attach(
        &self,
        address: SocketAddr,
        successor: Node,
        predecessor: Node,
        fingers: Vec<Node>,
    ) -> Result<(), RingError> {
        let response = self.request(
            address,
            RequestSpecific::Attach {
                successor,
                predecessor,
                fingers,
            },
        )?;
        expect_ok("attach", response)
    }

    pub(crate) fn handoff(
        &self,
        address: SocketAddr,
        entries: Vec<Entry>,
    ) -> Result<(), RingError> {
        let response = self.request(address, RequestSpecific::Handoff { entries })?;
        expect_ok("handoff", response)
    }

    pub(crate) fn set_successor(&self, address: SocketAddr, node: Node) -> Result<(), RingError> {
        let response = self.request(address, RequestSpecific::SetSuccessor { node })?;
        expect_ok("set_successor", response)
    }

    /// Returns the departing node's successor, predecessor and entries.
    pub(crate) fn depart(
        &self,
        address: SocketAddr,
    ) -> Result<(Node, Option<Node>, Vec<Entry>), RingError> {
        match self.request(address, RequestSpecific::Depart)? {
            ResponseSpecific::Departed {
                successor,
                predecessor,
                entries,
            } => Ok((successor, predecessor, entries)),
            response => Err(unexpected("depart", &response)),
        }
    }

    /// Cancel the departure of the node at `address`, giving it back `entries`.
    pub(crate) fn stay(&self, address: SocketAddr, entries: Vec<Entry>) -> Result<(), RingError> {
        let response = self.request(address, RequestSpecific::Stay { entries })?;
        expect_ok("stay", response)
    }

    pub(crate) fn absorb(
        &self,
        address: SocketAddr,
        departing: Node,
        predecessor: Option<Node>,
        entries: Vec<Entry>,
    ) -> Result<(), RingError> {
        let response = self.request(
            address,
            RequestSpecific::Absorb {
                departing,
                predecessor,
                entries,
            },
        )?;
        expect_ok("absorb", response)
    }

    /// Returns whether the finger now references `node`, and the responder's
    /// predecessor.
    pub(crate) fn update_finger(
        &self,
        address: SocketAddr,
        index: u8,
        node: Node,
    ) -> Result<(bool, Option<Node>), RingError> {
        let response = self.request(address, RequestSpecific::UpdateFinger { index, node })?;
        finger_updated("update_finger", response)
    }

    /// Returns whether the finger referenced `departing`, and the responder's
    /// predecessor.
    pub(crate) fn replace_finger(
        &self,
        address: SocketAddr,
        index: u8,
        departing: Id,
        replacement: Node,
    ) -> Result<(bool, Option<Node>), RingError> {
        let response = self.request(
            address,
            RequestSpecific::ReplaceFinger {
                index,
                departing,
                replacement,
            },
        )?;
        finger_updated("replace_finger", response)
    }

    pub(crate) fn forget_predecessor(&self, address: SocketAddr, id: Id) -> Result<(), RingError> {
        let response = self.request(address, RequestSpecific::ForgetPredecessor { id })?;
        expect_ok("forget_predecessor", response)
    }

    // === Private Methods ===

    fn orchestrate(
        &self,
        address: SocketAddr,
        request: RequestSpecific,
    ) -> Result<ResponseSpecific, RingError> {
        self.request_with_timeout(
            address,
            request,
            self.request_timeout * ORCHESTRATION_TIMEOUT_FACTOR,
        )
        .map_err(|error| match error {
            Failure::TimedOut => RingError::PeerUnreachable { address },
            Failure::Ring(error) => error,
        })
    }

    fn request_with_timeout(
        &self,
        address: SocketAddr,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific, Failure> {
        let method = request.method();

        let mut connection = self.transport.dial(address).map_err(|error| {
            debug!(?address, ?error, method, "Failed to dial");
            Failure::Ring(RingError::PeerUnreachable { address })
        })?;

        let response = connection.call(request, timeout).map_err(|error| {
            trace!(?address, ?error, method, "Request failed");

            match error {
                CallError::Timeout => Failure::TimedOut,
                CallError::ConnectionLost => {
                    Failure::Ring(RingError::PeerUnreachable { address })
                }
                CallError::Remote(error) => Failure::Ring(RingError::from_remote(error, address)),
                CallError::Decode(error) => Failure::Ring(RingError::Remote(ErrorSpecific::new(
                    ERROR_PROTOCOL,
                    error.to_string(),
                ))),
            }
        })?;

        Ok(response)
    }
}

impl Hop for RpcClient {
    fn find_successor(&self, node: &Node, target: Id) -> Result<Step, RingError> {
        let response = self
            .request_with_timeout(
                node.address,
                RequestSpecific::FindSuccessor { target },
                self.request_timeout,
            )
            .map_err(|error| match error {
                Failure::TimedOut => RingError::LookupTimeout {
                    address: node.address,
                    hops: 0,
                },
                Failure::Ring(error) => error,
            })?;

        match response {
            ResponseSpecific::Step(step) => Ok(step),
            response => Err(unexpected("find_successor", &response)),
        }
    }
}

/// Timeouts mean different things to routing and to everything else.
enum Failure {
    TimedOut,
    Ring(RingError),
}

fn expect_ok(method: &'static str, response: ResponseSpecific) -> Result<(), RingError> {
    match response {
        ResponseSpecific::Ok => Ok(()),
        response => Err(unexpected(method, &response)),
    }
}

fn finger_updated(
    method: &'static str,
    response: ResponseSpecific,
) -> Result<(bool, Option<Node>), RingError> {
    match response {
        ResponseSpecific::FingerUpdated {
            references,
            predecessor,
        } => Ok((references, predecessor)),
        response => Err(unexpected(method, &response)),
    }
}

fn unexpected(method: &'static str, response: &ResponseSpecific) -> RingError {
    RingError::Remote(ErrorSpecific::new(
        ERROR_PROTOCOL,
        format!("Unexpected {} response to {method}", response.kind()),
    ))
}
