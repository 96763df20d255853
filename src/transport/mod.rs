//! How nodes reach each other.
//!
//! A [Transport] dials addresses and serves inbound requests to an [Inbox]. The ring
//! logic never sees sockets, only [Connection::call] and the errors it returns.

mod local;
mod tcp;

use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;

use crate::common::messages::DecodeError;
use crate::common::{ErrorSpecific, RequestSpecific, ResponseSpecific};

pub use local::LocalNetwork;
pub use tcp::TcpTransport;

/// Default timeout for a single remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds

/// Dials remote nodes and serves local ones.
pub trait Transport: Send + Sync + Debug {
    /// Open a connection to `address`.
    fn dial(&self, address: SocketAddr) -> Result<Box<dyn Connection>, DialError>;

    /// Start delivering requests sent to `address` into `inbox`.
    ///
    /// Returns the address actually served, which differs from `address` when it
    /// asks for port `0`.
    fn serve(
        &self,
        address: SocketAddr,
        inbox: Box<dyn Inbox>,
    ) -> Result<SocketAddr, std::io::Error>;

    /// Stop serving `address`. New dials fail, calls in flight may still complete.
    fn stop(&self, address: SocketAddr);
}

/// An open connection to one node. Calls on one connection are answered in order.
pub trait Connection: Send {
    fn call(
        &mut self,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific, CallError>;
}

/// Where a served address delivers its requests.
pub trait Inbox: Send + Sync {
    /// Returns `false` once the receiving node is gone.
    fn deliver(&self, request: IncomingRequest) -> bool;
}

impl Inbox for flume::Sender<IncomingRequest> {
    fn deliver(&self, request: IncomingRequest) -> bool {
        self.send(request).is_ok()
    }
}

#[derive(Debug)]
/// A request waiting for its answer.
pub struct IncomingRequest {
    /// The requester's address, if the transport knows it.
    pub from: Option<SocketAddr>,
    pub request: RequestSpecific,
    pub responder: Responder,
}

#[derive(Debug)]
/// Sends the answer to an [IncomingRequest] back to its caller.
pub struct Responder(flume::Sender<Result<ResponseSpecific, ErrorSpecific>>);

type Answer = flume::Receiver<Result<ResponseSpecific, ErrorSpecific>>;

impl Responder {
    pub(crate) fn new() -> (Responder, Answer) {
        let (sender, receiver) = flume::bounded(1);

        (Responder(sender), receiver)
    }

    /// Send the answer. Ignored if the caller gave up waiting.
    pub fn respond(self, result: Result<ResponseSpecific, ErrorSpecific>) {
        let _ = self.0.send(result);
    }
}

#[derive(thiserror::Error, Debug)]
/// Failure to open a [Connection].
pub enum DialError {
    /// Nothing is served at this address.
    #[error("Nothing is listening at {0}")]
    Unreachable(SocketAddr),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
/// Failure of a single [Connection::call].
pub enum CallError {
    /// The connection closed before an answer arrived.
    #[error("Connection lost")]
    ConnectionLost,

    /// No answer arrived in time.
    #[error("Request timed out")]
    Timeout,

    /// The remote node answered with an error.
    #[error("Remote error {}: {}", .0.code, .0.description)]
    Remote(ErrorSpecific),

    /// The answer could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Wait for an answer on `answer`, mapping channel failures to [CallError]s.
pub(crate) fn await_answer(
    answer: &Answer,
    timeout: Duration,
) -> Result<ResponseSpecific, CallError> {
    match answer.recv_timeout(timeout) {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(error)) => Err(CallError::Remote(error)),
        Err(flume::RecvTimeoutError::Timeout) => Err(CallError::Timeout),
        Err(flume::RecvTimeoutError::Disconnected) => Err(CallError::ConnectionLost),
    }
}
