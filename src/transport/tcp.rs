//! Length-prefixed bencode messages over TCP.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use lru::LruCache;
use tracing::{debug, trace};

use super::{CallError, Connection, DialError, Inbox, IncomingRequest, Responder, Transport};
use crate::common::messages::DecodeError;
use crate::common::{Message, MessageType, RequestSpecific, ResponseSpecific};

const VERSION: [u8; 4] = [67, 76, 0, 1]; // "CL" version 01
/// Largest accepted frame.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Idle connections kept open for reuse, one per address.
const POOL_SIZE: usize = 128;

/// Default timeout for opening a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Clone)]
/// TCP transport. Each message is a bencoded KRPC dictionary prefixed by its
/// 4 byte big-endian length.
///
/// Idle outgoing connections are pooled per address.
pub struct TcpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    connect_timeout: Duration,
    pool: Mutex<LruCache<SocketAddr, TcpStream>>,
    listeners: Mutex<HashMap<SocketAddr, Arc<AtomicBool>>>,
    next_tid: AtomicU32,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        let size = NonZeroUsize::new(POOL_SIZE).unwrap_or(NonZeroUsize::MIN);

        TcpTransport {
            inner: Arc::new(Inner {
                connect_timeout,
                pool: Mutex::new(LruCache::new(size)),
                listeners: Mutex::new(HashMap::new()),
                next_tid: AtomicU32::new(0),
            }),
        }
    }

    /// Number of idle pooled connections.
    pub fn pooled(&self) -> usize {
        self.inner.pool().len()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn pool(&self) -> MutexGuard<'_, LruCache<SocketAddr, TcpStream>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<SocketAddr, Arc<AtomicBool>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(&self, address: SocketAddr) -> Result<TcpStream, std::io::Error> {
        let stream = TcpStream::connect_timeout(&address, self.connect_timeout)?;
        stream.set_nodelay(true)?;

        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn dial(&self, address: SocketAddr) -> Result<Box<dyn Connection>, DialError> {
        let pooled = self.inner.pool().pop(&address);

        let (stream, reused) = match pooled {
            Some(stream) => (stream, true),
            None => {
                let stream = self.inner.connect(address).map_err(|error| match error.kind() {
                    ErrorKind::ConnectionRefused | ErrorKind::TimedOut => {
                        DialError::Unreachable(address)
                    }
                    _ => DialError::IO(error),
                })?;
                (stream, false)
            }
        };

        Ok(Box::new(TcpConnection {
            address,
            stream: Some(stream),
            reused,
            sent: false,
            inner: self.inner.clone(),
        }))
    }

    fn serve(
        &self,
        address: SocketAddr,
        inbox: Box<dyn Inbox>,
    ) -> Result<SocketAddr, std::io::Error> {
        let listener = TcpListener::bind(address)?;
        let local_addr = listener.local_addr()?;

        let stopped = Arc::new(AtomicBool::new(false));
        self.inner.listeners().insert(local_addr, stopped.clone());

        let inbox: Arc<dyn Inbox> = Arc::from(inbox);

        thread::Builder::new()
            .name(format!("chordline-listener-{local_addr}"))
            .spawn(move || {
                for stream in listener.incoming() {
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }

                    match stream {
                        Ok(stream) => {
                            let inbox = inbox.clone();
                            thread::spawn(move || serve_connection(stream, inbox));
                        }
                        Err(error) => debug!(?error, "Failed to accept connection"),
                    }
                }

                debug!(?local_addr, "Stopped listening");
            })?;

        Ok(local_addr)
    }

    fn stop(&self, address: SocketAddr) {
        let Some(stopped) = self.inner.listeners().remove(&address) else {
            return;
        };

        stopped.store(true, Ordering::Release);

        // Wake the blocking accept so the listener can notice it was stopped.
        let wake = if address.ip().is_unspecified() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), address.port())
        } else {
            address
        };
        let _ = TcpStream::connect_timeout(&wake, self.inner.connect_timeout);
    }
}

impl Debug for TcpTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TcpTransport{{ listeners: {}, pooled: {} }}",
            self.inner.listeners().len(),
            self.pooled()
        )
    }
}

struct TcpConnection {
    address: SocketAddr,
    stream: Option<TcpStream>,
    /// The stream came from the pool and may have been closed by the peer.
    reused: bool,
    /// The last request was fully written, so the peer may have acted on it.
    sent: bool,
    inner: Arc<Inner>,
}

impl TcpConnection {
    fn exchange(
        &mut self,
        bytes: &[u8],
        transaction_id: u32,
        timeout: Duration,
    ) -> Result<ResponseSpecific, CallError> {
        self.sent = false;
        let result = self.try_exchange(bytes, transaction_id, timeout);

        if result.is_err() && !matches!(result, Err(CallError::Remote(_))) {
            // The stream may be desynchronized, never reuse it.
            self.stream = None;
        }

        result
    }

    fn reconnect(&mut self) -> Result<(), CallError> {
        trace!(address = ?self.address, "Pooled connection was closed, reconnecting");

        self.reused = false;
        self.stream = Some(
            self.inner
                .connect(self.address)
                .map_err(|_| CallError::ConnectionLost)?,
        );

        Ok(())
    }

    fn try_exchange(
        &mut self,
        bytes: &[u8],
        transaction_id: u32,
        timeout: Duration,
    ) -> Result<ResponseSpecific, CallError> {
        let stream = self.stream.as_mut().ok_or(CallError::ConnectionLost)?;
        let timeout = timeout.max(Duration::from_millis(1));

        stream.set_read_timeout(Some(timeout)).map_err(io_to_call)?;
        stream.set_write_timeout(Some(timeout)).map_err(io_to_call)?;

        write_frame(stream, bytes).map_err(io_to_call)?;
        self.sent = true;

        let frame = read_frame(stream).map_err(io_to_call)?;

        let message = Message::from_bytes(&frame)?;
        trace!(context = "tcp_message_received", ?message);

        if message.transaction_id != transaction_id {
            debug!(
                expected = transaction_id,
                received = message.transaction_id,
                "Mismatched transaction id"
            );
            return Err(CallError::ConnectionLost);
        }

        match message.message_type {
            MessageType::Response(response) => Ok(response),
            MessageType::Error(error) => Err(CallError::Remote(error)),
            MessageType::Request(_) => Err(CallError::ConnectionLost),
        }
    }
}

impl Connection for TcpConnection {
    fn call(
        &mut self,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific, CallError> {
        let transaction_id = self.inner.next_tid.fetch_add(1, Ordering::Relaxed);

        let message = Message {
            transaction_id,
            version: Some(VERSION),
            message_type: MessageType::Request(request),
        };
        trace!(context = "tcp_message_sending", address = ?self.address, ?message);

        let bytes = message.to_bytes().map_err(DecodeError::from)?;

        if self.reused && self.stream.as_ref().map_or(true, is_closed) {
            self.reconnect()?;
        }

        match self.exchange(&bytes, transaction_id, timeout) {
            // Only a request that never reached the peer is safe to send again.
            Err(CallError::ConnectionLost) if self.reused && !self.sent => {
                self.reconnect()?;
                self.exchange(&bytes, transaction_id, timeout)
            }
            result => result,
        }
    }
}


impl Drop for TcpConnection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.inner.pool().put(self.address, stream);
        }
    }
}

fn serve_connection(mut stream: TcpStream, inbox: Arc<dyn Inbox>) {
    let from = stream.peer_addr().ok();
    let _ = stream.set_nodelay(true);

    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(error) => {
                trace!(?from, ?error, "Connection closed");
                break;
            }
        };

        let message = match Message::from_bytes(&frame) {
            Ok(message) => message,
            Err(error) => {
                debug!(?from, ?error, "Failed to decode message, closing connection");
                break;
            }
        };
        trace!(context = "tcp_message_received", ?message);

        let MessageType::Request(request) = message.message_type else {
            debug!(?from, "Expected a request");
            continue;
        };

        let (responder, answer) = Responder::new();

        if !inbox.deliver(IncomingRequest {
            from,
            request,
            responder,
        }) {
            break;
        }

        let message_type = match answer.recv() {
            Ok(Ok(response)) => MessageType::Response(response),
            Ok(Err(error)) => MessageType::Error(error),
            Err(_) => break,
        };

        let reply = Message {
            transaction_id: message.transaction_id,
            version: Some(VERSION),
            message_type,
        };
        trace!(context = "tcp_message_sending", ?from, message = ?reply);

        let sent = reply
            .to_bytes()
            .map_err(|error| std::io::Error::new(ErrorKind::InvalidData, error))
            .and_then(|bytes| write_frame(&mut stream, &bytes));

        if let Err(error) = sent {
            debug!(?from, ?error, "Failed to send reply");
            break;
        }
    }
}

fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, std::io::Error> {
    let mut length = [0; 4];
    stream.read_exact(&mut length)?;

    let length = u32::from_be_bytes(length) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("Frame of {length} bytes exceeds the limit"),
        ));
    }

    let mut frame = vec![0; length];
    stream.read_exact(&mut frame)?;

    Ok(frame)
}

fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), std::io::Error> {
    let mut frame = Vec::with_capacity(bytes.len() + 4);
    frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    frame.extend_from_slice(bytes);

    stream.write_all(&frame)?;
    stream.flush()
}

/// An idle stream whose peer hung up reads as end of file without blocking.
fn is_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }

    let mut byte = [0; 1];
    let closed = match stream.peek(&mut byte) {
        // Unsolicited bytes on an idle stream mean it is out of sync.
        Ok(_) => true,
        Err(error) => error.kind() != ErrorKind::WouldBlock,
    };

    stream.set_nonblocking(false).is_err() || closed
}

fn io_to_call(error: std::io::Error) -> CallError {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => CallError::Timeout,
        _ => CallError::ConnectionLost,
    }
}
