//! Socket transport: the TCP pub/sub engine of the message bus.
//!
//! Every endpoint owns two connections to the engine's hub socket: one for
//! publishing, one for subscribing. A published frame is fanned out to every
//! subscribe connection (the publisher's own included), so each endpoint sees
//! the same traffic it would on the in-process engine. The hub buffers
//! nothing between sweeps; what has not been read from a kernel socket
//! buffer yet simply waits for the next routing cycle.
//!
//! Wire format per frame: 4-byte little-endian payload length, then the
//! envelope bytes produced by [`crate::envelope::pack`]. Frames are the only
//! transport-level structure; the envelope is self-describing.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, error, trace};

use crate::bus::BusEngine;
use crate::endpoint::{EndpointLink, MessageEndpoint};
use crate::envelope::{self, CodecError};
use crate::message::Message;

/// Frames above this size indicate stream corruption, not a real message.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// How many `WouldBlock` retries a publish tolerates before giving up.
///
/// The send path busy-polls a non-blocking socket; the bound turns a peer
/// that never drains into a [`TransportError::SendTimeout`] instead of a
/// livelock.
const SEND_RETRY_LIMIT: u32 = 1 << 22;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("oversized frame of {len} bytes")]
    OversizedFrame { len: usize },
    #[error("send retry limit exhausted, peer not draining")]
    SendTimeout,
    #[error("message sender uid is nil")]
    NilSender,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ─── Framing ────────────────────────────────────────────────────────────────

/// Write one length-prefixed frame to a non-blocking stream, busy-polling
/// through `WouldBlock` up to [`SEND_RETRY_LIMIT`].
fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), TransportError> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);

    let mut written = 0;
    let mut retries = 0u32;
    while written < frame.len() {
        match stream.write(&frame[written..]) {
            Ok(0) => return Err(TransportError::ConnectionClosed),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                retries += 1;
                if retries > SEND_RETRY_LIMIT {
                    return Err(TransportError::SendTimeout);
                }
                std::hint::spin_loop();
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    trace!(bytes = payload.len(), "frame sent");
    Ok(())
}

/// Incremental frame parser over a non-blocking stream.
///
/// Bytes can arrive split across reads; the reader buffers partial frames
/// internally and only hands out complete payloads.
#[derive(Default)]
struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete frame payload, if one is buffered.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(self.buf[..4].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::OversizedFrame { len });
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let payload = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some(payload))
    }

    /// One non-blocking poll: read whatever the socket has, then extract
    /// every complete frame into `frames`. Returns `false` once the peer has
    /// closed the connection.
    fn poll(
        &mut self,
        stream: &mut TcpStream,
        frames: &mut Vec<Vec<u8>>,
    ) -> Result<bool, TransportError> {
        let mut alive = true;
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    alive = false;
                    break;
                }
                Ok(n) => self.feed(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(alive)
    }
}

// ─── Endpoint link ──────────────────────────────────────────────────────────

/// Connection role preamble, sent once right after connecting to the hub.
const ROLE_PUBLISH: u8 = b'P';
const ROLE_SUBSCRIBE: u8 = b'S';

/// Socket-backed endpoint link: publishes through the codec immediately,
/// collects with a bounded non-blocking poll.
pub struct TcpLink {
    publish: TcpStream,
    subscribe: TcpStream,
    reader: FrameReader,
}

impl TcpLink {
    fn connect(hub: SocketAddr) -> Result<Self, TransportError> {
        let publish = Self::open(hub, ROLE_PUBLISH)?;
        let subscribe = Self::open(hub, ROLE_SUBSCRIBE)?;
        Ok(TcpLink {
            publish,
            subscribe,
            reader: FrameReader::default(),
        })
    }

    fn open(hub: SocketAddr, role: u8) -> Result<TcpStream, TransportError> {
        let mut stream = TcpStream::connect(hub)?;
        stream.set_nodelay(true)?;
        // The role byte goes out while the stream is still blocking; only
        // steady-state traffic runs non-blocking.
        stream.write_all(&[role])?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }
}

impl EndpointLink for TcpLink {
    fn publish(&mut self, message: Message) -> Result<(), TransportError> {
        let payload = envelope::pack(&message);
        write_frame(&mut self.publish, &payload).map_err(|e| {
            error!(error = %e, "publish failed");
            e
        })
    }

    fn collect(&mut self, sink: &mut Vec<Message>) -> Result<(), TransportError> {
        let mut frames = Vec::new();
        let alive = self.reader.poll(&mut self.subscribe, &mut frames)?;
        for frame in frames {
            sink.push(envelope::unpack(&frame)?);
        }
        if !alive {
            error!("subscribe connection closed by hub");
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }
}

// ─── Hub engine ─────────────────────────────────────────────────────────────

struct HubConn {
    stream: TcpStream,
    reader: FrameReader,
    role: Option<u8>,
}

/// TCP pub/sub engine: a hub socket every endpoint pair-connects to.
///
/// `update` accepts newly arrived connections; `step` performs one sweep,
/// forwarding every frame read off a publish connection to every subscribe
/// connection. No routing thread and no message state survive between
/// sweeps.
pub struct TcpEngine {
    listener: TcpListener,
    addr: SocketAddr,
    conns: Vec<HubConn>,
}

impl TcpEngine {
    /// Bind the hub. A bind failure is a bus construction error.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        debug!(%addr, "tcp bus hub bound");
        Ok(TcpEngine {
            listener,
            addr,
            conns: Vec::new(),
        })
    }

    /// Address endpoints connect to; useful when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn accept_pending(&mut self) -> Result<(), TransportError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nodelay(true)?;
                    stream.set_nonblocking(true)?;
                    trace!(%peer, "hub accepted connection");
                    self.conns.push(HubConn {
                        stream,
                        reader: FrameReader::default(),
                        role: None,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read role preambles from connections that have not declared one yet.
    fn resolve_roles(&mut self) {
        for conn in &mut self.conns {
            if conn.role.is_some() {
                continue;
            }
            let mut byte = [0u8; 1];
            match conn.stream.read(&mut byte) {
                Ok(1) => conn.role = Some(byte[0]),
                // Not readable yet, closed, or errored: leave the role
                // unset; closed connections get pruned by the sweep.
                _ => {}
            }
        }
    }

    /// One forwarding sweep. Returns the number of messages forwarded.
    fn sweep(&mut self) -> Result<usize, TransportError> {
        let mut forwarded_frames = Vec::new();
        let mut closed = Vec::new();

        for (index, conn) in self.conns.iter_mut().enumerate() {
            if conn.role != Some(ROLE_PUBLISH) {
                continue;
            }
            let mut frames = Vec::new();
            let alive = conn
                .reader
                .poll(&mut conn.stream, &mut frames)
                .map_err(|e| {
                    error!(error = %e, "hub read failed");
                    e
                })?;
            forwarded_frames.extend(frames);
            if !alive {
                closed.push(index);
            }
        }

        let forwarded = forwarded_frames.len();
        for frame in forwarded_frames {
            for (index, conn) in self.conns.iter_mut().enumerate() {
                if conn.role != Some(ROLE_SUBSCRIBE) || closed.contains(&index) {
                    continue;
                }
                match write_frame(&mut conn.stream, &frame) {
                    Ok(()) => {}
                    // A subscriber that went away mid-fan-out is pruned like
                    // an expired endpoint, not an error for the bus.
                    Err(TransportError::ConnectionClosed) | Err(TransportError::Io(_)) => {
                        closed.push(index);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !closed.is_empty() {
            let mut index = 0;
            self.conns.retain(|_| {
                let keep = !closed.contains(&index);
                index += 1;
                keep
            });
        }
        Ok(forwarded)
    }
}

impl BusEngine for TcpEngine {
    fn create_endpoint(&mut self) -> Result<MessageEndpoint, TransportError> {
        let link = TcpLink::connect(self.addr)?;
        // Adopt the two new connections right away so the first routing
        // cycle after creation already knows them.
        self.accept_pending()?;
        self.resolve_roles();
        Ok(MessageEndpoint::new(Box::new(link)))
    }

    fn update(&mut self) -> Result<(), TransportError> {
        self.accept_pending()?;
        self.resolve_roles();
        Ok(())
    }

    fn step(&mut self) -> Result<usize, TransportError> {
        self.sweep()
    }
}
