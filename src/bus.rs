//! Message bus: the routing engine connecting endpoints.
//!
//! Two engines sit behind one interface. The in-process engine shuttles
//! `Message` values through shared-memory buffers and never touches the
//! envelope codec. The socket engine in [`crate::transport`] serializes every
//! message through the codec and a TCP pub/sub hub, so endpoints can live in
//! different processes.
//!
//! `route_messages` is the single entry point a backend calls once per
//! simulation step: one `update` (collect outgoing, prune dead endpoints)
//! followed by `step` until no pending work remains.

use std::collections::VecDeque;
use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::endpoint::{LinkBuffers, LocalLink, MessageEndpoint};
use crate::message::Message;
use crate::transport::{TcpEngine, TransportError};

// ─── Engine interface ───────────────────────────────────────────────────────

/// A routing engine implementation behind [`MessageBus`].
pub trait BusEngine: Send {
    /// Construct a new endpoint serviced by this engine. The engine keeps
    /// only a non-owning handle; the caller owns the endpoint's lifetime.
    fn create_endpoint(&mut self) -> Result<MessageEndpoint, TransportError>;

    /// Collect outgoing messages from live endpoints and prune dead ones.
    fn update(&mut self) -> Result<(), TransportError>;

    /// Move one unit of pending work. Returns the number of messages routed
    /// by this call; zero means the cycle is drained.
    fn step(&mut self) -> Result<usize, TransportError>;
}

// ─── In-process engine ──────────────────────────────────────────────────────

/// Shared routing state of the in-process engine. One mutex guards both the
/// endpoint list and the pending queue; `send` on an endpoint only touches
/// that endpoint's own buffers and may race freely with routing.
#[derive(Default)]
struct LocalState {
    endpoints: Vec<Weak<LinkBuffers>>,
    pending: VecDeque<Message>,
}

/// Engine that routes through shared memory, for endpoints within one
/// process.
#[derive(Default)]
pub struct LocalEngine {
    state: Mutex<LocalState>,
}

impl BusEngine for LocalEngine {
    fn create_endpoint(&mut self) -> Result<MessageEndpoint, TransportError> {
        let buffers = Arc::new(LinkBuffers::default());
        let mut state = self.state.lock().unwrap();
        state.endpoints.push(Arc::downgrade(&buffers));
        Ok(MessageEndpoint::new(Box::new(LocalLink::new(buffers))))
    }

    fn update(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        let LocalState { endpoints, pending } = &mut *state;
        // Dropped endpoints are pruned here, never reported as errors.
        endpoints.retain(|weak| match weak.upgrade() {
            Some(buffers) => {
                pending.extend(buffers.drain_outgoing());
                true
            }
            None => false,
        });
        Ok(())
    }

    fn step(&mut self) -> Result<usize, TransportError> {
        let mut state = self.state.lock().unwrap();
        let Some(message) = state.pending.pop_front() else {
            return Ok(0);
        };
        // Fan the message out to every live endpoint unconditionally;
        // subscription filtering happens endpoint-side on receive. Endpoints
        // dropped since the last update are skipped and pruned next update.
        for weak in &state.endpoints {
            if let Some(buffers) = weak.upgrade() {
                buffers.deliver(message.clone());
            }
        }
        Ok(1)
    }
}

// ─── Bus facade ─────────────────────────────────────────────────────────────

/// The routing engine connecting many endpoints.
///
/// Multiple independent buses may coexist; nothing here is process-global.
pub struct MessageBus {
    engine: Box<dyn BusEngine>,
}

impl MessageBus {
    /// Bus over the in-process shared-memory engine.
    pub fn local() -> Self {
        MessageBus {
            engine: Box::new(LocalEngine::default()),
        }
    }

    /// Bus over the TCP pub/sub engine, with its hub bound to `addr`.
    ///
    /// Binding failure is a construction error and surfaces immediately.
    pub fn tcp(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        Ok(MessageBus {
            engine: Box::new(TcpEngine::bind(addr)?),
        })
    }

    /// Bus over a caller-provided engine.
    pub fn with_engine(engine: Box<dyn BusEngine>) -> Self {
        MessageBus { engine }
    }

    /// Create a new endpoint that sends and receives through this bus.
    pub fn create_endpoint(&mut self) -> Result<MessageEndpoint, TransportError> {
        self.engine.create_endpoint()
    }

    /// Collect outgoing messages and prune expired endpoints.
    pub fn update(&mut self) -> Result<(), TransportError> {
        self.engine.update()
    }

    /// Route one unit of pending work; zero means the cycle is drained.
    pub fn step(&mut self) -> Result<usize, TransportError> {
        self.engine.step()
    }

    /// Route every pending message: one `update`, then `step` until idle.
    /// Called exactly once per simulation step by the backend; this call is
    /// the barrier that makes messages sent during step *n* visible on step
    /// *n* + 1.
    pub fn route_messages(&mut self) -> Result<usize, TransportError> {
        debug!("message routing cycle started");
        self.engine.update()?;
        let mut total = 0;
        loop {
            let routed = self.engine.step()?;
            if routed == 0 {
                break;
            }
            total += routed;
        }
        debug!(total, "message routing cycle finished");
        Ok(total)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::local()
    }
}
