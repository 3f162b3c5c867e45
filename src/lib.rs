//! # spikeflow
//!
//! Spiking neural network simulation runtime.
//!
//! Populations of neurons and the projections connecting them run as
//! independent entities that only talk through discrete messages:
//! - **Spikes** = which neurons of a sender fired during a step
//! - **Synaptic impacts** = per-connection effects a projection forwards
//! - **Endpoints** = each entity's exclusive send/receive handle
//! - **Bus** = the routing engine (in-process queues or a TCP pub/sub hub)
//! - **Backend** = the step loop driving projection and population updates
//!
//! All cross-entity communication is barrier-synchronized at step
//! boundaries: a message sent during step *n* becomes visible on step
//! *n* + 1, once the backend's single `route_messages` call per step has
//! run.
//!
//! ```
//! use spikeflow::*;
//!
//! let mut backend = Backend::new(MessageBus::local());
//! let population = Population::from_generator(Uid::new(), 1, |_| BlifatNeuron::new(1.0));
//! let population_uid = population.uid();
//! let projection = Projection::from_generator(
//!     Uid::new(),
//!     population_uid,
//!     population_uid,
//!     SynapseKind::Delta,
//!     1,
//!     |_| Some(Synapse::delta(0, 0, 1.0, 4)),
//! );
//! backend.load_populations(vec![population]).unwrap();
//! backend.load_projections(vec![projection]).unwrap();
//! backend.run_while(|b| b.step_count() < 10).unwrap();
//! ```

pub mod backend;
pub mod bus;
pub mod endpoint;
pub mod envelope;
pub mod io;
pub mod message;
pub mod pool;
pub mod population;
pub mod projection;
pub mod transport;
pub mod uid;

// Re-exports for convenience.
pub use backend::{Backend, BackendError, SUPPORTED_NEURONS, SUPPORTED_SYNAPSES};
pub use bus::{BusEngine, LocalEngine, MessageBus};
pub use endpoint::{EndpointLink, MessageEndpoint};
pub use envelope::{pack, unpack, CodecError};
pub use io::{InputChannel, OutputChannel};
pub use message::{
    ImpactKind, Message, MessageHeader, MessageKind, SpikeMessage, SynapticImpact,
    SynapticImpactMessage,
};
pub use pool::{PoolError, ThreadPool};
pub use population::{BlifatNeuron, NeuronKind, Population};
pub use projection::{
    AdditiveStdpParams, DeltaParams, Projection, ResourceStdpParams, Synapse, SynapseKind,
    SynapseParams,
};
pub use transport::{TcpEngine, TransportError};
pub use uid::Uid;
