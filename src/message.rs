//! Event messages exchanged between populations and projections.
//!
//! The message set is closed: a `Spike` announces which neurons of a sender
//! fired during a step, a `SynapticImpact` carries the per-connection effects
//! a projection forwards to its postsynaptic population. Every message starts
//! with a header naming the sender and the step it was produced on.
//!
//! Adding a variant is a closed-set change: the wire tag table below, the
//! envelope codec, and the endpoint's per-kind buffers must all be updated
//! together.

use crate::uid::Uid;

// ─── Header ─────────────────────────────────────────────────────────────────

/// Common prefix of every message: who sent it, and on which step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Sender entity identifier.
    pub sender: Uid,
    /// Execution step the message was produced on.
    pub step: u64,
}

// ─── Spike ──────────────────────────────────────────────────────────────────

/// Indexes of the neurons of one population that fired during one step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpikeMessage {
    pub header: MessageHeader,
    /// Indexes of fired neurons, in firing order.
    pub neuron_indexes: Vec<u32>,
}

// ─── Synaptic impact ────────────────────────────────────────────────────────

/// Kind tag describing how an impact acts on the receiving neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ImpactKind {
    Excitatory = 0,
    InhibitoryCurrent = 1,
    InhibitoryConductance = 2,
    Dopamine = 3,
    Blocking = 4,
}

impl ImpactKind {
    /// Decode from a wire byte. `None` for bytes outside the closed set.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ImpactKind::Excitatory),
            1 => Some(ImpactKind::InhibitoryCurrent),
            2 => Some(ImpactKind::InhibitoryConductance),
            3 => Some(ImpactKind::Dopamine),
            4 => Some(ImpactKind::Blocking),
            _ => None,
        }
    }
}

impl Default for ImpactKind {
    fn default() -> Self {
        ImpactKind::Excitatory
    }
}

/// The effect one fired neuron has on one downstream neuron through one
/// synapse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynapticImpact {
    /// Position of the synapse in the projection's synapse sequence.
    pub connection_index: u64,
    /// Impact magnitude.
    pub impact: f32,
    /// How the impact acts on the receiving neuron.
    pub kind: ImpactKind,
    /// Source neuron index in the presynaptic population.
    pub presynaptic_neuron_index: u32,
    /// Destination neuron index in the postsynaptic population.
    pub postsynaptic_neuron_index: u32,
}

/// All impacts one projection delivers to one population for one step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SynapticImpactMessage {
    pub header: MessageHeader,
    /// Population the spikes that caused these impacts came from.
    pub presynaptic_population: Uid,
    /// Population the impacts are destined for.
    pub postsynaptic_population: Uid,
    /// Forcing impacts override the receiving neuron's integration.
    pub is_forcing: bool,
    pub impacts: Vec<SynapticImpact>,
}

// ─── Message ────────────────────────────────────────────────────────────────

/// A routable message: one of the closed variant set.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Spike(SpikeMessage),
    SynapticImpact(SynapticImpactMessage),
}

/// Discriminant-only mirror of [`Message`], used to key subscriptions and
/// per-kind buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Spike,
    SynapticImpact,
}

impl MessageKind {
    /// Wire discriminant: variant index + 1. Zero is reserved for
    /// "none/invalid" and never written.
    pub fn wire_tag(&self) -> u8 {
        match self {
            MessageKind::Spike => 1,
            MessageKind::SynapticImpact => 2,
        }
    }

    /// Decode a wire discriminant. `None` for the reserved zero and for tags
    /// outside the closed set.
    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MessageKind::Spike),
            2 => Some(MessageKind::SynapticImpact),
            _ => None,
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Spike(_) => MessageKind::Spike,
            Message::SynapticImpact(_) => MessageKind::SynapticImpact,
        }
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::Spike(m) => &m.header,
            Message::SynapticImpact(m) => &m.header,
        }
    }

    /// Sender identifier from the header.
    pub fn sender(&self) -> Uid {
        self.header().sender
    }

    /// Step the message was produced on.
    pub fn step(&self) -> u64 {
        self.header().step
    }
}

impl From<SpikeMessage> for Message {
    fn from(m: SpikeMessage) -> Self {
        Message::Spike(m)
    }
}

impl From<SynapticImpactMessage> for Message {
    fn from(m: SynapticImpactMessage) -> Self {
        Message::SynapticImpact(m)
    }
}
