//! Per-entity message endpoints.
//!
//! An endpoint is the exclusive gateway of one entity (population,
//! projection, channel, observer) to the message bus: `send` queues outgoing
//! messages for bus pickup, `receive_all_messages` drains what the bus has
//! delivered, and `unload_*` hands the buffered messages of one kind to one
//! receiver.
//!
//! Subscription filtering happens here, at receive time: the bus fans every
//! routed message to every live endpoint, and `receive_all_messages` keeps
//! only messages matching a `(receiver, kind)` subscription whose sender set
//! contains the message's sender. Everything else is discarded immediately
//! and never buffered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::message::{Message, MessageKind, SpikeMessage, SynapticImpactMessage};
use crate::transport::TransportError;
use crate::uid::Uid;

// ─── Link ───────────────────────────────────────────────────────────────────

/// Seam between an endpoint and the bus engine that services it.
///
/// The in-process engine hands out [`LocalLink`]s over shared buffers; the
/// socket engine hands out links that serialize through the envelope codec.
pub trait EndpointLink: Send {
    /// Queue or transmit one outgoing message. Never delivers locally.
    fn publish(&mut self, message: Message) -> Result<(), TransportError>;

    /// Move every delivered message into `sink`, preserving arrival order.
    /// Non-blocking; a bounded poll at most.
    fn collect(&mut self, sink: &mut Vec<Message>) -> Result<(), TransportError>;
}

/// Buffers shared between a [`LocalLink`] and the in-process bus engine.
///
/// The endpoint side owns the [`Arc`]; the bus keeps only a `Weak`, so
/// endpoint destruction is observable without bus cooperation.
#[derive(Default)]
pub struct LinkBuffers {
    /// Messages sent by the owning entity, awaiting bus pickup.
    outgoing: Mutex<Vec<Message>>,
    /// Messages the bus has fanned out to this endpoint.
    inbox: Mutex<VecDeque<Message>>,
}

impl LinkBuffers {
    /// Bus side: drain everything the endpoint has sent since the last
    /// update, in send order.
    pub fn drain_outgoing(&self) -> Vec<Message> {
        std::mem::take(&mut *self.outgoing.lock().unwrap())
    }

    /// Bus side: deliver one routed message into the inbox.
    pub fn deliver(&self, message: Message) {
        self.inbox.lock().unwrap().push_back(message);
    }
}

/// In-process endpoint link over shared memory buffers.
pub struct LocalLink {
    buffers: Arc<LinkBuffers>,
}

impl LocalLink {
    pub fn new(buffers: Arc<LinkBuffers>) -> Self {
        LocalLink { buffers }
    }
}

impl EndpointLink for LocalLink {
    fn publish(&mut self, message: Message) -> Result<(), TransportError> {
        self.buffers.outgoing.lock().unwrap().push(message);
        Ok(())
    }

    fn collect(&mut self, sink: &mut Vec<Message>) -> Result<(), TransportError> {
        let mut inbox = self.buffers.inbox.lock().unwrap();
        sink.extend(inbox.drain(..));
        Ok(())
    }
}

// ─── Subscriptions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    receiver: Uid,
    kind: MessageKind,
}

/// Allowed senders plus the accepted-but-not-yet-unloaded messages for one
/// `(receiver, kind)` pair.
struct Subscription {
    senders: HashSet<Uid>,
    messages: Vec<Message>,
}

// ─── Endpoint ───────────────────────────────────────────────────────────────

/// An entity's exclusive handle to the message bus.
pub struct MessageEndpoint {
    uid: Uid,
    link: Box<dyn EndpointLink>,
    subscriptions: HashMap<SubscriptionKey, Subscription>,
}

impl MessageEndpoint {
    /// Wrap a bus-provided link. Called by the bus engines; library users get
    /// endpoints from [`MessageBus::create_endpoint`](crate::bus::MessageBus).
    pub(crate) fn new(link: Box<dyn EndpointLink>) -> Self {
        MessageEndpoint {
            uid: Uid::new(),
            link,
            subscriptions: HashMap::new(),
        }
    }

    /// Identifier of this endpoint.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Allow `receiver` to see `kind` messages from `senders`.
    ///
    /// Idempotent: subscribing again widens the allowed-sender set and never
    /// removes previously allowed senders. Returns how many senders were
    /// newly added.
    pub fn subscribe(
        &mut self,
        kind: MessageKind,
        receiver: Uid,
        senders: impl IntoIterator<Item = Uid>,
    ) -> usize {
        let subscription = self
            .subscriptions
            .entry(SubscriptionKey { receiver, kind })
            .or_insert_with(|| Subscription {
                senders: HashSet::new(),
                messages: Vec::new(),
            });
        let before = subscription.senders.len();
        subscription.senders.extend(senders);
        subscription.senders.len() - before
    }

    /// Queue one message for bus pickup. Non-blocking on the in-process
    /// engine; the socket engine publishes immediately.
    ///
    /// A nil sender uid is rejected: every live entity sends under its own
    /// identifier.
    pub fn send(&mut self, message: impl Into<Message>) -> Result<(), TransportError> {
        let message = message.into();
        if message.sender().is_nil() {
            return Err(TransportError::NilSender);
        }
        self.link.publish(message)
    }

    /// Pull everything the bus has delivered since the last call, filing
    /// accepted messages into their subscription buffers.
    ///
    /// Returns the number of messages accepted by at least one subscription.
    /// Must be called before `unload_*` can observe new messages.
    pub fn receive_all_messages(&mut self) -> Result<usize, TransportError> {
        let mut delivered = Vec::new();
        self.link.collect(&mut delivered)?;

        let mut accepted = 0;
        for message in delivered {
            let sender = message.sender();
            let kind = message.kind();
            let mut claimed = false;
            for (key, subscription) in self.subscriptions.iter_mut() {
                if key.kind == kind && subscription.senders.contains(&sender) {
                    subscription.messages.push(message.clone());
                    claimed = true;
                }
            }
            if claimed {
                accepted += 1;
            } else {
                trace!(%sender, ?kind, "dropping message with no matching subscription");
            }
        }
        Ok(accepted)
    }

    /// Return and clear every buffered message of `kind` for `receiver`.
    pub fn unload_messages(&mut self, kind: MessageKind, receiver: Uid) -> Vec<Message> {
        self.subscriptions
            .get_mut(&SubscriptionKey { receiver, kind })
            .map(|subscription| std::mem::take(&mut subscription.messages))
            .unwrap_or_default()
    }

    /// Return and clear the buffered spike messages for `receiver`.
    pub fn unload_spikes(&mut self, receiver: Uid) -> Vec<SpikeMessage> {
        self.unload_messages(MessageKind::Spike, receiver)
            .into_iter()
            .map(|message| match message {
                Message::Spike(m) => m,
                Message::SynapticImpact(_) => unreachable!("spike buffer holds only spikes"),
            })
            .collect()
    }

    /// Return and clear the buffered synaptic impact messages for `receiver`.
    pub fn unload_impacts(&mut self, receiver: Uid) -> Vec<SynapticImpactMessage> {
        self.unload_messages(MessageKind::SynapticImpact, receiver)
            .into_iter()
            .map(|message| match message {
                Message::SynapticImpact(m) => m,
                Message::Spike(_) => unreachable!("impact buffer holds only impacts"),
            })
            .collect()
    }
}
