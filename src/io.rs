//! Input and output channels: endpoint wrappers for feeding spikes into a
//! network and observing the spikes it emits.
//!
//! A channel owns its endpoint outright and is addressed by that endpoint's
//! uid. Wire an input channel to an input projection with
//! [`Backend::subscribe_spikes`](crate::backend::Backend::subscribe_spikes);
//! an output channel subscribes itself to the populations it watches.

use crate::endpoint::MessageEndpoint;
use crate::message::{MessageHeader, MessageKind, SpikeMessage};
use crate::transport::TransportError;
use crate::uid::Uid;

/// Feeds externally generated spikes into the network under the channel's
/// own sender uid.
pub struct InputChannel {
    endpoint: MessageEndpoint,
}

impl InputChannel {
    pub fn new(endpoint: MessageEndpoint) -> Self {
        InputChannel { endpoint }
    }

    /// The uid input projections subscribe to.
    pub fn uid(&self) -> Uid {
        self.endpoint.uid()
    }

    /// Emit one spike message for the given step.
    pub fn send(&mut self, neuron_indexes: Vec<u32>, step: u64) -> Result<(), TransportError> {
        self.endpoint.send(SpikeMessage {
            header: MessageHeader {
                sender: self.uid(),
                step,
            },
            neuron_indexes,
        })
    }
}

/// Watches the spike output of selected populations.
pub struct OutputChannel {
    endpoint: MessageEndpoint,
}

impl OutputChannel {
    /// Subscribe to spikes from every population in `sources`.
    pub fn new(mut endpoint: MessageEndpoint, sources: impl IntoIterator<Item = Uid>) -> Self {
        let receiver = endpoint.uid();
        endpoint.subscribe(MessageKind::Spike, receiver, sources);
        OutputChannel { endpoint }
    }

    pub fn uid(&self) -> Uid {
        self.endpoint.uid()
    }

    /// Pump the endpoint and return every spike message delivered since the
    /// last read.
    pub fn read(&mut self) -> Result<Vec<SpikeMessage>, TransportError> {
        self.endpoint.receive_all_messages()?;
        let receiver = self.endpoint.uid();
        Ok(self.endpoint.unload_spikes(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;

    #[test]
    fn channels_pass_spikes_through_the_bus() {
        let mut bus = MessageBus::local();
        let mut input = InputChannel::new(bus.create_endpoint().unwrap());
        let mut output = OutputChannel::new(bus.create_endpoint().unwrap(), [input.uid()]);

        input.send(vec![0, 2], 7).unwrap();
        assert!(output.read().unwrap().is_empty());

        bus.route_messages().unwrap();
        let spikes = output.read().unwrap();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].header.sender, input.uid());
        assert_eq!(spikes[0].header.step, 7);
        assert_eq!(spikes[0].neuron_indexes, vec![0, 2]);
    }

    #[test]
    fn output_channel_ignores_unsubscribed_sources() {
        let mut bus = MessageBus::local();
        let mut wanted = InputChannel::new(bus.create_endpoint().unwrap());
        let mut unwanted = InputChannel::new(bus.create_endpoint().unwrap());
        let mut output = OutputChannel::new(bus.create_endpoint().unwrap(), [wanted.uid()]);

        wanted.send(vec![1], 0).unwrap();
        unwanted.send(vec![2], 0).unwrap();
        bus.route_messages().unwrap();

        let spikes = output.read().unwrap();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].header.sender, wanted.uid());
    }
}
