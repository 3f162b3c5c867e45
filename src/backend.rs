//! Single-threaded CPU backend: the per-step execution loop.
//!
//! One `step` call advances the whole network by one unit of simulated time:
//! projections turn last step's spikes into future synaptic impacts,
//! populations turn delivered impacts into new spikes, and a single
//! `route_messages` call at the end of the step is the barrier that makes
//! everything sent during step *n* visible on step *n* + 1. Impacts always
//! land in a later step's queue, never the current one, so populations and
//! projections have no cross-dependency within a step and load order only
//! matters for reproducibility.

use std::collections::HashMap;

use tracing::debug;

use crate::bus::MessageBus;
use crate::endpoint::MessageEndpoint;
use crate::message::{
    MessageHeader, MessageKind, SpikeMessage, SynapticImpact, SynapticImpactMessage,
};
use crate::population::{NeuronKind, Population};
use crate::projection::{Projection, SynapseKind, SynapseParams};
use crate::transport::TransportError;
use crate::uid::Uid;

/// Errors surfaced while loading or running a network.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unsupported synapse kind {0:?}")]
    UnsupportedSynapseKind(SynapseKind),
    #[error("unsupported neuron kind {0:?}")]
    UnsupportedNeuronKind(NeuronKind),
    #[error("no loaded population or projection with uid {0}")]
    UnknownReceiver(Uid),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Synapse kinds this backend can calculate.
pub const SUPPORTED_SYNAPSES: &[SynapseKind] = &[
    SynapseKind::Delta,
    SynapseKind::AdditiveStdpDelta,
    SynapseKind::SynapticResourceStdpDelta,
];

/// Neuron kinds this backend can calculate.
pub const SUPPORTED_NEURONS: &[NeuronKind] = &[NeuronKind::Blifat];

// ─── Entries ────────────────────────────────────────────────────────────────

/// Impacts accumulated for future steps, keyed by the step they land on.
type ImpactQueue = HashMap<u64, Vec<SynapticImpact>>;

struct PopulationEntry {
    population: Population,
    endpoint: MessageEndpoint,
}

struct ProjectionEntry {
    projection: Projection,
    endpoint: MessageEndpoint,
    queue: ImpactQueue,
}

// ─── Backend ────────────────────────────────────────────────────────────────

/// The step-loop orchestrator over one message bus.
pub struct Backend {
    bus: MessageBus,
    populations: Vec<PopulationEntry>,
    projections: Vec<ProjectionEntry>,
    step: u64,
    initialized: bool,
}

impl Backend {
    pub fn new(bus: MessageBus) -> Self {
        Backend {
            bus,
            populations: Vec::new(),
            projections: Vec::new(),
            step: 0,
            initialized: false,
        }
    }

    /// Steps executed so far.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Create an extra endpoint on the backend's bus, for input channels,
    /// observers and tests.
    pub fn create_endpoint(&mut self) -> Result<MessageEndpoint, TransportError> {
        self.bus.create_endpoint()
    }

    /// Load populations. Rejects unsupported neuron kinds before any step
    /// runs; loaded order is the deterministic processing order.
    pub fn load_populations(
        &mut self,
        populations: Vec<Population>,
    ) -> Result<(), BackendError> {
        for population in &populations {
            if !SUPPORTED_NEURONS.contains(&population.kind()) {
                return Err(BackendError::UnsupportedNeuronKind(population.kind()));
            }
        }
        for population in populations {
            let endpoint = self.bus.create_endpoint()?;
            self.populations.push(PopulationEntry {
                population,
                endpoint,
            });
        }
        Ok(())
    }

    /// Load projections. Rejects unsupported synapse kinds before any step
    /// runs; loaded order is the deterministic processing order.
    pub fn load_projections(
        &mut self,
        projections: Vec<Projection>,
    ) -> Result<(), BackendError> {
        for projection in &projections {
            if !SUPPORTED_SYNAPSES.contains(&projection.kind()) {
                return Err(BackendError::UnsupportedSynapseKind(projection.kind()));
            }
        }
        for projection in projections {
            let endpoint = self.bus.create_endpoint()?;
            self.projections.push(ProjectionEntry {
                projection,
                endpoint,
                queue: ImpactQueue::new(),
            });
        }
        Ok(())
    }

    /// Widen the spike subscription of a loaded population or projection,
    /// e.g. to wire an external input channel to an input projection.
    pub fn subscribe_spikes(
        &mut self,
        receiver: Uid,
        senders: impl IntoIterator<Item = Uid>,
    ) -> Result<(), BackendError> {
        if let Some(entry) = self
            .projections
            .iter_mut()
            .find(|entry| entry.projection.uid() == receiver)
        {
            entry.endpoint.subscribe(MessageKind::Spike, receiver, senders);
            return Ok(());
        }
        if let Some(entry) = self
            .populations
            .iter_mut()
            .find(|entry| entry.population.uid() == receiver)
        {
            entry.endpoint.subscribe(MessageKind::Spike, receiver, senders);
            return Ok(());
        }
        Err(BackendError::UnknownReceiver(receiver))
    }

    /// Wire the standing subscriptions: projections listen for spikes from
    /// their presynaptic population (STDP kinds also from their postsynaptic
    /// one), populations listen for impacts from every incoming projection.
    fn init(&mut self) {
        for entry in &mut self.projections {
            let uid = entry.projection.uid();
            let presynaptic = entry.projection.presynaptic();
            if !presynaptic.is_nil() {
                entry
                    .endpoint
                    .subscribe(MessageKind::Spike, uid, [presynaptic]);
            }
            if entry.projection.kind() != SynapseKind::Delta {
                let postsynaptic = entry.projection.postsynaptic();
                if !postsynaptic.is_nil() {
                    entry
                        .endpoint
                        .subscribe(MessageKind::Spike, uid, [postsynaptic]);
                }
            }
        }
        for entry in &mut self.populations {
            let uid = entry.population.uid();
            let incoming: Vec<Uid> = self
                .projections
                .iter()
                .filter(|p| p.projection.postsynaptic() == uid)
                .map(|p| p.projection.uid())
                .collect();
            entry
                .endpoint
                .subscribe(MessageKind::SynapticImpact, uid, incoming);
        }
    }

    /// Advance the network by one step.
    pub fn step(&mut self) -> Result<(), BackendError> {
        if !self.initialized {
            self.init();
            self.initialized = true;
        }
        debug!(step = self.step, "backend step started");

        // Projections: spikes from last step become impacts for future steps;
        // impacts due this step go out.
        for entry in &mut self.projections {
            entry.endpoint.receive_all_messages()?;
            let spikes = entry.endpoint.unload_spikes(entry.projection.uid());
            calculate_projection(&mut entry.projection, &spikes, &mut entry.queue, self.step);

            if let Some(impacts) = entry.queue.remove(&self.step) {
                if !impacts.is_empty() {
                    entry.endpoint.send(SynapticImpactMessage {
                        header: MessageHeader {
                            sender: entry.projection.uid(),
                            step: self.step,
                        },
                        presynaptic_population: entry.projection.presynaptic(),
                        postsynaptic_population: entry.projection.postsynaptic(),
                        is_forcing: entry.projection.is_forcing(),
                        impacts,
                    })?;
                }
            }
        }

        // Populations: delivered impacts drive the neuron update; fired
        // indexes go out as one spike message.
        for entry in &mut self.populations {
            entry.endpoint.receive_all_messages()?;
            let impacts = entry.endpoint.unload_impacts(entry.population.uid());
            let fired = entry.population.calculate(&impacts);
            if !fired.is_empty() {
                entry.endpoint.send(SpikeMessage {
                    header: MessageHeader {
                        sender: entry.population.uid(),
                        step: self.step,
                    },
                    neuron_indexes: fired,
                })?;
            }
        }

        // The phase barrier: everything sent above becomes visible next step.
        self.bus.route_messages()?;
        self.step += 1;
        Ok(())
    }

    /// Keep stepping while `predicate` holds. Returns the number of steps
    /// executed. The predicate is the only cancellation mechanism; it is
    /// checked here, never inside `step`.
    pub fn run_while(
        &mut self,
        mut predicate: impl FnMut(&Backend) -> bool,
    ) -> Result<u64, BackendError> {
        let mut executed = 0;
        while predicate(self) {
            self.step()?;
            executed += 1;
        }
        Ok(executed)
    }
}

// ─── Projection calculation ─────────────────────────────────────────────────

/// The projection update callback, dispatched on the synapse kind. Spikes
/// from the presynaptic side queue impacts `delay` steps ahead; STDP kinds
/// additionally adjust weights from pre/post spike timing.
fn calculate_projection(
    projection: &mut Projection,
    spikes: &[SpikeMessage],
    queue: &mut ImpactQueue,
    step: u64,
) {
    let postsynaptic = projection.postsynaptic();
    for message in spikes {
        // On a self-loop projection the same spike plays both roles.
        let from_postsynaptic = message.header.sender == postsynaptic;
        let from_presynaptic =
            message.header.sender != postsynaptic || projection.presynaptic() == postsynaptic;

        if from_presynaptic {
            for &neuron_index in &message.neuron_indexes {
                forward_spike(projection, neuron_index, queue, step);
            }
        }
        if from_postsynaptic && projection.kind() != SynapseKind::Delta {
            for &neuron_index in &message.neuron_indexes {
                on_postsynaptic_spike(projection, neuron_index, step);
            }
        }
    }
}

/// Queue the impacts of one presynaptic spike and run the pre-side STDP
/// bookkeeping.
fn forward_spike(projection: &mut Projection, neuron_index: u32, queue: &mut ImpactQueue, step: u64) {
    for position in projection.get_by_presynaptic_neuron(neuron_index) {
        let synapse = projection.synapse_mut(position);
        let target = synapse.target;
        match &mut synapse.params {
            SynapseParams::Delta(_) => {}
            SynapseParams::AdditiveStdpDelta(params) => {
                params.presynaptic_spike_times.push(step);
                // Pre after post depresses the synapse.
                if let Some(&last_post) = params.postsynaptic_spike_times.last() {
                    let dt = step.saturating_sub(last_post) as f32;
                    params.delta.weight -= params.a_minus * (-dt / params.tau_minus).exp();
                }
            }
            SynapseParams::SynapticResourceStdpDelta(params) => {
                params.last_spike_step = step;
                params.had_hebbian_update = false;
            }
        }
        let delta = projection.synapse(position).params.delta();
        let impact = SynapticImpact {
            connection_index: position as u64,
            impact: delta.weight,
            kind: delta.output,
            presynaptic_neuron_index: neuron_index,
            postsynaptic_neuron_index: target,
        };
        queue
            .entry(step + u64::from(delta.delay))
            .or_default()
            .push(impact);
    }
}

/// Post-side STDP bookkeeping for one fired postsynaptic neuron.
fn on_postsynaptic_spike(projection: &mut Projection, neuron_index: u32, step: u64) {
    for position in projection.get_by_postsynaptic_neuron(neuron_index) {
        let synapse = projection.synapse_mut(position);
        match &mut synapse.params {
            SynapseParams::Delta(_) => {}
            SynapseParams::AdditiveStdpDelta(params) => {
                params.postsynaptic_spike_times.push(step);
                // Post after pre potentiates the synapse.
                if let Some(&last_pre) = params.presynaptic_spike_times.last() {
                    let dt = step.saturating_sub(last_pre) as f32;
                    params.delta.weight += params.a_plus * (-dt / params.tau_plus).exp();
                }
            }
            SynapseParams::SynapticResourceStdpDelta(params) => {
                let since_pre = step.saturating_sub(params.last_spike_step);
                if since_pre <= u64::from(params.dopamine_plasticity_period)
                    && !params.had_hebbian_update
                    && params.synaptic_resource > 0.0
                {
                    let transfer = params.d_u.min(params.synaptic_resource);
                    params.delta.weight = (params.delta.weight + transfer).min(params.w_max);
                    params.synaptic_resource -= transfer;
                    params.had_hebbian_update = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::BlifatNeuron;
    use crate::projection::{AdditiveStdpParams, DeltaParams, Synapse};

    fn one_neuron_population() -> Population {
        Population::from_generator(Uid::new(), 1, |_| BlifatNeuron::new(1.0))
    }

    /// The smallest network of the original: one neuron, a self-loop with
    /// delay 4, an input projection with delay 1. One external spike at step
    /// 0 keeps the network firing forever.
    #[test]
    fn smallest_network_self_excites() {
        let mut backend = Backend::new(MessageBus::local());
        let population = one_neuron_population();
        let population_uid = population.uid();

        let loop_projection = Projection::from_generator(
            Uid::new(),
            population_uid,
            population_uid,
            SynapseKind::Delta,
            1,
            |_| Some(Synapse::delta(0, 0, 1.0, 4)),
        );
        let input_projection = Projection::from_generator(
            Uid::new(),
            Uid::nil(),
            population_uid,
            SynapseKind::Delta,
            1,
            |_| Some(Synapse::delta(0, 0, 1.0, 1)),
        );
        let input_uid = input_projection.uid();

        backend.load_populations(vec![population]).unwrap();
        backend
            .load_projections(vec![input_projection, loop_projection])
            .unwrap();

        let mut endpoint = backend.create_endpoint().unwrap();
        let in_channel = Uid::new();
        let out_channel = Uid::new();
        backend.subscribe_spikes(input_uid, [in_channel]).unwrap();
        endpoint.subscribe(MessageKind::Spike, out_channel, [population_uid]);

        let mut output_steps = Vec::new();
        for step in 0..20u64 {
            if step == 0 {
                endpoint
                    .send(SpikeMessage {
                        header: MessageHeader {
                            sender: in_channel,
                            step,
                        },
                        neuron_indexes: vec![0],
                    })
                    .unwrap();
            }
            backend.step().unwrap();
            endpoint.receive_all_messages().unwrap();
            for spike in endpoint.unload_spikes(out_channel) {
                output_steps.push(spike.header.step);
            }
        }

        // Input at step 0 surfaces as the first output spike strictly later;
        // the self-loop then re-excites every delay + 2 routing steps with no
        // further input.
        assert_eq!(output_steps, vec![3, 9, 15]);
    }

    #[test]
    fn impacts_are_invisible_within_their_step() {
        // The impact sent by the projection on step n must not reach the
        // population before step n + 1: with an input delay of 1 the first
        // fire can never happen before step 3.
        let mut backend = Backend::new(MessageBus::local());
        let population = one_neuron_population();
        let population_uid = population.uid();
        let input = Projection::from_generator(
            Uid::new(),
            Uid::nil(),
            population_uid,
            SynapseKind::Delta,
            1,
            |_| Some(Synapse::delta(0, 0, 1.0, 1)),
        );
        let input_uid = input.uid();

        backend.load_populations(vec![population]).unwrap();
        backend.load_projections(vec![input]).unwrap();

        let mut endpoint = backend.create_endpoint().unwrap();
        let in_channel = Uid::new();
        let out_channel = Uid::new();
        backend.subscribe_spikes(input_uid, [in_channel]).unwrap();
        endpoint.subscribe(MessageKind::Spike, out_channel, [population_uid]);

        endpoint
            .send(SpikeMessage {
                header: MessageHeader {
                    sender: in_channel,
                    step: 0,
                },
                neuron_indexes: vec![0],
            })
            .unwrap();

        for expected_empty in [true, true, true, false] {
            backend.step().unwrap();
            endpoint.receive_all_messages().unwrap();
            let spikes = endpoint.unload_spikes(out_channel);
            assert_eq!(spikes.is_empty(), expected_empty);
        }
    }

    #[test]
    fn additive_stdp_potentiates_on_pre_then_post() {
        let mut backend = Backend::new(MessageBus::local());
        let population = Population::from_generator(Uid::new(), 1, |_| BlifatNeuron::new(0.5));
        let population_uid = population.uid();

        let projection = Projection::from_generator(
            Uid::new(),
            Uid::nil(),
            population_uid,
            SynapseKind::AdditiveStdpDelta,
            1,
            |_| {
                Some(Synapse {
                    source: 0,
                    target: 0,
                    params: SynapseParams::AdditiveStdpDelta(AdditiveStdpParams::new(
                        DeltaParams::new(1.0, 1),
                    )),
                })
            },
        );
        let projection_uid = projection.uid();

        backend.load_populations(vec![population]).unwrap();
        backend.load_projections(vec![projection]).unwrap();

        let mut endpoint = backend.create_endpoint().unwrap();
        let in_channel = Uid::new();
        backend
            .subscribe_spikes(projection_uid, [in_channel])
            .unwrap();

        endpoint
            .send(SpikeMessage {
                header: MessageHeader {
                    sender: in_channel,
                    step: 0,
                },
                neuron_indexes: vec![0],
            })
            .unwrap();

        for _ in 0..6 {
            backend.step().unwrap();
        }

        // The presynaptic spike drove the neuron over threshold; the fired
        // spike came back to the projection and potentiated the synapse.
        let entry = &mut backend.projections[0];
        let SynapseParams::AdditiveStdpDelta(params) = &entry.projection.synapse(0).params else {
            panic!("kind changed");
        };
        assert!(!params.presynaptic_spike_times.is_empty());
        assert!(!params.postsynaptic_spike_times.is_empty());
        assert!(params.delta.weight > 1.0);
    }

    #[test]
    fn run_while_checks_the_predicate_each_step() {
        let mut backend = Backend::new(MessageBus::local());
        let executed = backend.run_while(|b| b.step_count() < 5).unwrap();
        assert_eq!(executed, 5);
        assert_eq!(backend.step_count(), 5);
    }

    #[test]
    fn unknown_receiver_is_an_error() {
        let mut backend = Backend::new(MessageBus::local());
        let err = backend.subscribe_spikes(Uid::new(), [Uid::new()]).unwrap_err();
        assert!(matches!(err, BackendError::UnknownReceiver(_)));
    }

    #[test]
    fn forcing_projection_stamps_its_messages() {
        let mut backend = Backend::new(MessageBus::local());
        let population = one_neuron_population();
        let population_uid = population.uid();
        let mut projection = Projection::from_generator(
            Uid::new(),
            Uid::nil(),
            population_uid,
            SynapseKind::Delta,
            1,
            |_| Some(Synapse::delta(0, 0, 2.0, 1)),
        );
        projection.set_forcing(true);
        let projection_uid = projection.uid();

        backend.load_populations(vec![population]).unwrap();
        backend.load_projections(vec![projection]).unwrap();

        let mut endpoint = backend.create_endpoint().unwrap();
        let in_channel = Uid::new();
        let observer = Uid::new();
        backend
            .subscribe_spikes(projection_uid, [in_channel])
            .unwrap();
        endpoint.subscribe(MessageKind::SynapticImpact, observer, [projection_uid]);

        endpoint
            .send(SpikeMessage {
                header: MessageHeader {
                    sender: in_channel,
                    step: 0,
                },
                neuron_indexes: vec![0],
            })
            .unwrap();

        let mut forced = Vec::new();
        for _ in 0..4 {
            backend.step().unwrap();
            endpoint.receive_all_messages().unwrap();
            forced.extend(endpoint.unload_impacts(observer));
        }
        assert_eq!(forced.len(), 1);
        assert!(forced[0].is_forcing);
        assert_eq!(forced[0].impacts[0].impact, 2.0);
    }
}
