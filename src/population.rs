//! Populations: homogeneous sets of simulated neurons.
//!
//! The neuron model here is a leaky integrate-and-fire variant in the BLIFAT
//! family: impacts move the membrane potential, crossing the activation
//! threshold fires the neuron and starts an absolute refractory period, and
//! the potential decays toward zero between impacts. The numbers are a
//! reference model, not settled science; the step loop only depends on the
//! `calculate` contract (impacts in, fired indexes out).

use crate::message::{ImpactKind, SynapticImpactMessage};
use crate::uid::Uid;

/// Closed set of neuron kinds a population can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NeuronKind {
    Blifat,
}

// ─── Neuron ─────────────────────────────────────────────────────────────────

/// State and parameters of one BLIFAT-style neuron.
#[derive(Debug, Clone, PartialEq)]
pub struct BlifatNeuron {
    /// Membrane potential.
    pub potential: f32,
    /// Firing threshold.
    pub activation_threshold: f32,
    /// Multiplicative decay toward zero applied on steps without a fire.
    pub potential_decay: f32,
    /// Potential right after a fire.
    pub potential_reset_value: f32,
    /// Steps after a fire during which the neuron ignores input.
    pub absolute_refractory_period: u32,
    /// Remaining refractory steps.
    refractory_remaining: u32,
    /// Remaining steps of an externally imposed block.
    blocked_remaining: u32,
    /// Accumulated dopamine level, consumed by plasticity rules.
    pub dopamine_value: f32,
}

impl BlifatNeuron {
    pub fn new(activation_threshold: f32) -> Self {
        BlifatNeuron {
            potential: 0.0,
            activation_threshold,
            potential_decay: 0.5,
            potential_reset_value: 0.0,
            absolute_refractory_period: 2,
            refractory_remaining: 0,
            blocked_remaining: 0,
            dopamine_value: 0.0,
        }
    }

    /// Integrate one impact into the membrane state.
    pub fn apply_impact(&mut self, kind: ImpactKind, value: f32) {
        if self.refractory_remaining > 0 || self.blocked_remaining > 0 {
            return;
        }
        match kind {
            ImpactKind::Excitatory => self.potential += value,
            ImpactKind::InhibitoryCurrent => self.potential -= value,
            // Conductance inhibition pulls proportionally toward rest.
            ImpactKind::InhibitoryConductance => self.potential *= 1.0 - value.clamp(0.0, 1.0),
            ImpactKind::Dopamine => self.dopamine_value += value,
            ImpactKind::Blocking => {
                self.blocked_remaining = self.blocked_remaining.max(value.max(0.0) as u32)
            }
        }
    }

    /// A forcing impact overrides integration outright.
    pub fn apply_forcing(&mut self, value: f32) {
        self.potential = value;
    }

    /// Advance one step. Returns whether the neuron fired.
    pub fn update(&mut self) -> bool {
        if self.blocked_remaining > 0 {
            self.blocked_remaining -= 1;
            return false;
        }
        if self.refractory_remaining > 0 {
            self.refractory_remaining -= 1;
            return false;
        }
        if self.potential >= self.activation_threshold {
            self.potential = self.potential_reset_value;
            self.refractory_remaining = self.absolute_refractory_period;
            return true;
        }
        self.potential *= self.potential_decay;
        false
    }

    pub fn is_refractory(&self) -> bool {
        self.refractory_remaining > 0
    }
}

impl Default for BlifatNeuron {
    fn default() -> Self {
        Self::new(1.0)
    }
}

// ─── Population ─────────────────────────────────────────────────────────────

/// A homogeneous set of neurons sharing one update model.
#[derive(Debug)]
pub struct Population {
    uid: Uid,
    neurons: Vec<BlifatNeuron>,
}

impl Population {
    pub fn new(uid: Uid, neurons: Vec<BlifatNeuron>) -> Self {
        Population { uid, neurons }
    }

    /// Build a population by calling `generator` for indexes `0..count`.
    pub fn from_generator(
        uid: Uid,
        count: usize,
        mut generator: impl FnMut(usize) -> BlifatNeuron,
    ) -> Self {
        Population {
            uid,
            neurons: (0..count).map(&mut generator).collect(),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn kind(&self) -> NeuronKind {
        NeuronKind::Blifat
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn neuron(&self, index: usize) -> &BlifatNeuron {
        &self.neurons[index]
    }

    pub fn neuron_mut(&mut self, index: usize) -> &mut BlifatNeuron {
        &mut self.neurons[index]
    }

    /// The population update callback: apply this step's delivered impacts,
    /// advance every neuron, and return the indexes that fired.
    pub fn calculate(&mut self, impacts: &[SynapticImpactMessage]) -> Vec<u32> {
        for message in impacts {
            for impact in &message.impacts {
                let Some(neuron) = self.neurons.get_mut(impact.postsynaptic_neuron_index as usize)
                else {
                    continue;
                };
                if message.is_forcing {
                    neuron.apply_forcing(impact.impact);
                } else {
                    neuron.apply_impact(impact.kind, impact.impact);
                }
            }
        }

        let mut fired = Vec::new();
        for (index, neuron) in self.neurons.iter_mut().enumerate() {
            if neuron.update() {
                fired.push(index as u32);
            }
        }
        fired
    }
}
