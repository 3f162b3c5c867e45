//! Projections: the synapses connecting one population to another.
//!
//! A projection owns an ordered sequence of synapse records. Positions in
//! that sequence are what impact messages reference, so they are stable
//! between index rebuilds but not across add/remove operations.
//!
//! The dual-keyed connection index (by source neuron, by target neuron) is a
//! derived structure: any mutation marks it stale, any query rebuilds it in
//! one full pass. Validity is cleared before a mutating operation starts and
//! restored only when the operation completes, so an interrupted mutation
//! leaves the index stale rather than silently wrong.

use std::collections::HashMap;

use crate::message::ImpactKind;
use crate::uid::Uid;

// ─── Synapse parameters ─────────────────────────────────────────────────────

/// Closed set of synapse kinds a projection can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynapseKind {
    Delta,
    AdditiveStdpDelta,
    SynapticResourceStdpDelta,
}

/// Parameters every delta-family synapse carries.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaParams {
    /// Impact magnitude forwarded per presynaptic spike.
    pub weight: f32,
    /// Steps between the presynaptic spike and the impact landing.
    /// Always at least 1: impacts are never visible within their own step.
    pub delay: u32,
    /// How the impact acts on the receiving neuron.
    pub output: ImpactKind,
}

impl DeltaParams {
    pub fn new(weight: f32, delay: u32) -> Self {
        assert!(delay >= 1, "synaptic delay must be at least one step");
        DeltaParams {
            weight,
            delay,
            output: ImpactKind::Excitatory,
        }
    }

    pub fn with_output(mut self, output: ImpactKind) -> Self {
        self.output = output;
        self
    }
}

/// Additive STDP rule state on top of a delta synapse.
#[derive(Debug, Clone, PartialEq)]
pub struct AdditiveStdpParams {
    pub delta: DeltaParams,
    /// Potentiation amplitude per coincidence.
    pub a_plus: f32,
    /// Depression amplitude per coincidence.
    pub a_minus: f32,
    /// Potentiation time constant, in steps.
    pub tau_plus: f32,
    /// Depression time constant, in steps.
    pub tau_minus: f32,
    /// Steps on which this synapse saw presynaptic spikes.
    pub presynaptic_spike_times: Vec<u64>,
    /// Steps on which the target neuron fired.
    pub postsynaptic_spike_times: Vec<u64>,
}

impl AdditiveStdpParams {
    pub fn new(delta: DeltaParams) -> Self {
        AdditiveStdpParams {
            delta,
            a_plus: 0.01,
            a_minus: 0.012,
            tau_plus: 10.0,
            tau_minus: 10.0,
            presynaptic_spike_times: Vec::new(),
            postsynaptic_spike_times: Vec::new(),
        }
    }
}

/// Synaptic-resource STDP rule state on top of a delta synapse.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStdpParams {
    pub delta: DeltaParams,
    /// Free synaptic resource available for weight changes.
    pub synaptic_resource: f32,
    pub w_min: f32,
    pub w_max: f32,
    /// Resource spent per hebbian update.
    pub d_u: f32,
    /// Steps after a presynaptic spike during which a postsynaptic spike
    /// counts as a coincidence.
    pub dopamine_plasticity_period: u32,
    /// Step of the last presynaptic spike seen by this synapse.
    pub last_spike_step: u64,
    /// Whether the synapse already updated during the current sequence.
    pub had_hebbian_update: bool,
}

impl ResourceStdpParams {
    pub fn new(delta: DeltaParams) -> Self {
        ResourceStdpParams {
            delta,
            synaptic_resource: 1.0,
            w_min: 0.0,
            w_max: 1.0,
            d_u: 0.1,
            dopamine_plasticity_period: 10,
            last_spike_step: 0,
            had_hebbian_update: false,
        }
    }
}

/// Per-synapse parameters, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SynapseParams {
    Delta(DeltaParams),
    AdditiveStdpDelta(AdditiveStdpParams),
    SynapticResourceStdpDelta(ResourceStdpParams),
}

impl SynapseParams {
    pub fn kind(&self) -> SynapseKind {
        match self {
            SynapseParams::Delta(_) => SynapseKind::Delta,
            SynapseParams::AdditiveStdpDelta(_) => SynapseKind::AdditiveStdpDelta,
            SynapseParams::SynapticResourceStdpDelta(_) => SynapseKind::SynapticResourceStdpDelta,
        }
    }

    /// The delta core every kind shares.
    pub fn delta(&self) -> &DeltaParams {
        match self {
            SynapseParams::Delta(p) => p,
            SynapseParams::AdditiveStdpDelta(p) => &p.delta,
            SynapseParams::SynapticResourceStdpDelta(p) => &p.delta,
        }
    }

    pub fn delta_mut(&mut self) -> &mut DeltaParams {
        match self {
            SynapseParams::Delta(p) => p,
            SynapseParams::AdditiveStdpDelta(p) => &mut p.delta,
            SynapseParams::SynapticResourceStdpDelta(p) => &mut p.delta,
        }
    }
}

/// One connection: source neuron in the presynaptic population, target
/// neuron in the postsynaptic population, kind-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Synapse {
    pub source: u32,
    pub target: u32,
    pub params: SynapseParams,
}

impl Synapse {
    pub fn delta(source: u32, target: u32, weight: f32, delay: u32) -> Self {
        Synapse {
            source,
            target,
            params: SynapseParams::Delta(DeltaParams::new(weight, delay)),
        }
    }
}

// ─── Connection index ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ConnectionIndex {
    by_source: HashMap<u32, Vec<usize>>,
    by_target: HashMap<u32, Vec<usize>>,
    valid: bool,
}

// ─── Removal sweep ──────────────────────────────────────────────────────────

/// Remove the elements at `sorted_remove` positions in one linear compaction
/// pass, preserving the relative order of survivors.
///
/// `sorted_remove` must be sorted ascending and duplicate-free.
fn remove_by_index<T>(data: &mut Vec<T>, sorted_remove: &[usize]) {
    if sorted_remove.is_empty() {
        return;
    }
    let mut next = sorted_remove.iter().copied().peekable();
    let mut write = 0;
    for read in 0..data.len() {
        if next.peek() == Some(&read) {
            next.next();
            continue;
        }
        if write != read {
            data.swap(write, read);
        }
        write += 1;
    }
    data.truncate(write);
}

// ─── Projection ─────────────────────────────────────────────────────────────

/// The synapses connecting one population to another (or itself).
#[derive(Debug)]
pub struct Projection {
    uid: Uid,
    presynaptic: Uid,
    postsynaptic: Uid,
    kind: SynapseKind,
    is_forcing: bool,
    synapses: Vec<Synapse>,
    index: ConnectionIndex,
}

impl Projection {
    /// Empty projection of the given kind between two populations.
    ///
    /// A nil `presynaptic` uid marks an externally driven projection; its
    /// spike sources are wired up by explicit subscription instead.
    pub fn new(uid: Uid, presynaptic: Uid, postsynaptic: Uid, kind: SynapseKind) -> Self {
        Projection {
            uid,
            presynaptic,
            postsynaptic,
            kind,
            is_forcing: false,
            synapses: Vec::new(),
            index: ConnectionIndex::default(),
        }
    }

    /// Build a projection by calling `generator` for positions `0..count`;
    /// `None` results are skipped.
    pub fn from_generator(
        uid: Uid,
        presynaptic: Uid,
        postsynaptic: Uid,
        kind: SynapseKind,
        count: usize,
        mut generator: impl FnMut(usize) -> Option<Synapse>,
    ) -> Self {
        let mut projection = Self::new(uid, presynaptic, postsynaptic, kind);
        projection.add_synapses((0..count).filter_map(&mut generator));
        projection
    }

    /// Mark every impact from this projection as forcing.
    pub fn set_forcing(&mut self, forcing: bool) {
        self.is_forcing = forcing;
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn presynaptic(&self) -> Uid {
        self.presynaptic
    }

    pub fn postsynaptic(&self) -> Uid {
        self.postsynaptic
    }

    pub fn kind(&self) -> SynapseKind {
        self.kind
    }

    pub fn is_forcing(&self) -> bool {
        self.is_forcing
    }

    pub fn len(&self) -> usize {
        self.synapses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synapses.is_empty()
    }

    pub fn synapse(&self, position: usize) -> &Synapse {
        &self.synapses[position]
    }

    pub fn synapse_mut(&mut self, position: usize) -> &mut Synapse {
        &mut self.synapses[position]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Synapse> {
        self.synapses.iter()
    }

    /// Whether the connection index currently reflects the synapse sequence.
    pub fn is_index_updated(&self) -> bool {
        self.index.valid
    }

    /// Append synapses. Returns how many were added.
    ///
    /// When the index was valid before the call it is maintained eagerly and
    /// stays valid; otherwise it stays stale until the next query. The
    /// validity flag is down for the duration of the append, so a panicking
    /// iterator leaves the index stale, never wrong.
    pub fn add_synapses(&mut self, synapses: impl IntoIterator<Item = Synapse>) -> usize {
        let was_valid = self.index.valid;
        self.index.valid = false;
        let before = self.synapses.len();
        for synapse in synapses {
            assert_eq!(
                synapse.params.kind(),
                self.kind,
                "synapse kind does not match the projection"
            );
            if was_valid {
                let position = self.synapses.len();
                self.index.by_source.entry(synapse.source).or_default().push(position);
                self.index.by_target.entry(synapse.target).or_default().push(position);
            }
            self.synapses.push(synapse);
        }
        self.index.valid = was_valid;
        self.synapses.len() - before
    }

    /// Positions of every synapse whose source is `neuron_index`.
    pub fn get_by_presynaptic_neuron(&mut self, neuron_index: u32) -> Vec<usize> {
        self.reindex();
        self.index
            .by_source
            .get(&neuron_index)
            .cloned()
            .unwrap_or_default()
    }

    /// Positions of every synapse whose target is `neuron_index`.
    pub fn get_by_postsynaptic_neuron(&mut self, neuron_index: u32) -> Vec<usize> {
        self.reindex();
        self.index
            .by_target
            .get(&neuron_index)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every synapse with source `neuron_index`; returns the count.
    pub fn disconnect_presynaptic_neuron(&mut self, neuron_index: u32) -> usize {
        self.disconnect_if(|synapse| synapse.source == neuron_index)
    }

    /// Remove every synapse with target `neuron_index`; returns the count.
    pub fn disconnect_postsynaptic_neuron(&mut self, neuron_index: u32) -> usize {
        self.index.valid = false;
        let mut positions = self.get_by_postsynaptic_neuron(neuron_index);
        positions.sort_unstable();
        // Removal shifts the positions of every survivor behind the first
        // hole, so the rebuilt-by-the-query index is stale again afterwards.
        self.index.valid = false;
        remove_by_index(&mut self.synapses, &positions);
        positions.len()
    }

    /// Remove every synapse matching `predicate`; returns the count.
    pub fn disconnect_if(&mut self, predicate: impl Fn(&Synapse) -> bool) -> usize {
        self.index.valid = false;
        let positions: Vec<usize> = self
            .synapses
            .iter()
            .enumerate()
            .filter(|(_, synapse)| predicate(synapse))
            .map(|(position, _)| position)
            .collect();
        remove_by_index(&mut self.synapses, &positions);
        positions.len()
    }

    /// Remove every synapse between `source` and `target`; returns the count.
    pub fn disconnect_neurons(&mut self, source: u32, target: u32) -> usize {
        self.disconnect_if(|synapse| synapse.source == source && synapse.target == target)
    }

    /// Full single-pass rebuild of the dual index, only when stale.
    fn reindex(&mut self) {
        if self.index.valid {
            return;
        }
        self.index.by_source.clear();
        self.index.by_target.clear();
        for (position, synapse) in self.synapses.iter().enumerate() {
            self.index.by_source.entry(synapse.source).or_default().push(position);
            self.index.by_target.entry(synapse.target).or_default().push(position);
        }
        self.index.valid = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection_with(pairs: &[(u32, u32)]) -> Projection {
        let mut projection = Projection::new(Uid::new(), Uid::new(), Uid::new(), SynapseKind::Delta);
        projection.add_synapses(
            pairs
                .iter()
                .map(|&(source, target)| Synapse::delta(source, target, 1.0, 1)),
        );
        projection
    }

    fn pairs(projection: &Projection) -> Vec<(u32, u32)> {
        projection.iter().map(|s| (s.source, s.target)).collect()
    }

    #[test]
    fn index_by_presynaptic_neuron() {
        let mut projection = projection_with(&[(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(projection.get_by_presynaptic_neuron(0), vec![0, 1]);
        assert_eq!(projection.get_by_presynaptic_neuron(1), vec![2, 3]);
        assert!(projection.get_by_presynaptic_neuron(2).is_empty());
    }

    #[test]
    fn index_by_postsynaptic_neuron() {
        let mut projection = projection_with(&[(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(projection.get_by_postsynaptic_neuron(0), vec![0, 2]);
        assert_eq!(projection.get_by_postsynaptic_neuron(1), vec![1, 3]);
    }

    #[test]
    fn query_rebuilds_after_mutation_history() {
        let mut projection = projection_with(&[(0, 0), (0, 1)]);
        // Query, mutate, query again: the second query must reflect the
        // current sequence, not the history.
        assert_eq!(projection.get_by_presynaptic_neuron(0), vec![0, 1]);
        projection.add_synapses([Synapse::delta(0, 2, 1.0, 1)]);
        projection.disconnect_postsynaptic_neuron(1);
        assert_eq!(pairs(&projection), vec![(0, 0), (0, 2)]);
        assert_eq!(projection.get_by_presynaptic_neuron(0), vec![0, 1]);
    }

    #[test]
    fn disconnect_postsynaptic_removes_exactly_matching() {
        let mut projection = projection_with(&[(0, 0), (1, 0), (0, 1), (1, 1)]);
        let removed = projection.disconnect_postsynaptic_neuron(0);
        assert_eq!(removed, 2);
        // Survivors keep their relative order.
        assert_eq!(pairs(&projection), vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn disconnect_presynaptic_removes_exactly_matching() {
        let mut projection = projection_with(&[(0, 0), (1, 0), (0, 1), (1, 1)]);
        let removed = projection.disconnect_presynaptic_neuron(1);
        assert_eq!(removed, 2);
        assert_eq!(pairs(&projection), vec![(0, 0), (0, 1)]);
    }

    #[test]
    fn disconnect_if_with_arbitrary_predicate() {
        let mut projection = projection_with(&[(0, 0), (1, 1), (2, 2), (3, 3)]);
        let removed = projection.disconnect_if(|s| s.source % 2 == 0);
        assert_eq!(removed, 2);
        assert_eq!(pairs(&projection), vec![(1, 1), (3, 3)]);
    }

    #[test]
    fn disconnect_neurons_removes_one_edge() {
        let mut projection = projection_with(&[(0, 0), (0, 1), (1, 0)]);
        assert_eq!(projection.disconnect_neurons(0, 1), 1);
        assert_eq!(pairs(&projection), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn add_maintains_a_valid_index_eagerly() {
        let mut projection = projection_with(&[(0, 0)]);
        projection.get_by_presynaptic_neuron(0); // force a rebuild
        assert!(projection.is_index_updated());

        projection.add_synapses([Synapse::delta(0, 5, 1.0, 1)]);
        // Still valid, and the eagerly maintained entries are correct.
        assert!(projection.is_index_updated());
        assert_eq!(projection.get_by_presynaptic_neuron(0), vec![0, 1]);
        assert_eq!(projection.get_by_postsynaptic_neuron(5), vec![1]);
    }

    #[test]
    fn add_to_stale_index_stays_stale() {
        let mut projection = projection_with(&[(0, 0)]);
        assert!(!projection.is_index_updated());
        projection.add_synapses([Synapse::delta(1, 1, 1.0, 1)]);
        assert!(!projection.is_index_updated());
    }

    #[test]
    fn disconnect_leaves_index_stale() {
        let mut projection = projection_with(&[(0, 0), (1, 1)]);
        projection.get_by_presynaptic_neuron(0);
        projection.disconnect_postsynaptic_neuron(0);
        assert!(!projection.is_index_updated());
    }

    #[test]
    fn removal_sweep_handles_edges() {
        let mut data = vec![0, 1, 2, 3, 4];
        remove_by_index(&mut data, &[0, 4]);
        assert_eq!(data, vec![1, 2, 3]);

        let mut data = vec![0, 1, 2];
        remove_by_index(&mut data, &[0, 1, 2]);
        assert!(data.is_empty());

        let mut data = vec![0, 1, 2];
        remove_by_index(&mut data, &[]);
        assert_eq!(data, vec![0, 1, 2]);
    }

    #[test]
    fn generator_projection_skips_none() {
        let projection = Projection::from_generator(
            Uid::new(),
            Uid::new(),
            Uid::new(),
            SynapseKind::Delta,
            4,
            |i| (i % 2 == 0).then(|| Synapse::delta(i as u32, 0, 1.0, 1)),
        );
        assert_eq!(projection.len(), 2);
        assert_eq!(pairs(&projection), vec![(0, 0), (2, 0)]);
    }
}
