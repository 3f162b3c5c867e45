//! The smallest network that keeps itself firing: one neuron, a self-loop
//! projection with a 4-step delay, and an input projection that carries a
//! single external spike at step 0. Run with
//! `cargo run --example smallest_network`.

use spikeflow::*;

fn main() -> Result<(), BackendError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut backend = Backend::new(MessageBus::local());

    let population = Population::from_generator(Uid::new(), 1, |_| BlifatNeuron::new(1.0));
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

    backend.load_populations(vec![population])?;
    backend.load_projections(vec![input_projection, loop_projection])?;

    let mut input = InputChannel::new(backend.create_endpoint()?);
    let mut output = OutputChannel::new(backend.create_endpoint()?, [population_uid]);
    backend.subscribe_spikes(input_uid, [input.uid()])?;

    input.send(vec![0], 0)?;
    for step in 0..20u64 {
        backend.step()?;
        for spike in output.read()? {
            println!(
                "step {step:2}: population spiked (neurons {:?}, sent on step {})",
                spike.neuron_indexes, spike.header.step
            );
        }
    }
    Ok(())
}
