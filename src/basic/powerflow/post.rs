use num_complex::Complex64;
use num_traits::Zero;
use tracing::debug;

use crate::basic::{
    dae::Dae,
    dispatch::{Plans, RowMask},
    model::{BusAddresses, Model},
    topology::Topology,
};

/// Converged state of one bus.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BusSolution {
    pub id: i64,
    pub v: f64,
    pub theta: f64,
    pub generation: Complex64,
    pub load: Complex64,
}

fn per_bus(dae: &Dae, buses: &BusAddresses) -> Vec<Complex64> {
    (0..buses.n_bus)
        .map(|b| Complex64::new(dae.g[buses.a(b)], dae.g[buses.v(b)]))
        .collect()
}

/// Recovers load and generation per bus, writes generator outputs back and
/// computes branch flows. Returns the bus solutions and the generation at
/// every bus.
pub(crate) fn account(
    models: &mut [Box<dyn Model>],
    dae: &mut Dae,
    plans: &Plans,
    buses: &BusAddresses,
    bus_ids: &[i64],
    topology: &Topology,
) -> (Vec<BusSolution>, Vec<Complex64>) {
    let none = RowMask::default();
    plans.pfload.run(models, dae, &none);
    let load = per_bus(dae, buses);

    plans.pfgen.run(models, dae, &none);
    let mut generation = per_bus(dae, buses);
    for bus in topology.neutralized_buses() {
        generation[bus] = Complex64::zero();
    }

    let mut sources = vec![0usize; buses.n_bus];
    for model in models.iter().filter(|m| m.capabilities().stagen) {
        for (bus, _) in model.bus_roles() {
            sources[bus] += 1;
        }
    }
    // buses without a source only carry the residual mismatch
    for (g, &k) in generation.iter_mut().zip(&sources) {
        if k == 0 {
            *g = Complex64::zero();
        }
    }
    let share: Vec<Complex64> = generation
        .iter()
        .zip(&sources)
        .map(|(g, &k)| if k > 1 { g / k as f64 } else { *g })
        .collect();
    for model in models.iter_mut().filter(|m| m.capabilities().stagen) {
        model.recover_injection(dae, &share);
    }

    plans.seriesflow.run(models, dae, &none);
    debug!("post-solve accounting done for {} buses", buses.n_bus);

    let solutions = (0..buses.n_bus)
        .map(|b| BusSolution {
            id: bus_ids[b],
            v: dae.y[buses.v(b)],
            theta: dae.y[buses.a(b)],
            generation: generation[b],
            load: load[b],
        })
        .collect();
    (solutions, generation)
}
