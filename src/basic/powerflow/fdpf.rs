use nalgebra_sparse::CscMatrix;
use tracing::debug;

use super::{Outcome, PfProblem};
use crate::{
    basic::{
        config::FdVariant,
        model::{BusRole, Model},
        solver::{Solve, factor_and_solve, resolve},
        sparse::TripletMatrix,
    },
    error::{SolveError, SolveResult},
};

/// Fast-decoupled B' (angle) and B'' (magnitude) matrices over buses.
#[derive(Debug, Clone)]
pub struct FdMatrices {
    pub bp: CscMatrix<f64>,
    pub bpp: CscMatrix<f64>,
    /// Buses pinned in B'.
    pub fixed_angle: Vec<bool>,
    /// Buses pinned in B''.
    pub fixed_magnitude: Vec<bool>,
}

/// Assembles B' and B'' from series models. Slack rows in B', slack and PV
/// rows in B'' and every row in `neutralized` become unit diagonals.
pub fn build_fd_matrices(
    models: &[Box<dyn Model>],
    n_bus: usize,
    variant: FdVariant,
    neutralized: &[bool],
) -> FdMatrices {
    let mut bp = TripletMatrix::new(n_bus, n_bus);
    let mut bpp = TripletMatrix::new(n_bus, n_bus);
    for model in models.iter().filter(|m| m.count() > 0 && m.capabilities().series) {
        model.build_b(variant, &mut bp, &mut bpp);
    }

    let mut fixed_angle = neutralized.to_vec();
    let mut fixed_magnitude = neutralized.to_vec();
    for (bus, role) in models.iter().flat_map(|m| m.bus_roles()) {
        fixed_magnitude[bus] = true;
        if role == BusRole::Slack {
            fixed_angle[bus] = true;
        }
    }
    bp.neutralize(&fixed_angle, 1.0);
    bpp.neutralize(&fixed_magnitude, 1.0);
    FdMatrices {
        bp: bp.to_csc(),
        bpp: bpp.to_csc(),
        fixed_angle,
        fixed_magnitude,
    }
}

/// Reuses the factorization after the first pass.
fn solve_with<S: Solve>(
    solver: &mut S,
    matrix: &CscMatrix<f64>,
    rhs: &mut [f64],
    factored: bool,
    what: &'static str,
) -> SolveResult<()> {
    if factored {
        resolve(solver, matrix, rhs, what)
    } else {
        factor_and_solve(solver, matrix, rhs, true, what)
    }
}

/// Alternating angle and magnitude half iterations with constant matrices.
pub(super) fn solve<S: Solve + Default>(pf: &mut PfProblem, variant: FdVariant) -> SolveResult<Outcome> {
    let n_bus = pf.buses.n_bus;
    let mut neutralized = vec![false; n_bus];
    for bus in pf.topology.neutralized_buses() {
        neutralized[bus] = true;
    }
    let fd = build_fd_matrices(pf.models, n_bus, variant, &neutralized);
    let (mut sp, mut spp) = (S::default(), S::default());
    let mut factored = false;

    let plan = &pf.plans.fdpf;
    let mut increment = f64::INFINITY;
    for iteration in 0..pf.settings.maxit {
        plan.run(pf.models, pf.dae, pf.islands);
        let mut dtheta: Vec<f64> = (0..n_bus)
            .map(|b| match fd.fixed_angle[b] {
                true => 0.0,
                false => -pf.dae.g[pf.buses.a(b)] / pf.dae.y[pf.buses.v(b)],
            })
            .collect();
        solve_with(&mut sp, &fd.bp, &mut dtheta, factored, "fast decoupled B'")?;
        for (b, d) in dtheta.iter().enumerate() {
            pf.dae.y[pf.buses.a(b)] += d;
        }

        plan.run(pf.models, pf.dae, pf.islands);
        let mut dv: Vec<f64> = (0..n_bus)
            .map(|b| match fd.fixed_magnitude[b] {
                true => 0.0,
                false => -pf.dae.g[pf.buses.v(b)] / pf.dae.y[pf.buses.v(b)],
            })
            .collect();
        solve_with(&mut spp, &fd.bpp, &mut dv, factored, "fast decoupled B''")?;
        factored = true;
        for (b, d) in dv.iter().enumerate() {
            pf.dae.y[pf.buses.v(b)] += d;
        }

        increment = dtheta
            .iter()
            .chain(&dv)
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        debug!("{variant:?} iteration {}: max increment = {:.4e}", iteration + 1, increment);
        if increment < pf.settings.tol {
            pf.dae.factorize = true;
            return Ok(Outcome {
                iterations: iteration + 1,
                increment,
            });
        }
    }
    Err(SolveError::Convergence {
        routine: "fast decoupled power flow",
        iterations: pf.settings.maxit,
        t: pf.dae.t,
        mismatch: increment,
    })
}
