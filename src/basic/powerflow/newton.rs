use tracing::debug;

use super::{Outcome, PfProblem};
use crate::{
    basic::solver::{Solve, factor_and_solve},
    error::{SolveError, SolveResult},
};

/// Full Newton-Raphson on `y`: `Gy dy = -g` until `max|dy| < tol`.
pub(super) fn solve<S: Solve + ?Sized>(pf: &mut PfProblem, solver: &mut S) -> SolveResult<Outcome> {
    let plan = &pf.plans.newton;
    let mut increment = f64::INFINITY;
    for iteration in 0..pf.settings.maxit {
        let refactor = pf.dae.factorize;
        plan.run(pf.models, pf.dae, pf.islands);
        pf.dae.factorize = false;

        let gy = pf.dae.gy.to_csc();
        let mut inc: Vec<f64> = pf.dae.g.iter().map(|v| -v).collect();
        factor_and_solve(solver, &gy, &mut inc, refactor, "power flow Jacobian")?;

        increment = inc.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        for (y, d) in pf.dae.y.iter_mut().zip(&inc) {
            *y += d;
        }
        debug!("newton iteration {}: max |dy| = {:.4e}", iteration + 1, increment);
        if increment < pf.settings.tol {
            return Ok(Outcome {
                iterations: iteration + 1,
                increment,
            });
        }
    }
    Err(SolveError::Convergence {
        routine: "newton power flow",
        iterations: pf.settings.maxit,
        t: pf.dae.t,
        mismatch: increment,
    })
}
