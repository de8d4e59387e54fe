//! Steady state solution of the algebraic equations.

mod fdpf;
mod newton;
mod post;

pub use fdpf::{FdMatrices, build_fd_matrices};
pub use post::BusSolution;
pub(crate) use post::account;

use crate::basic::{
    config::{PfSolver, PowerFlowSettings},
    dae::Dae,
    dispatch::{ExecutionPlan, Plans, RowMask},
    model::{BusAddresses, Model},
    solver::Solve,
    topology::Topology,
};
use crate::error::SolveResult;

/// Summary of the last power flow run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PowerFlowReport {
    pub method: PfSolver,
    pub iterations: usize,
    pub converged: bool,
    pub flatstart: bool,
    /// Largest algebraic residual at the returned point.
    pub max_mismatch: f64,
}

/// Iteration count and last increment of a converged solve.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Outcome {
    pub iterations: usize,
    pub increment: f64,
}

/// Borrowed view of the system a power flow iterates on.
pub(crate) struct PfProblem<'a> {
    pub models: &'a mut [Box<dyn Model>],
    pub dae: &'a mut Dae,
    pub plans: &'a Plans,
    pub islands: &'a RowMask,
    pub buses: &'a BusAddresses,
    pub topology: &'a Topology,
    pub settings: &'a PowerFlowSettings,
}

impl PfProblem<'_> {
    /// Runs the selected method. Fast-decoupled variants build their own
    /// factorizations with fresh `S` instances.
    pub fn solve<S: Solve + Default>(&mut self, solver: &mut S) -> SolveResult<Outcome> {
        match self.settings.solver.fd_variant() {
            None => newton::solve(self, solver),
            Some(variant) => fdpf::solve::<S>(self, variant),
        }
    }
}

/// Largest residual of the power flow equations at the current point.
pub(crate) fn mismatch(
    plan: &ExecutionPlan,
    models: &mut [Box<dyn Model>],
    dae: &mut Dae,
    islands: &RowMask,
) -> f64 {
    plan.run(models, dae, islands);
    dae.g.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}
