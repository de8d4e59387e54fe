//! Implicit integration of the DAE with adaptive steps and switching events.

mod events;
mod step;

pub use events::EventQueue;
pub use step::StepControl;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use super::{
    config::TimeDomainSettings,
    dae::Dae,
    model::{InitContext, StatusChange},
    solver::{DefaultSolver, Solve, factor_and_solve},
    sparse::TripletMatrix,
    system::PowerSystem,
    varout::Sink,
};
use crate::error::{SolveError, SolveResult};

/// Largest `n + m` for which the dense eigenvalue estimate is attempted.
const MAX_DENSE_ORDER: usize = 2000;

/// Summary of a time domain run.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeDomainReport {
    pub steps: usize,
    pub rejected: usize,
    pub t_final: f64,
    pub events_applied: usize,
}

fn dense(t: &TripletMatrix) -> DMatrix<f64> {
    let mut d = DMatrix::zeros(t.nrows(), t.ncols());
    for (r, c, v) in t.iter() {
        d[(r, c)] += v;
    }
    d
}

/// Magnitude of the fastest eigenvalue of `Fx - Fy Gy^-1 Gx`, capped at `cap`.
pub fn estimate_frequency(dae: &Dae, cap: f64) -> f64 {
    if dae.n == 0 {
        return 1.0;
    }
    let estimate = if dae.n + dae.m > MAX_DENSE_ORDER {
        None
    } else {
        let fx = dense(&dae.fx);
        let reduced = if dae.m == 0 {
            Some(fx)
        } else {
            dense(&dae.gy)
                .lu()
                .solve(&dense(&dae.gx))
                .map(|gygx| fx - dense(&dae.fy) * gygx)
        };
        reduced
            .filter(|a| a.iter().all(|v| v.is_finite()))
            .map(|a| {
                a.complex_eigenvalues()
                    .iter()
                    .fold(0.0_f64, |acc, l| acc.max(l.norm()))
            })
    };
    let freq = match estimate {
        Some(f) if f > 0.0 && f.is_finite() => f,
        _ => 20.0,
    };
    freq.min(cap)
}

impl PowerSystem {
    pub fn run_time_domain(&mut self, sink: &mut dyn Sink) -> SolveResult<TimeDomainReport> {
        self.run_time_domain_with::<DefaultSolver>(sink)
    }

    /// Integrates from `t0` to `tf`, sending every accepted point to `sink`.
    pub fn run_time_domain_with<S: Solve + Default>(
        &mut self,
        sink: &mut dyn Sink,
    ) -> SolveResult<TimeDomainReport> {
        if self.is_case_altered() || !self.pf_report().is_some_and(|r| r.converged) {
            self.run_power_flow_with(&mut S::default())?;
        }
        let td = self.settings.td.clone();
        let mut solver = S::default();
        let mut algebraic = S::default();
        self.init_dynamics(&mut algebraic, &td)?;

        let events = EventQueue::new(
            self.models
                .iter()
                .filter(|m| m.count() > 0 && m.capabilities().times)
                .flat_map(|m| m.event_times()),
            td.t0,
            td.tf,
        );
        let freq = estimate_frequency(&self.dae, self.settings.freq);
        let mut step = StepControl::first_step(freq, td.tf - td.t0, &td);
        info!(
            "time domain: {} from {} to {} s, h = {:.4e} (min {:.4e}, max {:.4e}), {} events",
            td.method,
            td.t0,
            td.tf,
            step.h,
            step.hmin,
            step.hmax,
            events.len()
        );

        sink.open(&self.names)?;
        sink.store(self.dae.t, &self.dae.x, &self.dae.y)?;

        let theta = td.method.theta();
        let span = td.tf - td.t0;
        let end_tol = span * 1e-12;
        let mut report = TimeDomainReport::default();
        let mut f_prev = self.dae.f.clone();
        let mut next_progress = 1;

        while self.dae.t < td.tf - end_tol {
            let t = self.dae.t;
            let (mut h, event) = events.align(t, step.h);
            let mut t_next = event.unwrap_or(t + h);
            if t_next > td.tf - end_tol && event.is_none() {
                t_next = td.tf;
                h = td.tf - t;
            }
            let (x0, y0) = (self.dae.x.clone(), self.dae.y.clone());

            match self.implicit_step(&mut solver, t_next, h, theta, &x0, &f_prev, &td) {
                Ok(niter) => {
                    self.dae.t = t_next;
                    self.refresh_residual();
                    report.steps += 1;
                    sink.store(self.dae.t, &self.dae.x, &self.dae.y)?;
                    if let Some(te) = event {
                        self.apply_events(te, &mut algebraic, &td)?;
                        report.events_applied += 1;
                        sink.store(self.dae.t, &self.dae.x, &self.dae.y)?;
                    }
                    f_prev.copy_from(&self.dae.f);
                    step.on_converged(niter);

                    while next_progress <= 10
                        && self.dae.t - td.t0 >= span * next_progress as f64 / 10.0 - end_tol
                    {
                        info!("{}% t = {:.4} s", next_progress * 10, self.dae.t);
                        next_progress += 1;
                    }
                }
                Err(e) if e.is_step_recoverable() => {
                    self.dae.x = x0;
                    self.dae.y = y0;
                    self.dae.t = t;
                    report.rejected += 1;
                    debug!("step at t = {t:.6} with h = {h:.4e} rejected: {e}");
                    step.h = h;
                    if !step.on_diverged() {
                        let (iterations, mismatch) = match e {
                            SolveError::Convergence {
                                iterations,
                                mismatch,
                                ..
                            } => (iterations, mismatch),
                            _ => (0, f64::NAN),
                        };
                        return Err(SolveError::Convergence {
                            routine: "time domain",
                            iterations,
                            t,
                            mismatch,
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
        sink.finish()?;

        report.t_final = self.dae.t;
        info!(
            "time domain finished at t = {:.4}: {} steps, {} rejected",
            report.t_final, report.steps, report.rejected
        );
        self.td_report = Some(report.clone());
        Ok(report)
    }

    /// Replaces static generators, initializes dynamic models from the power
    /// flow and settles the algebraic variables at `t0`.
    fn init_dynamics<S: Solve + ?Sized>(&mut self, algebraic: &mut S, td: &TimeDomainSettings) -> SolveResult<()> {
        self.save_case();
        self.dae.t = td.t0;
        self.replace_static_generators();

        let ctx = InitContext {
            settings: &self.settings,
            bus_generation: &self.generation,
        };
        for model in self
            .models
            .iter_mut()
            .filter(|m| m.count() > 0 && m.capabilities().init1)
        {
            model.init1(&mut self.dae, &ctx)?;
        }
        self.dae.factorize = true;

        let changes = self.check_time(td.t0);
        self.apply_status_changes(&changes)?;
        self.solve_algebraic(algebraic, td)?;

        let mismatch = self.dae.max_mismatch();
        if mismatch > td.tol {
            warn!("initial residual {mismatch:.3e} exceeds the tolerance");
        }
        Ok(())
    }

    fn check_time(&mut self, t: f64) -> Vec<StatusChange> {
        self.models
            .iter_mut()
            .filter(|m| m.count() > 0 && m.capabilities().times)
            .flat_map(|m| m.check_time(t))
            .collect()
    }

    /// Applies the events due at `te` and re-solves `y` with `x` frozen.
    fn apply_events<S: Solve + ?Sized>(&mut self, te: f64, algebraic: &mut S, td: &TimeDomainSettings) -> SolveResult<()> {
        let changes = self.check_time(te);
        let applied = self.apply_status_changes(&changes)?;
        debug!("t = {te:.6}: {applied} status changes");
        self.dae.factorize = true;
        self.solve_algebraic(algebraic, td)
    }

    /// Newton on `g(x, y) = 0` for `y` alone. Leaves `f`, `g` and the
    /// Jacobians evaluated at the solution.
    fn solve_algebraic<S: Solve + ?Sized>(&mut self, solver: &mut S, td: &TimeDomainSettings) -> SolveResult<()> {
        let plans = self.dispatcher.refresh(&self.models, self.dae.m);
        let mut increment = f64::INFINITY;
        for iteration in 0..td.maxit {
            plans.int.run(&mut self.models, &mut self.dae, &self.islands);
            if self.dae.m == 0 {
                return Ok(());
            }
            let gy = self.dae.gy.to_csc();
            let mut inc: Vec<f64> = self.dae.g.iter().map(|v| -v).collect();
            factor_and_solve(solver, &gy, &mut inc, iteration == 0, "algebraic Jacobian")?;
            increment = inc.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
            for (y, d) in self.dae.y.iter_mut().zip(&inc) {
                *y += d;
            }
            if increment < td.tol {
                plans.int.run(&mut self.models, &mut self.dae, &self.islands);
                self.dae.factorize = true;
                return Ok(());
            }
        }
        Err(SolveError::Convergence {
            routine: "algebraic re-solve",
            iterations: td.maxit,
            t: self.dae.t,
            mismatch: increment,
        })
    }

    /// Refreshes `f` and `g` at the current point.
    fn refresh_residual(&mut self) {
        let plans = self.dispatcher.refresh(&self.models, self.dae.m);
        plans
            .int_residual
            .run(&mut self.models, &mut self.dae, &self.islands);
    }

    /// Newton iterations on `x - x0 - h theta f - h (1 - theta) f0 = 0`,
    /// `g = 0` at `t_next`. Returns the iteration count.
    #[allow(clippy::too_many_arguments)]
    fn implicit_step<S: Solve + ?Sized>(
        &mut self,
        solver: &mut S,
        t_next: f64,
        h: f64,
        theta: f64,
        x0: &DVector<f64>,
        f0: &DVector<f64>,
        td: &TimeDomainSettings,
    ) -> SolveResult<usize> {
        let (n, m) = (self.dae.n, self.dae.m);
        self.dae.t = t_next;
        let plans = self.dispatcher.refresh(&self.models, m);
        let mut rhs = vec![0.0; n + m];
        let mut increment = f64::INFINITY;

        for iteration in 0..td.maxit {
            let refactor = self.dae.factorize;
            plans.int.run(&mut self.models, &mut self.dae, &self.islands);
            self.dae.factorize = false;
            self.dae.build_ac(h * theta);

            let dae = &self.dae;
            for i in 0..n {
                let q = dae.x[i] - x0[i] - h * theta * dae.f[i] - h * (1.0 - theta) * f0[i];
                rhs[i] = -q;
            }
            for (r, g) in rhs[n..].iter_mut().zip(dae.g.iter()) {
                *r = -g;
            }

            factor_and_solve(solver, &self.dae.ac.to_csc(), &mut rhs, refactor, "integration Jacobian")?;
            increment = rhs.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
            for (x, d) in self.dae.x.iter_mut().zip(&rhs[..n]) {
                *x += d;
            }
            for (y, d) in self.dae.y.iter_mut().zip(&rhs[n..]) {
                *y += d;
            }
            if increment < td.tol {
                return Ok(iteration + 1);
            }
        }
        Err(SolveError::Convergence {
            routine: "integration step",
            iterations: td.maxit,
            t: t_next,
            mismatch: increment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basic::{
            address::Addresses,
            config::Integration,
            model::{Capabilities, Model},
            elements::{Breaker, BreakerData, Fault, FaultData, Line, Pq, PqData, Pv, Syn2},
            varout::MemorySink,
        },
        testcases,
    };

    /// `x' = -a(t) x` without a Jacobian, so each Newton step is a plain
    /// fixed point iteration contracting by `h a`.
    #[derive(Debug)]
    struct Decay {
        x0: f64,
        rate: fn(f64) -> f64,
        addr: Option<Addresses>,
    }

    impl Decay {
        fn new(x0: f64, rate: fn(f64) -> f64) -> Box<Self> {
            Box::new(Self { x0, rate, addr: None })
        }

        fn x(&self) -> usize {
            self.addr.as_ref().map_or(0, |a| a.x(0, 0))
        }
    }

    impl Model for Decay {
        fn name(&self) -> &'static str {
            "Decay"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                fcall: true,
                init1: true,
                ..Default::default()
            }
        }
        fn count(&self) -> usize {
            1
        }
        fn states(&self) -> Vec<&'static str> {
            vec!["x"]
        }
        fn element_names(&self) -> Vec<String> {
            vec!["Decay_1".to_string()]
        }
        fn assign(&mut self, addr: Addresses) {
            self.addr = Some(addr);
        }
        fn addresses(&self) -> Option<&Addresses> {
            self.addr.as_ref()
        }
        fn set_status(&mut self, _id: i64, _online: bool) -> bool {
            false
        }
        fn set_online(&mut self, _element: usize, _online: bool) {}
        fn statuses(&self) -> Vec<bool> {
            vec![true]
        }
        fn init1(&mut self, dae: &mut Dae, _ctx: &InitContext) -> SolveResult<()> {
            dae.x[self.x()] = self.x0;
            Ok(())
        }
        fn fcall(&mut self, dae: &mut Dae) {
            let k = self.x();
            dae.f[k] -= (self.rate)(dae.t) * dae.x[k];
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn decaying(rate: fn(f64) -> f64) -> PowerSystem {
        let mut ps = testcases::two_bus(0.5, 0.2, 0.1);
        ps.register(Decay::new(1.0, rate)).unwrap();
        ps.settings_mut().td.method = Integration::ImplicitEuler;
        ps.settings_mut().td.tf = 1.0;
        ps
    }

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    #[test]
    fn static_system_has_unit_frequency() {
        let dae = Dae::new(0, 4);
        assert_eq!(estimate_frequency(&dae, 60.0), 1.0);
    }

    #[test]
    fn frequency_of_a_decoupled_mode() {
        let mut dae = Dae::new(2, 0);
        dae.fx.push(0, 1, 5.0);
        dae.fx.push(1, 0, -5.0);
        assert!((estimate_frequency(&dae, 60.0) - 5.0).abs() < 1e-9);
        assert_eq!(estimate_frequency(&dae, 2.0), 2.0);
        let idle = Dae::new(2, 0);
        assert_eq!(estimate_frequency(&idle, 60.0), 20.0);
    }

    #[test]
    fn machine_stays_in_equilibrium() {
        init_logging();
        for method in [Integration::Trapezoidal, Integration::ImplicitEuler] {
            let mut ps = testcases::smib();
            ps.settings_mut().td.method = method;
            ps.settings_mut().td.tf = 1.0;
            let mut sink = MemorySink::default();
            let report = ps.run_time_domain(&mut sink).unwrap();
            assert_eq!(report.rejected, 0);
            assert_eq!(report.t_final, 1.0);
            assert_eq!(*sink.t.last().unwrap(), 1.0);

            let delta = sink.series("delta Syn2_1").unwrap();
            let omega = sink.series("omega Syn2_1").unwrap();
            assert!(delta.iter().all(|d| (d - delta[0]).abs() < 1e-6));
            assert!(omega.iter().all(|w| (w - 1.0).abs() < 1e-8));
        }
    }

    #[test]
    fn static_generator_is_replaced() {
        let mut ps = testcases::smib();
        ps.settings_mut().td.tf = 0.1;
        ps.run_time_domain(&mut MemorySink::default()).unwrap();
        let pv = ps.model::<Pv>().unwrap();
        assert!(pv.bus_roles().is_empty());
        let syn = ps.model::<Syn2>().unwrap();
        let (delta, omega) = syn.rotor(ps.dae(), 0);
        assert!(delta > 0.0);
        assert!((omega - 1.0).abs() < 1e-8);
    }

    #[test]
    fn steps_land_on_fault_times() {
        init_logging();
        let mut ps = testcases::smib();
        ps.add::<Fault>(1, FaultData { bus: 2, tf: 0.5, tc: 0.55, rf: 0.0, xf: 0.2 })
            .unwrap();
        ps.settings_mut().td.tf = 1.0;
        let mut sink = MemorySink::default();
        let report = ps.run_time_domain(&mut sink).unwrap();
        assert_eq!(report.events_applied, 2);
        for te in [0.5, 0.55] {
            assert_eq!(sink.t.iter().filter(|&&t| t == te).count(), 2);
        }
        let omega = sink.series("omega Syn2_1").unwrap();
        let k = sink.t.iter().rposition(|&t| t == 0.55).unwrap();
        // the machine accelerates while the fault depresses its output
        assert!(omega[k] > 1.0);
        let delta = sink.series("delta Syn2_1").unwrap();
        assert!(delta[k] > delta[0]);
    }

    #[test]
    fn breaker_trips_a_parallel_line() {
        let mut ps = testcases::smib();
        ps.add::<Breaker>(1, BreakerData { line: 11, t1: 0.2, t2: None }).unwrap();
        ps.settings_mut().td.tf = 0.6;
        let mut sink = MemorySink::default();
        let report = ps.run_time_domain(&mut sink).unwrap();
        assert_eq!(report.events_applied, 1);
        let line = ps.model::<Line>().unwrap();
        let i = line.index_of(11).unwrap();
        assert!(!line.is_online(i));
        assert!(!ps.topology().is_degenerate());
        // the higher transfer reactance opens the rotor angle
        let delta = sink.series("delta Syn2_1").unwrap();
        assert!(delta.last().unwrap() > &delta[0]);
    }

    #[test]
    fn power_flow_after_time_domain_sees_the_original_case() {
        let mut ps = testcases::smib();
        ps.add::<Pq>(1, PqData { bus: 2, p: 0.3, q: 0.1 }).unwrap();
        ps.add::<Breaker>(1, BreakerData { line: 11, t1: 0.1, t2: None }).unwrap();
        ps.settings_mut().td.tf = 0.3;
        ps.run_power_flow().unwrap();
        let before = ps.bus_solutions().to_vec();
        assert!(before[1].theta.abs() > 1e-3);

        ps.run_time_domain(&mut MemorySink::default()).unwrap();
        assert!(ps.model::<Pq>().unwrap().is_constant_impedance());
        assert!(ps.model::<Pv>().unwrap().bus_roles().is_empty());

        let report = ps.run_power_flow().unwrap();
        assert!(report.converged && report.iterations > 1);
        assert!(!ps.model::<Pq>().unwrap().is_constant_impedance());
        assert_eq!(ps.model::<Pv>().unwrap().bus_roles().len(), 1);
        let line = ps.model::<Line>().unwrap();
        assert!(line.is_online(line.index_of(11).unwrap()));
        for (a, b) in ps.bus_solutions().iter().zip(&before) {
            assert!((a.v - b.v).abs() < 1e-6, "{a:?} vs {b:?}");
            assert!((a.theta - b.theta).abs() < 1e-6, "{a:?} vs {b:?}");
            assert!((a.generation - b.generation).norm() < 1e-6, "{a:?} vs {b:?}");
        }

        // a second run starts again from the restored power flow
        let report = ps.run_time_domain(&mut MemorySink::default()).unwrap();
        assert_eq!(report.events_applied, 1);
    }

    #[test]
    fn rejected_steps_are_halved_and_recover() {
        init_logging();
        let mut ps = decaying(|_| 1000.0);
        let mut sink = MemorySink::default();
        let report = ps.run_time_domain(&mut sink).unwrap();
        // h = 0.01 diverges until it is halved below 1 / 1000
        assert!(report.rejected >= 4);
        assert_eq!(report.t_final, 1.0);
        assert_eq!(sink.t.len(), report.steps + 1);
        let x = sink.series("x Decay_1").unwrap();
        assert!(x.iter().all(|v| v.is_finite() && v.abs() <= 1.0));
        assert!(x.last().unwrap().abs() < 1e-3);
    }

    #[test]
    fn step_underflow_is_fatal() {
        let mut ps = decaying(|t| if t > 0.1 { 1e5 } else { 1.0 });
        ps.settings_mut().td.maxit = 8;
        let mut sink = MemorySink::default();
        let err = ps.run_time_domain(&mut sink).unwrap_err();
        let SolveError::Convergence { routine, t, .. } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(routine, "time domain");
        assert!(t > 0.09 && t <= 0.1 + 1e-9, "failed at t = {t}");
        // the rejected step was rolled back to the last accepted point
        assert_eq!(*sink.t.last().unwrap(), t);
        let x = ps.dae().x[0];
        assert!(x > 0.85 && x < 0.95, "x = {x}");
    }

    #[test]
    fn fixed_step_uses_tstep() {
        let mut ps = testcases::smib();
        ps.settings_mut().td.fixt = true;
        ps.settings_mut().td.tstep = 0.05;
        ps.settings_mut().td.tf = 0.5;
        let mut sink = MemorySink::default();
        ps.run_time_domain(&mut sink).unwrap();
        assert!(sink.t.windows(2).all(|w| w[1] - w[0] <= 0.05 + 1e-12));
    }
}
