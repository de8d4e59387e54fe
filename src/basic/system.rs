//! The simulation context: models, addressing, DAE state and results.

use std::collections::BTreeSet;

use num_complex::Complex64;
use tracing::{debug, error, info, warn};

use super::{
    address::VariableRegistry,
    config::{Routine, Settings},
    dae::Dae,
    dispatch::{Dispatcher, RowMask},
    elements::Bus,
    model::{BranchFlow, BusAddresses, BusRole, Device, Model, StatusChange},
    powerflow::{self, BusSolution, PfProblem, PowerFlowReport},
    solver::{DefaultSolver, Solve},
    timedomain::TimeDomainReport,
    topology::{self, Topology},
    varout::{NameTable, Sink},
};
use crate::error::{AddressingError, SolveError, SolveResult};

/// A power system case and everything computed on it.
pub struct PowerSystem {
    pub(crate) settings: Settings,
    pub(crate) models: Vec<Box<dyn Model>>,
    registry: VariableRegistry,
    pub(crate) dae: Dae,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) topology: Topology,
    pub(crate) buses: BusAddresses,
    pub(crate) islands: RowMask,
    pub(crate) names: NameTable,
    reference: Option<i64>,
    reference_index: usize,
    bus_ids: Vec<i64>,
    pf_report: Option<PowerFlowReport>,
    pub(crate) td_report: Option<TimeDomainReport>,
    bus_solutions: Vec<BusSolution>,
    pub(crate) generation: Vec<Complex64>,
    /// Element statuses saved before a time domain run changed them.
    case_status: Option<Vec<Vec<bool>>>,
}

impl Default for PowerSystem {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl PowerSystem {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            models: Vec::new(),
            registry: VariableRegistry::new(),
            dae: Dae::default(),
            dispatcher: Dispatcher::default(),
            topology: Topology::default(),
            buses: BusAddresses::default(),
            islands: RowMask::default(),
            names: NameTable::default(),
            reference: None,
            reference_index: 0,
            bus_ids: Vec::new(),
            pf_report: None,
            td_report: None,
            bus_solutions: Vec::new(),
            generation: Vec::new(),
            case_status: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Adds an element to the model of type `D`, creating the model on first use.
    pub fn add<D: Device>(&mut self, id: i64, data: D::Data) -> SolveResult<usize> {
        self.registry.check_mutable(D::NAME)?;
        if let Some(model) = self.model_mut::<D>() {
            return Ok(model.insert(id, data)?);
        }
        let mut model = D::default();
        let index = model.insert(id, data)?;
        self.models.push(Box::new(model));
        Ok(index)
    }

    /// Removes an element by id. Later elements of the model shift down.
    pub fn remove<D: Device>(&mut self, id: i64) -> SolveResult<Option<D::Data>> {
        self.registry.check_mutable(D::NAME)?;
        Ok(self.model_mut::<D>().and_then(|m| m.delete(id)))
    }

    /// Registers a model built outside of [`PowerSystem::add`].
    pub fn register(&mut self, model: Box<dyn Model>) -> SolveResult<()> {
        let name = model.name();
        self.registry.check_mutable(name)?;
        if self.models.iter().any(|m| m.name() == name) {
            return Err(AddressingError::Duplicate {
                model: name.to_string(),
            }
            .into());
        }
        self.models.push(model);
        Ok(())
    }

    pub fn model<M: Model>(&self) -> Option<&M> {
        self.models
            .iter()
            .find_map(|m| m.as_any().downcast_ref::<M>())
    }

    pub fn model_mut<M: Model>(&mut self) -> Option<&mut M> {
        self.models
            .iter_mut()
            .find_map(|m| m.as_any_mut().downcast_mut::<M>())
    }

    pub fn models(&self) -> &[Box<dyn Model>] {
        &self.models
    }

    /// Anchors angles at bus `id` instead of the first slack bus.
    pub fn set_reference_bus(&mut self, id: i64) {
        self.reference = Some(id);
    }

    pub fn is_setup(&self) -> bool {
        self.registry.is_frozen()
    }

    /// Orders models, assigns addresses, resolves bus references, sizes the
    /// DAE and builds plans and topology. Runs once; later calls are no-ops.
    pub fn setup(&mut self) -> SolveResult<()> {
        if self.registry.is_frozen() {
            return Ok(());
        }
        self.settings.validate()?;
        self.models
            .sort_by(|a, b| (a.priority(), a.name()).cmp(&(b.priority(), b.name())));
        for model in self.models.iter_mut() {
            let addr = self.registry.assign(
                model.name(),
                model.count(),
                model.states().len(),
                model.algebs().len(),
            )?;
            model.assign(addr);
        }
        let (n, m) = self.registry.finalize();

        let (buses, bus_ids) = {
            let bus = self.model::<Bus>().ok_or_else(|| SolveError::Topology {
                what: "case has no buses".to_string(),
            })?;
            let buses = bus.bus_addresses().ok_or_else(|| SolveError::Topology {
                what: "bus addresses were not assigned".to_string(),
            })?;
            (buses, bus.ids().to_vec())
        };
        self.bus_ids = bus_ids;
        for model in self.models.iter_mut() {
            model.link(&buses)?;
        }
        self.buses = buses;

        self.dae.resize(n, m);
        self.names = NameTable::build(&self.models, n, m);
        self.dispatcher.refresh(&self.models, m);
        self.reference_index = self.find_reference()?;
        self.refresh_topology()?;
        info!(
            "setup: {} models, {} buses, n = {n}, m = {m}",
            self.models.len(),
            self.buses.n_bus
        );
        Ok(())
    }

    fn find_reference(&self) -> SolveResult<usize> {
        if let Some(id) = self.reference {
            return self.buses.resolve("reference", id);
        }
        self.models
            .iter()
            .flat_map(|m| m.bus_roles())
            .find(|(_, role)| *role == BusRole::Slack)
            .map(|(bus, _)| bus)
            .ok_or_else(|| SolveError::Topology {
                what: "no reference bus: set one explicitly or add a slack".to_string(),
            })
    }

    /// Recomputes connectivity and the set of neutralized algebraic rows.
    pub(crate) fn refresh_topology(&mut self) -> SolveResult<()> {
        let branches: Vec<(usize, usize)> =
            self.models.iter().flat_map(|m| m.branches()).collect();
        self.topology = topology::analyze(self.buses.n_bus, &branches, self.reference_index)?;

        let dead = self.topology.neutralized_buses();
        let mut rows: Vec<usize> = dead
            .iter()
            .flat_map(|&b| [self.buses.a(b), self.buses.v(b)])
            .collect();
        for model in &self.models {
            let Some(addr) = model.addresses() else {
                continue;
            };
            for (element, bus) in model.terminals().into_iter().enumerate() {
                if dead.contains(&bus) {
                    rows.extend(addr.element_y(element));
                }
            }
        }
        if !rows.is_empty() {
            debug!("neutralizing {} algebraic rows", rows.len());
        }
        self.islands = RowMask::new(self.dae.m, rows);
        self.dae.factorize = true;
        Ok(())
    }

    /// Applies status changes requested by events. Returns how many took effect.
    pub(crate) fn apply_status_changes(&mut self, changes: &[StatusChange]) -> SolveResult<usize> {
        let mut applied = 0;
        let mut topology_changed = false;
        for change in changes {
            let Some(model) = self.models.iter_mut().find(|m| m.name() == change.model) else {
                warn!("status change for unknown model {}", change.model);
                continue;
            };
            if !model.set_status(change.id, change.online) {
                warn!("status change for unknown element {} {}", change.model, change.id);
                continue;
            }
            info!(
                "t = {:.4}: {} {} {}",
                self.dae.t,
                change.model,
                change.id,
                if change.online { "in service" } else { "out of service" }
            );
            topology_changed |= model.capabilities().series;
            applied += 1;
        }
        if applied > 0 {
            self.dae.factorize = true;
        }
        if topology_changed {
            self.refresh_topology()?;
        }
        Ok(applied)
    }

    /// Remembers element statuses before a time domain run alters the case.
    /// Only the first call after a power flow takes effect.
    pub(crate) fn save_case(&mut self) {
        if self.case_status.is_none() {
            self.case_status = Some(self.models.iter().map(|m| m.statuses()).collect());
        }
    }

    pub(crate) fn is_case_altered(&self) -> bool {
        self.case_status.is_some()
    }

    /// Undoes the changes of a time domain run: element statuses, load
    /// conversions and event state.
    fn restore_case(&mut self) -> SolveResult<()> {
        let Some(saved) = self.case_status.take() else {
            return Ok(());
        };
        debug!("restoring the case altered by the time domain run");
        for (model, statuses) in self.models.iter_mut().zip(saved) {
            for (element, online) in statuses.into_iter().enumerate() {
                model.set_online(element, online);
            }
            model.restore_static();
        }
        self.dae.t = 0.0;
        self.refresh_topology()
    }

    /// Switches off static generators at buses that host dynamic generators.
    pub(crate) fn replace_static_generators(&mut self) {
        let dynamic: BTreeSet<usize> = self
            .models
            .iter()
            .filter(|m| m.count() > 0 && m.capabilities().dyngen)
            .flat_map(|m| m.terminals())
            .collect();
        if dynamic.is_empty() {
            return;
        }
        for model in self.models.iter_mut().filter(|m| m.capabilities().stagen) {
            for (element, bus) in model.terminals().into_iter().enumerate() {
                if dynamic.contains(&bus) {
                    debug!("{} element {element} replaced by a dynamic generator", model.name());
                    model.set_online(element, false);
                }
            }
        }
        self.dae.factorize = true;
    }

    pub fn run_power_flow(&mut self) -> SolveResult<PowerFlowReport> {
        self.run_power_flow_with(&mut DefaultSolver::default())
    }

    /// Solves the power flow with a caller supplied Newton backend.
    pub fn run_power_flow_with<S: Solve + Default>(&mut self, solver: &mut S) -> SolveResult<PowerFlowReport> {
        self.setup()?;
        self.restore_case()?;
        for model in self
            .models
            .iter_mut()
            .filter(|m| m.count() > 0 && m.capabilities().init0)
        {
            model.init0(&mut self.dae, &self.settings);
        }
        self.dae.factorize = true;

        let settings = self.settings.pf.clone();
        info!(
            "power flow: {} (flat start: {})",
            settings.solver, settings.flatstart
        );
        let plans = self.dispatcher.refresh(&self.models, self.dae.m);
        let mut problem = PfProblem {
            models: &mut self.models,
            dae: &mut self.dae,
            plans,
            islands: &self.islands,
            buses: &self.buses,
            topology: &self.topology,
            settings: &settings,
        };
        let result = problem.solve(solver);

        let mut report = PowerFlowReport {
            method: settings.solver,
            iterations: 0,
            converged: false,
            flatstart: settings.flatstart,
            max_mismatch: f64::NAN,
        };
        match result {
            Ok(outcome) => {
                let (solutions, generation) = powerflow::account(
                    &mut self.models,
                    &mut self.dae,
                    plans,
                    &self.buses,
                    &self.bus_ids,
                    &self.topology,
                );
                self.bus_solutions = solutions;
                self.generation = generation;
                let max_mismatch =
                    powerflow::mismatch(&plans.fdpf, &mut self.models, &mut self.dae, &self.islands);
                report.iterations = outcome.iterations;
                report.converged = true;
                report.max_mismatch = max_mismatch;
                info!(
                    "power flow converged in {} iterations, max mismatch {:.3e}",
                    outcome.iterations, max_mismatch
                );
                self.pf_report = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                report.max_mismatch =
                    powerflow::mismatch(&plans.fdpf, &mut self.models, &mut self.dae, &self.islands);
                error!("power flow failed: {e}");
                if let SolveError::Convergence { iterations, .. } = &e {
                    report.iterations = *iterations;
                }
                self.pf_report = Some(report);
                Err(e)
            }
        }
    }

    /// Runs `routine`; the time domain routine solves the power flow first
    /// when it has not converged yet.
    pub fn run(&mut self, routine: Routine, sink: &mut dyn Sink) -> SolveResult<()> {
        match routine {
            Routine::PowerFlow => self.run_power_flow().map(|_| ()),
            Routine::TimeDomain => self.run_time_domain(sink).map(|_| ()),
        }
    }

    pub fn pf_report(&self) -> Option<&PowerFlowReport> {
        self.pf_report.as_ref()
    }

    pub fn td_report(&self) -> Option<&TimeDomainReport> {
        self.td_report.as_ref()
    }

    pub fn bus_solutions(&self) -> &[BusSolution] {
        &self.bus_solutions
    }

    /// Flows of every series element from the last accounting pass.
    pub fn branch_flows(&self) -> Vec<BranchFlow> {
        self.models
            .iter()
            .filter(|m| m.capabilities().flows)
            .flat_map(|m| m.flows())
            .collect()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn dae(&self) -> &Dae {
        &self.dae
    }

    pub fn names(&self) -> &NameTable {
        &self.names
    }

    /// Internal index of an external bus id, once set up.
    pub fn bus_index(&self, id: i64) -> Option<usize> {
        self.buses.index(id)
    }
}
