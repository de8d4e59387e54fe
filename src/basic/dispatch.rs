use derive_more::{Deref, Display};
use tracing::debug;

use super::{dae::Dae, model::Capabilities, model::Model};

/// Diagonal placed on neutralized island rows.
pub const ISLAND_DIAG: f64 = 1e-6;

pub type EquationFn = fn(&mut dyn Model, &mut Dae);

/// One of the per-model equation hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Call {
    #[display("gcall")]
    Gcall,
    #[display("fcall")]
    Fcall,
    #[display("gycall")]
    Gycall,
    #[display("fxcall")]
    Fxcall,
    #[display("jac0")]
    Jac0,
    #[display("seriesflow")]
    SeriesFlow,
}

impl Call {
    fn eval(self) -> EquationFn {
        match self {
            Call::Gcall => |m, dae| m.gcall(dae),
            Call::Fcall => |m, dae| m.fcall(dae),
            Call::Gycall => |m, dae| m.gycall(dae),
            Call::Fxcall => |m, dae| m.fxcall(dae),
            Call::Jac0 => |m, dae| m.jac0(dae),
            Call::SeriesFlow => |m, dae| m.seriesflow(dae),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    ResetFg,
    ResetG,
    Invoke {
        model: usize,
        call: Call,
        eval: EquationFn,
    },
    NeutralizeG,
    /// Runs only while `factorize` is set: clears and reseeds constant blocks.
    Reseed(Vec<Step>),
    SetupGy,
    SetupFxGy,
    NeutralizeJac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PlanKind {
    #[display("newton")]
    Newton,
    #[display("fdpf")]
    Fdpf,
    #[display("pfload")]
    PfLoad,
    #[display("pfgen")]
    PfGen,
    #[display("seriesflow")]
    SeriesFlow,
    #[display("int")]
    Integration,
    #[display("int_residual")]
    IntegrationResidual,
}

/// Rows of `y` flagged for neutralization.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deref)]
pub struct RowMask(Vec<bool>);

impl RowMask {
    pub fn new(len: usize, rows: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = vec![false; len];
        for r in rows {
            mask[r] = true;
        }
        Self(mask)
    }

    pub fn is_active(&self) -> bool {
        self.0.iter().any(|&b| b)
    }

    pub fn rows(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
            .collect()
    }
}

/// Ordered list of hook invocations for one solver mode.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub kind: PlanKind,
    steps: Vec<Step>,
    /// Algebraic rows of models outside power flow, pinned with a unit diagonal.
    frozen: RowMask,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn frozen(&self) -> &RowMask {
        &self.frozen
    }

    /// `(model index, call)` pairs in execution order, reseed steps included.
    pub fn signature(&self) -> Vec<(usize, Call)> {
        fn walk(steps: &[Step], out: &mut Vec<(usize, Call)>) {
            for s in steps {
                match s {
                    Step::Invoke { model, call, .. } => out.push((*model, *call)),
                    Step::Reseed(inner) => walk(inner, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.steps, &mut out);
        out
    }

    pub fn run(&self, models: &mut [Box<dyn Model>], dae: &mut Dae, islands: &RowMask) {
        for step in &self.steps {
            self.exec(step, models, dae, islands);
        }
    }

    fn exec(&self, step: &Step, models: &mut [Box<dyn Model>], dae: &mut Dae, islands: &RowMask) {
        match step {
            Step::ResetFg => dae.init_fg(),
            Step::ResetG => dae.init_g(),
            Step::Invoke { model, eval, .. } => eval(models[*model].as_mut(), dae),
            Step::NeutralizeG => {
                if islands.is_active() {
                    dae.neutralize_g(islands);
                }
                if self.frozen.is_active() {
                    dae.neutralize_g(&self.frozen);
                }
            }
            Step::Reseed(inner) => {
                if dae.factorize {
                    dae.init_jac0();
                    for s in inner {
                        self.exec(s, models, dae, islands);
                    }
                }
            }
            Step::SetupGy => dae.setup_gy(),
            Step::SetupFxGy => dae.setup_fx_gy(),
            Step::NeutralizeJac => {
                if islands.is_active() {
                    dae.neutralize_jac(islands, ISLAND_DIAG);
                }
                if self.frozen.is_active() {
                    dae.gy.neutralize(&self.frozen, 1.0);
                }
            }
        }
    }
}

/// Every plan the solvers use.
#[derive(Debug, Clone)]
pub struct Plans {
    pub newton: ExecutionPlan,
    pub fdpf: ExecutionPlan,
    pub pfload: ExecutionPlan,
    pub pfgen: ExecutionPlan,
    pub seriesflow: ExecutionPlan,
    pub int: ExecutionPlan,
    pub int_residual: ExecutionPlan,
}

fn invoke(models: &[(usize, Capabilities)], call: Call, pred: impl Fn(&Capabilities) -> bool) -> Vec<Step> {
    models
        .iter()
        .filter(|(_, c)| pred(c))
        .map(|&(model, _)| Step::Invoke {
            model,
            call,
            eval: call.eval(),
        })
        .collect()
}

impl Plans {
    /// Builds every plan from the capability flags of populated models.
    pub fn build(models: &[Box<dyn Model>], m: usize) -> Self {
        let active: Vec<(usize, Capabilities)> = models
            .iter()
            .enumerate()
            .filter(|(_, model)| model.count() > 0)
            .map(|(i, model)| (i, model.capabilities()))
            .collect();

        let frozen = RowMask::new(
            m,
            models
                .iter()
                .filter(|model| model.count() > 0 && !model.capabilities().pflow)
                .filter_map(|model| model.addresses().map(|a| a.y_span()))
                .flatten(),
        );
        let plan = |kind, steps, frozen: &RowMask| ExecutionPlan {
            kind,
            steps,
            frozen: frozen.clone(),
        };
        let none = RowMask::default();

        let mut newton = vec![Step::ResetFg];
        newton.extend(invoke(&active, Call::Gcall, |c| c.gcall && c.pflow));
        newton.extend(invoke(&active, Call::Fcall, |c| c.fcall && c.pflow));
        newton.push(Step::NeutralizeG);
        newton.push(Step::Reseed(invoke(&active, Call::Jac0, |c| c.jac0 && c.pflow)));
        newton.push(Step::SetupGy);
        newton.extend(invoke(&active, Call::Gycall, |c| c.gycall && c.pflow));
        newton.push(Step::NeutralizeJac);

        let mut fdpf = vec![Step::ResetG];
        fdpf.extend(invoke(&active, Call::Gcall, |c| c.gcall && c.pflow));
        fdpf.push(Step::NeutralizeG);

        let mut pfload = vec![Step::ResetG];
        pfload.extend(invoke(&active, Call::Gcall, |c| {
            c.gcall && c.pflow && c.shunt && !c.stagen
        }));

        let mut pfgen = vec![Step::ResetG];
        pfgen.extend(invoke(&active, Call::Gcall, |c| {
            c.gcall && c.pflow && (c.shunt || c.series) && !c.stagen
        }));

        let seriesflow = invoke(&active, Call::SeriesFlow, |c| c.pflow && c.series);

        let mut residual = vec![Step::ResetFg];
        residual.extend(invoke(&active, Call::Gcall, |c| c.gcall));
        residual.extend(invoke(&active, Call::Fcall, |c| c.fcall));
        residual.push(Step::NeutralizeG);

        let mut int = residual.clone();
        int.push(Step::Reseed(invoke(&active, Call::Jac0, |c| c.jac0)));
        int.push(Step::SetupFxGy);
        int.extend(invoke(&active, Call::Gycall, |c| c.gycall));
        int.extend(invoke(&active, Call::Fxcall, |c| c.fxcall));
        int.push(Step::NeutralizeJac);

        Self {
            newton: plan(PlanKind::Newton, newton, &frozen),
            fdpf: plan(PlanKind::Fdpf, fdpf, &frozen),
            pfload: plan(PlanKind::PfLoad, pfload, &none),
            pfgen: plan(PlanKind::PfGen, pfgen, &none),
            seriesflow: plan(PlanKind::SeriesFlow, seriesflow, &none),
            int: plan(PlanKind::Integration, int, &none),
            int_residual: plan(PlanKind::IntegrationResidual, residual, &none),
        }
    }
}

/// Caches plans until the model population changes.
#[derive(Debug, Default)]
pub struct Dispatcher {
    fingerprint: Vec<(&'static str, usize, Capabilities)>,
    plans: Option<Plans>,
    builds: usize,
}

impl Dispatcher {
    fn fingerprint(models: &[Box<dyn Model>]) -> Vec<(&'static str, usize, Capabilities)> {
        models
            .iter()
            .map(|m| (m.name(), m.count(), m.capabilities()))
            .collect()
    }

    /// Returns cached plans, rebuilding only if the population changed.
    pub fn refresh(&mut self, models: &[Box<dyn Model>], m: usize) -> &Plans {
        let fingerprint = Self::fingerprint(models);
        if self.plans.is_none() || fingerprint != self.fingerprint {
            debug!("building execution plans for {} models", models.len());
            self.plans = Some(Plans::build(models, m));
            self.fingerprint = fingerprint;
            self.builds += 1;
        }
        self.plans.get_or_insert_with(|| Plans::build(models, m))
    }

    pub fn plans(&self) -> Option<&Plans> {
        self.plans.as_ref()
    }

    /// Number of times plans were (re)built.
    pub fn builds(&self) -> usize {
        self.builds
    }
}
