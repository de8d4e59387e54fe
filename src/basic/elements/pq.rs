use crate::{
    basic::{
        address::Addresses,
        dae::{Dae, JacBlock},
        model::{BusAddresses, Capabilities, Elements, InitContext, Model, device_common, impl_device},
    },
    error::SolveResult,
};

/// Constant power consumption in p.u.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PqData {
    pub bus: i64,
    pub p: f64,
    pub q: f64,
}

/// Load. Constant power in power flow; optionally constant impedance once
/// dynamic initialization has run.
#[derive(Debug, Default)]
pub struct Pq {
    elements: Elements<PqData>,
    addr: Option<Addresses>,
    bus: Vec<usize>,
    a: Vec<usize>,
    v: Vec<usize>,
    /// `(g, b)` coefficients of `P = g V^2`, `Q = b V^2` after conversion.
    impedance: Option<Vec<(f64, f64)>>,
}

impl_device!(Pq, PqData, "PQ");

impl Pq {
    pub fn is_constant_impedance(&self) -> bool {
        self.impedance.is_some()
    }
}

impl Model for Pq {
    device_common!();

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pflow: true,
            gcall: true,
            gycall: true,
            shunt: true,
            init1: true,
            ..Default::default()
        }
    }

    fn link(&mut self, buses: &BusAddresses) -> SolveResult<()> {
        self.bus = self
            .elements
            .iter()
            .map(|(_, d)| buses.resolve("PQ", d.bus))
            .collect::<SolveResult<_>>()?;
        self.a = self.bus.iter().map(|&b| buses.a(b)).collect();
        self.v = self.bus.iter().map(|&b| buses.v(b)).collect();
        self.impedance = None;
        Ok(())
    }

    fn terminals(&self) -> Vec<usize> {
        self.bus.clone()
    }

    fn init1(&mut self, dae: &mut Dae, ctx: &InitContext) -> SolveResult<()> {
        if !ctx.settings.td.pq2z {
            return Ok(());
        }
        let coeffs = self
            .elements
            .iter()
            .map(|(i, d)| {
                let v0 = dae.y[self.v[i]].max(1e-6);
                (d.p / (v0 * v0), d.q / (v0 * v0))
            })
            .collect();
        self.impedance = Some(coeffs);
        Ok(())
    }

    fn restore_static(&mut self) {
        self.impedance = None;
    }

    fn gcall(&mut self, dae: &mut Dae) {
        for (i, d) in self.elements.iter() {
            let u = self.elements.u(i);
            let (p, q) = match &self.impedance {
                Some(z) => {
                    let v2 = dae.y[self.v[i]].powi(2);
                    (z[i].0 * v2, z[i].1 * v2)
                }
                None => (d.p, d.q),
            };
            dae.g[self.a[i]] += u * p;
            dae.g[self.v[i]] += u * q;
        }
    }

    fn gycall(&mut self, dae: &mut Dae) {
        for i in 0..self.elements.len() {
            let u = self.elements.u(i);
            let (dp, dq) = match &self.impedance {
                Some(z) => {
                    let v = dae.y[self.v[i]];
                    (2.0 * z[i].0 * v, 2.0 * z[i].1 * v)
                }
                None => (0.0, 0.0),
            };
            dae.add_jac(JacBlock::Gy, u * dp, self.a[i], self.v[i]);
            dae.add_jac(JacBlock::Gy, u * dq, self.v[i], self.v[i]);
        }
    }
}
