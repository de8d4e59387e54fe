use num_complex::Complex64;

use crate::{
    basic::{
        address::Addresses,
        config::Settings,
        dae::{Dae, JacBlock},
        model::{BusAddresses, BusRole, Capabilities, Elements, Model, device_common, impl_device},
    },
    error::SolveResult,
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PvData {
    pub bus: i64,
    /// Scheduled active power output.
    pub p0: f64,
    pub v0: f64,
}

impl Default for PvData {
    fn default() -> Self {
        Self {
            bus: 0,
            p0: 0.0,
            v0: 1.0,
        }
    }
}

/// Static generator with scheduled active power and regulated voltage.
#[derive(Debug, Default)]
pub struct Pv {
    elements: Elements<PvData>,
    addr: Option<Addresses>,
    bus: Vec<usize>,
    a: Vec<usize>,
    v: Vec<usize>,
}

impl_device!(Pv, PvData, "PV");

const Q: usize = 0;

impl Model for Pv {
    device_common!();

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pflow: true,
            gcall: true,
            jac0: true,
            init0: true,
            stagen: true,
            ..Default::default()
        }
    }

    fn algebs(&self) -> Vec<&'static str> {
        vec!["q"]
    }

    fn link(&mut self, buses: &BusAddresses) -> SolveResult<()> {
        self.bus = self
            .elements
            .iter()
            .map(|(_, d)| buses.resolve("PV", d.bus))
            .collect::<SolveResult<_>>()?;
        self.a = self.bus.iter().map(|&b| buses.a(b)).collect();
        self.v = self.bus.iter().map(|&b| buses.v(b)).collect();
        Ok(())
    }

    fn terminals(&self) -> Vec<usize> {
        self.bus.clone()
    }

    fn bus_roles(&self) -> Vec<(usize, BusRole)> {
        (0..self.elements.len())
            .filter(|&i| self.elements.is_online(i))
            .map(|i| (self.bus[i], BusRole::Pv))
            .collect()
    }

    fn init0(&mut self, dae: &mut Dae, _settings: &Settings) {
        let Some(addr) = &self.addr else {
            return;
        };
        for (i, d) in self.elements.iter() {
            if self.elements.is_online(i) {
                dae.y[self.v[i]] = d.v0;
            }
            dae.y[addr.y(Q, i)] = 0.0;
        }
    }

    fn gcall(&mut self, dae: &mut Dae) {
        let Some(addr) = &self.addr else {
            return;
        };
        for (i, d) in self.elements.iter() {
            let u = self.elements.u(i);
            let q = addr.y(Q, i);
            dae.g[self.a[i]] -= u * d.p0;
            dae.g[self.v[i]] -= u * dae.y[q];
            dae.g[q] += u * (dae.y[self.v[i]] - d.v0) + (1.0 - u) * dae.y[q];
        }
    }

    fn jac0(&mut self, dae: &mut Dae) {
        let Some(addr) = self.addr.clone() else {
            return;
        };
        for i in 0..self.elements.len() {
            let u = self.elements.u(i);
            let q = addr.y(Q, i);
            dae.add_jac(JacBlock::Gy0, -u, self.v[i], q);
            dae.add_jac(JacBlock::Gy0, u, q, self.v[i]);
            dae.add_jac(JacBlock::Gy0, 1.0 - u, q, q);
        }
    }

    fn recover_injection(&mut self, dae: &mut Dae, generation: &[Complex64]) {
        let Some(addr) = &self.addr else {
            return;
        };
        for i in 0..self.elements.len() {
            if self.elements.is_online(i) {
                dae.y[addr.y(Q, i)] = generation[self.bus[i]].im;
            }
        }
    }
}
