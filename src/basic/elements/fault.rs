use num_complex::Complex64;

use crate::{
    basic::{
        address::Addresses,
        dae::{Dae, JacBlock},
        model::{BusAddresses, Capabilities, Elements, Model, StatusChange, device_common, impl_device},
    },
    error::{SolveError, SolveResult},
};

/// Three-phase shunt fault applied at `tf` and cleared at `tc`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FaultData {
    pub bus: i64,
    pub tf: f64,
    pub tc: f64,
    pub rf: f64,
    pub xf: f64,
}

impl Default for FaultData {
    fn default() -> Self {
        Self {
            bus: 0,
            tf: 1.0,
            tc: 1.1,
            rf: 0.0,
            xf: 1e-4,
        }
    }
}

#[derive(Debug, Default)]
pub struct Fault {
    elements: Elements<FaultData>,
    addr: Option<Addresses>,
    bus: Vec<usize>,
    a: Vec<usize>,
    v: Vec<usize>,
    y: Vec<Complex64>,
    active: Vec<bool>,
}

impl_device!(Fault, FaultData, "Fault");

impl Fault {
    pub fn is_active(&self, i: usize) -> bool {
        self.active[i]
    }

    fn k(&self, i: usize) -> f64 {
        if self.active[i] { self.elements.u(i) } else { 0.0 }
    }
}

impl Model for Fault {
    device_common!();

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            gcall: true,
            gycall: true,
            times: true,
            ..Default::default()
        }
    }

    fn link(&mut self, buses: &BusAddresses) -> SolveResult<()> {
        self.bus.clear();
        self.y.clear();
        for (_, d) in self.elements.iter() {
            if d.rf == 0.0 && d.xf == 0.0 {
                return Err(SolveError::InvalidData {
                    model: "Fault",
                    what: format!("fault at bus {} has zero impedance", d.bus),
                });
            }
            if d.tc <= d.tf {
                return Err(SolveError::InvalidData {
                    model: "Fault",
                    what: format!("fault at bus {} clears before it starts", d.bus),
                });
            }
            self.bus.push(buses.resolve("Fault", d.bus)?);
            self.y.push(1.0 / Complex64::new(d.rf, d.xf));
        }
        self.a = self.bus.iter().map(|&b| buses.a(b)).collect();
        self.v = self.bus.iter().map(|&b| buses.v(b)).collect();
        self.active = vec![false; self.elements.len()];
        Ok(())
    }

    fn gcall(&mut self, dae: &mut Dae) {
        for i in 0..self.elements.len() {
            let k = self.k(i);
            let v2 = dae.y[self.v[i]].powi(2);
            dae.g[self.a[i]] += k * self.y[i].re * v2;
            dae.g[self.v[i]] -= k * self.y[i].im * v2;
        }
    }

    fn gycall(&mut self, dae: &mut Dae) {
        for i in 0..self.elements.len() {
            let k = self.k(i);
            let v = dae.y[self.v[i]];
            dae.add_jac(JacBlock::Gy, 2.0 * k * self.y[i].re * v, self.a[i], self.v[i]);
            dae.add_jac(JacBlock::Gy, -2.0 * k * self.y[i].im * v, self.v[i], self.v[i]);
        }
    }

    fn event_times(&self) -> Vec<f64> {
        self.elements
            .iter()
            .flat_map(|(_, d)| [d.tf, d.tc])
            .collect()
    }

    fn check_time(&mut self, t: f64) -> Vec<StatusChange> {
        for (i, d) in self.elements.iter() {
            self.active[i] = d.tf <= t && t < d.tc;
        }
        Vec::new()
    }

    fn restore_static(&mut self) {
        self.active.fill(false);
    }
}
