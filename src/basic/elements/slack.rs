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
pub struct SlackData {
    pub bus: i64,
    pub v0: f64,
    /// Reference angle in rad.
    pub a0: f64,
    /// Initial guess for the active power output.
    pub p0: f64,
}

impl Default for SlackData {
    fn default() -> Self {
        Self {
            bus: 0,
            v0: 1.0,
            a0: 0.0,
            p0: 0.0,
        }
    }
}

/// Slack generator: fixes angle and magnitude at its bus, output is free.
#[derive(Debug, Default)]
pub struct Slack {
    elements: Elements<SlackData>,
    addr: Option<Addresses>,
    bus: Vec<usize>,
    a: Vec<usize>,
    v: Vec<usize>,
}

impl_device!(Slack, SlackData, "Slack");

const P: usize = 0;
const Q: usize = 1;

impl Slack {
    /// Active and reactive output of element `i`.
    pub fn output(&self, dae: &Dae, i: usize) -> Option<Complex64> {
        let addr = self.addr.as_ref()?;
        Some(Complex64::new(dae.y[addr.y(P, i)], dae.y[addr.y(Q, i)]))
    }
}

impl Model for Slack {
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
        vec!["p", "q"]
    }

    fn link(&mut self, buses: &BusAddresses) -> SolveResult<()> {
        self.bus = self
            .elements
            .iter()
            .map(|(_, d)| buses.resolve("Slack", d.bus))
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
            .map(|i| (self.bus[i], BusRole::Slack))
            .collect()
    }

    fn init0(&mut self, dae: &mut Dae, _settings: &Settings) {
        let Some(addr) = &self.addr else {
            return;
        };
        for (i, d) in self.elements.iter() {
            if self.elements.is_online(i) {
                dae.y[self.a[i]] = d.a0;
                dae.y[self.v[i]] = d.v0;
            }
            dae.y[addr.y(P, i)] = d.p0;
            dae.y[addr.y(Q, i)] = 0.0;
        }
    }

    fn gcall(&mut self, dae: &mut Dae) {
        let Some(addr) = &self.addr else {
            return;
        };
        for (i, d) in self.elements.iter() {
            let u = self.elements.u(i);
            let (p, q) = (addr.y(P, i), addr.y(Q, i));
            dae.g[self.a[i]] -= u * dae.y[p];
            dae.g[self.v[i]] -= u * dae.y[q];
            dae.g[p] += u * (dae.y[self.a[i]] - d.a0) + (1.0 - u) * dae.y[p];
            dae.g[q] += u * (dae.y[self.v[i]] - d.v0) + (1.0 - u) * dae.y[q];
        }
    }

    fn jac0(&mut self, dae: &mut Dae) {
        let Some(addr) = self.addr.clone() else {
            return;
        };
        for i in 0..self.elements.len() {
            let u = self.elements.u(i);
            let (p, q) = (addr.y(P, i), addr.y(Q, i));
            dae.add_jac(JacBlock::Gy0, -u, self.a[i], p);
            dae.add_jac(JacBlock::Gy0, -u, self.v[i], q);
            dae.add_jac(JacBlock::Gy0, u, p, self.a[i]);
            dae.add_jac(JacBlock::Gy0, 1.0 - u, p, p);
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
                let s = generation[self.bus[i]];
                dae.y[addr.y(P, i)] = s.re;
                dae.y[addr.y(Q, i)] = s.im;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::model::Device;

    fn slack() -> (Slack, Dae) {
        let mut sw = Slack::default();
        sw.insert(1, SlackData { bus: 1, v0: 1.04, a0: 0.0, p0: 0.3 }).unwrap();
        let bus_addr = Addresses { count: 1, nx: 0, ny: 2, x_base: 0, y_base: 0 };
        sw.link(&BusAddresses::new(&[1], &bus_addr)).unwrap();
        sw.assign(Addresses { count: 1, nx: 0, ny: 2, x_base: 0, y_base: 2 });
        (sw, Dae::new(0, 4))
    }

    #[test]
    fn holds_voltage_and_angle() {
        let (mut sw, mut dae) = slack();
        sw.init0(&mut dae, &Settings::default());
        assert_eq!(dae.y[1], 1.04);
        assert_eq!(dae.y[2], 0.3);
        sw.gcall(&mut dae);
        assert_eq!(dae.g[0], -0.3);
        assert_eq!(dae.g[2], 0.0);
        assert_eq!(dae.g[3], 0.0);
        assert_eq!(sw.bus_roles(), vec![(0, BusRole::Slack)]);
    }

    #[test]
    fn offline_slack_releases_its_bus() {
        let (mut sw, mut dae) = slack();
        sw.init0(&mut dae, &Settings::default());
        sw.set_status(1, false);
        sw.gcall(&mut dae);
        assert_eq!(dae.g[0], 0.0);
        assert_eq!(dae.g[2], 0.3);
        sw.jac0(&mut dae);
        assert_eq!(dae.gy0.get(2, 2), 1.0);
        assert_eq!(dae.gy0.get(0, 2), 0.0);
        assert!(sw.bus_roles().is_empty());
    }
}
