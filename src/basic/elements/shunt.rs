use crate::{
    basic::{
        address::Addresses,
        dae::{Dae, JacBlock},
        model::{BusAddresses, Capabilities, Elements, Model, device_common, impl_device},
    },
    error::SolveResult,
};

/// Shunt admittance `g + jb` in p.u.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ShuntData {
    pub bus: i64,
    pub g: f64,
    pub b: f64,
}

#[derive(Debug, Default)]
pub struct Shunt {
    elements: Elements<ShuntData>,
    addr: Option<Addresses>,
    bus: Vec<usize>,
    a: Vec<usize>,
    v: Vec<usize>,
}

impl_device!(Shunt, ShuntData, "Shunt");

impl Model for Shunt {
    device_common!();

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pflow: true,
            gcall: true,
            gycall: true,
            shunt: true,
            ..Default::default()
        }
    }

    fn link(&mut self, buses: &BusAddresses) -> SolveResult<()> {
        self.bus = self
            .elements
            .iter()
            .map(|(_, d)| buses.resolve("Shunt", d.bus))
            .collect::<SolveResult<_>>()?;
        self.a = self.bus.iter().map(|&b| buses.a(b)).collect();
        self.v = self.bus.iter().map(|&b| buses.v(b)).collect();
        Ok(())
    }

    fn terminals(&self) -> Vec<usize> {
        self.bus.clone()
    }

    fn gcall(&mut self, dae: &mut Dae) {
        for (i, d) in self.elements.iter() {
            let u = self.elements.u(i);
            let v2 = dae.y[self.v[i]].powi(2);
            dae.g[self.a[i]] += u * d.g * v2;
            dae.g[self.v[i]] -= u * d.b * v2;
        }
    }

    fn gycall(&mut self, dae: &mut Dae) {
        for (i, d) in self.elements.iter() {
            let u = self.elements.u(i);
            let v = dae.y[self.v[i]];
            dae.add_jac(JacBlock::Gy, 2.0 * u * d.g * v, self.a[i], self.v[i]);
            dae.add_jac(JacBlock::Gy, -2.0 * u * d.b * v, self.v[i], self.v[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::model::Device;

    #[test]
    fn capacitor_injects_reactive_power() {
        let mut sh = Shunt::default();
        sh.insert(1, ShuntData { bus: 5, g: 0.0, b: 0.3 }).unwrap();
        let bus_addr = Addresses { count: 1, nx: 0, ny: 2, x_base: 0, y_base: 0 };
        sh.link(&BusAddresses::new(&[5], &bus_addr)).unwrap();
        let mut dae = Dae::new(0, 2);
        dae.y[1] = 1.1;
        sh.gcall(&mut dae);
        assert!((dae.g[1] + 0.3 * 1.21).abs() < 1e-12);
        sh.gycall(&mut dae);
        assert!((dae.gy.get(1, 1) + 0.66).abs() < 1e-12);
    }
}
