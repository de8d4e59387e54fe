use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::basic::{
    address::Addresses,
    config::Settings,
    dae::Dae,
    model::{BusAddresses, Capabilities, Elements, Model, device_common, impl_device},
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BusData {
    /// Nominal voltage in kV.
    pub vn: f64,
    /// Initial magnitude in p.u.
    pub voltage: f64,
    /// Initial angle in rad.
    pub angle: f64,
    pub vmax: f64,
    pub vmin: f64,
    pub area: i64,
}

impl Default for BusData {
    fn default() -> Self {
        Self {
            vn: 110.0,
            voltage: 1.0,
            angle: 0.0,
            vmax: 1.1,
            vmin: 0.9,
            area: 0,
        }
    }
}

/// Network node. Owns the angle and magnitude of every bus; injections from
/// other devices accumulate into its equations.
#[derive(Debug, Default)]
pub struct Bus {
    elements: Elements<BusData>,
    addr: Option<Addresses>,
}

impl_device!(Bus, BusData, "Bus");

impl Bus {
    pub fn ids(&self) -> &[i64] {
        self.elements.ids()
    }

    pub fn data(&self, i: usize) -> &BusData {
        self.elements.data(i)
    }

    pub fn bus_addresses(&self) -> Option<BusAddresses> {
        self.addr
            .as_ref()
            .map(|addr| BusAddresses::new(self.elements.ids(), addr))
    }
}

impl Model for Bus {
    device_common!();

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pflow: true,
            init0: true,
            ..Default::default()
        }
    }

    fn priority(&self) -> u8 {
        0
    }

    fn algebs(&self) -> Vec<&'static str> {
        vec!["theta", "vm"]
    }

    fn init0(&mut self, dae: &mut Dae, settings: &Settings) {
        let Some(addr) = &self.addr else {
            return;
        };
        let mut rng = StdRng::seed_from_u64(settings.pf.seed);
        for (i, data) in self.elements.iter() {
            let (a, v) = (addr.y(0, i), addr.y(1, i));
            if settings.pf.flatstart {
                dae.y[a] = 1e-10 * rng.r#gen::<f64>();
                dae.y[v] = 1.0;
            } else {
                dae.y[a] = data.angle;
                dae.y[v] = data.voltage;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::model::Device;

    #[test]
    fn flat_start_is_tiny_and_seeded() {
        let mut bus = Bus::default();
        bus.insert(1, BusData { angle: 0.3, voltage: 1.05, ..Default::default() })
            .unwrap();
        bus.insert(2, BusData::default()).unwrap();
        bus.assign(Addresses { count: 2, nx: 0, ny: 2, x_base: 0, y_base: 0 });

        let mut settings = Settings::default();
        let mut dae = Dae::new(0, 4);
        bus.init0(&mut dae, &settings);
        assert_eq!(dae.y[0], 0.3);
        assert_eq!(dae.y[2], 1.05);

        settings.pf.flatstart = true;
        bus.init0(&mut dae, &settings);
        assert!(dae.y[0].abs() < 1e-9 && dae.y[1].abs() < 1e-9);
        assert_eq!(dae.y[2], 1.0);
        let first = dae.y.clone();
        bus.init0(&mut dae, &settings);
        assert_eq!(first, dae.y);
    }

    #[test]
    fn bus_addresses_follow_assignment() {
        let mut bus = Bus::default();
        bus.insert(10, BusData::default()).unwrap();
        bus.insert(20, BusData::default()).unwrap();
        assert!(bus.bus_addresses().is_none());
        bus.assign(Addresses { count: 2, nx: 0, ny: 2, x_base: 0, y_base: 0 });
        let ba = bus.bus_addresses().unwrap();
        assert_eq!(ba.index(20), Some(1));
        assert_eq!(ba.v(1), 3);
    }
}
