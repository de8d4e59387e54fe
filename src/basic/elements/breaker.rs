use crate::basic::{
    address::Addresses,
    model::{Capabilities, Device, Elements, Model, StatusChange, device_common, impl_device},
};

use super::Line;

/// Opens a line at `t1` and, if given, recloses it at `t2`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BreakerData {
    /// External id of the controlled line.
    pub line: i64,
    pub t1: f64,
    pub t2: Option<f64>,
}

impl Default for BreakerData {
    fn default() -> Self {
        Self {
            line: 0,
            t1: 1.0,
            t2: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Breaker {
    elements: Elements<BreakerData>,
    addr: Option<Addresses>,
    open: Vec<bool>,
}

impl_device!(Breaker, BreakerData, "Breaker");

impl Model for Breaker {
    device_common!();

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            times: true,
            ..Default::default()
        }
    }

    fn event_times(&self) -> Vec<f64> {
        self.elements
            .iter()
            .flat_map(|(_, d)| std::iter::once(d.t1).chain(d.t2))
            .collect()
    }

    fn check_time(&mut self, t: f64) -> Vec<StatusChange> {
        self.open.resize(self.elements.len(), false);
        let mut changes = Vec::new();
        for (i, d) in self.elements.iter() {
            if !self.elements.is_online(i) {
                continue;
            }
            let open = d.t1 <= t && d.t2.is_none_or(|t2| t < t2);
            if open != self.open[i] {
                self.open[i] = open;
                changes.push(StatusChange {
                    model: <Line as Device>::NAME,
                    id: d.line,
                    online: !open,
                });
            }
        }
        changes
    }

    fn restore_static(&mut self) {
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_recloses_once() {
        let mut brk = Breaker::default();
        brk.insert(1, BreakerData { line: 7, t1: 0.2, t2: Some(0.5) }).unwrap();
        assert_eq!(brk.event_times(), vec![0.2, 0.5]);
        assert!(brk.check_time(0.1).is_empty());
        let opened = brk.check_time(0.2);
        assert_eq!(
            opened,
            vec![StatusChange { model: "Line", id: 7, online: false }]
        );
        assert!(brk.check_time(0.3).is_empty());
        let closed = brk.check_time(0.5);
        assert!(closed[0].online);

        brk.check_time(0.3);
        brk.restore_static();
        assert_eq!(brk.check_time(0.3).len(), 1);
    }
}
