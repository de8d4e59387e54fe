//! Synchronous machine assembled from equation parts.
//!
//! A machine owns a shared [`MachineCore`] (parameters, addresses, cached
//! trigonometry) and an ordered list of [`MachinePart`]s. Each part declares
//! the variables it introduces and contributes residuals and Jacobian entries
//! for them; hooks run part by part in list order.

use std::f64::consts::FRAC_PI_2;

use num_complex::Complex64;

use crate::{
    basic::{
        address::Addresses,
        dae::{Dae, JacBlock},
        model::{BusAddresses, Capabilities, Device, Elements, InitContext, Model},
    },
    error::{SolveError, SolveResult},
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Syn2Data {
    pub bus: i64,
    /// Rated frequency in Hz, 0 uses the system frequency.
    pub fn_hz: f64,
    pub ra: f64,
    pub xd1: f64,
    /// Mechanical starting time `2H` in s.
    pub m: f64,
    pub d: f64,
    /// Share of the bus active generation.
    pub gammap: f64,
    /// Share of the bus reactive generation.
    pub gammaq: f64,
}

impl Default for Syn2Data {
    fn default() -> Self {
        Self {
            bus: 0,
            fn_hz: 0.0,
            ra: 0.0,
            xd1: 0.302,
            m: 8.0,
            d: 0.0,
            gammap: 1.0,
            gammaq: 1.0,
        }
    }
}

// state positions
const DELTA: usize = 0;
const OMEGA: usize = 1;
// algebraic positions, swing part first then flux part
const P: usize = 0;
const Q: usize = 1;
const PM: usize = 2;
const VF: usize = 3;
const ID: usize = 4;
const IQ: usize = 5;
const VD: usize = 6;
const VQ: usize = 7;
const PSID: usize = 8;
const PSIQ: usize = 9;

/// State shared by every part of a machine.
#[derive(Debug, Default)]
pub struct MachineCore {
    pub elements: Elements<Syn2Data>,
    pub addr: Option<Addresses>,
    pub bus: Vec<usize>,
    pub a: Vec<usize>,
    pub v: Vec<usize>,
    pub wb: Vec<f64>,
    pub pm0: Vec<f64>,
    pub vf0: Vec<f64>,
    /// `sin(delta - theta)` from the last residual pass.
    pub ss: Vec<f64>,
    /// `cos(delta - theta)` from the last residual pass.
    pub cc: Vec<f64>,
}

impl MachineCore {
    fn x(&self, var: usize, i: usize) -> usize {
        debug_assert!(self.addr.is_some(), "Syn2 used before addresses were assigned");
        self.addr.as_ref().map_or(usize::MAX, |a| a.x(var, i))
    }

    fn y(&self, var: usize, i: usize) -> usize {
        debug_assert!(self.addr.is_some(), "Syn2 used before addresses were assigned");
        self.addr.as_ref().map_or(usize::MAX, |a| a.y(var, i))
    }

    fn len(&self) -> usize {
        self.elements.len()
    }
}

/// One group of machine equations.
pub trait MachinePart: std::fmt::Debug {
    fn states(&self) -> &'static [&'static str] {
        &[]
    }
    fn algebs(&self) -> &'static [&'static str] {
        &[]
    }
    fn init1(&self, _core: &mut MachineCore, _dae: &mut Dae, _ctx: &InitContext) {}
    fn gcall(&self, _core: &mut MachineCore, _dae: &mut Dae) {}
    fn fcall(&self, _core: &MachineCore, _dae: &mut Dae) {}
    fn gycall(&self, _core: &MachineCore, _dae: &mut Dae) {}
    fn fxcall(&self, _core: &MachineCore, _dae: &mut Dae) {}
    fn jac0(&self, _core: &MachineCore, _dae: &mut Dae) {}
}

/// Rotor angle dynamics, network interface and electrical power.
#[derive(Debug, Default)]
pub struct SwingPart;

impl MachinePart for SwingPart {
    fn states(&self) -> &'static [&'static str] {
        &["delta", "omega"]
    }

    fn algebs(&self) -> &'static [&'static str] {
        &["p", "q", "pm", "vf", "Id", "Iq", "vd", "vq"]
    }

    fn init1(&self, core: &mut MachineCore, dae: &mut Dae, ctx: &InitContext) {
        core.wb.clear();
        core.pm0.clear();
        core.vf0.clear();
        for i in 0..core.len() {
            let d = core.elements.data(i);
            let u = core.elements.u(i);
            let f = if d.fn_hz > 0.0 { d.fn_hz } else { ctx.settings.freq };
            core.wb.push(2.0 * std::f64::consts::PI * f);

            let bus_gen = ctx.bus_generation[core.bus[i]];
            let (p0, q0) = (u * bus_gen.re * d.gammap, u * bus_gen.im * d.gammaq);
            let vbus = Complex64::from_polar(dae.y[core.v[i]], dae.y[core.a[i]]);
            let current = Complex64::new(p0, -q0) / vbus.conj();
            let emf = vbus + Complex64::new(d.ra, d.xd1) * current;
            let delta = emf.arg();
            let rot = Complex64::from_polar(1.0, FRAC_PI_2 - delta);
            let vdq = vbus * rot;
            let idq = current * rot;
            let (vd, vq, id, iq) = (vdq.re, vdq.im, idq.re, idq.im);

            let pm0 = (vq + d.ra * iq) * iq + (vd + d.ra * id) * id;
            let vf0 = vq + d.ra * iq + d.xd1 * id;
            core.pm0.push(pm0);
            core.vf0.push(vf0);

            dae.x[core.x(DELTA, i)] = delta;
            dae.x[core.x(OMEGA, i)] = 1.0;
            dae.y[core.y(P, i)] = p0;
            dae.y[core.y(Q, i)] = q0;
            dae.y[core.y(PM, i)] = pm0;
            dae.y[core.y(VF, i)] = vf0;
            dae.y[core.y(ID, i)] = id;
            dae.y[core.y(IQ, i)] = iq;
            dae.y[core.y(VD, i)] = vd;
            dae.y[core.y(VQ, i)] = vq;
        }
    }

    fn gcall(&self, core: &mut MachineCore, dae: &mut Dae) {
        core.ss.resize(core.len(), 0.0);
        core.cc.resize(core.len(), 0.0);
        for i in 0..core.len() {
            let u = core.elements.u(i);
            let (a, v) = (core.a[i], core.v[i]);
            let (ss, cc) = (dae.x[core.x(DELTA, i)] - dae.y[a]).sin_cos();
            core.ss[i] = ss;
            core.cc[i] = cc;
            let y = |k| dae.y[core.y(k, i)];
            let (p, q, vd, vq, id, iq) = (y(P), y(Q), y(VD), y(VQ), y(ID), y(IQ));
            let vm = dae.y[v];
            let (pm, vf) = (y(PM), y(VF));
            let pm0 = core.pm0.get(i).copied().unwrap_or(pm);
            let vf0 = core.vf0.get(i).copied().unwrap_or(vf);

            dae.g[a] -= u * p;
            dae.g[v] -= u * q;
            dae.g[core.y(VD, i)] += vm * ss - vd;
            dae.g[core.y(VQ, i)] += vm * cc - vq;
            dae.g[core.y(P, i)] += vd * id + vq * iq - p;
            dae.g[core.y(Q, i)] += vq * id - vd * iq - q;
            dae.g[core.y(PM, i)] += pm - pm0;
            dae.g[core.y(VF, i)] += vf - vf0;
        }
    }

    fn fcall(&self, core: &MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let u = core.elements.u(i);
            let wb = core.wb.get(i).copied().unwrap_or(0.0);
            dae.f[core.x(DELTA, i)] = u * wb * (dae.x[core.x(OMEGA, i)] - 1.0);
        }
    }

    fn jac0(&self, core: &MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let u = core.elements.u(i);
            let wb = core.wb.get(i).copied().unwrap_or(0.0);
            for k in [VD, VQ, P, Q] {
                dae.add_jac(JacBlock::Gy0, -1.0, core.y(k, i), core.y(k, i));
            }
            dae.add_jac(JacBlock::Gy0, 1.0, core.y(PM, i), core.y(PM, i));
            dae.add_jac(JacBlock::Gy0, 1.0, core.y(VF, i), core.y(VF, i));
            dae.add_jac(JacBlock::Gy0, -u, core.a[i], core.y(P, i));
            dae.add_jac(JacBlock::Gy0, -u, core.v[i], core.y(Q, i));
            dae.add_jac(JacBlock::Fx0, u * wb, core.x(DELTA, i), core.x(OMEGA, i));
        }
    }

    fn gycall(&self, core: &MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let (a, v) = (core.a[i], core.v[i]);
            let (ss, cc) = (core.ss[i], core.cc[i]);
            let vm = dae.y[v];
            let y = |k| dae.y[core.y(k, i)];
            let (vd, vq, id, iq) = (y(VD), y(VQ), y(ID), y(IQ));
            let row = |k| core.y(k, i);
            let entries = [
                (row(VD), a, -vm * cc),
                (row(VD), v, ss),
                (row(VQ), a, vm * ss),
                (row(VQ), v, cc),
                (row(P), row(VD), id),
                (row(P), row(VQ), iq),
                (row(P), row(ID), vd),
                (row(P), row(IQ), vq),
                (row(Q), row(VD), -iq),
                (row(Q), row(VQ), id),
                (row(Q), row(ID), vq),
                (row(Q), row(IQ), -vd),
            ];
            for (r, c, val) in entries {
                dae.add_jac(JacBlock::Gy, val, r, c);
            }
        }
    }

    fn fxcall(&self, core: &MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let vm = dae.y[core.v[i]];
            let delta = core.x(DELTA, i);
            dae.add_jac(JacBlock::Gx, vm * core.cc[i], core.y(VD, i), delta);
            dae.add_jac(JacBlock::Gx, -vm * core.ss[i], core.y(VQ, i), delta);
        }
    }
}

/// Stator flux linkages with transient reactance and the swing torque balance.
#[derive(Debug, Default)]
pub struct FluxPart;

impl MachinePart for FluxPart {
    fn algebs(&self) -> &'static [&'static str] {
        &["psid", "psiq"]
    }

    fn init1(&self, core: &mut MachineCore, dae: &mut Dae, _ctx: &InitContext) {
        for i in 0..core.len() {
            let ra = core.elements.data(i).ra;
            let y = |k| dae.y[core.y(k, i)];
            let (vd, vq, id, iq) = (y(VD), y(VQ), y(ID), y(IQ));
            dae.y[core.y(PSIQ, i)] = -ra * id - vd;
            dae.y[core.y(PSID, i)] = ra * iq + vq;
        }
    }

    fn gcall(&self, core: &mut MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let d = core.elements.data(i);
            let y = |k| dae.y[core.y(k, i)];
            let (vd, vq, id, iq) = (y(VD), y(VQ), y(ID), y(IQ));
            let (psid, psiq, vf) = (y(PSID), y(PSIQ), y(VF));
            dae.g[core.y(PSIQ, i)] += d.ra * id + psiq + vd;
            dae.g[core.y(PSID, i)] += d.ra * iq - psid + vq;
            dae.g[core.y(ID, i)] += psid + d.xd1 * id - vf;
            dae.g[core.y(IQ, i)] += psiq + d.xd1 * iq;
        }
    }

    fn fcall(&self, core: &MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let d = core.elements.data(i);
            let u = core.elements.u(i);
            let y = |k| dae.y[core.y(k, i)];
            let (pm, psid, psiq, id, iq) = (y(PM), y(PSID), y(PSIQ), y(ID), y(IQ));
            let omega = dae.x[core.x(OMEGA, i)];
            dae.f[core.x(OMEGA, i)] =
                u * (pm - psid * iq + psiq * id - d.d * (omega - 1.0)) / d.m;
        }
    }

    fn jac0(&self, core: &MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let d = core.elements.data(i);
            let u = core.elements.u(i);
            let row = |k| core.y(k, i);
            let entries = [
                (row(PSIQ), row(PSIQ), 1.0),
                (row(PSIQ), row(VD), 1.0),
                (row(PSIQ), row(ID), d.ra),
                (row(PSID), row(PSID), -1.0),
                (row(PSID), row(VQ), 1.0),
                (row(PSID), row(IQ), d.ra),
                (row(ID), row(PSID), 1.0),
                (row(ID), row(ID), d.xd1),
                (row(ID), row(VF), -1.0),
                (row(IQ), row(IQ), d.xd1),
                (row(IQ), row(PSIQ), 1.0),
            ];
            for (r, c, val) in entries {
                dae.add_jac(JacBlock::Gy0, val, r, c);
            }
            let omega = core.x(OMEGA, i);
            dae.add_jac(JacBlock::Fx0, -u * d.d / d.m, omega, omega);
            dae.add_jac(JacBlock::Fy0, u / d.m, omega, row(PM));
        }
    }

    fn fxcall(&self, core: &MachineCore, dae: &mut Dae) {
        for i in 0..core.len() {
            let d = core.elements.data(i);
            let k = core.elements.u(i) / d.m;
            let y = |v| dae.y[core.y(v, i)];
            let (psid, psiq, id, iq) = (y(PSID), y(PSIQ), y(ID), y(IQ));
            let omega = core.x(OMEGA, i);
            dae.add_jac(JacBlock::Fy, k * id, omega, core.y(PSIQ, i));
            dae.add_jac(JacBlock::Fy, k * psiq, omega, core.y(ID, i));
            dae.add_jac(JacBlock::Fy, -k * iq, omega, core.y(PSID, i));
            dae.add_jac(JacBlock::Fy, -k * psid, omega, core.y(IQ, i));
        }
    }
}

/// Second-order classical machine: [`SwingPart`] followed by [`FluxPart`].
#[derive(Debug)]
pub struct Syn2 {
    core: MachineCore,
    parts: Vec<Box<dyn MachinePart>>,
}

impl Default for Syn2 {
    fn default() -> Self {
        Self {
            core: MachineCore::default(),
            parts: vec![Box::new(SwingPart), Box::new(FluxPart)],
        }
    }
}

impl Device for Syn2 {
    type Data = Syn2Data;
    const NAME: &'static str = "Syn2";
    fn insert(&mut self, id: i64, data: Syn2Data) -> Result<usize, crate::error::AddressingError> {
        self.core.elements.insert(Self::NAME, id, data)
    }
    fn delete(&mut self, id: i64) -> Option<Syn2Data> {
        self.core.elements.remove(id)
    }
}

impl Syn2 {
    pub fn core(&self) -> &MachineCore {
        &self.core
    }

    /// Rotor angle and speed of element `i`.
    pub fn rotor(&self, dae: &Dae, i: usize) -> (f64, f64) {
        (dae.x[self.core.x(DELTA, i)], dae.x[self.core.x(OMEGA, i)])
    }

    fn each_part(&mut self, mut f: impl FnMut(&dyn MachinePart, &mut MachineCore)) {
        for part in &self.parts {
            f(part.as_ref(), &mut self.core);
        }
    }
}

impl Model for Syn2 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            gcall: true,
            fcall: true,
            gycall: true,
            fxcall: true,
            jac0: true,
            init1: true,
            dyngen: true,
            ..Default::default()
        }
    }

    fn count(&self) -> usize {
        self.core.len()
    }

    fn states(&self) -> Vec<&'static str> {
        self.parts.iter().flat_map(|p| p.states().iter().copied()).collect()
    }

    fn algebs(&self) -> Vec<&'static str> {
        self.parts.iter().flat_map(|p| p.algebs().iter().copied()).collect()
    }

    fn element_names(&self) -> Vec<String> {
        self.core.elements.names().to_vec()
    }

    fn assign(&mut self, addr: Addresses) {
        self.core.addr = Some(addr);
    }

    fn addresses(&self) -> Option<&Addresses> {
        self.core.addr.as_ref()
    }

    fn set_status(&mut self, id: i64, online: bool) -> bool {
        match self.core.elements.index_of(id) {
            Some(i) => {
                self.core.elements.set_online(i, online);
                true
            }
            None => false,
        }
    }

    fn set_online(&mut self, element: usize, online: bool) {
        self.core.elements.set_online(element, online);
    }

    fn statuses(&self) -> Vec<bool> {
        self.core.elements.statuses().to_vec()
    }

    fn link(&mut self, buses: &BusAddresses) -> SolveResult<()> {
        let core = &mut self.core;
        core.bus.clear();
        for (_, d) in core.elements.iter() {
            if d.m <= 0.0 {
                return Err(SolveError::InvalidData {
                    model: "Syn2",
                    what: format!("machine at bus {} needs a positive inertia", d.bus),
                });
            }
            core.bus.push(buses.resolve("Syn2", d.bus)?);
        }
        core.a = core.bus.iter().map(|&b| buses.a(b)).collect();
        core.v = core.bus.iter().map(|&b| buses.v(b)).collect();
        core.ss = vec![0.0; core.bus.len()];
        core.cc = vec![1.0; core.bus.len()];
        Ok(())
    }

    fn terminals(&self) -> Vec<usize> {
        self.core.bus.clone()
    }

    fn init1(&mut self, dae: &mut Dae, ctx: &InitContext) -> SolveResult<()> {
        self.each_part(|p, core| p.init1(core, dae, ctx));
        Ok(())
    }

    fn gcall(&mut self, dae: &mut Dae) {
        self.each_part(|p, core| p.gcall(core, dae));
    }

    fn fcall(&mut self, dae: &mut Dae) {
        self.each_part(|p, core| p.fcall(core, dae));
    }

    fn gycall(&mut self, dae: &mut Dae) {
        self.each_part(|p, core| p.gycall(core, dae));
    }

    fn fxcall(&mut self, dae: &mut Dae) {
        self.each_part(|p, core| p.fxcall(core, dae));
    }

    fn jac0(&mut self, dae: &mut Dae) {
        self.each_part(|p, core| p.jac0(core, dae));
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::config::Settings;

    fn machine() -> (Syn2, Dae) {
        let mut syn = Syn2::default();
        syn.insert(1, Syn2Data { bus: 1, ra: 0.01, xd1: 0.3, m: 7.0, d: 1.0, ..Default::default() })
            .unwrap();
        let bus_addr = Addresses { count: 1, nx: 0, ny: 2, x_base: 0, y_base: 0 };
        syn.link(&BusAddresses::new(&[1], &bus_addr)).unwrap();
        syn.assign(Addresses { count: 1, nx: 2, ny: 10, x_base: 0, y_base: 2 });
        let mut dae = Dae::new(2, 12);
        dae.y[0] = 0.12;
        dae.y[1] = 1.03;
        let settings = Settings::default();
        let ctx = InitContext {
            settings: &settings,
            bus_generation: &[Complex64::new(0.8, 0.25)],
        };
        syn.init1(&mut dae, &ctx).unwrap();
        (syn, dae)
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "before addresses were assigned")]
    fn unassigned_machine_has_no_variables() {
        let mut syn = Syn2::default();
        syn.insert(1, Syn2Data { bus: 1, ..Default::default() }).unwrap();
        syn.core().x(DELTA, 0);
    }

    #[test]
    fn composed_variables_in_part_order() {
        let syn = Syn2::default();
        assert_eq!(syn.states(), vec!["delta", "omega"]);
        assert_eq!(syn.algebs().len(), 10);
        assert_eq!(syn.algebs()[8], "psid");
    }

    #[test]
    fn initialization_is_an_equilibrium() {
        let (mut syn, mut dae) = machine();
        dae.init_fg();
        syn.gcall(&mut dae);
        syn.fcall(&mut dae);
        // machine rows are balanced; bus rows carry the injection
        for k in 2..12 {
            assert!(dae.g[k].abs() < 1e-10, "g[{k}] = {}", dae.g[k]);
        }
        assert!(dae.f.iter().all(|v| v.abs() < 1e-10));
        assert!((dae.g[0] + 0.8).abs() < 1e-10);
        assert!((dae.g[1] + 0.25).abs() < 1e-10);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let (mut syn, mut dae) = machine();
        dae.x[0] += 0.05;
        dae.y[7] += 0.02;
        let eval = |syn: &mut Syn2, dae: &mut Dae| {
            dae.init_fg();
            syn.gcall(dae);
            syn.fcall(dae);
        };
        eval(&mut syn, &mut dae);
        dae.init_jac0();
        syn.jac0(&mut dae);
        dae.setup_fx_gy();
        syn.gycall(&mut dae);
        syn.fxcall(&mut dae);
        let (fx, fy, gx, gy) = (dae.fx.clone(), dae.fy.clone(), dae.gx.clone(), dae.gy.clone());

        let h = 1e-7;
        for col in 0..dae.m {
            let mut plus = dae.clone();
            plus.y[col] += h;
            eval(&mut syn, &mut plus);
            let mut minus = dae.clone();
            minus.y[col] -= h;
            eval(&mut syn, &mut minus);
            for row in 0..dae.m {
                let fd = (plus.g[row] - minus.g[row]) / (2.0 * h);
                assert!((fd - gy.get(row, col)).abs() < 1e-6, "Gy({row},{col})");
            }
            for row in 0..dae.n {
                let fd = (plus.f[row] - minus.f[row]) / (2.0 * h);
                assert!((fd - fy.get(row, col)).abs() < 1e-6, "Fy({row},{col})");
            }
        }
        for col in 0..dae.n {
            let mut plus = dae.clone();
            plus.x[col] += h;
            eval(&mut syn, &mut plus);
            let mut minus = dae.clone();
            minus.x[col] -= h;
            eval(&mut syn, &mut minus);
            for row in 0..dae.m {
                let fd = (plus.g[row] - minus.g[row]) / (2.0 * h);
                assert!((fd - gx.get(row, col)).abs() < 1e-6, "Gx({row},{col})");
            }
            for row in 0..dae.n {
                let fd = (plus.f[row] - minus.f[row]) / (2.0 * h);
                assert!((fd - fx.get(row, col)).abs() < 1e-6, "Fx({row},{col})");
            }
        }
    }
}
