use num_complex::Complex64;

use crate::{
    basic::{
        address::Addresses,
        config::FdVariant,
        dae::{Dae, JacBlock},
        model::{BranchFlow, BusAddresses, Capabilities, Elements, Model, device_common, impl_device},
        sparse::TripletMatrix,
    },
    error::{SolveError, SolveResult},
};

/// π-model branch parameters in system p.u.; `tap` and `phi` sit on the from side.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LineData {
    pub bus1: i64,
    pub bus2: i64,
    pub r: f64,
    pub x: f64,
    /// Total line charging susceptance.
    pub b: f64,
    /// Total line charging conductance.
    pub g: f64,
    pub b1: f64,
    pub g1: f64,
    pub b2: f64,
    pub g2: f64,
    pub tap: f64,
    /// Phase shift in degrees.
    pub phi: f64,
}

impl Default for LineData {
    fn default() -> Self {
        Self {
            bus1: 0,
            bus2: 0,
            r: 0.0,
            x: 1e-6,
            b: 0.0,
            g: 0.0,
            b1: 0.0,
            g1: 0.0,
            b2: 0.0,
            g2: 0.0,
            tap: 1.0,
            phi: 0.0,
        }
    }
}

/// Two-port admittance of one branch.
#[derive(Debug, Clone, Copy)]
struct BranchY {
    y11: Complex64,
    y12: Complex64,
    y21: Complex64,
    y22: Complex64,
}

impl BranchY {
    fn new(d: &LineData) -> Self {
        let ys = 1.0 / Complex64::new(d.r, d.x);
        let ysh1 = Complex64::new(d.g / 2.0 + d.g1, d.b / 2.0 + d.b1);
        let ysh2 = Complex64::new(d.g / 2.0 + d.g2, d.b / 2.0 + d.b2);
        let m = Complex64::from_polar(d.tap, d.phi.to_radians());
        Self {
            y11: (ys + ysh1) / (d.tap * d.tap),
            y12: -ys / m.conj(),
            y21: -ys / m,
            y22: ys + ysh2,
        }
    }
}

/// Partial derivatives of the power leaving one terminal.
struct TerminalJac {
    dp: [f64; 4],
    dq: [f64; 4],
}

/// Power leaving terminal `i` towards `j` and its derivatives with respect to
/// `[theta_i, v_i, theta_j, v_j]`.
#[allow(non_snake_case)]
fn terminal(yii: Complex64, yij: Complex64, ti: f64, vi: f64, tj: f64, vj: f64) -> (Complex64, TerminalJac) {
    let (G, B) = (yii.re, yii.im);
    let (Gm, Bm) = (yij.re, yij.im);
    let (s, c) = (ti - tj).sin_cos();
    let re = Gm * c + Bm * s;
    let im = Gm * s - Bm * c;
    let p = vi * vi * G + vi * vj * re;
    let q = -vi * vi * B + vi * vj * im;
    let jac = TerminalJac {
        dp: [-vi * vj * im, 2.0 * vi * G + vj * re, vi * vj * im, vi * re],
        dq: [vi * vj * re, -2.0 * vi * B + vj * im, -vi * vj * re, vi * im],
    };
    (Complex64::new(p, q), jac)
}

#[derive(Debug, Default)]
pub struct Line {
    elements: Elements<LineData>,
    addr: Option<Addresses>,
    from: Vec<usize>,
    to: Vec<usize>,
    /// `[a1, v1, a2, v2]` addresses per branch.
    vars: Vec<[usize; 4]>,
    y: Vec<BranchY>,
    flows: Vec<BranchFlow>,
}

impl_device!(Line, LineData, "Line");

impl Line {
    pub fn data(&self, i: usize) -> &LineData {
        self.elements.data(i)
    }

    pub fn index_of(&self, id: i64) -> Option<usize> {
        self.elements.index_of(id)
    }

    pub fn is_online(&self, i: usize) -> bool {
        self.elements.is_online(i)
    }

    fn terminals_at(&self, dae: &Dae, i: usize) -> (f64, f64, f64, f64) {
        let [a1, v1, a2, v2] = self.vars[i];
        (dae.y[a1], dae.y[v1], dae.y[a2], dae.y[v2])
    }
}

impl Model for Line {
    device_common!();

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pflow: true,
            gcall: true,
            gycall: true,
            series: true,
            flows: true,
            ..Default::default()
        }
    }

    fn link(&mut self, buses: &BusAddresses) -> SolveResult<()> {
        self.from.clear();
        self.to.clear();
        self.vars.clear();
        self.y.clear();
        for (_, d) in self.elements.iter() {
            if d.r == 0.0 && d.x == 0.0 {
                return Err(SolveError::InvalidData {
                    model: "Line",
                    what: format!("branch {} - {} has zero impedance", d.bus1, d.bus2),
                });
            }
            if d.tap <= 0.0 {
                return Err(SolveError::InvalidData {
                    model: "Line",
                    what: format!("branch {} - {} has non-positive tap", d.bus1, d.bus2),
                });
            }
            let f = buses.resolve("Line", d.bus1)?;
            let t = buses.resolve("Line", d.bus2)?;
            self.from.push(f);
            self.to.push(t);
            self.vars.push([buses.a(f), buses.v(f), buses.a(t), buses.v(t)]);
            self.y.push(BranchY::new(d));
        }
        Ok(())
    }

    fn branches(&self) -> Vec<(usize, usize)> {
        (0..self.elements.len())
            .filter(|&i| self.elements.is_online(i))
            .map(|i| (self.from[i], self.to[i]))
            .collect()
    }

    fn gcall(&mut self, dae: &mut Dae) {
        for i in 0..self.elements.len() {
            let u = self.elements.u(i);
            let y = self.y[i];
            let [a1, v1, a2, v2] = self.vars[i];
            let (t1, m1, t2, m2) = self.terminals_at(dae, i);
            let (s1, _) = terminal(y.y11, y.y12, t1, m1, t2, m2);
            let (s2, _) = terminal(y.y22, y.y21, t2, m2, t1, m1);
            dae.g[a1] += u * s1.re;
            dae.g[v1] += u * s1.im;
            dae.g[a2] += u * s2.re;
            dae.g[v2] += u * s2.im;
        }
    }

    fn gycall(&mut self, dae: &mut Dae) {
        for i in 0..self.elements.len() {
            let u = self.elements.u(i);
            let y = self.y[i];
            let [a1, v1, a2, v2] = self.vars[i];
            let (t1, m1, t2, m2) = self.terminals_at(dae, i);
            let (_, j1) = terminal(y.y11, y.y12, t1, m1, t2, m2);
            let (_, j2) = terminal(y.y22, y.y21, t2, m2, t1, m1);
            let cols1 = [a1, v1, a2, v2];
            let cols2 = [a2, v2, a1, v1];
            for k in 0..4 {
                dae.add_jac(JacBlock::Gy, u * j1.dp[k], a1, cols1[k]);
                dae.add_jac(JacBlock::Gy, u * j1.dq[k], v1, cols1[k]);
                dae.add_jac(JacBlock::Gy, u * j2.dp[k], a2, cols2[k]);
                dae.add_jac(JacBlock::Gy, u * j2.dq[k], v2, cols2[k]);
            }
        }
    }

    fn seriesflow(&mut self, dae: &Dae) {
        self.flows = (0..self.elements.len())
            .map(|i| {
                let u = self.elements.u(i);
                let y = self.y[i];
                let (t1, m1, t2, m2) = self.terminals_at(dae, i);
                let (s1, _) = terminal(y.y11, y.y12, t1, m1, t2, m2);
                let (s2, _) = terminal(y.y22, y.y21, t2, m2, t1, m1);
                BranchFlow {
                    id: self.elements.id(i),
                    from: self.from[i],
                    to: self.to[i],
                    s_from: s1 * u,
                    s_to: s2 * u,
                }
            })
            .collect();
    }

    fn flows(&self) -> Vec<BranchFlow> {
        self.flows.clone()
    }

    fn build_b(&self, variant: FdVariant, bp: &mut TripletMatrix, bpp: &mut TripletMatrix) {
        let stamp = |m: &mut TripletMatrix, f: usize, t: usize, y: BranchY| {
            m.push(f, f, -y.y11.im);
            m.push(f, t, -y.y12.im);
            m.push(t, f, -y.y21.im);
            m.push(t, t, -y.y22.im);
        };
        for (i, d) in self.elements.iter() {
            if !self.elements.is_online(i) {
                continue;
            }
            let (f, t) = (self.from[i], self.to[i]);

            let r_p = if variant == FdVariant::XB { 0.0 } else { d.r };
            let bp_line = LineData {
                r: r_p,
                b: 0.0,
                g: 0.0,
                b1: 0.0,
                g1: 0.0,
                b2: 0.0,
                g2: 0.0,
                tap: 1.0,
                phi: 0.0,
                ..d.clone()
            };
            stamp(bp, f, t, BranchY::new(&bp_line));

            let r_pp = if variant == FdVariant::BX { 0.0 } else { d.r };
            let bpp_line = LineData {
                r: r_pp,
                phi: 0.0,
                ..d.clone()
            };
            stamp(bpp, f, t, BranchY::new(&bpp_line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::model::Device;

    fn two_bus_line(data: LineData) -> (Line, Dae) {
        let mut line = Line::default();
        line.insert(1, data).unwrap();
        let bus_addr = Addresses { count: 2, nx: 0, ny: 2, x_base: 0, y_base: 0 };
        line.link(&BusAddresses::new(&[1, 2], &bus_addr)).unwrap();
        let mut dae = Dae::new(0, 4);
        dae.y[0] = 0.1;
        dae.y[1] = -0.05;
        dae.y[2] = 1.02;
        dae.y[3] = 0.97;
        (line, dae)
    }

    fn sample() -> LineData {
        LineData {
            bus1: 1,
            bus2: 2,
            r: 0.02,
            x: 0.1,
            b: 0.04,
            tap: 1.05,
            phi: 3.0,
            ..Default::default()
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let (mut line, mut dae) = two_bus_line(sample());
        line.gycall(&mut dae);
        let jac = dae.gy.clone();
        let h = 1e-7;
        for col in 0..4 {
            let mut plus = dae.clone();
            plus.y[col] += h;
            plus.init_g();
            line.gcall(&mut plus);
            let mut minus = dae.clone();
            minus.y[col] -= h;
            minus.init_g();
            line.gcall(&mut minus);
            for row in 0..4 {
                let fd = (plus.g[row] - minus.g[row]) / (2.0 * h);
                assert!((fd - jac.get(row, col)).abs() < 1e-6, "({row},{col})");
            }
        }
    }

    #[test]
    fn lossless_line_flows_balance() {
        let (mut line, dae) = two_bus_line(LineData {
            bus1: 1,
            bus2: 2,
            x: 0.2,
            ..Default::default()
        });
        line.seriesflow(&dae);
        let flow = line.flows()[0];
        assert!(flow.loss().re.abs() < 1e-12);
        let expected = 1.02 * 0.97 * (0.15f64).sin() / 0.2;
        assert!((flow.s_from.re - expected).abs() < 1e-12);
    }

    #[test]
    fn out_of_service_line_contributes_nothing() {
        let (mut line, mut dae) = two_bus_line(sample());
        line.set_status(1, false);
        line.gcall(&mut dae);
        assert!(dae.g.iter().all(|v| *v == 0.0));
        assert!(line.branches().is_empty());
        line.gycall(&mut dae);
        assert_eq!(dae.gy.nnz(), 16);
    }

    #[test]
    fn fast_decoupled_matrices() {
        let (line, _) = two_bus_line(sample());
        let mut bp = TripletMatrix::new(2, 2);
        let mut bpp = TripletMatrix::new(2, 2);
        line.build_b(FdVariant::XB, &mut bp, &mut bpp);
        assert!((bp.get(0, 0) - 10.0).abs() < 1e-12);
        assert!((bp.get(0, 1) + 10.0).abs() < 1e-12);
        let ys = 1.0 / Complex64::new(0.02, 0.1);
        let expected = -(ys.im + 0.02) / (1.05 * 1.05);
        assert!((bpp.get(0, 0) - expected).abs() < 1e-12);

        let mut bp = TripletMatrix::new(2, 2);
        let mut bpp = TripletMatrix::new(2, 2);
        line.build_b(FdVariant::BX, &mut bp, &mut bpp);
        assert!((bp.get(1, 1) + ys.im).abs() < 1e-12);
        assert!((bpp.get(1, 1) - (10.0 - 0.02)).abs() < 1e-12);
    }

    #[test]
    fn unknown_bus_is_a_topology_error() {
        let mut line = Line::default();
        line.insert(1, LineData { bus1: 1, bus2: 9, ..Default::default() }).unwrap();
        let bus_addr = Addresses { count: 2, nx: 0, ny: 2, x_base: 0, y_base: 0 };
        assert!(matches!(
            line.link(&BusAddresses::new(&[1, 2], &bus_addr)),
            Err(SolveError::Topology { .. })
        ));
    }
}
