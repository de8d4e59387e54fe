use nalgebra::DVector;

use super::sparse::TripletMatrix;

/// Jacobian block selector for [`Dae::add_jac`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacBlock {
    Fx,
    Fy,
    Gx,
    Gy,
    Fx0,
    Fy0,
    Gx0,
    Gy0,
}

/// Global DAE state: `x' = f(x, y)`, `0 = g(x, y)`.
#[derive(Debug, Clone)]
pub struct Dae {
    pub n: usize,
    pub m: usize,
    pub t: f64,
    pub x: DVector<f64>,
    pub y: DVector<f64>,
    pub f: DVector<f64>,
    pub g: DVector<f64>,
    pub fx: TripletMatrix,
    pub fy: TripletMatrix,
    pub gx: TripletMatrix,
    pub gy: TripletMatrix,
    pub fx0: TripletMatrix,
    pub fy0: TripletMatrix,
    pub gx0: TripletMatrix,
    pub gy0: TripletMatrix,
    /// Combined implicit integration matrix over `[x; y]`.
    pub ac: TripletMatrix,
    /// Forces a fresh symbolic factorization and constant Jacobian reseed.
    pub factorize: bool,
}

impl Default for Dae {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Dae {
    pub fn new(n: usize, m: usize) -> Self {
        Self {
            n,
            m,
            t: 0.0,
            x: DVector::zeros(n),
            y: DVector::zeros(m),
            f: DVector::zeros(n),
            g: DVector::zeros(m),
            fx: TripletMatrix::new(n, n),
            fy: TripletMatrix::new(n, m),
            gx: TripletMatrix::new(m, n),
            gy: TripletMatrix::new(m, m),
            fx0: TripletMatrix::new(n, n),
            fy0: TripletMatrix::new(n, m),
            gx0: TripletMatrix::new(m, n),
            gy0: TripletMatrix::new(m, m),
            ac: TripletMatrix::new(n + m, n + m),
            factorize: true,
        }
    }

    /// Reallocates every vector and block for new dimensions.
    pub fn resize(&mut self, n: usize, m: usize) {
        let t = self.t;
        *self = Self::new(n, m);
        self.t = t;
    }

    pub fn init_fg(&mut self) {
        self.f.fill(0.0);
        self.g.fill(0.0);
    }

    pub fn init_g(&mut self) {
        self.g.fill(0.0);
    }

    /// Empties the constant blocks before `jac0` reseeds them.
    pub fn init_jac0(&mut self) {
        self.fx0.clear();
        self.fy0.clear();
        self.gx0.clear();
        self.gy0.clear();
    }

    pub fn setup_gy(&mut self) {
        self.gy.copy_from(&self.gy0);
    }

    pub fn setup_fx_gy(&mut self) {
        self.fx.copy_from(&self.fx0);
        self.fy.copy_from(&self.fy0);
        self.gx.copy_from(&self.gx0);
        self.gy.copy_from(&self.gy0);
    }

    #[inline]
    pub fn add_jac(&mut self, block: JacBlock, val: f64, row: usize, col: usize) {
        let target = match block {
            JacBlock::Fx => &mut self.fx,
            JacBlock::Fy => &mut self.fy,
            JacBlock::Gx => &mut self.gx,
            JacBlock::Gy => &mut self.gy,
            JacBlock::Fx0 => &mut self.fx0,
            JacBlock::Fy0 => &mut self.fy0,
            JacBlock::Gx0 => &mut self.gx0,
            JacBlock::Gy0 => &mut self.gy0,
        };
        target.push(row, col, val);
    }

    /// Rebuilds `ac = [[I - h_theta Fx, -h_theta Fy], [Gx, Gy]]` in place.
    pub fn build_ac(&mut self, h_theta: f64) {
        let n = self.n;
        self.ac.clear();
        for i in 0..n {
            self.ac.push(i, i, 1.0);
        }
        self.ac.extend_scaled(&self.fx, -h_theta, 0, 0);
        self.ac.extend_scaled(&self.fy, -h_theta, 0, n);
        self.ac.extend_scaled(&self.gx, 1.0, n, 0);
        self.ac.extend_scaled(&self.gy, 1.0, n, n);
    }

    /// Zeroes residuals of the flagged algebraic rows.
    pub fn neutralize_g(&mut self, mask: &[bool]) {
        for (g, _) in self.g.iter_mut().zip(mask).filter(|(_, m)| **m) {
            *g = 0.0;
        }
    }

    /// Leaves only `diag` in the flagged rows and columns of `Gy`, and clears
    /// the matching `Gx` rows and `Fy` columns.
    pub fn neutralize_jac(&mut self, mask: &[bool], diag: f64) {
        self.gy.neutralize(mask, diag);
        self.gx.zero_rows(mask);
        self.fy.zero_cols(mask);
    }

    /// Largest absolute residual over `f` and `g`.
    pub fn max_mismatch(&self) -> f64 {
        self.f
            .iter()
            .chain(self.g.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_blocks_seed_working_blocks() {
        let mut dae = Dae::new(1, 2);
        dae.add_jac(JacBlock::Gy0, 1.0, 0, 1);
        dae.add_jac(JacBlock::Fx0, -2.0, 0, 0);
        dae.setup_fx_gy();
        dae.add_jac(JacBlock::Gy, 3.0, 0, 1);
        assert_eq!(dae.gy.get(0, 1), 4.0);
        assert_eq!(dae.fx.get(0, 0), -2.0);
        dae.setup_gy();
        assert_eq!(dae.gy.get(0, 1), 1.0);
    }

    #[test]
    fn combined_matrix_layout() {
        let mut dae = Dae::new(1, 2);
        dae.add_jac(JacBlock::Fx, -2.0, 0, 0);
        dae.add_jac(JacBlock::Fy, 4.0, 0, 1);
        dae.add_jac(JacBlock::Gx, 1.0, 1, 0);
        dae.add_jac(JacBlock::Gy, 5.0, 0, 1);
        dae.build_ac(0.5);
        assert_eq!(dae.ac.nrows(), 3);
        assert_eq!(dae.ac.get(0, 0), 2.0);
        assert_eq!(dae.ac.get(0, 2), -2.0);
        assert_eq!(dae.ac.get(2, 0), 1.0);
        assert_eq!(dae.ac.get(1, 2), 5.0);
        let nnz = dae.ac.nnz();
        dae.build_ac(0.5);
        assert_eq!(dae.ac.nnz(), nnz);
    }

    #[test]
    fn resize_forces_factorization() {
        let mut dae = Dae::new(0, 2);
        dae.factorize = false;
        dae.t = 1.5;
        dae.resize(2, 4);
        assert!(dae.factorize);
        assert_eq!(dae.y.len(), 4);
        assert_eq!(dae.fy.ncols(), 4);
        assert_eq!(dae.t, 1.5);
    }

    #[test]
    fn neutralized_rows_have_no_residual() {
        let mut dae = Dae::new(1, 2);
        dae.g[0] = 3.0;
        dae.g[1] = 4.0;
        dae.add_jac(JacBlock::Gx, 1.0, 1, 0);
        dae.add_jac(JacBlock::Fy, 1.0, 0, 1);
        let mask = [false, true];
        dae.neutralize_g(&mask);
        dae.neutralize_jac(&mask, 1e-6);
        assert_eq!(dae.g[1], 0.0);
        assert_eq!(dae.g[0], 3.0);
        assert_eq!(dae.gx.get(1, 0), 0.0);
        assert_eq!(dae.fy.get(0, 1), 0.0);
        assert_eq!(dae.gy.get(1, 1), 1e-6);
    }
}
