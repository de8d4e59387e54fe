use nalgebra_sparse::CscMatrix;
use rsparse::{
    data::{self, Nmrc, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::{Solve, check_finite};
use crate::error::FactorError;

/// Pure-Rust LU backend. Column ordering is computed once by `symbolic`.
#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<Symb>,
    numeric: Option<Nmrc<f64>>,
    /// Dimension and non-zero count the symbolic analysis was done for.
    shape: Option<(usize, usize)>,
}

fn to_sprs(a: &CscMatrix<f64>) -> data::Sprs<f64> {
    data::Sprs {
        m: a.nrows(),
        n: a.ncols(),
        i: a.row_indices().to_vec(),
        p: a.col_offsets().iter().map(|&v| v as isize).collect(),
        x: a.values().to_vec(),
        nzmax: a.nnz(),
    }
}

impl Solve for RSparseSolver {
    fn symbolic(&mut self, a: &CscMatrix<f64>) -> Result<(), FactorError> {
        if a.nrows() != a.ncols() {
            return Err(FactorError::Symbolic("matrix is not square"));
        }
        let sprs = to_sprs(a);
        self.symbolic = Some(sqr(&sprs, 1, false));
        self.numeric = None;
        self.shape = Some((a.ncols(), a.nnz()));
        self.x = vec![0.0; a.ncols()];
        Ok(())
    }

    fn numeric(&mut self, a: &CscMatrix<f64>) -> Result<(), FactorError> {
        if self.shape != Some((a.ncols(), a.nnz())) {
            return Err(FactorError::PatternMismatch);
        }
        let s = self.symbolic.as_mut().ok_or(FactorError::NotFactored)?;
        let sprs = to_sprs(a);
        let n = lu(&sprs, s, 1e-6).map_err(|_| FactorError::Numeric("LU factorization failed"))?;
        self.numeric = Some(n);
        Ok(())
    }

    fn solve(&mut self, b: &mut [f64]) -> Result<(), FactorError> {
        let (Some(s), Some(n)) = (self.symbolic.as_ref(), self.numeric.as_ref()) else {
            return Err(FactorError::NotFactored);
        };
        let x = &mut self.x;
        ipvec(&n.pinv, b, &mut x[..]); // x = P*b
        lsolve(&n.l, x); // x = L\x
        usolve(&n.u, x); // x = U\x
        ipvec(&s.q, &x[..], b); // b = Q*x
        check_finite(b)
    }

    fn has_symbolic(&self) -> bool {
        self.symbolic.is_some()
    }

    fn reset(&mut self) {
        self.symbolic = None;
        self.numeric = None;
        self.shape = None;
    }
}

fn ipvec_identity<T: Numeric<T>>(b: &[T], x: &mut [T]) {
    x.copy_from_slice(b);
}

fn ipvec_perm<T: Numeric<T>>(p: &[isize], b: &[T], x: &mut [T]) {
    for k in 0..b.len() {
        x[p[k] as usize] = b[k];
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => ipvec_perm(pvec, b, x),
        None => ipvec_identity(b, x),
    }
}
