use faer::{
    MatMut,
    linalg::solvers::Solve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};
use nalgebra_sparse::CscMatrix;

use super::{Solve as PoSolve, check_finite};
use crate::error::FactorError;

#[derive(Default)]
pub struct FaerSolver {
    lu: Option<Lu<usize, f64>>,
    symbolic: Option<SymbolicLu<usize>>,
    shape: Option<(usize, usize)>,
}

impl PoSolve for FaerSolver {
    fn symbolic(&mut self, a: &CscMatrix<f64>) -> Result<(), FactorError> {
        let n = a.ncols();
        if a.nrows() != n {
            return Err(FactorError::Symbolic("matrix is not square"));
        }
        let s = unsafe {
            SymbolicSparseColMatRef::new_unchecked(n, n, a.col_offsets(), None, a.row_indices())
        };
        self.symbolic =
            Some(SymbolicLu::try_new(s).map_err(|_| FactorError::Symbolic("Faer symbolic error"))?);
        self.lu = None;
        self.shape = Some((n, a.nnz()));
        Ok(())
    }

    fn numeric(&mut self, a: &CscMatrix<f64>) -> Result<(), FactorError> {
        let n = a.ncols();
        if self.shape != Some((n, a.nnz())) {
            return Err(FactorError::PatternMismatch);
        }
        let symbolic = self.symbolic.as_ref().ok_or(FactorError::NotFactored)?;
        let s = unsafe {
            SymbolicSparseColMatRef::new_unchecked(n, n, a.col_offsets(), None, a.row_indices())
        };
        let mat = SparseColMatRef::new(s, a.values());
        self.lu = Some(
            Lu::try_new_with_symbolic(symbolic.clone(), mat)
                .map_err(|_| FactorError::Numeric("Faer numerical error"))?,
        );
        Ok(())
    }

    fn solve(&mut self, b: &mut [f64]) -> Result<(), FactorError> {
        let lu = self.lu.as_ref().ok_or(FactorError::NotFactored)?;
        let n = b.len();
        let mat_ref = MatMut::from_column_major_slice_mut(b, n, 1);
        lu.solve_in_place(mat_ref);
        check_finite(b)
    }

    fn has_symbolic(&self) -> bool {
        self.symbolic.is_some()
    }

    fn reset(&mut self) {
        self.symbolic = None;
        self.lu = None;
        self.shape = None;
    }
}
