use nalgebra_sparse::CscMatrix;
use tracing::{error, warn};

use crate::error::{FactorError, SolveError, SolveResult};

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

#[cfg(feature = "faer")]
pub type DefaultSolver = FaerSolver;

#[cfg(all(not(feature = "faer"), feature = "rsparse"))]
pub type DefaultSolver = RSparseSolver;

/// A sparse LU backend with a reusable symbolic analysis.
pub trait Solve {
    /// Analyses the sparsity pattern of `a`. Replaces any cached analysis.
    fn symbolic(&mut self, a: &CscMatrix<f64>) -> Result<(), FactorError>;

    /// Numeric factorization reusing the cached symbolic analysis.
    fn numeric(&mut self, a: &CscMatrix<f64>) -> Result<(), FactorError>;

    /// Solves in place with the last numeric factorization.
    fn solve(&mut self, b: &mut [f64]) -> Result<(), FactorError>;

    fn has_symbolic(&self) -> bool;

    /// Drops both symbolic and numeric factorizations.
    fn reset(&mut self);
}

/// Factorizes `a` and solves `a x = b` in place.
///
/// The symbolic analysis is redone when `refactor` is set or none is
/// cached. A failed numeric pass triggers one fresh symbolic analysis and a
/// retry before reporting `SingularMatrix`.
pub fn factor_and_solve<S: Solve + ?Sized>(
    solver: &mut S,
    a: &CscMatrix<f64>,
    b: &mut [f64],
    refactor: bool,
    what: &'static str,
) -> SolveResult<()> {
    let rhs = b.to_vec();
    let first = (|| {
        if refactor || !solver.has_symbolic() {
            solver.symbolic(a)?;
        }
        solver.numeric(a)?;
        solver.solve(b)
    })();

    let Err(e) = first else {
        return Ok(());
    };
    warn!("{what}: {e}, retrying with a fresh symbolic factorization");
    b.copy_from_slice(&rhs);
    solver.reset();
    let retry = (|| {
        solver.symbolic(a)?;
        solver.numeric(a)?;
        solver.solve(b)
    })();
    retry.map_err(|source| {
        error!("{what}: singular matrix ({source})");
        SolveError::SingularMatrix { what, source }
    })
}

/// Solves with the factorization already held by `solver`. A failed solve
/// falls back to [`factor_and_solve`] with a fresh symbolic analysis.
pub fn resolve<S: Solve + ?Sized>(
    solver: &mut S,
    a: &CscMatrix<f64>,
    b: &mut [f64],
    what: &'static str,
) -> SolveResult<()> {
    let rhs = b.to_vec();
    match solver.solve(b) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("{what}: {e}, refactorizing");
            b.copy_from_slice(&rhs);
            factor_and_solve(solver, a, b, true, what)
        }
    }
}

/// Rejects solutions containing NaN or infinity.
pub(crate) fn check_finite(x: &[f64]) -> Result<(), FactorError> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FactorError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::sparse::TripletMatrix;

    fn sample(values: [f64; 5]) -> CscMatrix<f64> {
        let mut t = TripletMatrix::new(3, 3);
        t.push(0, 0, values[0]);
        t.push(0, 2, values[1]);
        t.push(1, 1, values[2]);
        t.push(2, 0, values[3]);
        t.push(2, 2, values[4]);
        t.to_csc()
    }

    #[test]
    fn cached_symbolic_matches_full_refactorization() {
        let mats = [
            sample([4.0, 1.0, 3.0, 1.0, 5.0]),
            sample([2.0, -1.0, 7.0, 0.5, 9.0]),
            sample([10.0, 3.0, 1.0, -2.0, 4.0]),
        ];
        let mut cached = DefaultSolver::default();
        let mut fresh = DefaultSolver::default();
        for (k, a) in mats.iter().enumerate() {
            let mut x1 = vec![1.0, 2.0, 3.0];
            let mut x2 = x1.clone();
            factor_and_solve(&mut cached, a, &mut x1, k == 0, "test").unwrap();
            fresh.reset();
            factor_and_solve(&mut fresh, a, &mut x2, true, "test").unwrap();
            for (a, b) in x1.iter().zip(&x2) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let mut t = TripletMatrix::new(2, 2);
        t.push(0, 0, 1.0);
        t.push(0, 1, 1.0);
        t.push(1, 0, 1.0);
        t.push(1, 1, 1.0);
        let mut solver = DefaultSolver::default();
        let mut b = vec![1.0, 2.0];
        let r = factor_and_solve(&mut solver, &t.to_csc(), &mut b, true, "test");
        assert!(matches!(r, Err(SolveError::SingularMatrix { .. })));
    }

    #[test]
    fn resolve_refactors_a_lost_factorization() {
        let a = sample([4.0, 1.0, 3.0, 1.0, 5.0]);
        let mut expected = vec![1.0, 2.0, 3.0];
        factor_and_solve(&mut DefaultSolver::default(), &a, &mut expected, true, "test").unwrap();

        let mut solver = DefaultSolver::default();
        let mut b = vec![1.0, 2.0, 3.0];
        factor_and_solve(&mut solver, &a, &mut b, true, "test").unwrap();
        solver.reset();
        let mut b = vec![1.0, 2.0, 3.0];
        resolve(&mut solver, &a, &mut b, "test").unwrap();
        for (x, y) in b.iter().zip(&expected) {
            assert!((x - y).abs() < 1e-12);
        }
        // the recovered factorization is reused
        let mut b = vec![1.0, 2.0, 3.0];
        resolve(&mut solver, &a, &mut b, "test").unwrap();
        assert!((b[1] - expected[1]).abs() < 1e-12);
    }

    #[test]
    fn pattern_change_recovers() {
        let mut solver = DefaultSolver::default();
        let mut b = vec![1.0, 2.0, 3.0];
        factor_and_solve(&mut solver, &sample([4.0, 1.0, 3.0, 1.0, 5.0]), &mut b, true, "test")
            .unwrap();
        let mut t = TripletMatrix::new(3, 3);
        t.push(0, 0, 2.0);
        t.push(1, 1, 2.0);
        t.push(2, 2, 2.0);
        t.push(1, 2, 1.0);
        let mut b = vec![2.0, 3.0, 2.0];
        factor_and_solve(&mut solver, &t.to_csc(), &mut b, false, "test").unwrap();
        assert!((b[0] - 1.0).abs() < 1e-12);
        assert!((b[2] - 1.0).abs() < 1e-12);
        assert!((b[1] - 1.0).abs() < 1e-12);
    }
}
