use crate::error::{PowerError, Result};
use sparsetools::csc::CSC;
use spsolve::Solver;

/// Sparse direct solver for square systems `A x = b`.
pub trait LinearSolver {
    /// Solves in place, overwriting `b` with `x`.
    fn solve(&self, a_mat: &CSC<usize, f64>, b: &mut Vec<f64>) -> Result<()>;
}

impl<S> LinearSolver for S
where
    S: Solver<usize, f64>,
{
    fn solve(&self, a_mat: &CSC<usize, f64>, b: &mut Vec<f64>) -> Result<()> {
        Solver::solve(
            self,
            a_mat.cols(),
            a_mat.rowidx(),
            a_mat.colptr(),
            a_mat.values(),
            b,
            false,
        )
        .map_err(|err| PowerError::Singular(err.to_string()))?;

        if b.iter().any(|x| !x.is_finite()) {
            return Err(PowerError::Singular(
                "solution contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}
