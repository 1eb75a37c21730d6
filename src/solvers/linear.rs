//! Linear solver interface for implicit stages
//!
//! Implicit and Rosenbrock steppers factorise one iteration matrix per step
//! and reuse it for every stage, so the interface separates factorisation from
//! the solve itself.

use nalgebra::{DMatrix, DVector, Dyn, LU};

use super::base::SolverError;

/// A factorised matrix ready for repeated solves
pub trait Factorization: Send {
    fn solve(&self, b: &DVector<f64>) -> Result<DVector<f64>, SolverError>;
}

/// Backend producing factorisations of square matrices
pub trait LinearSolver: Send + Sync {
    fn factorize(&self, matrix: DMatrix<f64>) -> Result<Box<dyn Factorization>, SolverError>;

    /// One-shot `A x = b`
    fn solve(&self, matrix: DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        self.factorize(matrix)?.solve(b)
    }
}

/// Dense LU with partial pivoting (nalgebra)
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseLu;

struct DenseLuFactors(LU<f64, Dyn, Dyn>);

impl Factorization for DenseLuFactors {
    fn solve(&self, b: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        let x = self.0.solve(b).ok_or(SolverError::SingularMatrix)?;
        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(SolverError::SingularMatrix)
        }
    }
}

impl LinearSolver for DenseLu {
    fn factorize(&self, matrix: DMatrix<f64>) -> Result<Box<dyn Factorization>, SolverError> {
        if !matrix.is_square() || matrix.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::SingularMatrix);
        }
        let lu = matrix.lu();
        if !lu.is_invertible() {
            return Err(SolverError::SingularMatrix);
        }
        Ok(Box::new(DenseLuFactors(lu)))
    }
}
