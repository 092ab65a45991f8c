//! Jacobi-preconditioned conjugate gradients, the forward solve the
//! interpolation builder runs on the fine block.

use ndarray::{Array1, s};
use parmg_comm::{Comm, DofIds, GatherScatter, ReduceOp};

use crate::error::{AmgError, AmgResult};
use crate::sparse::csr::CsrMatrix;

/// Iteration cap on top of the global problem size.
pub const PCG_MAX_ITER: i64 = 100;

/// Elementwise inverse of a diagonal. A structurally missing or cancelled
/// diagonal entry is reported against its global dof instead of turning
/// the preconditioner into an infinity.
pub(crate) fn jacobi_inverse(diag: &[f64], ids: &DofIds) -> AmgResult<Vec<f64>> {
    diag.iter()
        .enumerate()
        .map(|(i, &d)| {
            if d == 0.0 {
                Err(AmgError::ZeroDiagonal { id: ids.id(i) })
            } else {
                Ok(1.0 / d)
            }
        })
        .collect()
}

/// Solve A x = b with PCG, M = inverse diagonal as the preconditioner.
///
/// Every inner product is all-reduced; the search direction is exchanged
/// before each matvec so its ghost slots are consistent. Converges when
/// the preconditioned residual norm drops under tol^2 times its start
/// value, capped at min(N_global, 100) iterations. Returns the solution
/// over the owned rows and the iteration count.
pub fn pcg<C: Comm>(
    comm: &C,
    a: &CsrMatrix,
    b: &[f64],
    minv: &[f64],
    tol: f64,
    gs: &C::Gs,
) -> (Array1<f64>, usize) {
    let rn = a.dim.nrows;
    let cn = a.dim.ncols;
    debug_assert_eq!(b.len(), rn);
    debug_assert_eq!(minv.len(), rn);

    let minv = Array1::from(minv.to_vec());
    let mut x = Array1::<f64>::zeros(rn);
    let mut p = Array1::<f64>::zeros(cn);
    let mut w = Array1::<f64>::zeros(rn);
    let mut r = Array1::from(b.to_vec());
    let mut z = &minv * &r;

    let mut rho = comm.allreduce_f64(ReduceOp::Add, r.dot(&z));
    let rho_stop = tol * tol * rho;

    let n = comm.allreduce_i64(ReduceOp::Add, rn as i64).min(PCG_MAX_ITER);
    if n == 0 {
        return (x, 0);
    }

    let mut rho_old = 1.0;
    let mut k = 0;
    while rho > rho_stop && (k as i64) < n {
        k += 1;

        let beta = rho / rho_old;
        {
            let mut owned = p.slice_mut(s![..rn]);
            owned *= beta;
            owned += &z;
        }
        gs.exchange(p.as_slice_mut().expect("contiguous"), ReduceOp::Add);

        a.mul_vec_into(p.as_slice().expect("contiguous"), w.as_slice_mut().expect("contiguous"));

        let pw = comm.allreduce_f64(ReduceOp::Add, p.slice(s![..rn]).dot(&w));
        let alpha = rho / pw;

        x.scaled_add(alpha, &p.slice(s![..rn]));
        r.scaled_add(-alpha, &w);
        z.assign(&(&minv * &r));

        rho_old = rho;
        rho = comm.allreduce_f64(ReduceOp::Add, r.dot(&z));
    }

    (x, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use parmg_comm::SerialComm;

    use crate::sparse::builder::MatrixBuilder;

    fn tridiag(n: usize) -> CsrMatrix {
        let mut b = MatrixBuilder::new(n, n);
        for i in 0..n {
            b.push(i, i, 2.0).unwrap();
            if i > 0 {
                b.push(i, i - 1, -1.0).unwrap();
                b.push(i - 1, i, -1.0).unwrap();
            }
        }
        b.build()
    }

    #[test]
    fn solves_spd_system_within_the_cap() {
        let comm = SerialComm;
        let a = tridiag(4);
        let ids = DofIds::new(vec![1, 2, 3, 4], 4);
        let gs = comm.gs_setup(&ids);
        let minv = jacobi_inverse(&a.diagonal(), &ids).unwrap();

        let b = [0.0, 1.0, 0.0, 0.0];
        let (x, iters) = pcg(&comm, &a, &b, &minv, 1e-16, &gs);

        assert!(iters <= 4);
        // Exact solution of the 4x4 tridiagonal with e_2 right-hand side.
        let expected = [0.6, 1.2, 0.8, 0.4];
        for (xi, ei) in x.iter().zip(expected) {
            assert_relative_eq!(*xi, ei, max_relative = 1e-10);
        }

        // A-norm residual actually dropped.
        let mut ax = vec![0.0; 4];
        a.mul_vec_into(x.as_slice().unwrap(), &mut ax);
        for (axi, bi) in ax.iter().zip(b) {
            assert_relative_eq!(*axi, bi, epsilon = 1e-9);
        }
    }

    #[test]
    fn zero_rhs_returns_immediately() {
        let comm = SerialComm;
        let a = tridiag(3);
        let ids = DofIds::new(vec![1, 2, 3], 3);
        let gs = comm.gs_setup(&ids);
        let minv = jacobi_inverse(&a.diagonal(), &ids).unwrap();
        let (x, iters) = pcg(&comm, &a, &[0.0; 3], &minv, 1e-16, &gs);
        assert_eq!(iters, 0);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn zero_diagonal_is_reported_with_its_dof() {
        let ids = DofIds::new(vec![10, 20], 2);
        let err = jacobi_inverse(&[2.0, 0.0], &ids).unwrap_err();
        assert!(matches!(err, AmgError::ZeroDiagonal { id: 20 }));
    }
}
