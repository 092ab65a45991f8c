//! Spectrum bounds for the symmetrically scaled fine operator.
//!
//! Symmetric Lanczos with a random unit start vector. At step k the
//! tridiagonal T_k is re-expressed in the eigenbasis of T_{k-1}, which
//! turns its eigenproblem into an arrowhead whose secular equation is
//! solved root by root between Gershgorin-bounded poles (`tdeig`). Ritz
//! values whose eigenvector barely touches the last Lanczos direction
//! (|y| < 0.01) have converged and are the ones reported.

use ndarray::{Array1, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use parmg_comm::{Comm, GatherScatter, ReduceOp};

use crate::sparse::csr::CsrMatrix;

const CHANGE_TOL: f64 = 1e-5;
const LAST_COMPONENT_TOL: f64 = 1e-3;
const RITZ_FILTER: f64 = 0.01;
const FLAT_SPECTRUM_TOL: f64 = 1e-11;

/// Filtered Ritz values of `a`, ascending. `a` is expected symmetric
/// positive definite across ranks (locally a rectangular row slice).
///
/// Degenerate shortcuts: an operator within `1e-11` of the identity in
/// Frobenius norm reports {1, 1}; a globally 1-dof operator reports its
/// single entry twice. If every Ritz value fails the convergence filter
/// (possible on exact breakdown after very few steps), the unfiltered
/// extremes are reported instead.
pub fn lanczos<C: Comm>(comm: &C, a: &CsrMatrix, kmax: usize, gs: &C::Gs) -> Vec<f64> {
    let kmax = kmax.max(1);
    let rn = a.dim.nrows;
    let cn = a.dim.ncols;

    let fro2 = comm.allreduce_f64(ReduceOp::Add, a.fro_norm_sq_minus_identity());
    if fro2.sqrt() < FLAT_SPECTRUM_TOL {
        return vec![1.0, 1.0];
    }

    let n_global = comm.allreduce_i64(ReduceOp::Add, rn as i64);
    if n_global == 1 {
        let local = if rn == 1 { a.diagonal()[0] } else { 0.0 };
        let a00 = comm.allreduce_f64(ReduceOp::Add, local);
        return vec![a00, a00];
    }

    // Start vector: per-rank seeded so reruns are reproducible.
    let mut rng = StdRng::seed_from_u64(1 + comm.rank() as u64);
    let mut r = Array1::from_shape_fn(rn, |_| rng.gen_range(0.0..1.0));

    let mut l = vec![0.0; kmax + 2];
    let mut y = vec![0.0; kmax + 2];
    let mut d = vec![0.0; kmax + 2];
    let mut v = vec![0.0; kmax + 1];

    let mut beta = comm.allreduce_f64(ReduceOp::Add, r.dot(&r)).sqrt();

    let mut qk = Array1::<f64>::zeros(cn);
    let mut qkm1 = Array1::<f64>::zeros(rn);
    let mut aqk = Array1::<f64>::zeros(rn);

    let mut k = 0usize;
    // change stays 1 until the first tdeig call at k = 2, which shields
    // the y[k - 1] clause while k is still 0.
    let mut change = 1.0;

    while k < kmax && (change > CHANGE_TOL || y[0] > LAST_COMPONENT_TOL || y[k - 1] > LAST_COMPONENT_TOL)
    {
        k += 1;

        qkm1.assign(&qk.slice(s![..rn]));
        qk.slice_mut(s![..rn]).assign(&(&r / beta));
        gs.exchange(qk.as_slice_mut().expect("contiguous"), ReduceOp::Add);

        a.mul_vec_into(qk.as_slice().expect("contiguous"), aqk.as_slice_mut().expect("contiguous"));
        let alpha = comm.allreduce_f64(ReduceOp::Add, qk.slice(s![..rn]).dot(&aqk));

        // r = A qk - alpha qk - beta qk-1
        r.assign(&aqk);
        r.scaled_add(-alpha, &qk.slice(s![..rn]));
        r.scaled_add(-beta, &qkm1);

        if k == 1 {
            l[0] = alpha;
            y[0] = 1.0;
        } else {
            let l0 = l[0];
            let lkm2 = l[k - 2];
            // T_k in the eigenbasis of T_{k-1}: previous Ritz values on
            // the diagonal, beta-scaled last components as the border.
            d[0] = 0.0;
            for i in 1..k {
                d[i] = l[i - 1];
            }
            d[k] = 0.0;
            v[0] = alpha;
            for i in 1..k {
                v[i] = beta * y[i - 1];
            }
            tdeig(&mut l, &mut y, &mut d, &v, k - 1);
            change = (l0 - l[0]).abs() + (lkm2 - l[k - 1]).abs();
        }

        beta = comm.allreduce_f64(ReduceOp::Add, r.dot(&r)).sqrt();
        if beta == 0.0 {
            break;
        }
    }

    let filtered: Vec<f64> = (0..k).filter(|&i| y[i].abs() < RITZ_FILTER).map(|i| l[i]).collect();
    if filtered.is_empty() {
        // Exact breakdown before the filter converged anything; the
        // extreme Ritz values are still the best available bounds.
        return vec![l[0], l[k - 1]];
    }
    filtered
}

const EPS: f64 = 128.0 * f64::EPSILON;

/// minimizes cancellation error (but not round-off ...)
fn sum_3(a: f64, b: f64, c: f64) -> f64 {
    if (a >= 0.0 && b >= 0.0) || (a <= 0.0 && b <= 0.0) {
        (a + b) + c
    } else if (a >= 0.0 && c >= 0.0) || (a <= 0.0 && c <= 0.0) {
        (a + c) + b
    } else {
        a + (b + c)
    }
}

/// solve  -c/x + b + a x == 0  with sign(x) = sign
fn rat_root(a: f64, b: f64, c: f64, sign: f64) -> f64 {
    let bh = (b.abs() + (b * b + 4.0 * a * c).sqrt()) / 2.0;
    sign * if b * sign <= 0.0 { bh / a } else { c / bh }
}

/// find d[ri] <= lambda <= d[ri+1] such that
///   0 = lambda - v[0] + sum_i v[i]^2 / (d[i] - lambda)
fn sec_root(y: &mut f64, d: &[f64], v: &[f64], ri: usize, n: usize) -> f64 {
    let dl = d[ri];
    let dr = d[ri + 1];
    let interval = dr - dl;
    let mut x0l = interval / 2.0;
    let mut x0r = -interval / 2.0;

    let mut tol = interval;
    if dl.abs() > tol {
        tol = dl.abs();
    }
    if dr.abs() > tol {
        tol = dr.abs();
    }
    tol *= EPS;

    loop {
        if x0l.abs() == 0.0 || x0l < 0.0 {
            *y = 0.0;
            return dl;
        }
        if x0r.abs() == 0.0 || x0r > 0.0 {
            *y = 0.0;
            return dr;
        }
        let lambda0 = if x0l.abs() < x0r.abs() { dl + x0l } else { dr + x0r };

        let (mut al, mut ar, mut cl, mut cr) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        let (mut bln, mut blp, mut brn, mut brp) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        let (mut f_neg, mut f_pos) = (0.0f64, 0.0f64);

        for i in 1..=ri {
            let den = (d[i] - dl) - x0l;
            let mut fac = v[i] / den;
            let num = sum_3(d[i], -dr, -2.0 * x0r);
            f_neg += v[i] * fac;
            fac *= fac;
            ar += fac;
            if num > 0.0 {
                brp += fac * num;
            } else {
                brn += fac * num;
            }
            bln += fac * (d[i] - dl);
            cl += fac * x0l * x0l;
        }
        for i in (ri + 1)..=n {
            let den = (d[i] - dr) - x0r;
            let mut fac = v[i] / den;
            let num = sum_3(d[i], -dl, -2.0 * x0l);
            f_pos += v[i] * fac;
            fac *= fac;
            al += fac;
            if num > 0.0 {
                blp += fac * num;
            } else {
                bln += fac * num;
            }
            brp += fac * (d[i] - dr);
            cr += fac * x0r * x0r;
        }

        if lambda0 > 0.0 {
            f_pos += lambda0;
        } else {
            f_neg += lambda0;
        }
        if v[0] < 0.0 {
            f_pos -= v[0];
            blp -= v[0];
            brp -= v[0];
        } else {
            f_neg -= v[0];
            bln -= v[0];
            brn -= v[0];
        }

        let lambda;
        if f_pos + f_neg > 0.0 {
            // root is left of lambda0
            x0l = rat_root(1.0 + al, sum_3(dl, blp, bln), cl, 1.0);
            lambda = dl + x0l;
            x0r = x0l - interval;
        } else {
            // root is right of lambda0
            x0r = rat_root(1.0 + ar, sum_3(dr, brp, brn), cr, -1.0);
            lambda = dr + x0r;
            x0l = x0r + interval;
        }

        if (lambda - lambda0).abs() < tol {
            let mut ty = 0.0;
            for i in 1..=ri {
                let fac = v[i] / ((d[i] - dl) - x0l);
                ty += fac * fac;
            }
            for i in (ri + 1)..=n {
                let fac = v[i] / ((d[i] - dr) - x0r);
                ty += fac * fac;
            }
            *y = 1.0 / (1.0 + ty).sqrt();
            return lambda;
        }
    }
}

/// Eigenvalues of the arrowhead matrix
///
/// ```text
/// d[1]           v[1]
///      d[2]      v[2]
///           d[n] v[n]
/// v[1] v[2] v[n] v[0]
/// ```
///
/// `d[0]` and `d[n+1]` are set to Gershgorin bounds. `y[i]` receives the
/// magnitude of the (n+1)-th component of the i-th orthonormal
/// eigenvector.
fn tdeig(lambda: &mut [f64], y: &mut [f64], d: &mut [f64], v: &[f64], n: usize) {
    let mut v1norm = 0.0;
    let mut lo = v[0];
    let mut hi = v[0];
    for i in 1..=n {
        let vi = v[i].abs();
        let a = d[i] - vi;
        let b = d[i] + vi;
        v1norm += vi;
        if a < lo {
            lo = a;
        }
        if b > hi {
            hi = b;
        }
    }
    d[0] = if v[0] - v1norm < lo { v[0] - v1norm } else { lo };
    d[n + 1] = if v[0] + v1norm > hi { v[0] + v1norm } else { hi };
    for i in 0..=n {
        lambda[i] = sec_root(&mut y[i], d, v, i, n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use parmg_comm::{DofIds, SerialComm};

    use crate::sparse::builder::MatrixBuilder;

    fn serial_gs(n: usize) -> <SerialComm as Comm>::Gs {
        SerialComm.gs_setup(&DofIds::new((1..=n as u64).collect(), n))
    }

    #[test]
    fn arrowhead_eigenpairs() {
        // [[1, 1], [1, 3]]: eigenvalues 2 -+ sqrt(2), last components
        // (lambda - 1)/sqrt(1 + (lambda - 1)^2).
        let mut lambda = vec![0.0; 2];
        let mut y = vec![0.0; 2];
        let mut d = vec![0.0, 1.0, 0.0];
        let v = vec![3.0, 1.0];
        tdeig(&mut lambda, &mut y, &mut d, &v, 1);

        let sqrt2 = 2.0f64.sqrt();
        assert_relative_eq!(lambda[0], 2.0 - sqrt2, max_relative = 1e-12);
        assert_relative_eq!(lambda[1], 2.0 + sqrt2, max_relative = 1e-12);
        assert_relative_eq!(y[0] * y[0] + y[1] * y[1], 1.0, max_relative = 1e-12);
        assert_relative_eq!(y[1], (1.0 + sqrt2) / (1.0 + (1.0 + sqrt2).powi(2)).sqrt(),
            max_relative = 1e-10);
    }

    #[test]
    fn arrowhead_with_decoupled_pole() {
        // v[1] = 0 decouples d[1]; eigenvalues are {1, 2} with the first
        // eigenvector orthogonal to the border.
        let mut lambda = vec![0.0; 2];
        let mut y = vec![1.0; 2];
        let mut d = vec![0.0, 1.0, 0.0];
        let v = vec![2.0, 0.0];
        tdeig(&mut lambda, &mut y, &mut d, &v, 1);
        assert_eq!(lambda, vec![1.0, 2.0]);
        assert_eq!(y[0], 0.0);
    }

    #[test]
    fn recovers_the_spectrum_of_a_diagonal_operator() {
        let mut b = MatrixBuilder::new(2, 2);
        b.push(0, 0, 1.0).unwrap();
        b.push(1, 1, 3.0).unwrap();
        let a = b.build();
        let lam = lanczos(&SerialComm, &a, 300, &serial_gs(2));
        assert!(lam.len() >= 2);
        assert_relative_eq!(*lam.first().unwrap(), 1.0, max_relative = 1e-8);
        assert_relative_eq!(*lam.last().unwrap(), 3.0, max_relative = 1e-8);
    }

    #[test]
    fn near_identity_shortcut() {
        let mut b = MatrixBuilder::new(3, 3);
        for i in 0..3 {
            b.push(i, i, 1.0).unwrap();
        }
        let a = b.build();
        assert_eq!(lanczos(&SerialComm, &a, 300, &serial_gs(3)), vec![1.0, 1.0]);
    }

    #[test]
    fn single_dof_shortcut() {
        let mut b = MatrixBuilder::new(1, 1);
        b.push(0, 0, 5.0).unwrap();
        let a = b.build();
        assert_eq!(lanczos(&SerialComm, &a, 300, &serial_gs(1)), vec![5.0, 5.0]);
    }

    #[test]
    fn ritz_values_bound_a_scaled_poisson_spectrum() {
        // Symmetrically scaled 1-D Poisson operator: spectrum in (0, 2).
        let n = 50;
        let mut b = MatrixBuilder::new(n, n);
        for i in 0..n {
            b.push(i, i, 1.0).unwrap();
            if i > 0 {
                b.push(i, i - 1, -0.5).unwrap();
                b.push(i - 1, i, -0.5).unwrap();
            }
        }
        let a = b.build();
        let lam = lanczos(&SerialComm, &a, 300, &serial_gs(n));
        assert!(!lam.is_empty());
        let max_diag = 1.0;
        assert!(lam.first().unwrap() > &0.0);
        assert!(lam.last().unwrap() <= &(2.0 * max_diag));
        assert!(lam.windows(2).all(|w| w[0] <= w[1]));
    }
}
