//! Coarse/fine splitting.
//!
//! Drives a mat-max fixed point over the strength-of-connection matrix
//! S = |D A D| - diag (D = 1/sqrt(diag A)): each round scores the fine
//! set through two smoothing applications of S, promotes the surviving
//! local maxima to coarse, and stops once the score bound b drops under
//! the coarsening tolerance. Ties between equal candidates are broken by
//! global id, which keeps the split deterministic across runs and rank
//! counts.

use log::trace;
use parmg_comm::{Comm, DofIds, GatherScatter, ReduceOp};

use crate::sparse::csr::CsrMatrix;

/// Compute the 0/1 coarse indicator for the locally owned rows of `a`.
///
/// Ghost slots of the returned vector are left zero; the caller exchanges
/// the vector to make replicas consistent before slicing the operator.
pub fn coarsen<C: Comm>(
    comm: &C,
    a: &CsrMatrix,
    ctol: f64,
    mat_max_tol: f64,
    ids: &DofIds,
    gs: &C::Gs,
) -> Vec<f64> {
    let rn = a.dim.nrows;
    let cn = a.dim.ncols;

    // S = |D A D| with an explicitly zeroed diagonal.
    let mut d = vec![0.0; cn];
    d[..rn].copy_from_slice(&a.diagonal());
    gs.exchange(&mut d, ReduceOp::Add);
    for v in &mut d {
        *v = 1.0 / v.sqrt();
    }
    let mut s = a.clone();
    s.scale_rows(&d);
    s.scale_columns(&d);
    for v in &mut s.values {
        *v = v.abs();
    }
    s.zero_diagonal();

    let mut vc = vec![0.0; cn];
    let mut vf = vec![1.0; cn];
    let mut anyvc = false;

    let mut g = vec![0.0; cn];
    let mut w1 = vec![0.0; cn];
    let mut w2 = vec![0.0; cn];
    let mut tmp = vec![0.0; rn];
    let mut w = vec![0.0; rn];
    let mut x = vec![0.0; rn];

    loop {
        // w1 = vf .* (S (vf .* (S vf))), exchanged between applications
        s.mul_vec_into(&vf, &mut g[..rn]);
        for i in 0..rn {
            g[i] *= vf[i];
        }
        gs.exchange(&mut g, ReduceOp::Add);
        s.mul_vec_into(&g, &mut w1[..rn]);
        for i in 0..rn {
            w1[i] *= vf[i];
        }
        gs.exchange(&mut w1, ReduceOp::Add);

        // w2 = vf .* (S (vf .* (S w1)))
        s.mul_vec_into(&w1, &mut w2[..rn]);
        for i in 0..rn {
            w2[i] *= vf[i];
        }
        gs.exchange(&mut w2, ReduceOp::Add);
        s.mul_vec_into(&w2, &mut tmp);
        for i in 0..rn {
            w2[i] = tmp[i] * vf[i];
        }

        // w = w2 ./ w1, zero where w1 vanishes
        for i in 0..rn {
            w[i] = if w1[i] == 0.0 { 0.0 } else { w2[i] / w1[i] };
        }

        let (w1_max_local, w1_argmax) = local_max(&w1[..rn]);
        let (w_max_local, _) = local_max(&w);
        let w1_max = comm.allreduce_f64(ReduceOp::Max, w1_max_local);
        let w_max = comm.allreduce_f64(ReduceOp::Max, w_max_local);
        let b = w1_max.min(w_max).sqrt();
        trace!("coarsen round: b = {b:.6e}, bound = {ctol:.3}");

        if b <= ctol {
            if !anyvc {
                // Nothing was promoted yet: seed the coarse set with the
                // one dof achieving max(w1), smallest global id winning.
                let candidate = match w1_argmax {
                    Some(i) if w1[i] == w1_max => ids.id(i) as i64,
                    _ => i64::MAX,
                };
                let winner = comm.allreduce_i64(ReduceOp::Min, candidate);
                if let Ok(slot) = ids.owned().binary_search(&(winner as u64)) {
                    vc[slot] = 1.0;
                }
            }
            break;
        }

        // mask = (w > ctol^2)
        let ctol2 = ctol * ctol;
        let mut mask: Vec<f64> =
            w.iter().map(|&wi| if wi > ctol2 { 1.0 } else { 0.0 }).collect();

        // mask &= (g - m >= 0), m = mat_max(S, vf, mask .* g)
        for i in 0..rn {
            x[i] = mask[i] * g[i];
        }
        let m = mat_max(&s, &vf, &x, mat_max_tol, gs);
        for i in 0..rn {
            if g[i] - m[i] < 0.0 {
                mask[i] = 0.0;
            }
        }

        // mask &= (id - m > 0), m = mat_max(S, vf, mask .* id): each
        // surviving candidate is a strict local maximum by global id.
        for i in 0..rn {
            x[i] = mask[i] * ids.id(i) as f64;
        }
        let m = mat_max(&s, &vf, &x, mat_max_tol, gs);
        for i in 0..rn {
            if ids.id(i) as f64 - m[i] <= 0.0 {
                mask[i] = 0.0;
            }
        }

        // vc |= mask, vf ^= mask
        for i in 0..rn {
            if mask[i] != 0.0 {
                vc[i] = 1.0;
                vf[i] = if vf[i] != 0.0 { 0.0 } else { 1.0 };
            }
        }
        if !anyvc {
            let local = vc[..rn].iter().any(|&v| v != 0.0);
            anyvc = comm.allreduce_i64(ReduceOp::Max, local as i64) != 0;
        }
        gs.exchange(&mut vf, ReduceOp::Add);
    }

    vc
}

fn local_max(a: &[f64]) -> (f64, Option<usize>) {
    let mut best = f64::NEG_INFINITY;
    let mut arg = None;
    for (i, &v) in a.iter().enumerate() {
        if v > best {
            best = v;
            arg = Some(i);
        }
    }
    (best, arg)
}

/// For every row i, push x[i] onto each strong column of the row and keep
/// the maximum seen per column, where "strong" means f[j] != 0 and
/// |S[i, j]| >= tol * max of the row over the f-filtered columns. The
/// gather/scatter pair makes the per-column maxima consistent across every
/// rank sharing the column.
fn mat_max<G: GatherScatter>(
    s: &CsrMatrix,
    f: &[f64],
    x: &[f64],
    tol: f64,
    gs: &G,
) -> Vec<f64> {
    let rn = s.dim.nrows;
    let cn = s.dim.ncols;
    let mut y = vec![f64::NEG_INFINITY; cn];

    for i in 0..rn {
        let (cols, vals) = s.row(i);
        let mut amax = 0.0f64;
        for (&j, &v) in cols.iter().zip(vals) {
            if f[j] != 0.0 {
                amax = amax.max(v.abs());
            }
        }
        amax *= tol;
        for (&j, &v) in cols.iter().zip(vals) {
            if f[j] == 0.0 || v.abs() < amax {
                continue;
            }
            if x[i] > y[j] {
                y[j] = x[i];
            }
        }
    }

    gs.gather(&mut y, ReduceOp::Max);
    gs.exchange(&mut y, ReduceOp::Max);
    y.truncate(rn);
    y
}
