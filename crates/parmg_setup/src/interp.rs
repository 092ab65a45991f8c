//! Energy-minimizing interpolation.
//!
//! The skeleton assigns every fine dof at most one coarse neighbor (the
//! best-scoring column of the Jacobi-scaled squared coupling matrix).
//! Weights are then solved per coarse dof over its fine support by
//! A-orthonormalizing the spanned Af columns and projecting the coupling
//! onto that basis. The per-support solves run on the transposed forms of
//! W, Af and Afc.

use log::debug;
use parmg_comm::{Comm, DofIds, GatherScatter, ReduceOp};

use crate::error::AmgResult;
use crate::pcg::{jacobi_inverse, pcg};
use crate::sparse::csr::CsrMatrix;

/// Build the interpolation matrix W (fine rows x coarse columns) from the
/// level's split blocks.
pub fn interpolation<C: Comm>(
    comm: &C,
    af: &CsrMatrix,
    ac: &CsrMatrix,
    afc: &CsrMatrix,
    ids_f: &DofIds,
    ids_c: &DofIds,
    gs_f: &C::Gs,
    gs_c: &C::Gs,
) -> AmgResult<CsrMatrix> {
    let rnf = af.dim.nrows;
    let rnc = ac.dim.nrows;
    let cnc = afc.dim.ncols;

    let df = af.diagonal();
    let dfinv = jacobi_inverse(&df, ids_f)?;

    // Near-null-space input on the coarse side; the constant by default.
    let uc = vec![1.0; cnc];

    // v = pcg(Af, -Afc u): the ideal fine response to the coarse constant.
    // Unused until the lambda outer iteration lands; the forward solve is
    // part of the level contract regardless.
    let mut rhs = vec![0.0; rnf];
    afc.mul_vec_into(&uc, &mut rhs);
    for b in &mut rhs {
        *b = -*b;
    }
    let (v, pcg_iters) = pcg(comm, af, &rhs, &dfinv, 1e-16, gs_f);
    debug!("interpolation forward solve: {pcg_iters} pcg iterations");

    let mut dc = vec![0.0; cnc];
    dc[..rnc].copy_from_slice(&ac.diagonal());
    gs_c.exchange(&mut dc, ReduceOp::Add);

    let mut dcinv = vec![0.0; cnc];
    dcinv[..rnc].copy_from_slice(&jacobi_inverse(&ac.diagonal(), ids_c)?);
    gs_c.exchange(&mut dcinv, ReduceOp::Add);

    // Scoring matrix: pattern of Afc, entries Afc.^2 scaled by 1/Df on
    // the left and 1/Dc on the right.
    let mut ard = afc.clone();
    for val in &mut ard.values {
        *val *= *val;
    }
    ard.scale_rows(&dfinv);
    ard.scale_columns(&dcinv);

    let w_skel = min_skel(&ard);
    Ok(solve_weights(&w_skel, af, afc, &dc, &uc, &v.to_vec()))
}

/// Minimum interpolation skeleton: for each fine row keep the single
/// column holding the row's maximal score, with weight one, or nothing if
/// the maximum is not positive. Exactly one stored entry per surviving
/// row.
pub(crate) fn min_skel(r: &CsrMatrix) -> CsrMatrix {
    let mut row_pointers = vec![0];
    let mut column_indices = Vec::with_capacity(r.dim.nrows);
    let mut values = Vec::with_capacity(r.dim.nrows);

    for i in 0..r.dim.nrows {
        let (cols, vals) = r.row(i);
        let mut best = f64::NEG_INFINITY;
        let mut best_col = 0;
        for (&c, &v) in cols.iter().zip(vals) {
            if v > best {
                best = v;
                best_col = c;
            }
        }
        if best > 0.0 {
            column_indices.push(best_col);
            values.push(1.0);
        }
        row_pointers.push(column_indices.len());
    }

    CsrMatrix { dim: r.dim, row_pointers, column_indices, values }
}

/// Fill the skeleton with weights. `dc` and `u` live on the coarse column
/// space, `v` on the fine rows; `v` feeds the outer iteration over the
/// lambda multipliers once that lands, which starts from lambda = 0 --
/// the single pass solved here.
pub(crate) fn solve_weights(
    w_skel: &CsrMatrix,
    af: &CsrMatrix,
    afc: &CsrMatrix,
    dc: &[f64],
    u: &[f64],
    _v: &[f64],
) -> CsrMatrix {
    let au: Vec<f64> = dc.iter().zip(u).map(|(&d, &ui)| d * ui).collect();
    let lambda = vec![0.0; af.dim.nrows];

    let mut wt = w_skel.transpose();
    let aft = af.transpose();
    let afct = afc.transpose();
    interp(&mut wt, &aft, &afct, &au, &lambda);
    wt.transpose()
}

/// Weight solve on the transposed skeleton: row i of `wt` is coarse dof
/// i's fine support Qj. For each support, A-orthonormalize the restricted
/// Af columns one at a time (Q kept in packed upper-triangular form),
/// then project (Afc^T e_i + u_i lambda) into the basis:
///
///   q_k = (I - Q Q^T A) e_s / ||(I - Q Q^T A) e_s||_A,  s = Qj[k]
///   w   = Q Q^T (B e_i + u_i lambda)
pub(crate) fn interp(
    wt: &mut CsrMatrix,
    at: &CsrMatrix,
    bt: &CsrMatrix,
    u: &[f64],
    lambda: &[f64],
) {
    let nc = wt.dim.nrows;

    let mut max_nz = 0;
    for i in 0..nc {
        max_nz = max_nz.max(wt.row_pointers[i + 1] - wt.row_pointers[i]);
    }
    let max_q = max_nz * (max_nz + 1) / 2;
    let mut sqv1 = vec![0.0; max_nz];
    let mut sqv2 = vec![0.0; max_nz];
    let mut q = vec![0.0; max_q];

    for i in 0..nc {
        let wir = wt.row_pointers[i];
        let nz = wt.row_pointers[i + 1] - wir;
        let qj = &wt.column_indices[wir..wir + nz];

        let mut qk_off = 0;
        for k in 0..nz {
            let s = qj[k];
            let (at_cols, at_vals) = at.row(s);
            // sqv1 := R_{k+1} A e_s
            sp_restrict_sorted(&mut sqv1[..k + 1], &qj[..k + 1], at_cols, at_vals);

            // Columns 0..k are the finished basis, column k is under
            // construction right behind them.
            let (q_prev, q_cur) = q.split_at_mut(qk_off);
            let qk = &mut q_cur[..k + 1];
            // sqv2 := Q^T A e_s
            mv_utt(&mut sqv2[..k], q_prev, &sqv1);
            // qk := Q Q^T A e_s
            mv_ut(&mut qk[..k], q_prev, &sqv2[..k]);

            // alpha := ||(I - Q Q^T A) e_s||_A^2 = (A e_s)^T (I - Q Q^T A) e_s
            let mut alpha = sqv1[k];
            for m in 0..k {
                alpha -= sqv1[m] * qk[m];
            }
            // qk := Q e_(k+1) = alpha^(-1/2) (I - Q Q^T A) e_s
            let alpha = -1.0 / alpha.sqrt();
            for m in 0..k {
                qk[m] *= alpha;
            }
            qk[k] = -alpha;
            qk_off += k + 1;
        }

        // sqv1 := R (B e_i + u_i lambda)
        let (bt_cols, bt_vals) = bt.row(i);
        sp_restrict_sorted(&mut sqv1[..nz], qj, bt_cols, bt_vals);
        for k in 0..nz {
            sqv1[k] += u[i] * lambda[qj[k]];
        }
        // W^T e_i := Q Q^T (B e_i + u_i lambda)
        mv_utt(&mut sqv2[..nz], &q, &sqv1);
        mv_ut(&mut wt.values[wir..wir + nz], &q, &sqv2[..nz]);
    }
}

/// Upper triangular transpose matrix vector product for the packed-by-
/// columns U: y[i] = U column i (length i + 1) dot x[0..=i].
fn mv_utt(y: &mut [f64], u: &[f64], x: &[f64]) {
    let mut off = 0;
    for (i, yi) in y.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (j, &xj) in x[..=i].iter().enumerate() {
            acc += u[off + j] * xj;
        }
        *yi = acc;
        off += i + 1;
    }
}

/// Upper triangular matrix vector product y = U x, same packed layout;
/// y and x have the same length.
fn mv_ut(y: &mut [f64], u: &[f64], x: &[f64]) {
    let mut off = 0;
    for (j, &xj) in x.iter().enumerate() {
        y[j] = 0.0;
        for i in 0..=j {
            y[i] += u[off + i] * xj;
        }
        off += j + 1;
    }
}

/// y[m] := the value of the sparse vector (xi, x) at index ri[m], zero
/// where absent. Both index lists are sorted ascending.
fn sp_restrict_sorted(y: &mut [f64], ri: &[usize], xi: &[usize], x: &[f64]) {
    let mut p = 0;
    for (ym, &target) in y.iter_mut().zip(ri) {
        while p < xi.len() && xi[p] < target {
            p += 1;
        }
        *ym = if p < xi.len() && xi[p] == target { x[p] } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use parmg_comm::SerialComm;

    use crate::sparse::Dim;
    use crate::sparse::builder::MatrixBuilder;

    #[test]
    fn packed_triangular_products() {
        // U = [1 2 4; 0 3 5; 0 0 6] packed by columns.
        let u = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x = [1.0, 1.0, 1.0];
        let mut y = [0.0; 3];
        mv_ut(&mut y, &u, &x);
        assert_eq!(y, [7.0, 8.0, 6.0]);
        mv_utt(&mut y, &u, &x);
        assert_eq!(y, [1.0, 5.0, 15.0]);
    }

    #[test]
    fn sparse_restriction_fills_gaps_with_zero() {
        let mut y = [0.0; 3];
        sp_restrict_sorted(&mut y, &[1, 3, 4], &[0, 3, 5], &[9.0, 7.0, 5.0]);
        assert_eq!(y, [0.0, 7.0, 0.0]);
    }

    #[test]
    fn min_skel_keeps_one_positive_maximum_per_row() {
        let mut b = MatrixBuilder::new(3, 2);
        b.push(0, 0, 0.2).unwrap();
        b.push(0, 1, 0.7).unwrap();
        b.push(1, 0, -0.4).unwrap();
        let r = b.build();
        let skel = min_skel(&r);
        assert_eq!(skel.row_pointers, vec![0, 1, 1, 1]);
        assert_eq!(skel.column_indices, vec![1]);
        assert_eq!(skel.values, vec![1.0]);
        // Row 1's maximum is negative, row 2 is empty: no entries.
    }

    fn fine_block_3x3() -> (CsrMatrix, CsrMatrix, CsrMatrix) {
        // Fine block with one coarse-coupled dof (the middle one) and one
        // isolated fine dof.
        let mut af = MatrixBuilder::new(3, 3);
        af.push(0, 0, 2.0).unwrap();
        af.push(0, 1, -1.0).unwrap();
        af.push(1, 0, -1.0).unwrap();
        af.push(1, 1, 2.0).unwrap();
        af.push(2, 2, 2.0).unwrap();
        let mut ac = MatrixBuilder::new(1, 1);
        ac.push(0, 0, 2.0).unwrap();
        let mut afc = MatrixBuilder::new(3, 1);
        afc.push(1, 0, -1.0).unwrap();
        (af.build(), ac.build(), afc.build())
    }

    #[test]
    fn single_support_weight_is_the_restricted_solve() {
        let comm = SerialComm;
        let (af, ac, afc) = fine_block_3x3();
        let ids_f = parmg_comm::DofIds::new(vec![1, 2, 4], 3);
        let ids_c = parmg_comm::DofIds::new(vec![3], 1);
        let gs_f = comm.gs_setup(&ids_f);
        let gs_c = comm.gs_setup(&ids_c);

        let w = interpolation(&comm, &af, &ac, &afc, &ids_f, &ids_c, &gs_f, &gs_c).unwrap();
        assert_eq!(w.dim, Dim { nrows: 3, ncols: 1 });
        assert_eq!(w.row_pointers, vec![0, 0, 1, 1]);
        assert_eq!(w.column_indices, vec![0]);
        // (R Af R^T)^{-1} R Afc^T e_0 = (1/2) * (-1)
        assert_relative_eq!(w.values[0], -0.5, max_relative = 1e-12);
    }

    #[test]
    fn two_support_weights_match_the_dense_solve() {
        // One coarse dof interpolating both fine dofs of a 2x2 block:
        // weights must solve (R Af R^T) w = R Afc^T e_0 exactly.
        let comm = SerialComm;
        let mut af = MatrixBuilder::new(2, 2);
        af.push(0, 0, 2.0).unwrap();
        af.push(0, 1, -1.0).unwrap();
        af.push(1, 0, -1.0).unwrap();
        af.push(1, 1, 2.0).unwrap();
        let af = af.build();
        let mut ac = MatrixBuilder::new(1, 1);
        ac.push(0, 0, 2.0).unwrap();
        let ac = ac.build();
        let mut afc = MatrixBuilder::new(2, 1);
        afc.push(0, 0, -1.0).unwrap();
        afc.push(1, 0, -1.0).unwrap();
        let afc = afc.build();

        let ids_f = parmg_comm::DofIds::new(vec![1, 2], 2);
        let ids_c = parmg_comm::DofIds::new(vec![3], 1);
        let gs_f = comm.gs_setup(&ids_f);
        let gs_c = comm.gs_setup(&ids_c);
        let w = interpolation(&comm, &af, &ac, &afc, &ids_f, &ids_c, &gs_f, &gs_c).unwrap();

        assert_eq!(w.nnz(), 2);
        assert_relative_eq!(w.values[0], -1.0, max_relative = 1e-12);
        assert_relative_eq!(w.values[1], -1.0, max_relative = 1e-12);

        // A-energy of the column equals the Af^{-1}-energy of the
        // restricted coupling.
        let wv = [w.values[0], w.values[1]];
        let mut af_w = vec![0.0; 2];
        af.mul_vec_into(&wv, &mut af_w);
        let energy = wv[0] * af_w[0] + wv[1] * af_w[1];
        assert_relative_eq!(energy, 2.0, max_relative = 1e-12);
    }
}
