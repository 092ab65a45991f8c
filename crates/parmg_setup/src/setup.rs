//! Setup driver: repeatedly coarsen, analyze the smoother, build the
//! interpolation, and recurse on the Galerkin coarse operator until the
//! global problem is a single dof (or coarsening can make no progress),
//! then emit a terminal smoother-only level.

use log::{debug, info};
use parmg_comm::{Comm, DofIds, GatherScatter, ReduceOp, dofs::owner_of};

use crate::AmgConfig;
use crate::assemble::{self, Assembled, Triple, assemble_routed};
use crate::cheby::chebsim;
use crate::coarsen::coarsen;
use crate::error::{AmgError, AmgResult};
use crate::interp::interpolation;
use crate::lanczos::lanczos;
use crate::sparse::builder::MatrixBuilder;
use crate::sparse::csr::CsrMatrix;

/// A hierarchy matrix with its column id table and the gather-scatter
/// handle the solve phase exchanges through.
#[derive(Debug)]
pub struct SharedMatrix<G> {
    pub mat: CsrMatrix,
    pub ids: DofIds,
    pub gs: G,
}

/// One level of the hierarchy. The terminal level has empty `w` / `afp`
/// (zero columns): everything left is smoothed, nothing is interpolated.
#[derive(Debug)]
pub struct AmgLevel<G> {
    /// Interpolation from the next-coarser level, fine rows x coarse
    /// columns.
    pub w: SharedMatrix<G>,
    /// Forward action Af W + Afc: the fine rows of A applied to the
    /// prolongation [W; I].
    pub afp: SharedMatrix<G>,
    /// The fine-block operator.
    pub aff: SharedMatrix<G>,
    /// Chebyshev smoother degree.
    pub cheb_m: u32,
    /// Spectral ratio of the scaled fine block.
    pub cheb_rho: f64,
}

/// Setup output. Built once; the solve phase reads it and scribbles only
/// on the scratch vectors.
#[derive(Debug)]
pub struct AmgHierarchy<G> {
    pub levels: Vec<AmgLevel<G>>,
    /// 1 / N_global, 0 for a globally empty operator.
    pub tni: f64,
    /// Inverse-scaled fine diagonals, packed contiguously across levels.
    pub dff: Vec<f64>,
    /// `lvl_offset[l]..lvl_offset[l + 1]` slices `dff` for level l.
    pub lvl_offset: Vec<usize>,
    /// Solve-phase scratch: right-hand side and solution at level 0,
    pub b: Vec<f64>,
    pub x: Vec<f64>,
    /// corrections and residual sized for the largest fine block,
    pub c: Vec<f64>,
    pub c_old: Vec<f64>,
    pub r: Vec<f64>,
    /// and an exchange buffer sized for the widest column space.
    pub buf: Vec<f64>,
}

/// Per-level shape numbers, for reports and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSummary {
    pub fine_rows: usize,
    pub aff_nnz: usize,
    pub w_dim: (usize, usize),
    pub w_nnz: usize,
    pub afp_nnz: usize,
    pub cheb_m: u32,
}

impl<G> AmgHierarchy<G> {
    pub fn level_summaries(&self) -> Vec<LevelSummary> {
        self.levels
            .iter()
            .enumerate()
            .map(|(l, level)| LevelSummary {
                fine_rows: self.lvl_offset[l + 1] - self.lvl_offset[l],
                aff_nnz: level.aff.mat.nnz(),
                w_dim: (level.w.mat.dim.nrows, level.w.mat.dim.ncols),
                w_nnz: level.w.mat.nnz(),
                afp_nnz: level.afp.mat.nnz(),
                cheb_m: level.cheb_m,
            })
            .collect()
    }
}

/// Build the AMG hierarchy from the unassembled, row-distributed input
/// (`ids[k] == 0` drops a dof; `rows`/`cols` index into `ids`).
pub fn setup<C: Comm>(
    comm: &C,
    ids: &[u64],
    rows: &[usize],
    cols: &[usize],
    vals: &[f64],
    config: &AmgConfig,
) -> AmgResult<AmgHierarchy<C::Gs>> {
    let assembled = assemble::assemble(comm, ids, rows, cols, vals)?;
    setup_assembled(comm, assembled, config)
}

fn setup_assembled<C: Comm>(
    comm: &C,
    assembled: Assembled,
    config: &AmgConfig,
) -> AmgResult<AmgHierarchy<C::Gs>> {
    let mut a = assembled.mat;
    let mut a_ids = assembled.ids;

    let n_global = comm.allreduce_i64(ReduceOp::Add, a.dim.nrows as i64);
    let tni = if n_global == 0 { 0.0 } else { 1.0 / n_global as f64 };
    // Residual contraction target per level, from the level-building
    // tolerance.
    let gamma2 = 1.0 - (1.0 - config.tol).sqrt();

    info!("amg setup: {} global dofs, {} local rows", n_global, a.dim.nrows);

    let level0_rn = a.dim.nrows;
    let mut levels: Vec<AmgLevel<C::Gs>> = Vec::with_capacity(config.init_levels);
    let mut dff: Vec<f64> = Vec::with_capacity(level0_rn);
    let mut lvl_offset = vec![0usize];

    let mut remaining = n_global;
    while remaining > 0 {
        let gs = comm.gs_setup(&a_ids);

        // A vanished diagonal poisons both the strength scaling and the
        // Jacobi smoothers; refuse the level up front, collectively, so
        // every rank aborts at the same point.
        let mut bad = 0u64;
        for (i, &di) in a.diagonal().iter().enumerate() {
            if di == 0.0 {
                bad = a_ids.id(i);
                break;
            }
        }
        let bad = comm.allreduce_i64(ReduceOp::Max, bad as i64);
        if bad != 0 {
            return Err(AmgError::ZeroDiagonal { id: bad as u64 });
        }

        if remaining == 1 {
            let (level, d) = terminal_level(comm, a, a_ids, gamma2, config, remaining);
            lvl_offset.push(lvl_offset.last().unwrap() + level.aff.mat.dim.nrows);
            dff.extend_from_slice(&d);
            levels.push(level);
            break;
        }

        let mut vc = coarsen(comm, &a, config.ctol, config.mat_max_tol, &a_ids, &gs);
        gs.exchange(&mut vc, ReduceOp::Add);
        let vf: Vec<f64> = vc.iter().map(|&v| if v == 0.0 { 1.0 } else { 0.0 }).collect();

        let rn = a.dim.nrows;
        let nf_local = vf[..rn].iter().filter(|&&v| v != 0.0).count();
        let nf = comm.allreduce_i64(ReduceOp::Add, nf_local as i64);
        if nf == 0 {
            // Coarsening made no progress; smooth the whole remainder.
            let (level, d) = terminal_level(comm, a, a_ids, gamma2, config, remaining);
            lvl_offset.push(lvl_offset.last().unwrap() + level.aff.mat.dim.nrows);
            dff.extend_from_slice(&d);
            levels.push(level);
            break;
        }

        let af = a.sub_mat(&vf, &vf);
        let afc = a.sub_mat(&vf, &vc);
        let ac = a.sub_mat(&vc, &vc);
        let ids_f = a_ids.filter(&vf);
        let ids_c = a_ids.filter(&vc);
        let gs_f = comm.gs_setup(&ids_f);
        let gs_c = comm.gs_setup(&ids_c);

        let (d, cheb_m, cheb_rho) = smoother_analysis(comm, &af, &gs_f, gamma2, config, nf);

        let w = interpolation(comm, &af, &ac, &afc, &ids_f, &ids_c, &gs_f, &gs_c)?;

        // Interpolation targets of ghost fine rows, for the products that
        // cross rank boundaries.
        let (wg, wv) = exchange_w_rows(&w, &ids_c, af.dim.ncols, &gs_f);

        let (afp_mat, afp_ids) = build_afp(&af, &afc, &ids_c, &wg, &wv)?;
        let next = galerkin_coarse(comm, &af, &afc, &ac, &ids_c, &wg, &wv)?;

        debug!(
            "level {}: {} fine rows ({} global fine), cheb degree {}, rho {:.4}",
            levels.len(),
            af.dim.nrows,
            nf,
            cheb_m,
            cheb_rho
        );

        lvl_offset.push(lvl_offset.last().unwrap() + af.dim.nrows);
        dff.extend_from_slice(&d);
        let afp_gs = comm.gs_setup(&afp_ids);
        levels.push(AmgLevel {
            w: SharedMatrix { mat: w, ids: ids_c, gs: gs_c },
            afp: SharedMatrix { mat: afp_mat, ids: afp_ids, gs: afp_gs },
            aff: SharedMatrix { mat: af, ids: ids_f, gs: gs_f },
            cheb_m,
            cheb_rho,
        });

        a = next.mat;
        a_ids = next.ids;
        remaining = comm.allreduce_i64(ReduceOp::Add, a.dim.nrows as i64);
    }

    let max_f = levels
        .iter()
        .enumerate()
        .map(|(l, _)| lvl_offset[l + 1] - lvl_offset[l])
        .max()
        .unwrap_or(0);
    let max_e = levels
        .iter()
        .map(|level| {
            level
                .w
                .mat
                .dim
                .ncols
                .max(level.afp.mat.dim.ncols)
                .max(level.aff.mat.dim.ncols)
        })
        .max()
        .unwrap_or(0);

    info!("amg setup done: {} levels", levels.len());

    Ok(AmgHierarchy {
        levels,
        tni,
        dff,
        lvl_offset,
        b: vec![0.0; level0_rn],
        x: vec![0.0; level0_rn],
        c: vec![0.0; max_f],
        c_old: vec![0.0; max_f],
        r: vec![0.0; max_f],
        buf: vec![0.0; max_e],
    })
}

/// Last level: every remaining row is fine, nothing is interpolated.
fn terminal_level<C: Comm>(
    comm: &C,
    a: CsrMatrix,
    a_ids: DofIds,
    gamma2: f64,
    config: &AmgConfig,
    n_global: i64,
) -> (AmgLevel<C::Gs>, Vec<f64>) {
    let gs = comm.gs_setup(&a_ids);
    let (d, cheb_m, cheb_rho) = smoother_analysis(comm, &a, &gs, gamma2, config, n_global);
    debug!("terminal level: {} rows, cheb degree {}", a.dim.nrows, cheb_m);
    let rn = a.dim.nrows;
    let level = AmgLevel {
        w: SharedMatrix {
            mat: CsrMatrix::empty(rn, 0),
            ids: DofIds::empty(),
            gs: comm.gs_setup(&DofIds::empty()),
        },
        afp: SharedMatrix {
            mat: CsrMatrix::empty(rn, 0),
            ids: DofIds::empty(),
            gs: comm.gs_setup(&DofIds::empty()),
        },
        aff: SharedMatrix { mat: a, ids: a_ids, gs },
        cheb_m,
        cheb_rho,
    };
    (level, d)
}

/// Smoother parameters for a fine block: the inverse-scaled diagonal
/// Dff_i = Af[i,i] / sum_j Af[i,j]^2, rescaled by 2/(a + b) once Lanczos
/// has bracketed the scaled spectrum in [a, b], and the Chebyshev degree
/// for the spectral ratio (b - a)/(b + a). A fine block with fewer than
/// two global rows keeps Dff unscaled with a single-sweep smoother.
/// The caller has already rejected vanished diagonals, so sum_sq > 0.
fn smoother_analysis<C: Comm>(
    comm: &C,
    af: &CsrMatrix,
    gs_f: &C::Gs,
    gamma2: f64,
    config: &AmgConfig,
    nf_global: i64,
) -> (Vec<f64>, u32, f64) {
    let rnf = af.dim.nrows;
    let cnf = af.dim.ncols;

    let diag = af.diagonal();
    let mut d = Vec::with_capacity(rnf);
    for i in 0..rnf {
        let (_, vals) = af.row(i);
        let sum_sq: f64 = vals.iter().map(|v| v * v).sum();
        d.push(diag[i] / sum_sq);
    }

    if nf_global >= 2 {
        let mut dh = vec![0.0; cnf];
        for i in 0..rnf {
            dh[i] = d[i].sqrt();
        }
        gs_f.exchange(&mut dh, ReduceOp::Add);

        let mut dhafdh = af.clone();
        dhafdh.scale_rows(&dh);
        dhafdh.scale_columns(&dh);

        let lam = lanczos(comm, &dhafdh, config.lanczos_max_iter, gs_f);
        let a = lam[0];
        let b = *lam.last().unwrap();

        for v in &mut d {
            *v *= 2.0 / (a + b);
        }
        let rho = (b - a) / (b + a);
        let (m, _c) = chebsim(rho, gamma2);
        (d, m, rho)
    } else {
        (d, 1, 0.0)
    }
}

/// Spread each fine row's single interpolation entry (min_skel leaves at
/// most one) over the fine column space as a (target global id, weight)
/// pair, so ghost fine rows' entries become locally available.
fn exchange_w_rows<G: GatherScatter>(
    w: &CsrMatrix,
    ids_c: &DofIds,
    cnf: usize,
    gs_f: &G,
) -> (Vec<f64>, Vec<f64>) {
    let mut wg = vec![0.0; cnf];
    let mut wv = vec![0.0; cnf];
    for i in 0..w.dim.nrows {
        let (cols, vals) = w.row(i);
        debug_assert!(cols.len() <= 1);
        if let (Some(&c), Some(&v)) = (cols.first(), vals.first()) {
            wg[i] = ids_c.id(c) as f64;
            wv[i] = v;
        }
    }
    gs_f.exchange(&mut wg, ReduceOp::Add);
    gs_f.exchange(&mut wv, ReduceOp::Add);
    (wg, wv)
}

/// AfP = Af W + Afc over the locally owned fine rows, with its own
/// owned-first column table (a ghost fine row may interpolate from a
/// coarse dof no local operator column references).
fn build_afp(
    af: &CsrMatrix,
    afc: &CsrMatrix,
    ids_c: &DofIds,
    wg: &[f64],
    wv: &[f64],
) -> AmgResult<(CsrMatrix, DofIds)> {
    let rnf = af.dim.nrows;
    let mut entries: Vec<(usize, u64, f64)> = Vec::new();
    for i in 0..rnf {
        let (cols, vals) = af.row(i);
        for (&j, &v) in cols.iter().zip(vals) {
            if wg[j] != 0.0 {
                entries.push((i, wg[j] as u64, v * wv[j]));
            }
        }
        let (cols, vals) = afc.row(i);
        for (&j, &v) in cols.iter().zip(vals) {
            entries.push((i, ids_c.id(j), v));
        }
    }
    index_columns(rnf, &entries, ids_c.owned())
}

/// Rewrite (row, global column, value) entries against a fresh column
/// table: the owned ids first, then every other referenced id sorted.
fn index_columns(
    nrows: usize,
    entries: &[(usize, u64, f64)],
    owned: &[u64],
) -> AmgResult<(CsrMatrix, DofIds)> {
    let mut ghosts: Vec<u64> = entries
        .iter()
        .filter(|(_, g, _)| owned.binary_search(g).is_err())
        .map(|(_, g, _)| *g)
        .collect();
    ghosts.sort_unstable();
    ghosts.dedup();

    let num_owned = owned.len();
    let mut all_ids = owned.to_vec();
    all_ids.extend_from_slice(&ghosts);
    let ids = DofIds::new(all_ids, num_owned);

    let mut builder = MatrixBuilder::new(nrows, ids.len());
    builder.reserve(entries.len());
    for &(i, g, v) in entries {
        let j = ids.slot_of(g).ok_or(AmgError::AssemblyProtocol { id: g })?;
        builder.push(i, j, v).expect("entry within the fresh table");
    }
    Ok((builder.build(), ids))
}

/// Galerkin coarse operator A' = Ac + W^T Afc + (W^T Afc)^T + W^T Af W,
/// emitted as global-id triples and assembled through the same routed
/// path as the initial operator. Every product term is generated exactly
/// once, by the rank owning the fine row it sums over.
fn galerkin_coarse<C: Comm>(
    comm: &C,
    af: &CsrMatrix,
    afc: &CsrMatrix,
    ac: &CsrMatrix,
    ids_c: &DofIds,
    wg: &[f64],
    wv: &[f64],
) -> AmgResult<Assembled> {
    let nranks = comm.nranks();
    let mut outgoing: Vec<(usize, Triple)> = Vec::new();
    let mut push = |row: u64, col: u64, val: f64| {
        outgoing.push((owner_of(row, nranks), Triple { row, col, val }));
    };

    for q in 0..ac.dim.nrows {
        let gq = ids_c.id(q);
        let (cols, vals) = ac.row(q);
        for (&j, &v) in cols.iter().zip(vals) {
            push(gq, ids_c.id(j), v);
        }
    }

    for i in 0..af.dim.nrows {
        let (wgi, wvi) = (wg[i], wv[i]);

        let (cols, vals) = afc.row(i);
        for (&j, &v) in cols.iter().zip(vals) {
            if wgi != 0.0 {
                let gw = wgi as u64;
                let gj = ids_c.id(j);
                push(gw, gj, wvi * v);
                push(gj, gw, v * wvi);
            }
        }

        if wgi != 0.0 {
            let (cols, vals) = af.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                if wg[j] != 0.0 {
                    push(wgi as u64, wg[j] as u64, wvi * v * wv[j]);
                }
            }
        }
    }

    let received = comm.transfer(outgoing);
    assemble_routed(comm, received)
}
