//! Distributed assembly: unassembled (i, j, v) triples scattered across
//! ranks become a row-partitioned CSR operator plus the column id table
//! later exchanges are built from.
//!
//! Each triple is addressed by global dof ids, routed to the rank owning
//! its row, and combined by addition with every other contribution to the
//! same coordinate. Rows end up whole on their owner; columns referencing
//! dofs owned elsewhere become ghost slots.

use parmg_comm::{Comm, DofIds, dofs::owner_of};

use crate::error::{AmgError, AmgResult};
use crate::sparse::builder::MatrixBuilder;
use crate::sparse::csr::CsrMatrix;

/// One operator contribution addressed by global ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triple {
    pub row: u64,
    pub col: u64,
    pub val: f64,
}

/// Row-partitioned assembled operator.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub mat: CsrMatrix,
    pub ids: DofIds,
}

/// Assemble the host application's unassembled input: `ids[k] == 0` masks
/// a dof, `rows`/`cols` are indices into `ids`, and entries with masked
/// endpoints or `|v| == 0` are dropped before routing.
pub fn assemble<C: Comm>(
    comm: &C,
    ids: &[u64],
    rows: &[usize],
    cols: &[usize],
    vals: &[f64],
) -> AmgResult<Assembled> {
    if rows.len() != cols.len() || rows.len() != vals.len() {
        return Err(AmgError::InvalidInput {
            context: format!(
                "triple arrays have lengths {}/{}/{}",
                rows.len(),
                cols.len(),
                vals.len()
            ),
        });
    }

    let nranks = comm.nranks();
    let mut outgoing = Vec::with_capacity(rows.len());
    for ((&i, &j), &v) in rows.iter().zip(cols).zip(vals) {
        if i >= ids.len() || j >= ids.len() {
            return Err(AmgError::InvalidInput {
                context: format!("triple ({i}, {j}) indexes past {} local dofs", ids.len()),
            });
        }
        let (gi, gj) = (ids[i], ids[j]);
        if gi == 0 || gj == 0 || v == 0.0 {
            continue;
        }
        outgoing.push((owner_of(gi, nranks), Triple { row: gi, col: gj, val: v }));
    }

    let received = comm.transfer(outgoing);
    assemble_routed(comm, received)
}

/// Assemble triples already routed to their row owner. Also the back end
/// of the coarse-operator build, which routes Galerkin contributions
/// through the same path.
pub(crate) fn assemble_routed<C: Comm>(
    comm: &C,
    mut triples: Vec<Triple>,
) -> AmgResult<Assembled> {
    triples.sort_by(|a, b| (a.row, a.col).cmp(&(b.row, b.col)));

    // Combine duplicate coordinates by addition; cancellation keeps the
    // stored entry.
    let mut combined: Vec<Triple> = Vec::with_capacity(triples.len());
    for t in triples {
        match combined.last_mut() {
            Some(last) if last.row == t.row && last.col == t.col => last.val += t.val,
            _ => combined.push(t),
        }
    }

    // Owned rows in ascending id order; each owned row's dof doubles as
    // its column slot, ghost columns follow sorted.
    let mut owned: Vec<u64> = combined.iter().map(|t| t.row).collect();
    owned.dedup();
    debug_assert!(owned.iter().all(|&g| owner_of(g, comm.nranks()) == comm.rank()));

    let mut ghosts: Vec<u64> = combined
        .iter()
        .filter(|t| owned.binary_search(&t.col).is_err())
        .map(|t| t.col)
        .collect();
    ghosts.sort_unstable();
    ghosts.dedup();

    let num_owned = owned.len();
    let mut all_ids = owned;
    all_ids.extend_from_slice(&ghosts);
    let ids = DofIds::new(all_ids, num_owned);

    let mut builder = MatrixBuilder::new(num_owned, ids.len());
    builder.reserve(combined.len());
    for t in &combined {
        let i = ids.owned().binary_search(&t.row).expect("row routed to the wrong rank");
        let j = ids.slot_of(t.col).ok_or(AmgError::AssemblyProtocol { id: t.col })?;
        builder.push(i, j, t.val).expect("slot out of range");
    }

    Ok(Assembled { mat: builder.build(), ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parmg_comm::SerialComm;

    /// 4x4 tridiagonal [2, -1] as unassembled element-style triples.
    fn tridiag_input() -> (Vec<u64>, Vec<usize>, Vec<usize>, Vec<f64>) {
        let ids = vec![1, 2, 3, 4];
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for i in 0..4usize {
            rows.push(i);
            cols.push(i);
            vals.push(2.0);
            if i > 0 {
                rows.push(i);
                cols.push(i - 1);
                vals.push(-1.0);
                rows.push(i - 1);
                cols.push(i);
                vals.push(-1.0);
            }
        }
        (ids, rows, cols, vals)
    }

    #[test]
    fn serial_tridiagonal() {
        let (ids, rows, cols, vals) = tridiag_input();
        let a = assemble(&SerialComm, &ids, &rows, &cols, &vals).unwrap();
        assert_eq!(a.mat.row_pointers, vec![0, 2, 5, 8, 10]);
        assert_eq!(a.mat.column_indices, vec![0, 1, 0, 1, 2, 1, 2, 3, 2, 3]);
        assert_eq!(
            a.mat.values,
            vec![2.0, -1.0, -1.0, 2.0, -1.0, -1.0, 2.0, -1.0, -1.0, 2.0]
        );
        assert_eq!(a.ids.owned(), &[1, 2, 3, 4]);
        assert_eq!(a.ids.num_owned(), 4);
        assert!(a.mat.check_invariants().is_ok());
    }

    #[test]
    fn duplicate_coordinates_sum() {
        // Two "elements" each contributing to the shared dof 2.
        let ids = vec![1, 2];
        let a = assemble(
            &SerialComm,
            &ids,
            &[0, 1, 1, 1],
            &[0, 1, 1, 0],
            &[1.0, 1.0, 1.0, -1.0],
        )
        .unwrap();
        assert_eq!(a.mat.dim.nrows, 2);
        assert_eq!(a.mat.diagonal(), vec![1.0, 2.0]);
    }

    #[test]
    fn conservation_of_absolute_mass() {
        let (ids, rows, cols, vals) = tridiag_input();
        let input_mass: f64 = vals.iter().map(|v| v.abs()).sum();
        let a = assemble(&SerialComm, &ids, &rows, &cols, &vals).unwrap();
        let assembled_mass: f64 = a.mat.values.iter().map(|v| v.abs()).sum();
        assert_eq!(assembled_mass, input_mass);
    }

    #[test]
    fn masked_and_zero_entries_are_dropped() {
        let ids = vec![1, 0, 3];
        let a = assemble(
            &SerialComm,
            &ids,
            &[0, 0, 1, 2, 2],
            &[0, 1, 1, 2, 0],
            &[5.0, 1.0, 1.0, 4.0, 0.0],
        )
        .unwrap();
        // Dof slot 1 is masked; the zero-valued (2, 0) entry is dropped.
        assert_eq!(a.ids.owned(), &[1, 3]);
        assert_eq!(a.mat.row_pointers, vec![0, 1, 2]);
        assert_eq!(a.mat.values, vec![5.0, 4.0]);
    }

    #[test]
    fn fully_masked_input_assembles_to_nothing() {
        let ids = vec![0, 0];
        let a = assemble(&SerialComm, &ids, &[0, 1], &[0, 1], &[1.0, 1.0]).unwrap();
        assert_eq!(a.mat.dim.nrows, 0);
        assert_eq!(a.mat.nnz(), 0);
        assert!(a.ids.is_empty());
    }

    #[test]
    fn length_mismatch_is_reported() {
        let err = assemble(&SerialComm, &[1], &[0], &[0, 0], &[1.0]).unwrap_err();
        assert!(matches!(err, AmgError::InvalidInput { .. }));
    }
}
