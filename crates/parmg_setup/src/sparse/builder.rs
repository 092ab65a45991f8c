use crate::sparse::Dim;
use crate::sparse::csr::CsrMatrix;
use crate::sparse::error::CsrError;

/// Builder from triplets (COO -> canonical CSR).
///
/// Entries are buffered as pushed, then `build` sorts by (row, column) and
/// combines duplicates by addition; duplicate coordinates must sum, never
/// overwrite, because assembly feeds element contributions through here.
#[derive(Debug)]
pub struct MatrixBuilder {
    dim: Dim,
    entries: Vec<(usize, usize, f64)>,
}

impl MatrixBuilder {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self { dim: Dim { nrows, ncols }, entries: Vec::new() }
    }

    pub fn reserve(&mut self, nnz: usize) {
        self.entries.reserve(nnz);
    }

    pub fn push(&mut self, row: usize, column: usize, value: f64) -> Result<(), CsrError> {
        if row >= self.dim.nrows {
            return Err(CsrError::OutOfBoundsIndex { index: row, max: self.dim.nrows });
        }
        if column >= self.dim.ncols {
            return Err(CsrError::OutOfBoundsIndex { index: column, max: self.dim.ncols });
        }
        self.entries.push((row, column, value));
        Ok(())
    }

    pub fn build(self) -> CsrMatrix {
        let mut entries = self.entries;
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        // Combine duplicates; entries are sorted by (row, col).
        let mut combined: Vec<(usize, usize, f64)> = Vec::with_capacity(entries.len());
        for (r, c, v) in entries {
            match combined.last_mut() {
                Some((lr, lc, acc)) if *lr == r && *lc == c => *acc += v,
                _ => combined.push((r, c, v)),
            }
        }

        // Counting pass then placement pass.
        let mut row_pointers = vec![0usize; self.dim.nrows + 1];
        for &(r, _c, _v) in &combined {
            row_pointers[r + 1] += 1;
        }
        for i in 0..self.dim.nrows {
            row_pointers[i + 1] += row_pointers[i];
        }

        let nnz = combined.len();
        let mut column_indices = vec![0usize; nnz];
        let mut values = vec![0f64; nnz];
        let mut next = row_pointers.clone();
        for (r, c, v) in combined {
            let p = next[r];
            column_indices[p] = c;
            values[p] = v;
            next[r] += 1;
        }

        let a = CsrMatrix { dim: self.dim, row_pointers, column_indices, values };
        debug_assert!(a.check_invariants().is_ok());
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_sorts_and_combines_duplicates() {
        let mut b = MatrixBuilder::new(3, 3);
        b.push(2, 2, 30.0).unwrap();
        b.push(0, 2, 3.0).unwrap();
        b.push(1, 1, 20.0).unwrap();
        b.push(0, 0, 10.0).unwrap();
        b.push(2, 0, 2.0).unwrap();
        b.push(2, 2, 5.0).unwrap(); // duplicate -> combine to 35

        let a = b.build();
        assert_eq!(a.row_pointers, vec![0, 2, 3, 5]);
        assert_eq!(a.column_indices, vec![0, 2, 1, 0, 2]);
        assert_eq!(a.values, vec![10.0, 3.0, 20.0, 2.0, 35.0]);
    }

    #[test]
    fn push_rejects_out_of_bounds() {
        let mut b = MatrixBuilder::new(2, 2);
        assert!(matches!(b.push(2, 0, 1.0), Err(CsrError::OutOfBoundsIndex { .. })));
        assert!(matches!(b.push(0, 5, 1.0), Err(CsrError::OutOfBoundsIndex { .. })));
    }

    #[test]
    fn duplicates_cancel_to_explicit_zero() {
        let mut b = MatrixBuilder::new(1, 1);
        b.push(0, 0, 1.0).unwrap();
        b.push(0, 0, -1.0).unwrap();
        let a = b.build();
        // Cancellation keeps the stored entry; dropping it would lose the
        // structural diagonal.
        assert_eq!(a.nnz(), 1);
        assert_eq!(a.values, vec![0.0]);
    }
}
