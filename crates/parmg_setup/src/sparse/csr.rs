use crate::sparse::Dim;
use crate::sparse::error::CsrError;

/// Compressed Sparse Row matrix, the owning value every kernel works on.
/// - row pointers are the indices of the start and end of each row
/// - column indices are local slots, strictly increasing within a row
/// - values are the non zero values
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub dim: Dim,
    /// Row pointers, len = nrows + 1
    pub row_pointers: Vec<usize>,
    /// Column indices, len = nnz
    pub column_indices: Vec<usize>,
    /// Nonzero values, len = nnz
    pub values: Vec<f64>,
}

impl CsrMatrix {
    /// Matrix with no stored entries.
    pub fn empty(nrows: usize, ncols: usize) -> Self {
        Self {
            dim: Dim { nrows, ncols },
            row_pointers: vec![0; nrows + 1],
            column_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// number of non zero values
    pub fn nnz(&self) -> usize {
        self.column_indices.len()
    }

    #[allow(clippy::collapsible_if)]
    pub fn check_invariants(&self) -> Result<(), CsrError> {
        if self.row_pointers.len() != self.dim.nrows + 1 {
            return Err(CsrError::InvalidRowPointersLength {
                expected: self.dim.nrows + 1,
                actual: self.row_pointers.len(),
            });
        }
        if *self.row_pointers.first().unwrap_or(&1) != 0 {
            return Err(CsrError::InvalidRowPointers {
                index: 0,
                expected: 0,
                actual: *self.row_pointers.first().unwrap_or(&1),
            });
        }
        if *self.row_pointers.last().unwrap() != self.nnz() {
            return Err(CsrError::InvalidRowPointers {
                index: self.dim.nrows,
                expected: self.nnz(),
                actual: *self.row_pointers.last().unwrap(),
            });
        }
        if self.column_indices.len() != self.values.len() {
            return Err(CsrError::ColumnIndicesValuesLengthMismatch {
                column_indices: self.column_indices.len(),
                values: self.values.len(),
            });
        }
        for i in 0..self.dim.nrows {
            let (start, end) = (self.row_pointers[i], self.row_pointers[i + 1]);
            if start > end || end > self.nnz() {
                return Err(CsrError::InvalidRowPointers {
                    index: i,
                    expected: start,
                    actual: end,
                });
            }
            let mut prev = None;
            for &c in &self.column_indices[start..end] {
                if c >= self.dim.ncols {
                    return Err(CsrError::OutOfBoundsIndex { index: c, max: self.dim.ncols });
                }
                if let Some(p) = prev {
                    if c <= p {
                        return Err(CsrError::ColumnsNotStrictlyIncreasing {
                            index: i,
                            expected: p,
                            actual: c,
                        });
                    }
                }
                prev = Some(c);
            }
        }
        Ok(())
    }

    /// Return (column_indices, values) slice for row i
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let (s, e) = (self.row_pointers[i], self.row_pointers[i + 1]);
        (&self.column_indices[s..e], &self.values[s..e])
    }

    /// y := A * x. Rows are locally complete, so the product over owned
    /// rows is exact as long as ghost slots of `x` are current.
    pub fn mul_vec_into(&self, x: &[f64], y: &mut [f64]) {
        debug_assert!(x.len() >= self.dim.ncols);
        debug_assert!(y.len() >= self.dim.nrows);
        for i in 0..self.dim.nrows {
            let (cols, vals) = self.row(i);
            let mut acc = 0.0;
            for (&c, &v) in cols.iter().zip(vals) {
                acc += v * x[c];
            }
            y[i] = acc;
        }
    }

    /// Diagonal as a dense vector, 0.0 where the entry is structurally
    /// absent. Slot i of the column space is row i's own dof.
    pub fn diagonal(&self) -> Vec<f64> {
        let mut d = vec![0.0; self.dim.nrows];
        for i in 0..self.dim.nrows {
            let (cols, vals) = self.row(i);
            if let Ok(k) = cols.binary_search(&i) {
                d[i] = vals[k];
            }
        }
        d
    }

    /// A := diag(d) * A
    pub fn scale_rows(&mut self, d: &[f64]) {
        debug_assert!(d.len() >= self.dim.nrows);
        for i in 0..self.dim.nrows {
            let (s, e) = (self.row_pointers[i], self.row_pointers[i + 1]);
            for v in &mut self.values[s..e] {
                *v *= d[i];
            }
        }
    }

    /// A := A * diag(d)
    pub fn scale_columns(&mut self, d: &[f64]) {
        debug_assert!(d.len() >= self.dim.ncols);
        for (k, v) in self.values.iter_mut().enumerate() {
            *v *= d[self.column_indices[k]];
        }
    }

    /// Set stored diagonal entries to zero.
    pub fn zero_diagonal(&mut self) {
        for i in 0..self.dim.nrows {
            let (s, e) = (self.row_pointers[i], self.row_pointers[i + 1]);
            if let Ok(k) = self.column_indices[s..e].binary_search(&i) {
                self.values[s + k] = 0.0;
            }
        }
    }

    /// Squared Frobenius norm of (A - I) over the locally owned rows,
    /// counting rows with a structurally absent diagonal.
    pub fn fro_norm_sq_minus_identity(&self) -> f64 {
        let mut acc = 0.0;
        for i in 0..self.dim.nrows {
            let (cols, vals) = self.row(i);
            let mut saw_diagonal = false;
            for (&c, &v) in cols.iter().zip(vals) {
                if c == i {
                    saw_diagonal = true;
                    acc += (v - 1.0) * (v - 1.0);
                } else {
                    acc += v * v;
                }
            }
            if !saw_diagonal {
                acc += 1.0;
            }
        }
        acc
    }

    /// Sub-matrix A(vr, vc): rows where `vr` is non-zero restricted to
    /// columns where `vc` is non-zero, columns renumbered by a
    /// global-to-local table built in one pass over `vc`.
    pub fn sub_mat(&self, vr: &[f64], vc: &[f64]) -> CsrMatrix {
        debug_assert!(vr.len() >= self.dim.nrows);
        debug_assert!(vc.len() >= self.dim.ncols);
        let mut col_map = vec![usize::MAX; self.dim.ncols];
        let mut sub_ncols = 0;
        for (j, &keep) in vc.iter().take(self.dim.ncols).enumerate() {
            if keep != 0.0 {
                col_map[j] = sub_ncols;
                sub_ncols += 1;
            }
        }

        let mut row_pointers = vec![0];
        let mut column_indices = Vec::new();
        let mut values = Vec::new();
        for i in 0..self.dim.nrows {
            if vr[i] == 0.0 {
                continue;
            }
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                if col_map[c] != usize::MAX {
                    column_indices.push(col_map[c]);
                    values.push(v);
                }
            }
            row_pointers.push(column_indices.len());
        }

        CsrMatrix {
            dim: Dim { nrows: row_pointers.len() - 1, ncols: sub_ncols },
            row_pointers,
            column_indices,
            values,
        }
    }

    /// Transposed copy. Column order within each row of the result is the
    /// source row order, so it stays strictly increasing.
    pub fn transpose(&self) -> CsrMatrix {
        let (m, n) = (self.dim.nrows, self.dim.ncols);
        let mut row_pointers = vec![0usize; n + 1];
        for &c in &self.column_indices {
            row_pointers[c + 1] += 1;
        }
        for j in 0..n {
            row_pointers[j + 1] += row_pointers[j];
        }

        let nnz = self.nnz();
        let mut column_indices = vec![0usize; nnz];
        let mut values = vec![0.0; nnz];
        let mut next = row_pointers.clone();
        for i in 0..m {
            for k in self.row_pointers[i]..self.row_pointers[i + 1] {
                let c = self.column_indices[k];
                let p = next[c];
                column_indices[p] = i;
                values[p] = self.values[k];
                next[c] += 1;
            }
        }

        CsrMatrix { dim: Dim { nrows: n, ncols: m }, row_pointers, column_indices, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::builder::MatrixBuilder;

    fn sample() -> CsrMatrix {
        // [ 10  0  3
        //    0 20  0
        //    2  0 35 ]
        let mut b = MatrixBuilder::new(3, 3);
        b.push(0, 0, 10.0).unwrap();
        b.push(0, 2, 3.0).unwrap();
        b.push(1, 1, 20.0).unwrap();
        b.push(2, 0, 2.0).unwrap();
        b.push(2, 2, 30.0).unwrap();
        b.push(2, 2, 5.0).unwrap();
        b.build()
    }

    #[test]
    fn row_access_and_invariants() {
        let a = sample();
        assert!(a.check_invariants().is_ok());
        assert_eq!(a.nnz(), 5);
        let (c1, v1) = a.row(2);
        assert_eq!(c1, &[0, 2]);
        assert_eq!(v1, &[2.0, 35.0]);
    }

    #[test]
    fn invariants_reject_unsorted_columns() {
        let a = CsrMatrix {
            dim: Dim { nrows: 1, ncols: 3 },
            row_pointers: vec![0, 2],
            column_indices: vec![2, 0],
            values: vec![1.0, 1.0],
        };
        assert!(matches!(
            a.check_invariants(),
            Err(CsrError::ColumnsNotStrictlyIncreasing { .. })
        ));
    }

    #[test]
    fn matvec() {
        let a = sample();
        let mut y = vec![0.0; 3];
        a.mul_vec_into(&[1.0, 2.0, 3.0], &mut y);
        assert_eq!(y, vec![19.0, 40.0, 107.0]);
    }

    #[test]
    fn diagonal_fills_missing_entries_with_zero() {
        let mut b = MatrixBuilder::new(2, 2);
        b.push(0, 1, 4.0).unwrap();
        b.push(1, 1, 5.0).unwrap();
        let a = b.build();
        assert_eq!(a.diagonal(), vec![0.0, 5.0]);
    }

    #[test]
    fn zero_diagonal_leaves_off_diagonals() {
        let mut a = sample();
        a.zero_diagonal();
        assert_eq!(a.diagonal(), vec![0.0, 0.0, 0.0]);
        let (_, v0) = a.row(0);
        assert_eq!(v0[1], 3.0);
    }

    #[test]
    fn sub_mat_counts_match_selectors() {
        let a = sample();
        let sub = a.sub_mat(&[1.0, 0.0, 1.0], &[1.0, 0.0, 1.0]);
        assert_eq!(sub.dim, Dim { nrows: 2, ncols: 2 });
        assert_eq!(sub.row_pointers, vec![0, 2, 4]);
        assert_eq!(sub.column_indices, vec![0, 1, 0, 1]);
        assert_eq!(sub.values, vec![10.0, 3.0, 2.0, 35.0]);
        assert!(sub.check_invariants().is_ok());
    }

    #[test]
    fn transpose_round_trip() {
        let a = sample();
        let t = a.transpose();
        assert!(t.check_invariants().is_ok());
        assert_eq!(t.dim, Dim { nrows: 3, ncols: 3 });
        let (c0, v0) = t.row(0);
        assert_eq!(c0, &[0, 2]);
        assert_eq!(v0, &[10.0, 2.0]);
        assert_eq!(t.transpose(), a);
    }

    #[test]
    fn frobenius_distance_from_identity() {
        let mut b = MatrixBuilder::new(2, 2);
        b.push(0, 0, 1.0).unwrap();
        b.push(1, 1, 1.0).unwrap();
        let eye = b.build();
        assert_eq!(eye.fro_norm_sq_minus_identity(), 0.0);

        let mut b = MatrixBuilder::new(2, 2);
        b.push(0, 0, 3.0).unwrap();
        b.push(0, 1, 1.0).unwrap();
        let a = b.build();
        // (3-1)^2 + 1^2, plus 1 for the missing second diagonal.
        assert_eq!(a.fro_norm_sq_minus_identity(), 6.0);
    }
}
