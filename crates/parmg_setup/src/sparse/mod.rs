pub mod builder;
pub mod csr;
pub mod error;
pub mod mtx;

/// Local matrix dimensions.
///
/// For row-distributed operators `nrows` counts the rows owned by this
/// rank and `ncols` the distinct local column slots (owned rows first,
/// then ghosts), so `ncols >= nrows` for the assembled operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim {
    pub nrows: usize,
    pub ncols: usize,
}
