//! Setup phase of a parallel algebraic multigrid preconditioner.
//!
//! Consumes an unassembled, row-distributed sparse operator (global dof
//! ids plus local (i, j, v) triples) and produces the hierarchy the
//! companion solve phase applies: per level an interpolation matrix W,
//! the forward action AfP, the fine block Aff with its Chebyshev smoother
//! parameters, and the packed inverse-scaled fine diagonals.
//!
//! All cross-rank coordination goes through the [`parmg_comm`] traits;
//! run serially with [`parmg_comm::SerialComm`] or across simulated ranks
//! with [`parmg_comm::ThreadComm`]. Every rank must call [`setup`]
//! collectively with its own slice of the operator.
//!
//! ```
//! use parmg_comm::SerialComm;
//! use parmg_setup::{AmgConfig, setup};
//!
//! // 2x2 operator [[2, -1], [-1, 2]] on global dofs 1 and 2.
//! let ids = [1u64, 2];
//! let rows = [0usize, 0, 1, 1];
//! let cols = [0usize, 1, 0, 1];
//! let vals = [2.0, -1.0, -1.0, 2.0];
//! let hierarchy =
//!     setup(&SerialComm, &ids, &rows, &cols, &vals, &AmgConfig::default()).unwrap();
//! assert!(hierarchy.levels.len() >= 1);
//! ```

pub mod assemble;
pub mod cheby;
pub mod coarsen;
pub mod error;
pub mod interp;
pub mod lanczos;
pub mod pcg;
pub mod setup;
pub mod sparse;

pub use error::{AmgError, AmgResult};
pub use setup::{AmgHierarchy, AmgLevel, LevelSummary, SharedMatrix, setup};

/// Setup tolerances. The defaults are the production values; `itol` and
/// `stol` are accepted but currently drive nothing (they parameterize the
/// interpolation weight iteration and the sparsifier, both of which stop
/// at their documented single-pass / disabled behavior).
#[derive(Debug, Clone)]
pub struct AmgConfig {
    /// Level-building target: each level's smoother + correction aims to
    /// contract the residual below 1 - sqrt(1 - tol).
    pub tol: f64,
    /// Coarsening threshold on the fixed-point score bound.
    pub ctol: f64,
    /// Interpolation weight tolerance (reserved).
    pub itol: f64,
    /// Sparsification tolerance (reserved).
    pub stol: f64,
    /// Relative cutoff of the mat-max strength filter.
    pub mat_max_tol: f64,
    /// Lanczos iteration cap.
    pub lanczos_max_iter: usize,
    /// Initial hierarchy capacity; the level store grows past it freely.
    pub init_levels: usize,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            tol: 0.5,
            ctol: 0.7,
            itol: 1e-4,
            stol: 1e-4,
            mat_max_tol: 0.1,
            lanczos_max_iter: 300,
            init_levels: 10,
        }
    }
}
