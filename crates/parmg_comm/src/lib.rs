//! Communication abstraction for the row-distributed AMG setup.
//!
//! The setup is single-program-multiple-data: every rank runs the same
//! sequential code and meets the others only inside collectives. Two kinds
//! of collective exist:
//!
//! - scalar all-reduce ([`Comm::allreduce_f64`] / [`Comm::allreduce_i64`]),
//! - gather-scatter over shared degrees of freedom ([`GatherScatter`]),
//!   built once per index space from a [`DofIds`] table,
//!
//! plus [`Comm::transfer`], which routes typed records to explicit
//! destination ranks (the assembly path uses it to move matrix entries to
//! their row owners).
//!
//! Correctness requires that all ranks issue the same sequence of
//! collectives with compatible arguments; the implementations here do not
//! detect violations.

pub mod dofs;
pub mod serial;
pub mod threaded;

pub use serial::SerialComm;
pub use threaded::ThreadComm;

/// Reduction applied by a collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Add,
    Max,
    Min,
}

impl ReduceOp {
    pub fn fold(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Add => a + b,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }

    pub fn fold_i64(self, a: i64, b: i64) -> i64 {
        match self {
            ReduceOp::Add => a + b,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }
}

/// Global ids for the local column slots of a row-distributed matrix.
///
/// The first `num_owned` slots are the dofs whose rows live on this rank,
/// in row order; the remaining slots are ghosts, replicas of dofs owned by
/// other ranks. Both halves are sorted by id, which keeps [`DofIds::slot_of`]
/// a pair of binary searches. This replaces the sign-encoded id vector of
/// the gather-scatter library interface: ownership is positional, ids are
/// plain `u64`, and id 0 never appears (it means "masked" on input and is
/// dropped before assembly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofIds {
    ids: Vec<u64>,
    num_owned: usize,
}

impl DofIds {
    pub fn new(ids: Vec<u64>, num_owned: usize) -> Self {
        assert!(num_owned <= ids.len());
        debug_assert!(ids[..num_owned].is_sorted());
        debug_assert!(ids[num_owned..].is_sorted());
        Self { ids, num_owned }
    }

    pub fn empty() -> Self {
        Self { ids: Vec::new(), num_owned: 0 }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn id(&self, slot: usize) -> u64 {
        self.ids[slot]
    }

    pub fn is_owned(&self, slot: usize) -> bool {
        slot < self.num_owned
    }

    pub fn owned(&self) -> &[u64] {
        &self.ids[..self.num_owned]
    }

    pub fn ghosts(&self) -> &[u64] {
        &self.ids[self.num_owned..]
    }

    /// Local slot of a global id, searching owned slots first.
    pub fn slot_of(&self, id: u64) -> Option<usize> {
        if let Ok(i) = self.ids[..self.num_owned].binary_search(&id) {
            return Some(i);
        }
        self.ids[self.num_owned..]
            .binary_search(&id)
            .ok()
            .map(|i| self.num_owned + i)
    }

    /// Sub-select the slots where `mask` is non-zero.
    ///
    /// Ownership and the owned-first ordering are preserved, so the result
    /// is a valid id table for the selected sub-space.
    pub fn filter(&self, mask: &[f64]) -> DofIds {
        assert_eq!(mask.len(), self.ids.len());
        let mut ids = Vec::new();
        let mut num_owned = 0;
        for (slot, &id) in self.ids.iter().enumerate() {
            if mask[slot] != 0.0 {
                ids.push(id);
                if slot < self.num_owned {
                    num_owned += 1;
                }
            }
        }
        DofIds { ids, num_owned }
    }
}

/// Gather-scatter handle over one [`DofIds`] index space.
///
/// Buffers passed in must have exactly one element per slot. Between
/// exchanges, ghost slots may hold stale values; the two calls differ in
/// who contributes and who receives:
pub trait GatherScatter {
    /// Reduce the values held in *owned* slots of each id across all ranks
    /// and write the result to every slot sharing the id. With the usual
    /// one-owner-per-id tables this broadcasts the owner's value to the
    /// ghosts. Ids owned by no rank leave their ghost slots untouched.
    fn exchange(&self, buf: &mut [f64], op: ReduceOp);

    /// Reduce the values held in *all* slots of each id across all ranks
    /// and write the result to owned slots only; ghost slots are unchanged.
    fn gather(&self, buf: &mut [f64], op: ReduceOp);

    /// Number of slots the handle was built for.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A rank's view of the communicator.
pub trait Comm: Clone {
    type Gs: GatherScatter;

    fn rank(&self) -> usize;

    fn nranks(&self) -> usize;

    fn allreduce_f64(&self, op: ReduceOp, value: f64) -> f64;

    fn allreduce_i64(&self, op: ReduceOp, value: i64) -> i64;

    /// Route records to destination ranks and collect the records addressed
    /// to this rank, grouped by source rank in rank order.
    fn transfer<T: Send + 'static>(&self, outgoing: Vec<(usize, T)>) -> Vec<T>;

    /// Build a gather-scatter handle for an id table.
    fn gs_setup(&self, ids: &DofIds) -> Self::Gs;
}
