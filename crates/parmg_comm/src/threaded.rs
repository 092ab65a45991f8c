//! Simulated multi-rank communicator.
//!
//! Runs N ranks as threads of one process and implements every collective
//! as deposit / barrier / read / barrier / reset against shared boards.
//! Reductions fold contributions in rank order, so results are bitwise
//! deterministic run to run regardless of thread scheduling.
//!
//! The lockstep structure relies on the same contract real gather-scatter
//! libraries do: all ranks issue the same sequence of collectives. A rank
//! that skips one deadlocks the group at the next barrier.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};

use log::debug;

use crate::{Comm, DofIds, GatherScatter, ReduceOp};

struct Shared {
    nranks: usize,
    barrier: Barrier,
    f64_board: Mutex<Vec<Option<f64>>>,
    i64_board: Mutex<Vec<Option<i64>>>,
    gs_board: Mutex<Vec<Option<Vec<(u64, f64)>>>>,
    mailboxes: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Shared {
    fn new(nranks: usize) -> Self {
        Self {
            nranks,
            barrier: Barrier::new(nranks),
            f64_board: Mutex::new(vec![None; nranks]),
            i64_board: Mutex::new(vec![None; nranks]),
            gs_board: Mutex::new(vec![None; nranks]),
            mailboxes: Mutex::new(None),
        }
    }
}

#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Run `f` once per rank on scoped threads and collect the results in
    /// rank order. Panics in any rank propagate.
    pub fn run<R, F>(nranks: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadComm) -> R + Sync,
    {
        assert!(nranks > 0);
        let shared = Arc::new(Shared::new(nranks));
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..nranks)
                .map(|rank| {
                    let comm = ThreadComm { rank, shared: Arc::clone(&shared) };
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}

/// Deposit phase, rendezvous, read phase, rendezvous, leader reset,
/// rendezvous. The third barrier keeps a fast rank from depositing into
/// the next collective before the board is cleared.
macro_rules! lockstep {
    ($self:expr, $board:ident, $value:expr, $read:expr) => {{
        {
            let mut board = $self.shared.$board.lock().unwrap();
            board[$self.rank] = Some($value);
        }
        $self.shared.barrier.wait();
        let result = {
            let board = $self.shared.$board.lock().unwrap();
            $read(&board[..])
        };
        let done = $self.shared.barrier.wait();
        if done.is_leader() {
            let mut board = $self.shared.$board.lock().unwrap();
            board.iter_mut().for_each(|slot| *slot = None);
        }
        $self.shared.barrier.wait();
        result
    }};
}

impl Comm for ThreadComm {
    type Gs = ThreadGs;

    fn rank(&self) -> usize {
        self.rank
    }

    fn nranks(&self) -> usize {
        self.shared.nranks
    }

    fn allreduce_f64(&self, op: ReduceOp, value: f64) -> f64 {
        lockstep!(self, f64_board, value, |board: &[Option<f64>]| {
            board
                .iter()
                .map(|slot| slot.expect("rank missed the collective"))
                .reduce(|a, b| op.fold(a, b))
                .expect("empty communicator")
        })
    }

    fn allreduce_i64(&self, op: ReduceOp, value: i64) -> i64 {
        lockstep!(self, i64_board, value, |board: &[Option<i64>]| {
            board
                .iter()
                .map(|slot| slot.expect("rank missed the collective"))
                .reduce(|a, b| op.fold_i64(a, b))
                .expect("empty communicator")
        })
    }

    fn transfer<T: Send + 'static>(&self, outgoing: Vec<(usize, T)>) -> Vec<T> {
        let nranks = self.shared.nranks;
        {
            let mut slot = self.shared.mailboxes.lock().unwrap();
            let boxed = slot.get_or_insert_with(|| {
                let empty: Vec<Vec<Vec<T>>> = (0..nranks)
                    .map(|_| (0..nranks).map(|_| Vec::new()).collect())
                    .collect();
                Box::new(empty)
            });
            let boards = boxed
                .downcast_mut::<Vec<Vec<Vec<T>>>>()
                .expect("transfer record type differs across ranks");
            for (dest, record) in outgoing {
                assert!(dest < nranks, "transfer addressed rank {dest} of {nranks}");
                boards[self.rank][dest].push(record);
            }
        }
        self.shared.barrier.wait();
        let mut incoming = Vec::new();
        {
            let mut slot = self.shared.mailboxes.lock().unwrap();
            let boards = slot
                .as_mut()
                .expect("mailboxes cleared early")
                .downcast_mut::<Vec<Vec<Vec<T>>>>()
                .expect("transfer record type differs across ranks");
            for src in 0..nranks {
                incoming.append(&mut boards[src][self.rank]);
            }
        }
        let done = self.shared.barrier.wait();
        if done.is_leader() {
            *self.shared.mailboxes.lock().unwrap() = None;
        }
        self.shared.barrier.wait();
        incoming
    }

    fn gs_setup(&self, ids: &DofIds) -> ThreadGs {
        debug!(
            "gs_setup on rank {}: {} slots, {} owned",
            self.rank,
            ids.len(),
            ids.num_owned()
        );
        ThreadGs { comm: self.clone(), ids: ids.clone() }
    }
}

#[derive(Clone)]
pub struct ThreadGs {
    comm: ThreadComm,
    ids: DofIds,
}

impl ThreadGs {
    /// Shared body of both collectives: contribute the selected slots,
    /// fold contributions per id in rank order, then let `apply` pull the
    /// reduced value into the slots it is responsible for.
    fn reduce(
        &self,
        buf: &mut [f64],
        op: ReduceOp,
        contribute_ghosts: bool,
        apply: impl Fn(&DofIds, &mut [f64], &HashMap<u64, f64>),
    ) {
        assert_eq!(buf.len(), self.ids.len());
        let contributions: Vec<(u64, f64)> = self
            .ids
            .ids()
            .iter()
            .enumerate()
            .filter(|(slot, _)| contribute_ghosts || self.ids.is_owned(*slot))
            .map(|(slot, &id)| (id, buf[slot]))
            .collect();
        let fold = |board: &[Option<Vec<(u64, f64)>>]| {
            let mut reduced: HashMap<u64, f64> = HashMap::new();
            for slot in board {
                for &(id, value) in slot.as_ref().expect("rank missed the exchange") {
                    reduced
                        .entry(id)
                        .and_modify(|acc| *acc = op.fold(*acc, value))
                        .or_insert(value);
                }
            }
            reduced
        };
        let reduced = lockstep!(self.comm, gs_board, contributions, fold);
        apply(&self.ids, buf, &reduced);
    }
}

impl GatherScatter for ThreadGs {
    fn exchange(&self, buf: &mut [f64], op: ReduceOp) {
        self.reduce(buf, op, false, |ids, buf, reduced| {
            for (slot, id) in ids.ids().iter().enumerate() {
                if let Some(&value) = reduced.get(id) {
                    buf[slot] = value;
                }
            }
        });
    }

    fn gather(&self, buf: &mut [f64], op: ReduceOp) {
        self.reduce(buf, op, true, |ids, buf, reduced| {
            for (slot, id) in ids.owned().iter().enumerate() {
                buf[slot] = reduced[id];
            }
        });
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allreduce_folds_every_rank() {
        let sums = ThreadComm::run(4, |comm| {
            comm.allreduce_f64(ReduceOp::Add, (comm.rank() + 1) as f64)
        });
        assert_eq!(sums, vec![10.0; 4]);

        let maxima =
            ThreadComm::run(3, |comm| comm.allreduce_i64(ReduceOp::Max, comm.rank() as i64));
        assert_eq!(maxima, vec![2; 3]);
    }

    #[test]
    fn transfer_routes_by_destination_in_rank_order() {
        let received = ThreadComm::run(3, |comm| {
            // Every rank sends (src, dest) to every rank including itself.
            let outgoing = (0..comm.nranks()).map(|dest| (dest, (comm.rank(), dest))).collect();
            comm.transfer(outgoing)
        });
        for (dest, records) in received.into_iter().enumerate() {
            assert_eq!(records, vec![(0, dest), (1, dest), (2, dest)]);
        }
    }

    #[test]
    fn exchange_broadcasts_owner_values_to_ghosts() {
        // Dof 7 is owned by rank 0 and ghosted on rank 1; dof 8 the other
        // way round. Ghost slots start stale.
        let bufs = ThreadComm::run(2, |comm| {
            let (ids, mut buf) = if comm.rank() == 0 {
                (DofIds::new(vec![7, 8], 1), vec![1.25, -3.0])
            } else {
                (DofIds::new(vec![8, 7], 1), vec![4.5, -9.0])
            };
            let gs = comm.gs_setup(&ids);
            gs.exchange(&mut buf, ReduceOp::Add);
            buf
        });
        assert_eq!(bufs[0], vec![1.25, 4.5]);
        assert_eq!(bufs[1], vec![4.5, 1.25]);
    }

    #[test]
    fn exchange_on_consistent_buffers_is_identity() {
        let bufs = ThreadComm::run(2, |comm| {
            let ids = if comm.rank() == 0 {
                DofIds::new(vec![7, 8], 1)
            } else {
                DofIds::new(vec![8, 7], 1)
            };
            let gs = comm.gs_setup(&ids);
            let mut buf = if comm.rank() == 0 { vec![1.0, 2.0] } else { vec![2.0, 1.0] };
            gs.exchange(&mut buf, ReduceOp::Add);
            gs.exchange(&mut buf, ReduceOp::Add);
            buf
        });
        assert_eq!(bufs[0], vec![1.0, 2.0]);
        assert_eq!(bufs[1], vec![2.0, 1.0]);
    }

    #[test]
    fn gather_reduces_ghost_contributions_onto_the_owner() {
        let bufs = ThreadComm::run(2, |comm| {
            let (ids, mut buf) = if comm.rank() == 0 {
                (DofIds::new(vec![7, 8], 1), vec![1.0, 5.0])
            } else {
                (DofIds::new(vec![8, 7], 1), vec![2.0, 6.0])
            };
            let gs = comm.gs_setup(&ids);
            gs.gather(&mut buf, ReduceOp::Max);
            buf
        });
        // Owners now hold the max over both replicas; ghost slots kept
        // their local values.
        assert_eq!(bufs[0], vec![6.0, 5.0]);
        assert_eq!(bufs[1], vec![5.0, 6.0]);
    }
}
