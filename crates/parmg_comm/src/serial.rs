//! Single-process communicator.
//!
//! With one rank every dof is owned, no ghosts exist, and every collective
//! degenerates to the identity. This is the production configuration when
//! the host application runs unpartitioned, and the baseline the threaded
//! tests compare against.

use crate::{Comm, DofIds, GatherScatter, ReduceOp};

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

#[derive(Debug, Clone)]
pub struct SerialGs {
    len: usize,
}

impl GatherScatter for SerialGs {
    fn exchange(&self, buf: &mut [f64], _op: ReduceOp) {
        debug_assert_eq!(buf.len(), self.len);
    }

    fn gather(&self, buf: &mut [f64], _op: ReduceOp) {
        debug_assert_eq!(buf.len(), self.len);
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Comm for SerialComm {
    type Gs = SerialGs;

    fn rank(&self) -> usize {
        0
    }

    fn nranks(&self) -> usize {
        1
    }

    fn allreduce_f64(&self, _op: ReduceOp, value: f64) -> f64 {
        value
    }

    fn allreduce_i64(&self, _op: ReduceOp, value: i64) -> i64 {
        value
    }

    fn transfer<T: Send + 'static>(&self, outgoing: Vec<(usize, T)>) -> Vec<T> {
        outgoing
            .into_iter()
            .map(|(dest, record)| {
                assert_eq!(dest, 0, "serial transfer addressed a non-existent rank");
                record
            })
            .collect()
    }

    fn gs_setup(&self, ids: &DofIds) -> SerialGs {
        // A single rank owns everything it references.
        debug_assert_eq!(ids.num_owned(), ids.len());
        SerialGs { len: ids.len() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectives_are_identities() {
        let comm = SerialComm;
        assert_eq!(comm.allreduce_f64(ReduceOp::Add, 3.25), 3.25);
        assert_eq!(comm.allreduce_i64(ReduceOp::Max, -7), -7);

        let gs = comm.gs_setup(&DofIds::new(vec![1, 4, 6], 3));
        let mut buf = [1.0, 2.0, 3.0];
        gs.exchange(&mut buf, ReduceOp::Add);
        gs.gather(&mut buf, ReduceOp::Max);
        assert_eq!(buf, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn transfer_returns_local_records() {
        let comm = SerialComm;
        let got = comm.transfer(vec![(0, "a"), (0, "b")]);
        assert_eq!(got, vec!["a", "b"]);
    }
}
