//! Client Concurrency Controller (`spec.md` §4.3): per-participant state
//! tracking the context version and the locally submitted, not-yet-
//! acknowledged operations.

use std::collections::VecDeque;

use crate::op::Operation;
use crate::transform::transform;
use crate::value::ValueId;
use crate::error::Result;

/// One per participant per model. Owned by the session actor on the
/// client side; the server-side coordinator never constructs one of
/// these, but the same type is used by tests reconstructing a
/// participant's view of the tree (`spec.md` §8 invariant).
#[derive(Debug, Clone)]
pub struct ClientConcurrencyController {
    vid: ValueId,
    context_version: u64,
    outgoing: VecDeque<Operation>,
}

impl ClientConcurrencyController {
    pub fn new(vid: ValueId, context_version: u64) -> Self {
        Self {
            vid,
            context_version,
            outgoing: VecDeque::new(),
        }
    }

    pub fn context_version(&self) -> u64 {
        self.context_version
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    /// Enqueue a locally originated op, stamped with the current context
    /// version, to be forwarded to the SCC.
    pub fn submit(&mut self, op: Operation) {
        self.outgoing.push_back(op);
    }

    /// An outgoing op was acknowledged by the server: pop it and advance
    /// the context version.
    pub fn on_ack(&mut self) {
        self.outgoing.pop_front();
        self.context_version += 1;
    }

    /// A remote op arrived. Transform it against every still-outstanding
    /// local op in submission order, replacing each with its transformed
    /// counterpart, and return the version of the remote op to apply
    /// locally. The context version advances regardless of whether any
    /// outgoing ops existed.
    pub fn on_remote(&mut self, remote: Operation) -> Result<Operation> {
        let mut remote = remote;
        let mut rebased = VecDeque::with_capacity(self.outgoing.len());
        for outgoing in self.outgoing.drain(..) {
            let (remote2, outgoing2) = transform(remote, outgoing)?;
            remote = remote2;
            rebased.push_back(outgoing2);
        }
        self.outgoing = rebased;
        self.context_version += 1;
        Ok(remote)
    }
}
