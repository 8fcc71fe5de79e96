//! Server Concurrency Controller (`spec.md` §4.4): per-model canonical
//! version counter and the recent-operation history window needed to
//! rebase a late-arriving submission against everything it missed.

use std::collections::VecDeque;

use crate::error::{CoreError, Result};
use crate::op::{AppliedOperation, Operation};
use crate::transform::transform;

/// One history entry: the version it was assigned, the op as applied, and
/// the session that originated it (excluded when folding a later
/// submission from that same session, since a participant never needs to
/// transform against its own prior ops — they're already reflected in its
/// context version).
#[derive(Debug, Clone)]
struct HistoryEntry {
    version: u64,
    op: AppliedOperation,
    session_id: String,
}

/// Owns `modelVersion` and the bounded `history` deque (`spec.md` §4.4).
#[derive(Debug)]
pub struct ServerConcurrencyController {
    model_version: u64,
    history: VecDeque<HistoryEntry>,
}

impl ServerConcurrencyController {
    pub fn new(model_version: u64) -> Self {
        Self {
            model_version,
            history: VecDeque::new(),
        }
    }

    pub fn model_version(&self) -> u64 {
        self.model_version
    }

    /// `processSubmission` (`spec.md` §4.4): transforms `op` against every
    /// intervening history entry not originated by `session_id`, assigns
    /// the next version, and returns `(assignedVersion, transformedOp)`.
    /// The caller is responsible for applying the transformed op to the
    /// tree and calling [`Self::record`] to commit it to history.
    pub fn process_submission(
        &self,
        session_id: &str,
        context_version: u64,
        op: Operation,
    ) -> Result<(u64, Operation)> {
        if context_version > self.model_version {
            return Err(CoreError::InvalidContextVersion {
                context: context_version,
                model: self.model_version,
            });
        }

        let mut transformed = op;
        for entry in self.history.iter().filter(|e| e.version > context_version) {
            if entry.session_id == session_id {
                continue;
            }
            let (_, client2) = transform(
                Operation::Discrete(entry.op.to_discrete()),
                transformed,
            )?;
            transformed = client2;
        }

        let assigned_version = self.model_version + 1;
        Ok((assigned_version, transformed))
    }

    /// Commit a processed submission: advance `modelVersion` and append to
    /// history. Must be called with the same `assignedVersion` returned by
    /// the preceding [`Self::process_submission`] call, in strict order.
    pub fn record(&mut self, assigned_version: u64, op: AppliedOperation, session_id: String) {
        debug_assert_eq!(
            assigned_version,
            self.model_version + 1,
            "server concurrency controller versions must be assigned in strict order"
        );
        self.model_version = assigned_version;
        self.history.push_back(HistoryEntry {
            version: assigned_version,
            op,
            session_id,
        });
    }

    /// Evict history entries older than the minimum `contextVersion`
    /// across currently-registered participants (`spec.md` §4.4: "kept
    /// bounded to the minimum window required").
    pub fn evict_before(&mut self, min_context_version: u64) {
        while let Some(front) = self.history.front() {
            if front.version <= min_context_version {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{DiscreteOperation, Kind};
    use crate::value::ValueId;

    fn applied(vid: &str, kind: Kind) -> AppliedOperation {
        AppliedOperation::from(DiscreteOperation::new(ValueId::new(vid), kind))
    }

    #[test]
    fn rejects_context_version_ahead_of_model() {
        let scc = ServerConcurrencyController::new(3);
        let err = scc
            .process_submission(
                "alpha",
                4,
                Operation::discrete(ValueId::new("s1"), Kind::StringSet { value: "x".into() }),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidContextVersion { context: 4, model: 3 }));
    }

    #[test]
    fn scenario_1_rebases_beta_against_alpha() {
        // spec.md §8 scenario 1.
        let mut scc = ServerConcurrencyController::new(1);

        let (v1, op1) = scc
            .process_submission(
                "alpha",
                1,
                Operation::discrete(
                    ValueId::new("s1"),
                    Kind::StringInsert { index: 1, value: "X".into() },
                ),
            )
            .unwrap();
        assert_eq!(v1, 2);
        scc.record(v1, applied("s1", Kind::StringInsert { index: 1, value: "X".into() }), "alpha".into());
        let _ = op1;

        let (v2, op2) = scc
            .process_submission(
                "beta",
                1,
                Operation::discrete(
                    ValueId::new("s1"),
                    Kind::StringInsert { index: 1, value: "Y".into() },
                ),
            )
            .unwrap();
        assert_eq!(v2, 3);
        match op2 {
            Operation::Discrete(d) => {
                assert_eq!(d.kind, Kind::StringInsert { index: 2, value: "Y".into() });
            }
            _ => panic!("expected discrete"),
        }
    }

    #[test]
    fn own_session_history_is_skipped() {
        let mut scc = ServerConcurrencyController::new(1);
        let (v1, _) = scc
            .process_submission(
                "alpha",
                1,
                Operation::discrete(ValueId::new("s1"), Kind::StringSet { value: "a".into() }),
            )
            .unwrap();
        scc.record(v1, applied("s1", Kind::StringSet { value: "a".into() }), "alpha".into());

        let (v2, op2) = scc
            .process_submission(
                "alpha",
                1,
                Operation::discrete(ValueId::new("s1"), Kind::StringSet { value: "b".into() }),
            )
            .unwrap();
        assert_eq!(v2, 2);
        match op2 {
            Operation::Discrete(d) => assert_eq!(d.kind, Kind::StringSet { value: "b".into() }),
            _ => panic!("expected discrete"),
        }
    }

    #[test]
    fn eviction_trims_acknowledged_history() {
        let mut scc = ServerConcurrencyController::new(0);
        for i in 0..5u64 {
            scc.record(
                i + 1,
                applied("s1", Kind::NumberAdd { value: 1.0 }),
                "alpha".into(),
            );
        }
        assert_eq!(scc.history_len(), 5);
        scc.evict_before(3);
        assert_eq!(scc.history_len(), 2);
    }
}
