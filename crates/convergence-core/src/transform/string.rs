//! Transform rules for the string family (`StringInsert`, `StringRemove`,
//! `StringSet`) against each other, `spec.md` §4.2.

use crate::error::CoreError;
use crate::op::{CompoundOperation, DiscreteOperation, Kind, Operation};

use super::Pair;

pub fn transform_pair(s: &DiscreteOperation, c: &DiscreteOperation) -> Result<Pair, CoreError> {
    match (&s.kind, &c.kind) {
        (Kind::StringInsert { index: si, value: sv }, Kind::StringInsert { index: ci, value: cv }) => {
            let (s2, c2) = insert_vs_insert(*si, sv, *ci, cv);
            Ok((discrete(s, s2), discrete(c, c2)))
        }
        (Kind::StringInsert { index: si, value: sv }, Kind::StringRemove { index: ci, value: cv }) => {
            let (s2, c2) = insert_vs_remove(*si, sv, *ci, cv.chars().count());
            Ok((discrete(s, s2), c2.into_op(c)))
        }
        (Kind::StringRemove { index: si, value: sv }, Kind::StringInsert { index: ci, value: cv }) => {
            let (c2, s2) = insert_vs_remove(*ci, cv, *si, sv.chars().count());
            Ok((s2.into_op(s), discrete(c, c2)))
        }
        (Kind::StringRemove { index: si, value: sv }, Kind::StringRemove { index: ci, value: cv }) => {
            let (s2, c2) = remove_vs_remove(*si, sv.chars().count(), *ci, cv.chars().count());
            Ok((s2.into_op(s), c2.into_op(c)))
        }
        // A `StringSet` replaces the whole value; it dominates any partial
        // edit on the other side, which becomes a no-op. Two concurrent
        // sets tie-break server-favored.
        (Kind::StringSet { .. }, _) => Ok((identity(s), noop(c))),
        (_, Kind::StringSet { .. }) => Ok((noop(s), identity(c))),
        _ => Err(CoreError::Transform(format!(
            "unsupported string/string pair: {:?} vs {:?}",
            s.kind, c.kind
        ))),
    }
}

fn discrete(template: &DiscreteOperation, kind: Kind) -> Operation {
    Operation::Discrete(DiscreteOperation {
        vid: template.vid.clone(),
        no_op: false,
        kind,
    })
}

fn identity(op: &DiscreteOperation) -> Operation {
    Operation::Discrete(op.clone())
}

fn noop(op: &DiscreteOperation) -> Operation {
    Operation::Discrete(op.as_no_op())
}

/// Either a single resulting kind or two (the bisected-remove case).
enum RemoveOutcome {
    One(Kind),
    Split(Kind, Kind),
}

impl RemoveOutcome {
    fn into_op(self, template: &DiscreteOperation) -> Operation {
        match self {
            RemoveOutcome::One(kind) => discrete(template, kind),
            RemoveOutcome::Split(a, b) => Operation::Compound(CompoundOperation {
                ops: vec![
                    DiscreteOperation::new(template.vid.clone(), a),
                    DiscreteOperation::new(template.vid.clone(), b),
                ],
            }),
        }
    }
}

fn insert_vs_insert(si: usize, sv: &str, ci: usize, cv: &str) -> (Kind, Kind) {
    use std::cmp::Ordering;
    match si.cmp(&ci) {
        Ordering::Less => (
            Kind::StringInsert { index: si, value: sv.to_string() },
            Kind::StringInsert {
                index: ci + sv.chars().count(),
                value: cv.to_string(),
            },
        ),
        Ordering::Greater => (
            Kind::StringInsert {
                index: si + cv.chars().count(),
                value: sv.to_string(),
            },
            Kind::StringInsert { index: ci, value: cv.to_string() },
        ),
        // Tie-break server-favored: server's index is held, client shifts.
        Ordering::Equal => (
            Kind::StringInsert { index: si, value: sv.to_string() },
            Kind::StringInsert {
                index: ci + sv.chars().count(),
                value: cv.to_string(),
            },
        ),
    }
}

/// Transform an insert at `insert_index` against a remove of `remove_len`
/// characters starting at `remove_index`. Returns `(insert', remove')`.
fn insert_vs_remove(
    insert_index: usize,
    insert_value: &str,
    remove_index: usize,
    remove_len: usize,
) -> (Kind, RemoveOutcome) {
    let insert_len = insert_value.chars().count();
    let remove_end = remove_index + remove_len;

    if insert_index <= remove_index {
        // Insert entirely before (or at) the removed range: remove shifts
        // right, insert is untouched.
        (
            Kind::StringInsert {
                index: insert_index,
                value: insert_value.to_string(),
            },
            RemoveOutcome::One(Kind::StringRemove {
                index: remove_index + insert_len,
                value: removed_placeholder(remove_len),
            }),
        )
    } else if insert_index >= remove_end {
        // Insert entirely after the removed range: insert shifts left.
        (
            Kind::StringInsert {
                index: insert_index - remove_len,
                value: insert_value.to_string(),
            },
            RemoveOutcome::One(Kind::StringRemove {
                index: remove_index,
                value: removed_placeholder(remove_len),
            }),
        )
    } else {
        // Insert falls strictly inside the removed range: the insert wins
        // and the remove is bisected around it (`spec.md` §4.2).
        let left_len = insert_index - remove_index;
        let right_len = remove_len - left_len;
        (
            Kind::StringInsert {
                index: insert_index,
                value: insert_value.to_string(),
            },
            RemoveOutcome::Split(
                Kind::StringRemove {
                    index: remove_index,
                    value: removed_placeholder(left_len),
                },
                Kind::StringRemove {
                    index: insert_index + insert_len,
                    value: removed_placeholder(right_len),
                },
            ),
        )
    }
}

fn remove_vs_remove(si: usize, slen: usize, ci: usize, clen: usize) -> (RemoveOutcome, RemoveOutcome) {
    let s_end = si + slen;
    let c_end = ci + clen;
    if s_end <= ci {
        // Disjoint, server entirely before client: client shifts left.
        (
            RemoveOutcome::One(Kind::StringRemove {
                index: si,
                value: removed_placeholder(slen),
            }),
            RemoveOutcome::One(Kind::StringRemove {
                index: ci - slen,
                value: removed_placeholder(clen),
            }),
        )
    } else if c_end <= si {
        (
            RemoveOutcome::One(Kind::StringRemove {
                index: si - clen,
                value: removed_placeholder(slen),
            }),
            RemoveOutcome::One(Kind::StringRemove {
                index: ci,
                value: removed_placeholder(clen),
            }),
        )
    } else {
        // Overlapping ranges: server-favored. The server's removal proceeds
        // unchanged; the client's removal is narrowed to whatever portion
        // of its range the server hasn't already removed, and becomes a
        // no-op if nothing remains.
        let overlap_start = si.max(ci);
        let overlap_end = s_end.min(c_end);
        let overlap = overlap_end.saturating_sub(overlap_start);
        let remaining = clen.saturating_sub(overlap);
        let client_outcome = if remaining == 0 {
            RemoveOutcome::One(Kind::StringRemove {
                index: ci.min(si),
                value: String::new(),
            })
        } else if ci < si {
            RemoveOutcome::One(Kind::StringRemove {
                index: ci,
                value: removed_placeholder(remaining),
            })
        } else {
            RemoveOutcome::One(Kind::StringRemove {
                index: si,
                value: removed_placeholder(remaining),
            })
        };
        (
            RemoveOutcome::One(Kind::StringRemove {
                index: si,
                value: removed_placeholder(slen),
            }),
            client_outcome,
        )
    }
}

/// `StringRemove.value` records the removed text for inversion; when a
/// remove is synthesized by the transform (rather than replayed from a
/// participant), its exact content isn't known here, only its length. A
/// placeholder of that length keeps `value.chars().count()` accurate for
/// any further transform step; the real text is filled in by the caller
/// from the tree before the op is applied.
fn removed_placeholder(len: usize) -> String {
    "\u{0}".repeat(len)
}
