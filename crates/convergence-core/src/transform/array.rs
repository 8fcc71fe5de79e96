//! Transform rules for the array family (`ArrayInsert`, `ArrayRemove`,
//! `ArrayReplace`, `ArrayMove`, `ArraySet`), `spec.md` §4.2.
//!
//! `ArrayMove` is modeled as a remove paired with an insert and transformed
//! by composition, per the design note in `spec.md` §9.

use crate::error::CoreError;
use crate::op::{DiscreteOperation, Kind, Operation};
use crate::value::DataValue;

use super::Pair;

pub fn transform_pair(s: &DiscreteOperation, c: &DiscreteOperation) -> Result<Pair, CoreError> {
    // `ArraySet` replaces the whole array; it dominates any other array op,
    // which becomes a no-op. Two concurrent sets tie-break server-favored.
    if matches!(s.kind, Kind::ArraySet { .. }) {
        return Ok((identity(s), noop(c)));
    }
    if matches!(c.kind, Kind::ArraySet { .. }) {
        return Ok((noop(s), identity(c)));
    }

    match (&s.kind, &c.kind) {
        (Kind::ArrayInsert { index: si, value: sv }, Kind::ArrayInsert { index: ci, value: cv }) => {
            let (s2, c2) = insert_vs_insert(*si, *ci);
            Ok((discrete(s, kind_insert(s2, sv)), discrete(c, kind_insert(c2, cv))))
        }
        (Kind::ArrayInsert { index: ii, value: iv }, Kind::ArrayRemove { index: ri }) => {
            let (i2, r2) = insert_vs_remove(*ii, *ri);
            Ok((discrete(s, kind_insert(i2, iv)), remove_or_noop(c, r2)))
        }
        (Kind::ArrayRemove { index: ri }, Kind::ArrayInsert { index: ii, value: iv }) => {
            let (i2, r2) = insert_vs_remove(*ii, *ri);
            Ok((remove_or_noop(s, r2), discrete(c, kind_insert(i2, iv))))
        }
        (Kind::ArrayRemove { index: si }, Kind::ArrayRemove { index: ci }) => {
            let (s2, c2) = remove_vs_remove(*si, *ci);
            Ok((remove_or_noop(s, s2), remove_or_noop(c, c2)))
        }
        (Kind::ArrayInsert { index: ii, value: iv }, Kind::ArrayReplace { index: ri, value: rv }) => {
            let ri2 = shift_after_insert(*ri, *ii);
            Ok((
                discrete(s, Kind::ArrayInsert { index: *ii, value: iv.clone() }),
                discrete(c, Kind::ArrayReplace { index: ri2, value: rv.clone() }),
            ))
        }
        (Kind::ArrayReplace { index: ri, value: rv }, Kind::ArrayInsert { index: ii, value: iv }) => {
            let ri2 = shift_after_insert(*ri, *ii);
            Ok((
                discrete(s, Kind::ArrayReplace { index: ri2, value: rv.clone() }),
                discrete(c, Kind::ArrayInsert { index: *ii, value: iv.clone() }),
            ))
        }
        (Kind::ArrayRemove { index: ri }, Kind::ArrayReplace { index: xi, value: xv }) => {
            if ri == xi {
                // The element being replaced no longer exists; the replace
                // loses to the structural removal.
                Ok((identity(s), noop(c)))
            } else {
                let xi2 = shift_after_remove(*xi, *ri);
                Ok((
                    identity(s),
                    discrete(c, Kind::ArrayReplace { index: xi2, value: xv.clone() }),
                ))
            }
        }
        (Kind::ArrayReplace { index: xi, value: xv }, Kind::ArrayRemove { index: ri }) => {
            if ri == xi {
                Ok((noop(s), identity(c)))
            } else {
                let xi2 = shift_after_remove(*xi, *ri);
                Ok((
                    discrete(s, Kind::ArrayReplace { index: xi2, value: xv.clone() }),
                    identity(c),
                ))
            }
        }
        (Kind::ArrayReplace { index: si, value: sv }, Kind::ArrayReplace { index: ci, .. }) => {
            if si == ci {
                // Same slot: server-favored.
                Ok((identity(s), noop(c)))
            } else {
                let _ = sv;
                Ok((identity(s), identity(c)))
            }
        }
        (Kind::ArrayMove { .. }, _) | (_, Kind::ArrayMove { .. }) => transform_with_move(s, c),
        _ => Err(CoreError::Transform(format!(
            "unsupported array/array pair: {:?} vs {:?}",
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

fn kind_insert(index: usize, value: &DataValue) -> Kind {
    Kind::ArrayInsert {
        index,
        value: value.clone(),
    }
}

fn remove_or_noop(template: &DiscreteOperation, index: Option<usize>) -> Operation {
    match index {
        Some(index) => discrete(template, Kind::ArrayRemove { index }),
        None => noop(template),
    }
}

fn shift_after_insert(index: usize, insert_index: usize) -> usize {
    if index >= insert_index {
        index + 1
    } else {
        index
    }
}

fn shift_after_remove(index: usize, remove_index: usize) -> usize {
    if index > remove_index {
        index - 1
    } else {
        index
    }
}

fn insert_vs_insert(si: usize, ci: usize) -> (usize, usize) {
    use std::cmp::Ordering;
    match si.cmp(&ci) {
        Ordering::Less => (si, ci + 1),
        // Tie-break server-favored: server's position held, client shifts.
        Ordering::Equal | Ordering::Greater => (si + 1, ci),
    }
}

/// `(insert_index, remove_index) -> (insert', remove')`; `remove'` is
/// `None` when the removed slot was itself the one just inserted (never
/// happens for this pair, kept for symmetry with the move decomposition).
fn insert_vs_remove(insert_index: usize, remove_index: usize) -> (usize, Option<usize>) {
    if insert_index <= remove_index {
        (insert_index, Some(remove_index + 1))
    } else {
        (insert_index - 1, Some(remove_index))
    }
}

fn remove_vs_remove(si: usize, ci: usize) -> (Option<usize>, Option<usize>) {
    use std::cmp::Ordering;
    match si.cmp(&ci) {
        Ordering::Equal => (Some(si), None),
        Ordering::Less => (Some(si), Some(ci - 1)),
        Ordering::Greater => (Some(si - 1), Some(ci)),
    }
}

/// Decompose whichever side is an `ArrayMove` into remove+insert and
/// transform by composition (`spec.md` §9).
fn transform_with_move(s: &DiscreteOperation, c: &DiscreteOperation) -> Result<Pair, CoreError> {
    if let Kind::ArrayMove { from_index, to_index } = &s.kind {
        let from_index = *from_index;
        let to_index = *to_index;
        // Apply the move's remove-then-insert against the client op in
        // sequence, threading the client op through both steps.
        let (c_after_remove, c_index_shift) = shift_index_for_other(c, |ci| {
            if ci == from_index {
                None
            } else if ci > from_index {
                Some(ci - 1)
            } else {
                Some(ci)
            }
        });
        let c_op = reindex(c, c_after_remove, c_index_shift)?;
        let insert_pivot = if to_index > from_index { to_index } else { to_index };
        let (c_final, c_index_shift2) =
            shift_index_for_other(&c_op, |ci| Some(shift_after_insert(ci, insert_pivot)));
        let c_op_final = reindex(&c_op, c_final, c_index_shift2)?;
        Ok((identity(s), c_op_final))
    } else if let Kind::ArrayMove { from_index, to_index } = &c.kind {
        let from_index = *from_index;
        let to_index = *to_index;
        let (s_after_remove, s_index_shift) = shift_index_for_other(s, |si| {
            if si == from_index {
                None
            } else if si > from_index {
                Some(si - 1)
            } else {
                Some(si)
            }
        });
        let s_op = reindex(s, s_after_remove, s_index_shift)?;
        let insert_pivot = to_index;
        let (s_final, s_index_shift2) =
            shift_index_for_other(&s_op, |si| Some(shift_after_insert(si, insert_pivot)));
        let s_op_final = reindex(&s_op, s_final, s_index_shift2)?;
        Ok((s_op_final, identity(c)))
    } else {
        Err(CoreError::Transform(
            "transform_with_move called without an ArrayMove operand".to_string(),
        ))
    }
}

/// Returns whether the op carries an array index and, if so, the current
/// value so the caller can recompute it via `f`.
fn shift_index_for_other(
    op: &DiscreteOperation,
    f: impl Fn(usize) -> Option<usize>,
) -> (bool, Option<usize>) {
    match &op.kind {
        Kind::ArrayInsert { index, .. }
        | Kind::ArrayRemove { index }
        | Kind::ArrayReplace { index, .. } => (true, f(*index)),
        Kind::ArrayMove { from_index, .. } => (true, f(*from_index)),
        _ => (false, None),
    }
}

fn reindex(op: &DiscreteOperation, has_index: bool, new_index: Option<usize>) -> Result<Operation, CoreError> {
    if !has_index {
        return Ok(identity(op));
    }
    let new_index = match new_index {
        Some(i) => i,
        None => return Ok(noop(op)),
    };
    let kind = match &op.kind {
        Kind::ArrayInsert { value, .. } => Kind::ArrayInsert {
            index: new_index,
            value: value.clone(),
        },
        Kind::ArrayRemove { .. } => Kind::ArrayRemove { index: new_index },
        Kind::ArrayReplace { value, .. } => Kind::ArrayReplace {
            index: new_index,
            value: value.clone(),
        },
        Kind::ArrayMove { to_index, .. } => Kind::ArrayMove {
            from_index: new_index,
            to_index: *to_index,
        },
        other => other.clone(),
    };
    Ok(discrete(op, kind))
}
