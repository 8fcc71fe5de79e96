//! Folding helpers for transforming a single operation against a sequence
//! of discrete operations, threading the accumulator through each pair
//! (`spec.md` §4.2 "Any discrete vs compound").

use crate::error::CoreError;
use crate::op::{CompoundOperation, DiscreteOperation, Operation};

use super::transform;

/// Flatten an [`Operation`] into its constituent discrete ops.
pub fn flatten(op: Operation) -> Vec<DiscreteOperation> {
    match op {
        Operation::Discrete(d) => vec![d],
        Operation::Compound(c) => c.ops,
    }
}

/// Fold `acc` (server-side) against each element of `many` (client-side) in
/// order, threading the updated accumulator into the next pair. Returns the
/// final accumulator and the transformed (possibly expanded) sequence of
/// `many`.
pub fn fold_against_many(
    mut acc: Operation,
    many: &[DiscreteOperation],
) -> Result<(Operation, Vec<DiscreteOperation>), CoreError> {
    let mut out = Vec::with_capacity(many.len());
    for item in many {
        let (acc2, item2) = transform(acc, Operation::Discrete(item.clone()))?;
        acc = acc2;
        out.extend(flatten(item2));
    }
    Ok((acc, out))
}

/// Fold each element of `many` (server-side) against `acc` (client-side) in
/// order, threading the updated accumulator into the next pair. The mirror
/// of [`fold_against_many`] with the roles reversed: `many`'s elements stay
/// in the server position of every `transform()` call instead of `acc`.
/// Returns the transformed (possibly expanded) sequence of `many` and the
/// final accumulator.
pub fn fold_many_against_acc(
    many: &[DiscreteOperation],
    mut acc: Operation,
) -> Result<(Vec<DiscreteOperation>, Operation), CoreError> {
    let mut out = Vec::with_capacity(many.len());
    for item in many {
        let (item2, acc2) = transform(Operation::Discrete(item.clone()), acc)?;
        out.extend(flatten(item2));
        acc = acc2;
    }
    Ok((out, acc))
}

pub fn wrap(ops: Vec<DiscreteOperation>) -> Operation {
    if ops.len() == 1 {
        Operation::Discrete(ops.into_iter().next().unwrap())
    } else {
        Operation::Compound(CompoundOperation { ops })
    }
}
