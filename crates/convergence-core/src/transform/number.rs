//! Transform rules for the double family (`NumberAdd`, `NumberSet`),
//! `spec.md` §4.2.

use crate::error::CoreError;
use crate::op::{DiscreteOperation, Kind, Operation};

use super::Pair;

pub fn transform_pair(s: &DiscreteOperation, c: &DiscreteOperation) -> Result<Pair, CoreError> {
    match (&s.kind, &c.kind) {
        // Addition commutes: both sides keep contributing their delta.
        (Kind::NumberAdd { .. }, Kind::NumberAdd { .. }) => Ok((identity(s), identity(c))),
        // A wholesale set dominates a concurrent add, which becomes a
        // no-op regardless of arrival order.
        (Kind::NumberSet { .. }, Kind::NumberAdd { .. }) => Ok((identity(s), noop(c))),
        (Kind::NumberAdd { .. }, Kind::NumberSet { .. }) => Ok((noop(s), identity(c))),
        // Two concurrent sets tie-break server-favored.
        (Kind::NumberSet { .. }, Kind::NumberSet { .. }) => Ok((identity(s), noop(c))),
        _ => Err(CoreError::Transform(format!(
            "unsupported double/double pair: {:?} vs {:?}",
            s.kind, c.kind
        ))),
    }
}

fn identity(op: &DiscreteOperation) -> Operation {
    Operation::Discrete(op.clone())
}

fn noop(op: &DiscreteOperation) -> Operation {
    Operation::Discrete(op.as_no_op())
}
