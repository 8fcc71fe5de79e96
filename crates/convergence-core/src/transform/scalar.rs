//! Transform rules for single-field scalar targets (`BooleanSet`,
//! `DateSet`), `spec.md` §4.2. Both kinds are wholesale sets with no other
//! op in their family, so the only possible conflict is set-vs-set, which
//! tie-breaks server-favored.

use crate::error::CoreError;
use crate::op::{DiscreteOperation, Kind, Operation};

use super::Pair;

pub fn transform_pair(s: &DiscreteOperation, c: &DiscreteOperation) -> Result<Pair, CoreError> {
    match (&s.kind, &c.kind) {
        (Kind::BooleanSet { .. }, Kind::BooleanSet { .. }) => Ok((identity(s), noop(c))),
        (Kind::DateSet { .. }, Kind::DateSet { .. }) => Ok((identity(s), noop(c))),
        _ => Err(CoreError::Transform(format!(
            "unsupported scalar/scalar pair: {:?} vs {:?}",
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
