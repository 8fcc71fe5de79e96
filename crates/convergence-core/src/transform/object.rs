//! Transform rules for the object family (`ObjectAddProperty`,
//! `ObjectSetProperty`, `ObjectRemoveProperty`, `ObjectSet`), `spec.md` §4.2.

use crate::error::CoreError;
use crate::op::{DiscreteOperation, Kind, Operation};

use super::Pair;

/// Dominance rank: `ObjectSet` replaces the whole object and always wins;
/// `ObjectRemoveProperty` wins over a same-key add/set (the property ends
/// up absent either way); add/set at the same rank tie-break server-favored.
fn rank(kind: &Kind) -> u8 {
    match kind {
        Kind::ObjectSet { .. } => 3,
        Kind::ObjectRemoveProperty { .. } => 2,
        Kind::ObjectAddProperty { .. } | Kind::ObjectSetProperty { .. } => 1,
        _ => 0,
    }
}

fn property_of(kind: &Kind) -> Option<&str> {
    match kind {
        Kind::ObjectAddProperty { property, .. }
        | Kind::ObjectSetProperty { property, .. }
        | Kind::ObjectRemoveProperty { property } => Some(property.as_str()),
        _ => None,
    }
}

pub fn transform_pair(s: &DiscreteOperation, c: &DiscreteOperation) -> Result<Pair, CoreError> {
    let same_target = match (property_of(&s.kind), property_of(&c.kind)) {
        (Some(a), Some(b)) => a == b,
        // `ObjectSet` targets the whole object, so it conflicts with every
        // property-scoped op regardless of key.
        _ => true,
    };

    if !same_target {
        return Ok((identity(s), identity(c)));
    }

    let (sr, cr) = (rank(&s.kind), rank(&c.kind));
    if sr > cr {
        Ok((identity(s), noop(c)))
    } else if cr > sr {
        Ok((noop(s), identity(c)))
    } else {
        // Equal rank and same target: server-favored.
        Ok((identity(s), noop(c)))
    }
}

fn identity(op: &DiscreteOperation) -> Operation {
    Operation::Discrete(op.clone())
}

fn noop(op: &DiscreteOperation) -> Operation {
    Operation::Discrete(op.as_no_op())
}
