//! The OT function matrix (`spec.md` §4.2): `tf(server, client) ->
//! (server', client')` for every ordered pair of discrete operation kinds
//! targeting the same vid, plus compound expansion and the identity rule
//! for operations on different vids.
//!
//! Organized by target type, mirroring the family split in `spec.md`'s
//! operation table: [`string`], [`array`], [`object`], [`number`], and
//! [`scalar`] (booleans and dates) each own their pairwise rules; this
//! module holds the outer dispatch and the compound/no-op handling that
//! applies uniformly across families.

pub mod array;
pub mod compound;
pub mod number;
pub mod object;
pub mod scalar;
pub mod string;

use crate::error::CoreError;
use crate::op::{DiscreteOperation, Kind, Operation};

/// A transformed `(server', client')` pair, possibly compound on either
/// side (string remove bisection, array move decomposition, compound
/// expansion).
pub type Pair = (Operation, Operation);

/// Target-type family a [`Kind`] belongs to, used to route a same-vid pair
/// to the right per-family module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    String,
    Array,
    Object,
    Number,
    Boolean,
    Date,
}

fn family(kind: &Kind) -> Family {
    match kind {
        Kind::StringInsert { .. } | Kind::StringRemove { .. } | Kind::StringSet { .. } => {
            Family::String
        }
        Kind::ArrayInsert { .. }
        | Kind::ArrayRemove { .. }
        | Kind::ArrayReplace { .. }
        | Kind::ArrayMove { .. }
        | Kind::ArraySet { .. } => Family::Array,
        Kind::ObjectAddProperty { .. }
        | Kind::ObjectSetProperty { .. }
        | Kind::ObjectRemoveProperty { .. }
        | Kind::ObjectSet { .. } => Family::Object,
        Kind::NumberAdd { .. } | Kind::NumberSet { .. } => Family::Number,
        Kind::BooleanSet { .. } => Family::Boolean,
        Kind::DateSet { .. } => Family::Date,
    }
}

/// Transform two discrete operations targeting the same vid. Operations
/// on different vids, or where either side is already a no-op, pass
/// through unchanged (no-ops are preserved as no-ops, `spec.md` §4.2).
fn transform_discrete_pair(s: &DiscreteOperation, c: &DiscreteOperation) -> Result<Pair, CoreError> {
    if s.vid != c.vid {
        return Ok((
            Operation::Discrete(s.clone()),
            Operation::Discrete(c.clone()),
        ));
    }
    if s.no_op || c.no_op {
        return Ok((
            Operation::Discrete(s.clone()),
            Operation::Discrete(c.clone()),
        ));
    }

    let (sf, cf) = (family(&s.kind), family(&c.kind));
    if sf != cf {
        // Same vid, different declared target type: the history is
        // malformed (a vid never changes type across its lifetime).
        return Err(CoreError::Transform(format!(
            "vid {} addressed as both {:?} and {:?}",
            s.vid, sf, cf
        )));
    }

    match sf {
        Family::String => string::transform_pair(s, c),
        Family::Array => array::transform_pair(s, c),
        Family::Object => object::transform_pair(s, c),
        Family::Number => number::transform_pair(s, c),
        Family::Boolean | Family::Date => scalar::transform_pair(s, c),
    }
}

/// The full `tf(server, client)` entry point, handling discrete and
/// compound operands in any combination (`spec.md` §4.2 "Any discrete vs
/// compound").
pub fn transform(server: Operation, client: Operation) -> Result<Pair, CoreError> {
    match (server, client) {
        (Operation::Discrete(s), Operation::Discrete(c)) => transform_discrete_pair(&s, &c),
        (s @ Operation::Discrete(_), Operation::Compound(c)) => {
            let (s2, c2) = compound::fold_against_many(s, &c.ops)?;
            Ok((s2, compound::wrap(c2)))
        }
        (Operation::Compound(s), c @ Operation::Discrete(_)) => {
            let (s2, c2) = compound::fold_many_against_acc(&s.ops, c)?;
            Ok((compound::wrap(s2), c2))
        }
        (Operation::Compound(s), Operation::Compound(c)) => {
            let (s2, c_acc) = compound::fold_many_against_acc(&s.ops, Operation::Compound(c))?;
            Ok((compound::wrap(s2), c_acc))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataValue, DataValueTree, ObjectValue, ValueId};

    fn apply_all(tree: &mut DataValueTree, op: &Operation) {
        match op {
            Operation::Discrete(d) => {
                tree.apply(&d.clone().into()).unwrap();
            }
            Operation::Compound(c) => {
                for d in &c.ops {
                    tree.apply(&d.clone().into()).unwrap();
                }
            }
        }
    }

    fn tp1(tree_factory: impl Fn() -> DataValueTree, s: DiscreteOperation, c: DiscreteOperation) {
        let (s2, c2) = transform(
            Operation::Discrete(s.clone()),
            Operation::Discrete(c.clone()),
        )
        .unwrap();

        let mut left = tree_factory();
        apply_all(&mut left, &Operation::Discrete(s));
        apply_all(&mut left, &c2);

        let mut right = tree_factory();
        apply_all(&mut right, &Operation::Discrete(c));
        apply_all(&mut right, &s2);

        assert_eq!(left.materialize(), right.materialize());
    }

    fn string_tree(value: &str) -> impl Fn() -> DataValueTree + '_ {
        move || {
            let mut root = ObjectValue::new(ValueId::new("root"));
            root.children.insert(
                "s".into(),
                DataValue::new_string(ValueId::new("s1"), value.to_string()),
            );
            DataValueTree::new(root)
        }
    }

    #[test]
    fn tp1_string_insert_insert_disjoint() {
        tp1(
            string_tree("AB"),
            DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert { index: 0, value: "X".into() },
            ),
            DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert { index: 2, value: "Y".into() },
            ),
        );
    }

    #[test]
    fn tp1_string_insert_insert_same_index() {
        tp1(
            string_tree("AB"),
            DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert { index: 1, value: "X".into() },
            ),
            DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert { index: 1, value: "Y".into() },
            ),
        );
    }

    #[test]
    fn scenario_1_concurrent_string_inserts() {
        // spec.md §8 scenario 1: both submit StringInsert(s1, 1, _) against
        // "AB"; alpha arrives first and keeps index 1, beta's op shifts to
        // index 2. Final value "AXYB".
        let (s2, c2) = transform(
            Operation::discrete(
                ValueId::new("s1"),
                Kind::StringInsert { index: 1, value: "X".into() },
            ),
            Operation::discrete(
                ValueId::new("s1"),
                Kind::StringInsert { index: 1, value: "Y".into() },
            ),
        )
        .unwrap();

        let mut tree = string_tree("AB")();
        apply_all(&mut tree, &s2);
        apply_all(&mut tree, &c2);
        assert_eq!(
            tree.get(&ValueId::new("s1")).unwrap().as_string().unwrap().value,
            "AXYB"
        );
    }

    #[test]
    fn tp1_object_set_property_same_key() {
        let tree = || {
            let mut root = ObjectValue::new(ValueId::new("root"));
            root.children.insert(
                "o".into(),
                DataValue::new_object(ValueId::new("o1")),
            );
            DataValueTree::new(root)
        };
        tp1(
            tree,
            DiscreteOperation::new(
                ValueId::new("o1"),
                Kind::ObjectSetProperty {
                    property: "p".into(),
                    value: DataValue::new_boolean(ValueId::new("b1"), true),
                },
            ),
            DiscreteOperation::new(
                ValueId::new("o1"),
                Kind::ObjectSetProperty {
                    property: "p".into(),
                    value: DataValue::new_boolean(ValueId::new("b2"), false),
                },
            ),
        );
    }

    #[test]
    fn tp1_number_add_commutes() {
        let tree = || {
            let mut root = ObjectValue::new(ValueId::new("root"));
            root.children.insert(
                "n".into(),
                DataValue::new_double(ValueId::new("n1"), 10.0),
            );
            DataValueTree::new(root)
        };
        tp1(
            tree,
            DiscreteOperation::new(ValueId::new("n1"), Kind::NumberAdd { value: 3.0 }),
            DiscreteOperation::new(ValueId::new("n1"), Kind::NumberAdd { value: -1.0 }),
        );
    }

    #[test]
    fn no_op_preserved_through_transform() {
        let s = DiscreteOperation::new(ValueId::new("s1"), Kind::StringSet { value: "x".into() });
        let mut c = DiscreteOperation::new(ValueId::new("s1"), Kind::StringSet { value: "y".into() });
        c.no_op = true;
        let (s2, c2) = transform(Operation::Discrete(s.clone()), Operation::Discrete(c)).unwrap();
        match (s2, c2) {
            (Operation::Discrete(s2), Operation::Discrete(c2)) => {
                assert_eq!(s2.kind, s.kind);
                assert!(c2.no_op);
            }
            _ => panic!("expected discrete pair"),
        }
    }

    #[test]
    fn compound_decomposition_matches_left_fold() {
        let server = DiscreteOperation::new(
            ValueId::new("s1"),
            Kind::StringInsert { index: 0, value: "Z".into() },
        );
        let client_ops = vec![
            DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert { index: 0, value: "A".into() },
            ),
            DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert { index: 1, value: "B".into() },
            ),
        ];
        let client = Operation::Compound(crate::op::CompoundOperation {
            ops: client_ops.clone(),
        });

        let (s_final, c_final) =
            transform(Operation::Discrete(server.clone()), client).unwrap();

        // Manual left fold: thread `server` through each client op in turn.
        let mut acc = Operation::Discrete(server);
        let mut expected_client_ops = Vec::new();
        for op in client_ops {
            let (acc2, op2) = transform(acc, Operation::Discrete(op)).unwrap();
            acc = acc2;
            expected_client_ops.extend(compound::flatten(op2));
        }

        assert_eq!(compound::flatten(s_final), compound::flatten(acc));
        assert_eq!(compound::flatten(c_final), expected_client_ops);
    }

    /// TP1 check generalized to arbitrary (possibly compound) operands:
    /// applying `server` then `transform(server, client)`'s client half
    /// must land on the same tree as applying `client` then the server
    /// half.
    fn tp1_ops(tree_factory: impl Fn() -> DataValueTree, server: Operation, client: Operation) {
        let (s2, c2) = transform(server.clone(), client.clone()).unwrap();

        let mut left = tree_factory();
        apply_all(&mut left, &server);
        apply_all(&mut left, &c2);

        let mut right = tree_factory();
        apply_all(&mut right, &client);
        apply_all(&mut right, &s2);

        assert_eq!(left.materialize(), right.materialize());
    }

    #[test]
    fn tp1_compound_server_vs_discrete_client_same_index() {
        // Regression test: a naive reuse of `fold_against_many` with its
        // arguments swapped makes the client operand win every tie-break
        // instead of the server. Both server sub-ops collide with the
        // client op's index, so a role swap is directly observable in the
        // final string.
        let server = Operation::Compound(crate::op::CompoundOperation {
            ops: vec![
                DiscreteOperation::new(
                    ValueId::new("s1"),
                    Kind::StringInsert { index: 1, value: "X".into() },
                ),
                DiscreteOperation::new(
                    ValueId::new("s1"),
                    Kind::StringInsert { index: 1, value: "W".into() },
                ),
            ],
        });
        let client = Operation::discrete(
            ValueId::new("s1"),
            Kind::StringInsert { index: 1, value: "Y".into() },
        );

        tp1_ops(string_tree("AB"), server.clone(), client.clone());

        let (s2, c2) = transform(server, client).unwrap();
        let mut tree = string_tree("AB")();
        apply_all(&mut tree, &s2);
        apply_all(&mut tree, &c2);
        assert_eq!(
            tree.get(&ValueId::new("s1")).unwrap().as_string().unwrap().value,
            "AWXYB"
        );
    }

    #[test]
    fn tp1_compound_server_vs_compound_client_same_index() {
        let server = Operation::Compound(crate::op::CompoundOperation {
            ops: vec![DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert { index: 1, value: "X".into() },
            )],
        });
        let client = Operation::Compound(crate::op::CompoundOperation {
            ops: vec![
                DiscreteOperation::new(
                    ValueId::new("s1"),
                    Kind::StringInsert { index: 1, value: "Y".into() },
                ),
                DiscreteOperation::new(
                    ValueId::new("s1"),
                    Kind::StringInsert { index: 1, value: "Z".into() },
                ),
            ],
        });

        tp1_ops(string_tree("AB"), server, client);
    }
}
