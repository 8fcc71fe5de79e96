//! The operation algebra (`spec.md` §3, §6): discrete operations, the
//! compound wrapper, and applied operations enriched with inverse data.

pub mod codec;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::value::{DataValue, ValueId};

/// The kind-specific payload of a [`DiscreteOperation`] (`spec.md` §3 table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Kind {
    StringInsert { index: usize, value: String },
    StringRemove { index: usize, value: String },
    StringSet { value: String },
    ArrayInsert { index: usize, value: DataValue },
    ArrayRemove { index: usize },
    ArrayReplace { index: usize, value: DataValue },
    ArrayMove { from_index: usize, to_index: usize },
    ArraySet { value: Vec<DataValue> },
    ObjectAddProperty { property: String, value: DataValue },
    ObjectSetProperty { property: String, value: DataValue },
    ObjectRemoveProperty { property: String },
    ObjectSet { value: HashMap<String, DataValue> },
    NumberAdd { value: f64 },
    NumberSet { value: f64 },
    BooleanSet { value: bool },
    DateSet { value: chrono::DateTime<chrono::Utc> },
}

impl Kind {
    /// The discriminant, used as the row/column index into the transform
    /// matrix (`spec.md` §9: "encode it as a two-dimensional dispatch table").
    pub fn discriminant(&self) -> KindTag {
        match self {
            Kind::StringInsert { .. } => KindTag::StringInsert,
            Kind::StringRemove { .. } => KindTag::StringRemove,
            Kind::StringSet { .. } => KindTag::StringSet,
            Kind::ArrayInsert { .. } => KindTag::ArrayInsert,
            Kind::ArrayRemove { .. } => KindTag::ArrayRemove,
            Kind::ArrayReplace { .. } => KindTag::ArrayReplace,
            Kind::ArrayMove { .. } => KindTag::ArrayMove,
            Kind::ArraySet { .. } => KindTag::ArraySet,
            Kind::ObjectAddProperty { .. } => KindTag::ObjectAddProperty,
            Kind::ObjectSetProperty { .. } => KindTag::ObjectSetProperty,
            Kind::ObjectRemoveProperty { .. } => KindTag::ObjectRemoveProperty,
            Kind::ObjectSet { .. } => KindTag::ObjectSet,
            Kind::NumberAdd { .. } => KindTag::NumberAdd,
            Kind::NumberSet { .. } => KindTag::NumberSet,
            Kind::BooleanSet { .. } => KindTag::BooleanSet,
            Kind::DateSet { .. } => KindTag::DateSet,
        }
    }

    /// Human-readable name of the value kind this operation expects to find
    /// at its target vid, for `ApplyError::TypeMismatch` messages.
    pub fn target_type_name(&self) -> &'static str {
        match self {
            Kind::StringInsert { .. } | Kind::StringRemove { .. } | Kind::StringSet { .. } => {
                "string"
            }
            Kind::ArrayInsert { .. }
            | Kind::ArrayRemove { .. }
            | Kind::ArrayReplace { .. }
            | Kind::ArrayMove { .. }
            | Kind::ArraySet { .. } => "array",
            Kind::ObjectAddProperty { .. }
            | Kind::ObjectSetProperty { .. }
            | Kind::ObjectRemoveProperty { .. }
            | Kind::ObjectSet { .. } => "object",
            Kind::NumberAdd { .. } | Kind::NumberSet { .. } => "double",
            Kind::BooleanSet { .. } => "boolean",
            Kind::DateSet { .. } => "date",
        }
    }
}

/// Discriminant-only view of [`Kind`], used to index the transform matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindTag {
    StringInsert,
    StringRemove,
    StringSet,
    ArrayInsert,
    ArrayRemove,
    ArrayReplace,
    ArrayMove,
    ArraySet,
    ObjectAddProperty,
    ObjectSetProperty,
    ObjectRemoveProperty,
    ObjectSet,
    NumberAdd,
    NumberSet,
    BooleanSet,
    DateSet,
}

/// A single structural mutation targeting one vid (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteOperation {
    pub vid: ValueId,
    pub no_op: bool,
    pub kind: Kind,
}

impl DiscreteOperation {
    pub fn new(vid: ValueId, kind: Kind) -> Self {
        Self {
            vid,
            no_op: false,
            kind,
        }
    }

    /// A no-op carrying the same vid/kind shape, used by the transform
    /// matrix when one side of a pair cancels out (`spec.md` §4.2: "the
    /// client op becomes a no-op").
    pub fn as_no_op(&self) -> Self {
        Self {
            vid: self.vid.clone(),
            no_op: true,
            kind: self.kind.clone(),
        }
    }
}

/// A sequence of discrete operations applied atomically, in order
/// (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundOperation {
    pub ops: Vec<DiscreteOperation>,
}

/// Either a single discrete operation or a compound sequence (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Discrete(DiscreteOperation),
    Compound(CompoundOperation),
}

impl Operation {
    pub fn discrete(vid: ValueId, kind: Kind) -> Self {
        Operation::Discrete(DiscreteOperation::new(vid, kind))
    }
}

/// Inverse data captured at application time, enough to undo the operation
/// (`spec.md` §3: "enriched with enough inverse data to undo it").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inverse {
    None,
    Value(DataValue),
    Values(Vec<DataValue>),
    ObjectChildren(HashMap<String, DataValue>),
    OptionalValue(Option<DataValue>),
    String(String),
    Number(f64),
    Boolean(bool),
    Date(chrono::DateTime<chrono::Utc>),
}

/// A [`DiscreteOperation`] enriched with inverse data, as stored in the
/// operation log (`spec.md` §3 "ModelOperation log entry").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOperation {
    pub vid: ValueId,
    pub no_op: bool,
    pub kind: Kind,
    pub inverse: Option<Inverse>,
}

impl From<DiscreteOperation> for AppliedOperation {
    fn from(op: DiscreteOperation) -> Self {
        Self {
            vid: op.vid,
            no_op: op.no_op,
            kind: op.kind,
            inverse: None,
        }
    }
}

impl AppliedOperation {
    pub fn to_discrete(&self) -> DiscreteOperation {
        DiscreteOperation {
            vid: self.vid.clone(),
            no_op: self.no_op,
            kind: self.kind.clone(),
        }
    }

    /// Capture inverse data for this operation given the pre-mutation value
    /// it targets (when the target is an object, `container` is that same
    /// object so property-level ops can read the prior value).
    pub fn with_inverse_from(mut self, current: Option<&DataValue>) -> Self {
        self.inverse = compute_inverse(&self.kind, current);
        self
    }
}

fn compute_inverse(kind: &Kind, current: Option<&DataValue>) -> Option<Inverse> {
    match kind {
        Kind::StringSet { .. } => current
            .and_then(DataValue::as_string)
            .map(|s| Inverse::String(s.value.clone())),
        Kind::ArrayReplace { index, .. } => current
            .and_then(DataValue::as_array)
            .and_then(|a| a.children.get(*index))
            .cloned()
            .map(Inverse::Value),
        Kind::ArrayRemove { index } => current
            .and_then(DataValue::as_array)
            .and_then(|a| a.children.get(*index))
            .cloned()
            .map(Inverse::Value),
        Kind::ArraySet { .. } => current
            .and_then(DataValue::as_array)
            .map(|a| Inverse::Values(a.children.clone())),
        Kind::ObjectSetProperty { property, .. } => Some(Inverse::OptionalValue(
            current
                .and_then(DataValue::as_object)
                .and_then(|o| o.children.get(property))
                .cloned(),
        )),
        Kind::ObjectRemoveProperty { property } => current
            .and_then(DataValue::as_object)
            .and_then(|o| o.children.get(property))
            .cloned()
            .map(Inverse::Value),
        Kind::ObjectSet { .. } => current
            .and_then(DataValue::as_object)
            .map(|o| Inverse::ObjectChildren(o.children.clone())),
        Kind::NumberSet { .. } | Kind::NumberAdd { .. } => current
            .and_then(DataValue::as_double)
            .map(|d| Inverse::Number(d.value)),
        Kind::BooleanSet { .. } => current
            .and_then(DataValue::as_boolean)
            .map(|b| Inverse::Boolean(b.value)),
        Kind::DateSet { .. } => current
            .and_then(DataValue::as_date)
            .map(|d| Inverse::Date(d.value)),
        _ => None,
    }
}

