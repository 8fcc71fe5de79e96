//! The live document tree.
//!
//! A model's document is a tree of [`DataValue`] nodes, each addressed by a
//! stable [`ValueId`] (vid). The tree owns the canonical state; operations
//! mutate it in place via [`DataValueTree::apply`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::CoreError;
use crate::op::{AppliedOperation, Kind};

/// Stable identifier for a value node, unique within a single model.
///
/// Minted by [`VidFactory`] with a prefix distinguishing server-origin ids
/// (`"s"`) from client-origin ids (`"c"`) so that two peers never generate a
/// colliding id independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub String);

impl ValueId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ValueId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Mints fresh, collision-free [`ValueId`]s for one model.
///
/// The server owns one factory per model. Client-contributed values (e.g.
/// cold-start initial data) are re-labelled through [`VidFactory::client_id`]
/// so their origin is visible in the id itself without affecting equality.
#[derive(Debug, Clone)]
pub struct VidFactory {
    next: u64,
}

impl VidFactory {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Mint the next server-origin id.
    pub fn next_server_id(&mut self) -> ValueId {
        let id = ValueId::new(format!("s{}", self.next));
        self.next += 1;
        id
    }

    /// Label a client-contributed id (used once, at cold start).
    pub fn client_id(seq: u64) -> ValueId {
        ValueId::new(format!("c{}", seq))
    }
}

impl Default for VidFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-like value in the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DataValue {
    Object(ObjectValue),
    Array(ArrayValue),
    String(StringValue),
    Double(DoubleValue),
    Boolean(BooleanValue),
    Date(DateValue),
    Null(NullValue),
}

impl DataValue {
    pub fn new_object(vid: ValueId) -> Self {
        DataValue::Object(ObjectValue::new(vid))
    }

    pub fn new_array(vid: ValueId) -> Self {
        DataValue::Array(ArrayValue::new(vid))
    }

    pub fn new_string(vid: ValueId, value: String) -> Self {
        DataValue::String(StringValue { vid, value })
    }

    pub fn new_double(vid: ValueId, value: f64) -> Self {
        DataValue::Double(DoubleValue { vid, value })
    }

    pub fn new_boolean(vid: ValueId, value: bool) -> Self {
        DataValue::Boolean(BooleanValue { vid, value })
    }

    pub fn new_date(vid: ValueId, value: DateTime<Utc>) -> Self {
        DataValue::Date(DateValue { vid, value })
    }

    pub fn new_null(vid: ValueId) -> Self {
        DataValue::Null(NullValue { vid })
    }

    pub fn vid(&self) -> &ValueId {
        match self {
            DataValue::Object(v) => &v.vid,
            DataValue::Array(v) => &v.vid,
            DataValue::String(v) => &v.vid,
            DataValue::Double(v) => &v.vid,
            DataValue::Boolean(v) => &v.vid,
            DataValue::Date(v) => &v.vid,
            DataValue::Null(v) => &v.vid,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            DataValue::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectValue> {
        match self {
            DataValue::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            DataValue::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut ArrayValue> {
        match self {
            DataValue::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&StringValue> {
        match self {
            DataValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string_mut(&mut self) -> Option<&mut StringValue> {
        match self {
            DataValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double_mut(&mut self) -> Option<&mut DoubleValue> {
        match self {
            DataValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<&DoubleValue> {
        match self {
            DataValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<&BooleanValue> {
        match self {
            DataValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateValue> {
        match self {
            DataValue::Date(v) => Some(v),
            _ => None,
        }
    }

    /// Every vid transitively referenced by this value, including its own.
    pub fn collect_vids(&self, out: &mut Vec<ValueId>) {
        out.push(self.vid().clone());
        match self {
            DataValue::Object(v) => {
                for child in v.children.values() {
                    child.collect_vids(out);
                }
            }
            DataValue::Array(v) => {
                for child in &v.children {
                    child.collect_vids(out);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub vid: ValueId,
    pub children: HashMap<String, DataValue>,
}

impl ObjectValue {
    pub fn new(vid: ValueId) -> Self {
        Self {
            vid,
            children: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub vid: ValueId,
    pub children: Vec<DataValue>,
}

impl ArrayValue {
    pub fn new(vid: ValueId) -> Self {
        Self {
            vid,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringValue {
    pub vid: ValueId,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleValue {
    pub vid: ValueId,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanValue {
    pub vid: ValueId,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateValue {
    pub vid: ValueId,
    pub value: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullValue {
    pub vid: ValueId,
}

/// Error applying an [`AppliedOperation`] to a [`DataValueTree`].
///
/// Always fatal to the owning coordinator (`spec.md` §4.1, §7): the tree is
/// left in an undefined state and the model must force-close.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("vid {0} not found in tree")]
    VidNotFound(ValueId),
    #[error("vid {0} is not a {1}")]
    TypeMismatch(ValueId, &'static str),
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

impl From<ApplyError> for CoreError {
    fn from(e: ApplyError) -> Self {
        CoreError::Apply(e.to_string())
    }
}

/// Owns the live document and the flat vid -> location index.
///
/// The index is rebuilt lazily by walking the tree on lookup misses rather
/// than maintained incrementally, which keeps `apply` simple; models are
/// small enough (structured JSON documents, not bulk data) that a full walk
/// per lookup is not a bottleneck, and every `apply` touches at most one
/// path from the root.
#[derive(Debug, Clone)]
pub struct DataValueTree {
    root: ObjectValue,
}

impl DataValueTree {
    pub fn new(root: ObjectValue) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &ObjectValue {
        &self.root
    }

    /// Deep copy of the current tree, for snapshotting.
    pub fn materialize(&self) -> ObjectValue {
        self.root.clone()
    }

    pub fn get(&self, vid: &ValueId) -> Option<&DataValue> {
        if self.root.vid == *vid {
            return None; // the root is never addressed as a DataValue itself
        }
        self.root.children.values().find_map(|c| find(c, vid))
    }

    /// Apply an already-transformed, already-assigned operation to the tree.
    ///
    /// Any failure here is fatal for the owning model (`spec.md` §4.1).
    pub fn apply(&mut self, op: &AppliedOperation) -> Result<(), ApplyError> {
        apply_discrete(&mut self.root, op)
    }
}

fn find<'a>(value: &'a DataValue, vid: &ValueId) -> Option<&'a DataValue> {
    if value.vid() == vid {
        return Some(value);
    }
    match value {
        DataValue::Object(o) => o.children.values().find_map(|c| find(c, vid)),
        DataValue::Array(a) => a.children.iter().find_map(|c| find(c, vid)),
        _ => None,
    }
}

fn find_mut<'a>(value: &'a mut DataValue, vid: &ValueId) -> Option<&'a mut DataValue> {
    if value.vid() == vid {
        return Some(value);
    }
    match value {
        DataValue::Object(o) => o.children.values_mut().find_map(|c| find_mut(c, vid)),
        DataValue::Array(a) => a.children.iter_mut().find_map(|c| find_mut(c, vid)),
        _ => None,
    }
}

fn find_mut_in_root<'a>(root: &'a mut ObjectValue, vid: &ValueId) -> Option<&'a mut DataValue> {
    if root.vid == *vid {
        // Looked up through the generic DataValue path; the root itself is
        // handled separately by `apply_discrete` since it has no DataValue
        // wrapper of its own.
        return None;
    }
    root.children.values_mut().find_map(|c| find_mut(c, vid))
}

fn is_object_kind(kind: &Kind) -> bool {
    matches!(
        kind,
        Kind::ObjectAddProperty { .. }
            | Kind::ObjectSetProperty { .. }
            | Kind::ObjectRemoveProperty { .. }
            | Kind::ObjectSet { .. }
    )
}

fn apply_discrete(root: &mut ObjectValue, op: &AppliedOperation) -> Result<(), ApplyError> {
    if op.no_op {
        return Ok(());
    }
    // Object-targeting ops address the object itself, which may be the root
    // or any nested object; every other kind addresses a string/array/
    // scalar leaf found via `find_mut_in_root`.
    if root.vid == op.vid {
        return apply_to_object(root, op);
    }
    let target = find_mut_in_root(root, &op.vid)
        .ok_or_else(|| ApplyError::VidNotFound(op.vid.clone()))?;
    if let DataValue::Object(obj) = target {
        if is_object_kind(&op.kind) {
            return apply_to_object(obj, op);
        }
    }

    match (&op.kind, target) {
        (Kind::StringInsert { index, value }, DataValue::String(s)) => {
            insert_into_string(s, *index, value)
        }
        (Kind::StringRemove { index, value }, DataValue::String(s)) => {
            remove_from_string(s, *index, value.chars().count())
        }
        (Kind::StringSet { value }, DataValue::String(s)) => {
            s.value = value.clone();
            Ok(())
        }
        (Kind::ArrayInsert { index, value }, DataValue::Array(a)) => {
            if *index > a.children.len() {
                return Err(ApplyError::IndexOutOfBounds {
                    index: *index,
                    len: a.children.len(),
                });
            }
            a.children.insert(*index, value.clone());
            Ok(())
        }
        (Kind::ArrayRemove { index }, DataValue::Array(a)) => {
            if *index >= a.children.len() {
                return Err(ApplyError::IndexOutOfBounds {
                    index: *index,
                    len: a.children.len(),
                });
            }
            a.children.remove(*index);
            Ok(())
        }
        (Kind::ArrayReplace { index, value }, DataValue::Array(a)) => {
            if *index >= a.children.len() {
                return Err(ApplyError::IndexOutOfBounds {
                    index: *index,
                    len: a.children.len(),
                });
            }
            a.children[*index] = value.clone();
            Ok(())
        }
        (Kind::ArrayMove { from_index, to_index }, DataValue::Array(a)) => {
            if *from_index >= a.children.len() || *to_index >= a.children.len() {
                return Err(ApplyError::IndexOutOfBounds {
                    index: (*from_index).max(*to_index),
                    len: a.children.len(),
                });
            }
            let v = a.children.remove(*from_index);
            a.children.insert(*to_index, v);
            Ok(())
        }
        (Kind::ArraySet { value }, DataValue::Array(a)) => {
            a.children = value.clone();
            Ok(())
        }
        (Kind::NumberAdd { value }, DataValue::Double(d)) => {
            d.value = clamp_finite(d.value + value);
            Ok(())
        }
        (Kind::NumberSet { value }, DataValue::Double(d)) => {
            d.value = *value;
            Ok(())
        }
        (Kind::BooleanSet { value }, DataValue::Boolean(b)) => {
            b.value = *value;
            Ok(())
        }
        (Kind::DateSet { value }, DataValue::Date(d)) => {
            d.value = *value;
            Ok(())
        }
        (kind, _) => Err(ApplyError::TypeMismatch(op.vid.clone(), kind.target_type_name())),
    }
}

fn apply_to_object(obj: &mut ObjectValue, op: &AppliedOperation) -> Result<(), ApplyError> {
    match &op.kind {
        Kind::ObjectAddProperty { property, value } => {
            obj.children.insert(property.clone(), value.clone());
            Ok(())
        }
        Kind::ObjectSetProperty { property, value } => {
            obj.children.insert(property.clone(), value.clone());
            Ok(())
        }
        Kind::ObjectRemoveProperty { property } => {
            obj.children.remove(property);
            Ok(())
        }
        Kind::ObjectSet { value } => {
            obj.children = value.clone();
            Ok(())
        }
        other => Err(ApplyError::TypeMismatch(op.vid.clone(), other.target_type_name())),
    }
}

/// Clamp a non-finite `NumberAdd` result to the nearest finite bound.
///
/// Decided Open Question (`spec.md` §9): a transient overflow during
/// concurrent increments should not force-close the model, so we clamp
/// rather than propagate `NaN` or treat it as fatal.
fn clamp_finite(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else if v == f64::INFINITY {
        f64::MAX
    } else if v == f64::NEG_INFINITY {
        f64::MIN
    } else {
        v
    }
}

fn insert_into_string(s: &mut StringValue, index: usize, value: &str) -> Result<(), ApplyError> {
    let len = s.value.chars().count();
    if index > len {
        return Err(ApplyError::IndexOutOfBounds { index, len });
    }
    let byte_index = char_index_to_byte(&s.value, index);
    s.value.insert_str(byte_index, value);
    Ok(())
}

fn remove_from_string(s: &mut StringValue, index: usize, count: usize) -> Result<(), ApplyError> {
    let len = s.value.chars().count();
    if index + count > len {
        return Err(ApplyError::IndexOutOfBounds { index, len });
    }
    let start = char_index_to_byte(&s.value, index);
    let end = char_index_to_byte(&s.value, index + count);
    s.value.replace_range(start..end, "");
    Ok(())
}

/// Convert a code-unit (char) index into a byte index for `String` slicing.
///
/// `spec.md` §4.1: "all participants must agree on the same unit" for string
/// indices. We choose Unicode scalar values (`char`s) as that unit.
pub fn char_index_to_byte(s: &str, char_index: usize) -> usize {
    s.char_indices()
        .nth(char_index)
        .map(|(b, _)| b)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{AppliedOperation, Kind};

    fn root_with_string(vid: &str, value: &str) -> ObjectValue {
        let mut root = ObjectValue::new(ValueId::new("root"));
        root.children.insert(
            "s".to_string(),
            DataValue::String(StringValue {
                vid: ValueId::new(vid),
                value: value.to_string(),
            }),
        );
        root
    }

    #[test]
    fn apply_string_insert() {
        let mut tree = DataValueTree::new(root_with_string("s1", "AB"));
        let op = AppliedOperation {
            vid: ValueId::new("s1"),
            no_op: false,
            kind: Kind::StringInsert {
                index: 1,
                value: "X".to_string(),
            },
            inverse: None,
        };
        tree.apply(&op).unwrap();
        assert_eq!(
            tree.get(&ValueId::new("s1")).unwrap().as_string().unwrap().value,
            "AXB"
        );
    }

    #[test]
    fn apply_out_of_bounds_insert_is_fatal() {
        let mut tree = DataValueTree::new(root_with_string("s1", "AB"));
        let op = AppliedOperation {
            vid: ValueId::new("s1"),
            no_op: false,
            kind: Kind::StringInsert {
                index: 10,
                value: "X".to_string(),
            },
            inverse: None,
        };
        assert!(tree.apply(&op).is_err());
    }

    #[test]
    fn apply_missing_vid_is_fatal() {
        let mut tree = DataValueTree::new(root_with_string("s1", "AB"));
        let op = AppliedOperation {
            vid: ValueId::new("missing"),
            no_op: false,
            kind: Kind::StringSet {
                value: "x".to_string(),
            },
            inverse: None,
        };
        assert!(matches!(tree.apply(&op), Err(ApplyError::VidNotFound(_))));
    }

    #[test]
    fn no_op_never_touches_tree() {
        let mut tree = DataValueTree::new(root_with_string("s1", "AB"));
        let before = tree.materialize();
        let op = AppliedOperation {
            vid: ValueId::new("s1"),
            no_op: true,
            kind: Kind::StringSet {
                value: "ZZZ".to_string(),
            },
            inverse: None,
        };
        tree.apply(&op).unwrap();
        assert_eq!(tree.materialize(), before);
    }

    #[test]
    fn number_add_overflow_clamps() {
        assert_eq!(clamp_finite(f64::MAX + f64::MAX), f64::MAX);
        assert_eq!(clamp_finite(f64::MIN - f64::MAX), f64::MIN);
    }

    #[test]
    fn object_set_property_at_root() {
        let mut tree = DataValueTree::new(ObjectValue::new(ValueId::new("root")));
        let op = AppliedOperation {
            vid: ValueId::new("root"),
            no_op: false,
            kind: Kind::ObjectAddProperty {
                property: "a".to_string(),
                value: DataValue::Null(NullValue {
                    vid: ValueId::new("n1"),
                }),
            },
            inverse: None,
        };
        tree.apply(&op).unwrap();
        assert!(tree.root().children.contains_key("a"));
    }
}
