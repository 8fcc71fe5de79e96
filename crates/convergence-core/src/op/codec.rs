//! Binary wire format for the operation log (`spec.md` §6 "Operation log
//! binary format"): `version:u64 LE, timestampMillis:i64 LE, sessionIdLen:u16,
//! sessionIdBytes, opKind:u8, opBody:...`. Op bodies are canonical: fixed
//! field order, lengths prefixed, UTF-8 for strings, IEEE-754 LE for
//! doubles. Compound ops are `opKind=0, count:u32, [sub-op]*`.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use crate::value::{
    ArrayValue, BooleanValue, DataValue, DateValue, DoubleValue, NullValue, ObjectValue,
    StringValue, ValueId,
};

use super::{CompoundOperation, DiscreteOperation, Kind, Operation};

/// A single entry of the on-disk operation log, the unit `appendOperation`
/// persists and `loadOperations` replays (`spec.md` §3 "ModelOperation log
/// entry"). Inverse data is not part of the wire format: it is recomputed
/// in-memory at apply time and never needs to survive a reload.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub op: Operation,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of buffer while decoding {0}")]
    Eof(&'static str),
    #[error("unknown op kind tag {0}")]
    UnknownOpKind(u8),
    #[error("unknown data value tag {0}")]
    UnknownDataValueTag(u8),
    #[error("string field was not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, CodecError>;

fn eof(field: &'static str) -> impl Fn(io::Error) -> CodecError {
    move |_| CodecError::Eof(field)
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.write_u32::<LittleEndian>(bytes.len() as u32)
        .expect("write to Vec never fails");
    buf.extend_from_slice(bytes);
}

fn read_string(cur: &mut Cursor<&[u8]>, field: &'static str) -> Result<String> {
    let len = cur.read_u32::<LittleEndian>().map_err(eof(field))? as usize;
    let mut bytes = vec![0u8; len];
    cur.read_exact(&mut bytes).map_err(eof(field))?;
    Ok(String::from_utf8(bytes)?)
}

fn write_vid(buf: &mut Vec<u8>, vid: &ValueId) {
    write_string(buf, vid.as_ref());
}

fn read_vid(cur: &mut Cursor<&[u8]>) -> Result<ValueId> {
    Ok(ValueId::new(read_string(cur, "vid")?))
}

const TAG_OBJECT: u8 = 1;
const TAG_ARRAY: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_BOOLEAN: u8 = 5;
const TAG_DATE: u8 = 6;
const TAG_NULL: u8 = 7;

/// Encode a [`DataValue`] in the same canonical value encoding the snapshot
/// format embeds (`spec.md` §6 "Snapshot format").
pub fn encode_data_value(value: &DataValue, buf: &mut Vec<u8>) {
    match value {
        DataValue::Object(o) => {
            buf.push(TAG_OBJECT);
            write_vid(buf, &o.vid);
            buf.write_u32::<LittleEndian>(o.children.len() as u32)
                .expect("write to Vec never fails");
            for (key, child) in &o.children {
                write_string(buf, key);
                encode_data_value(child, buf);
            }
        }
        DataValue::Array(a) => {
            buf.push(TAG_ARRAY);
            write_vid(buf, &a.vid);
            buf.write_u32::<LittleEndian>(a.children.len() as u32)
                .expect("write to Vec never fails");
            for child in &a.children {
                encode_data_value(child, buf);
            }
        }
        DataValue::String(s) => {
            buf.push(TAG_STRING);
            write_vid(buf, &s.vid);
            write_string(buf, &s.value);
        }
        DataValue::Double(d) => {
            buf.push(TAG_DOUBLE);
            write_vid(buf, &d.vid);
            buf.write_f64::<LittleEndian>(d.value)
                .expect("write to Vec never fails");
        }
        DataValue::Boolean(b) => {
            buf.push(TAG_BOOLEAN);
            write_vid(buf, &b.vid);
            buf.write_u8(b.value as u8).expect("write to Vec never fails");
        }
        DataValue::Date(d) => {
            buf.push(TAG_DATE);
            write_vid(buf, &d.vid);
            buf.write_i64::<LittleEndian>(d.value.timestamp_millis())
                .expect("write to Vec never fails");
        }
        DataValue::Null(n) => {
            buf.push(TAG_NULL);
            write_vid(buf, &n.vid);
        }
    }
}

/// Decode a [`DataValue`] previously written by [`encode_data_value`].
pub fn decode_data_value(cur: &mut Cursor<&[u8]>) -> Result<DataValue> {
    let mut tag = [0u8; 1];
    cur.read_exact(&mut tag).map_err(eof("data value tag"))?;
    match tag[0] {
        TAG_OBJECT => {
            let vid = read_vid(cur)?;
            let count = cur.read_u32::<LittleEndian>().map_err(eof("object child count"))?;
            let mut children = HashMap::with_capacity(count as usize);
            for _ in 0..count {
                let key = read_string(cur, "object key")?;
                let child = decode_data_value(cur)?;
                children.insert(key, child);
            }
            Ok(DataValue::Object(ObjectValue { vid, children }))
        }
        TAG_ARRAY => {
            let vid = read_vid(cur)?;
            let count = cur.read_u32::<LittleEndian>().map_err(eof("array child count"))?;
            let mut children = Vec::with_capacity(count as usize);
            for _ in 0..count {
                children.push(decode_data_value(cur)?);
            }
            Ok(DataValue::Array(ArrayValue { vid, children }))
        }
        TAG_STRING => {
            let vid = read_vid(cur)?;
            let value = read_string(cur, "string value")?;
            Ok(DataValue::String(StringValue { vid, value }))
        }
        TAG_DOUBLE => {
            let vid = read_vid(cur)?;
            let value = cur.read_f64::<LittleEndian>().map_err(eof("double value"))?;
            Ok(DataValue::Double(DoubleValue { vid, value }))
        }
        TAG_BOOLEAN => {
            let vid = read_vid(cur)?;
            let value = cur.read_u8().map_err(eof("boolean value"))? != 0;
            Ok(DataValue::Boolean(BooleanValue { vid, value }))
        }
        TAG_DATE => {
            let vid = read_vid(cur)?;
            let millis = cur.read_i64::<LittleEndian>().map_err(eof("date value"))?;
            let value = Utc
                .timestamp_millis_opt(millis)
                .single()
                .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
            Ok(DataValue::Date(DateValue { vid, value }))
        }
        TAG_NULL => {
            let vid = read_vid(cur)?;
            Ok(DataValue::Null(NullValue { vid }))
        }
        other => Err(CodecError::UnknownDataValueTag(other)),
    }
}

const OP_KIND_COMPOUND: u8 = 0;
const OP_KIND_STRING_INSERT: u8 = 1;
const OP_KIND_STRING_REMOVE: u8 = 2;
const OP_KIND_STRING_SET: u8 = 3;
const OP_KIND_ARRAY_INSERT: u8 = 4;
const OP_KIND_ARRAY_REMOVE: u8 = 5;
const OP_KIND_ARRAY_REPLACE: u8 = 6;
const OP_KIND_ARRAY_MOVE: u8 = 7;
const OP_KIND_ARRAY_SET: u8 = 8;
const OP_KIND_OBJECT_ADD_PROPERTY: u8 = 9;
const OP_KIND_OBJECT_SET_PROPERTY: u8 = 10;
const OP_KIND_OBJECT_REMOVE_PROPERTY: u8 = 11;
const OP_KIND_OBJECT_SET: u8 = 12;
const OP_KIND_NUMBER_ADD: u8 = 13;
const OP_KIND_NUMBER_SET: u8 = 14;
const OP_KIND_BOOLEAN_SET: u8 = 15;
const OP_KIND_DATE_SET: u8 = 16;

fn op_kind_tag(kind: &Kind) -> u8 {
    match kind {
        Kind::StringInsert { .. } => OP_KIND_STRING_INSERT,
        Kind::StringRemove { .. } => OP_KIND_STRING_REMOVE,
        Kind::StringSet { .. } => OP_KIND_STRING_SET,
        Kind::ArrayInsert { .. } => OP_KIND_ARRAY_INSERT,
        Kind::ArrayRemove { .. } => OP_KIND_ARRAY_REMOVE,
        Kind::ArrayReplace { .. } => OP_KIND_ARRAY_REPLACE,
        Kind::ArrayMove { .. } => OP_KIND_ARRAY_MOVE,
        Kind::ArraySet { .. } => OP_KIND_ARRAY_SET,
        Kind::ObjectAddProperty { .. } => OP_KIND_OBJECT_ADD_PROPERTY,
        Kind::ObjectSetProperty { .. } => OP_KIND_OBJECT_SET_PROPERTY,
        Kind::ObjectRemoveProperty { .. } => OP_KIND_OBJECT_REMOVE_PROPERTY,
        Kind::ObjectSet { .. } => OP_KIND_OBJECT_SET,
        Kind::NumberAdd { .. } => OP_KIND_NUMBER_ADD,
        Kind::NumberSet { .. } => OP_KIND_NUMBER_SET,
        Kind::BooleanSet { .. } => OP_KIND_BOOLEAN_SET,
        Kind::DateSet { .. } => OP_KIND_DATE_SET,
    }
}

fn encode_kind_body(kind: &Kind, buf: &mut Vec<u8>) {
    match kind {
        Kind::StringInsert { index, value } => {
            buf.write_u32::<LittleEndian>(*index as u32).unwrap();
            write_string(buf, value);
        }
        Kind::StringRemove { index, value } => {
            buf.write_u32::<LittleEndian>(*index as u32).unwrap();
            write_string(buf, value);
        }
        Kind::StringSet { value } => write_string(buf, value),
        Kind::ArrayInsert { index, value } => {
            buf.write_u32::<LittleEndian>(*index as u32).unwrap();
            encode_data_value(value, buf);
        }
        Kind::ArrayRemove { index } => {
            buf.write_u32::<LittleEndian>(*index as u32).unwrap();
        }
        Kind::ArrayReplace { index, value } => {
            buf.write_u32::<LittleEndian>(*index as u32).unwrap();
            encode_data_value(value, buf);
        }
        Kind::ArrayMove { from_index, to_index } => {
            buf.write_u32::<LittleEndian>(*from_index as u32).unwrap();
            buf.write_u32::<LittleEndian>(*to_index as u32).unwrap();
        }
        Kind::ArraySet { value } => {
            buf.write_u32::<LittleEndian>(value.len() as u32).unwrap();
            for item in value {
                encode_data_value(item, buf);
            }
        }
        Kind::ObjectAddProperty { property, value } => {
            write_string(buf, property);
            encode_data_value(value, buf);
        }
        Kind::ObjectSetProperty { property, value } => {
            write_string(buf, property);
            encode_data_value(value, buf);
        }
        Kind::ObjectRemoveProperty { property } => write_string(buf, property),
        Kind::ObjectSet { value } => {
            buf.write_u32::<LittleEndian>(value.len() as u32).unwrap();
            for (key, item) in value {
                write_string(buf, key);
                encode_data_value(item, buf);
            }
        }
        Kind::NumberAdd { value } => buf.write_f64::<LittleEndian>(*value).unwrap(),
        Kind::NumberSet { value } => buf.write_f64::<LittleEndian>(*value).unwrap(),
        Kind::BooleanSet { value } => buf.write_u8(*value as u8).unwrap(),
        Kind::DateSet { value } => buf
            .write_i64::<LittleEndian>(value.timestamp_millis())
            .unwrap(),
    }
}

fn decode_kind_body(tag: u8, cur: &mut Cursor<&[u8]>) -> Result<Kind> {
    Ok(match tag {
        OP_KIND_STRING_INSERT => Kind::StringInsert {
            index: cur.read_u32::<LittleEndian>().map_err(eof("string insert index"))? as usize,
            value: read_string(cur, "string insert value")?,
        },
        OP_KIND_STRING_REMOVE => Kind::StringRemove {
            index: cur.read_u32::<LittleEndian>().map_err(eof("string remove index"))? as usize,
            value: read_string(cur, "string remove value")?,
        },
        OP_KIND_STRING_SET => Kind::StringSet {
            value: read_string(cur, "string set value")?,
        },
        OP_KIND_ARRAY_INSERT => Kind::ArrayInsert {
            index: cur.read_u32::<LittleEndian>().map_err(eof("array insert index"))? as usize,
            value: decode_data_value(cur)?,
        },
        OP_KIND_ARRAY_REMOVE => Kind::ArrayRemove {
            index: cur.read_u32::<LittleEndian>().map_err(eof("array remove index"))? as usize,
        },
        OP_KIND_ARRAY_REPLACE => Kind::ArrayReplace {
            index: cur.read_u32::<LittleEndian>().map_err(eof("array replace index"))? as usize,
            value: decode_data_value(cur)?,
        },
        OP_KIND_ARRAY_MOVE => Kind::ArrayMove {
            from_index: cur.read_u32::<LittleEndian>().map_err(eof("array move from"))? as usize,
            to_index: cur.read_u32::<LittleEndian>().map_err(eof("array move to"))? as usize,
        },
        OP_KIND_ARRAY_SET => {
            let count = cur.read_u32::<LittleEndian>().map_err(eof("array set count"))?;
            let mut value = Vec::with_capacity(count as usize);
            for _ in 0..count {
                value.push(decode_data_value(cur)?);
            }
            Kind::ArraySet { value }
        }
        OP_KIND_OBJECT_ADD_PROPERTY => Kind::ObjectAddProperty {
            property: read_string(cur, "object add-property key")?,
            value: decode_data_value(cur)?,
        },
        OP_KIND_OBJECT_SET_PROPERTY => Kind::ObjectSetProperty {
            property: read_string(cur, "object set-property key")?,
            value: decode_data_value(cur)?,
        },
        OP_KIND_OBJECT_REMOVE_PROPERTY => Kind::ObjectRemoveProperty {
            property: read_string(cur, "object remove-property key")?,
        },
        OP_KIND_OBJECT_SET => {
            let count = cur.read_u32::<LittleEndian>().map_err(eof("object set count"))?;
            let mut value = HashMap::with_capacity(count as usize);
            for _ in 0..count {
                let key = read_string(cur, "object set key")?;
                value.insert(key, decode_data_value(cur)?);
            }
            Kind::ObjectSet { value }
        }
        OP_KIND_NUMBER_ADD => Kind::NumberAdd {
            value: cur.read_f64::<LittleEndian>().map_err(eof("number add value"))?,
        },
        OP_KIND_NUMBER_SET => Kind::NumberSet {
            value: cur.read_f64::<LittleEndian>().map_err(eof("number set value"))?,
        },
        OP_KIND_BOOLEAN_SET => Kind::BooleanSet {
            value: cur.read_u8().map_err(eof("boolean set value"))? != 0,
        },
        OP_KIND_DATE_SET => {
            let millis = cur.read_i64::<LittleEndian>().map_err(eof("date set value"))?;
            Kind::DateSet {
                value: Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap()),
            }
        }
        other => return Err(CodecError::UnknownOpKind(other)),
    })
}

/// Encode a [`DiscreteOperation`] as `vidLen:u32, vidBytes, noOp:u8,
/// opBody`. Used both standalone and as the per-element encoding inside a
/// compound op body.
pub fn encode_discrete(op: &DiscreteOperation, buf: &mut Vec<u8>) {
    write_vid(buf, &op.vid);
    buf.write_u8(op.no_op as u8).unwrap();
    encode_kind_body(&op.kind, buf);
}

fn decode_discrete(tag: u8, cur: &mut Cursor<&[u8]>) -> Result<DiscreteOperation> {
    let vid = read_vid(cur)?;
    let no_op = cur.read_u8().map_err(eof("discrete no_op"))? != 0;
    let kind = decode_kind_body(tag, cur)?;
    Ok(DiscreteOperation { vid, no_op, kind })
}

/// Encode an [`Operation`] as `opKind:u8, opBody`, where a compound op's
/// body is `count:u32` followed by that many discrete sub-ops, each
/// prefixed by its own opKind byte (`spec.md` §6).
pub fn encode_operation(op: &Operation, buf: &mut Vec<u8>) {
    match op {
        Operation::Discrete(d) => {
            buf.push(op_kind_tag(&d.kind));
            encode_discrete(d, buf);
        }
        Operation::Compound(c) => {
            buf.push(OP_KIND_COMPOUND);
            buf.write_u32::<LittleEndian>(c.ops.len() as u32).unwrap();
            for sub in &c.ops {
                buf.push(op_kind_tag(&sub.kind));
                encode_discrete(sub, buf);
            }
        }
    }
}

/// Decode an [`Operation`] previously written by [`encode_operation`].
pub fn decode_operation(cur: &mut Cursor<&[u8]>) -> Result<Operation> {
    let mut tag = [0u8; 1];
    cur.read_exact(&mut tag).map_err(eof("op kind"))?;
    if tag[0] == OP_KIND_COMPOUND {
        let count = cur.read_u32::<LittleEndian>().map_err(eof("compound count"))?;
        let mut ops = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut sub_tag = [0u8; 1];
            cur.read_exact(&mut sub_tag).map_err(eof("compound sub op kind"))?;
            ops.push(decode_discrete(sub_tag[0], cur)?);
        }
        Ok(Operation::Compound(CompoundOperation { ops }))
    } else {
        Ok(Operation::Discrete(decode_discrete(tag[0], cur)?))
    }
}

/// Encode a full operation-log entry: `version:u64 LE, timestampMillis:i64
/// LE, sessionIdLen:u16, sessionIdBytes, opKind:u8, opBody` (`spec.md` §6).
pub fn encode_log_entry(entry: &LogEntry) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u64::<LittleEndian>(entry.version).unwrap();
    buf.write_i64::<LittleEndian>(entry.timestamp.timestamp_millis())
        .unwrap();
    let session_bytes = entry.session_id.as_bytes();
    buf.write_u16::<LittleEndian>(session_bytes.len() as u16)
        .unwrap();
    buf.extend_from_slice(session_bytes);
    encode_operation(&entry.op, &mut buf);
    buf
}

/// Decode a full operation-log entry previously written by
/// [`encode_log_entry`].
pub fn decode_log_entry(bytes: &[u8]) -> Result<LogEntry> {
    let mut cur = Cursor::new(bytes);
    let version = cur.read_u64::<LittleEndian>().map_err(eof("entry version"))?;
    let millis = cur.read_i64::<LittleEndian>().map_err(eof("entry timestamp"))?;
    let timestamp = Utc
        .timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    let session_len = cur.read_u16::<LittleEndian>().map_err(eof("entry session id len"))?;
    let mut session_bytes = vec![0u8; session_len as usize];
    cur.read_exact(&mut session_bytes)
        .map_err(eof("entry session id bytes"))?;
    let session_id = String::from_utf8(session_bytes)?;
    let op = decode_operation(&mut cur)?;
    Ok(LogEntry {
        version,
        timestamp,
        session_id,
        op,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ValueId, VidFactory};

    fn roundtrip_kind(kind: Kind) {
        let op = DiscreteOperation::new(ValueId::new("s1"), kind.clone());
        let mut buf = Vec::new();
        buf.push(op_kind_tag(&op.kind));
        encode_discrete(&op, &mut buf);
        let mut cur = Cursor::new(buf.as_slice());
        let mut tag = [0u8; 1];
        cur.read_exact(&mut tag).unwrap();
        let decoded = decode_discrete(tag[0], &mut cur).unwrap();
        assert_eq!(decoded.kind, kind);
        assert_eq!(decoded.vid, op.vid);
    }

    #[test]
    fn roundtrip_every_discrete_kind() {
        let mut factory = VidFactory::default();
        let vid = factory.next_server_id();
        roundtrip_kind(Kind::StringInsert {
            index: 1,
            value: "x".into(),
        });
        roundtrip_kind(Kind::StringRemove {
            index: 0,
            value: "y".into(),
        });
        roundtrip_kind(Kind::StringSet {
            value: "z".into(),
        });
        roundtrip_kind(Kind::ArrayInsert {
            index: 0,
            value: DataValue::new_null(vid.clone()),
        });
        roundtrip_kind(Kind::ArrayRemove { index: 3 });
        roundtrip_kind(Kind::ArrayReplace {
            index: 2,
            value: DataValue::new_double(vid.clone(), 4.5),
        });
        roundtrip_kind(Kind::ArrayMove {
            from_index: 0,
            to_index: 5,
        });
        roundtrip_kind(Kind::ArraySet {
            value: vec![DataValue::new_boolean(vid.clone(), true)],
        });
        roundtrip_kind(Kind::ObjectAddProperty {
            property: "p".into(),
            value: DataValue::new_string(vid.clone(), "v".into()),
        });
        roundtrip_kind(Kind::ObjectSetProperty {
            property: "p".into(),
            value: DataValue::new_string(vid.clone(), "v2".into()),
        });
        roundtrip_kind(Kind::ObjectRemoveProperty {
            property: "p".into(),
        });
        roundtrip_kind(Kind::ObjectSet {
            value: HashMap::new(),
        });
        roundtrip_kind(Kind::NumberAdd { value: 1.5 });
        roundtrip_kind(Kind::NumberSet { value: -2.25 });
        roundtrip_kind(Kind::BooleanSet { value: false });
        roundtrip_kind(Kind::DateSet {
            value: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        });
    }

    #[test]
    fn roundtrip_compound_operation() {
        let ops = vec![
            DiscreteOperation::new(
                ValueId::new("s1"),
                Kind::StringInsert {
                    index: 0,
                    value: "a".into(),
                },
            ),
            DiscreteOperation::new(
                ValueId::new("n1"),
                Kind::NumberAdd { value: 3.0 },
            ),
        ];
        let op = Operation::Compound(CompoundOperation { ops: ops.clone() });
        let mut buf = Vec::new();
        encode_operation(&op, &mut buf);
        let mut cur = Cursor::new(buf.as_slice());
        let decoded = decode_operation(&mut cur).unwrap();
        match decoded {
            Operation::Compound(c) => assert_eq!(c.ops, ops),
            Operation::Discrete(_) => panic!("expected compound"),
        }
    }

    #[test]
    fn roundtrip_log_entry() {
        let entry = LogEntry {
            version: 42,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            session_id: "session-abc".into(),
            op: Operation::discrete(
                ValueId::new("s1"),
                Kind::StringSet {
                    value: "hello".into(),
                },
            ),
        };
        let bytes = encode_log_entry(&entry);
        let decoded = decode_log_entry(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn decode_rejects_unknown_op_kind() {
        let mut buf = Vec::new();
        buf.push(200u8);
        let mut cur = Cursor::new(buf.as_slice());
        let err = decode_operation(&mut cur).unwrap_err();
        assert!(matches!(err, CodecError::UnknownOpKind(200)));
    }
}
