//! Typed heap values
//!
//! Heap slots carry a declared [`TypeTag`] next to their [`Value`]. Host
//! objects (scene entities, transforms, behaviours) are never owned by the VM;
//! they are stored as opaque [`ObjectRef`] handles issued by the host.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a heap slot or symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    /// Any value, including null
    Object,
    /// `true` / `false`
    Boolean,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 32-bit integer, also used for code addresses
    UInt32,
    /// 32-bit float
    Single,
    /// 64-bit float
    Double,
    /// UTF-8 string, nullable
    String,
    /// Host scene entity
    GameObject,
    /// Spatial transform of a host entity
    Transform,
    /// A behaviour instance running a program
    UdonBehaviour,
}

impl TypeTag {
    /// All type tags, in encoding order
    pub const ALL: [TypeTag; 11] = [
        TypeTag::Object,
        TypeTag::Boolean,
        TypeTag::Int32,
        TypeTag::Int64,
        TypeTag::UInt32,
        TypeTag::Single,
        TypeTag::Double,
        TypeTag::String,
        TypeTag::GameObject,
        TypeTag::Transform,
        TypeTag::UdonBehaviour,
    ];

    /// Name used in assembly text and extern signatures
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Object => "SystemObject",
            TypeTag::Boolean => "SystemBoolean",
            TypeTag::Int32 => "SystemInt32",
            TypeTag::Int64 => "SystemInt64",
            TypeTag::UInt32 => "SystemUInt32",
            TypeTag::Single => "SystemSingle",
            TypeTag::Double => "SystemDouble",
            TypeTag::String => "SystemString",
            TypeTag::GameObject => "UnityEngineGameObject",
            TypeTag::Transform => "UnityEngineTransform",
            TypeTag::UdonBehaviour => "VRCUdonUdonBehaviour",
        }
    }

    /// Parse an assembly type name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.name() == name)
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Value a slot of this type holds when nothing else was assigned
    pub fn default_value(self) -> Value {
        match self {
            TypeTag::Boolean => Value::Boolean(false),
            TypeTag::Int32 => Value::Int32(0),
            TypeTag::Int64 => Value::Int64(0),
            TypeTag::UInt32 => Value::UInt32(0),
            TypeTag::Single => Value::Single(0.0),
            TypeTag::Double => Value::Double(0.0),
            TypeTag::Object
            | TypeTag::String
            | TypeTag::GameObject
            | TypeTag::Transform
            | TypeTag::UdonBehaviour => Value::Null,
        }
    }

    /// Whether null may be stored in a slot of this type
    pub fn is_nullable(self) -> bool {
        matches!(
            self,
            TypeTag::Object
                | TypeTag::String
                | TypeTag::GameObject
                | TypeTag::Transform
                | TypeTag::UdonBehaviour
        )
    }

    /// Object kind a host reference must have to fit this type
    pub fn object_kind(self) -> Option<ObjectKind> {
        match self {
            TypeTag::GameObject => Some(ObjectKind::GameObject),
            TypeTag::Transform => Some(ObjectKind::Transform),
            TypeTag::UdonBehaviour => Some(ObjectKind::UdonBehaviour),
            _ => None,
        }
    }

    /// Encode the tag as a single byte
    pub fn encode(self, writer: &mut BytecodeWriter) {
        writer.emit_u8(self.to_u8());
    }

    /// Decode a tag byte
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let tag = reader.read_u8()?;
        Self::from_u8(tag).ok_or(DecodeError::InvalidTag {
            kind: "type",
            tag,
            offset,
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of host object an [`ObjectRef`] points to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Scene entity
    GameObject,
    /// Spatial transform
    Transform,
    /// Behaviour instance
    UdonBehaviour,
    /// Any other host object
    Other,
}

impl ObjectKind {
    const ALL: [ObjectKind; 4] = [
        ObjectKind::GameObject,
        ObjectKind::Transform,
        ObjectKind::UdonBehaviour,
        ObjectKind::Other,
    ];
}

/// Opaque handle to a host-owned object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// What the handle refers to
    pub kind: ObjectKind,
    /// Host-assigned identifier
    pub id: u64,
}

impl ObjectRef {
    /// Create a handle
    pub const fn new(kind: ObjectKind, id: u64) -> Self {
        Self { kind, id }
    }

    /// Encode kind byte + id
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u8(self.kind as u8);
        writer.emit_u64(self.id);
    }

    /// Decode kind byte + id
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let tag = reader.read_u8()?;
        let kind = ObjectKind::ALL
            .get(tag as usize)
            .copied()
            .ok_or(DecodeError::InvalidTag {
                kind: "object kind",
                tag,
                offset,
            })?;
        let id = reader.read_u64()?;
        Ok(Self { kind, id })
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

/// A value stored on the heap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null reference
    Null,
    /// Boolean
    Boolean(bool),
    /// Signed 32-bit integer
    Int32(i32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// 32-bit float
    Single(f32),
    /// 64-bit float
    Double(f64),
    /// String
    String(String),
    /// Host object handle
    Object(ObjectRef),
}

impl Value {
    const TAG_NULL: u8 = 0;
    const TAG_BOOLEAN: u8 = 1;
    const TAG_INT32: u8 = 2;
    const TAG_INT64: u8 = 3;
    const TAG_UINT32: u8 = 4;
    const TAG_SINGLE: u8 = 5;
    const TAG_DOUBLE: u8 = 6;
    const TAG_STRING: u8 = 7;
    const TAG_OBJECT: u8 = 8;

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Runtime type of the value, `None` for null
    pub fn type_tag(&self) -> Option<TypeTag> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(TypeTag::Boolean),
            Value::Int32(_) => Some(TypeTag::Int32),
            Value::Int64(_) => Some(TypeTag::Int64),
            Value::UInt32(_) => Some(TypeTag::UInt32),
            Value::Single(_) => Some(TypeTag::Single),
            Value::Double(_) => Some(TypeTag::Double),
            Value::String(_) => Some(TypeTag::String),
            Value::Object(obj) => Some(match obj.kind {
                ObjectKind::GameObject => TypeTag::GameObject,
                ObjectKind::Transform => TypeTag::Transform,
                ObjectKind::UdonBehaviour => TypeTag::UdonBehaviour,
                ObjectKind::Other => TypeTag::Object,
            }),
        }
    }

    /// Whether this value may be stored in a slot declared as `tag`
    pub fn is_assignable_to(&self, tag: TypeTag) -> bool {
        if tag == TypeTag::Object {
            return true;
        }
        match self {
            Value::Null => tag.is_nullable(),
            Value::Object(obj) => tag.object_kind() == Some(obj.kind),
            other => other.type_tag() == Some(tag),
        }
    }

    /// Extract boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract i32 value
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract u32 value
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(u) => Some(*u),
            _ => None,
        }
    }

    /// Extract f32 value
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Single(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow string contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extract host object handle
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Parse a literal of the given type, as written in assembly text or on
    /// the command line
    pub fn parse_literal(tag: TypeTag, text: &str) -> Option<Value> {
        let text = text.trim();
        if text == "null" {
            return tag.is_nullable().then_some(Value::Null);
        }
        match tag {
            TypeTag::Boolean => text.parse().ok().map(Value::Boolean),
            TypeTag::Int32 => parse_int(text).and_then(|v| i32::try_from(v).ok()).map(Value::Int32),
            TypeTag::Int64 => parse_int(text).map(Value::Int64),
            TypeTag::UInt32 => parse_int(text).and_then(|v| u32::try_from(v).ok()).map(Value::UInt32),
            TypeTag::Single => text.trim_end_matches('f').parse().ok().map(Value::Single),
            TypeTag::Double => text.parse().ok().map(Value::Double),
            TypeTag::String | TypeTag::Object => {
                unquote(text).map(|s| Value::String(s.to_string()))
            }
            TypeTag::GameObject | TypeTag::Transform | TypeTag::UdonBehaviour => None,
        }
    }

    /// Encode the value with a leading tag byte
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            Value::Null => writer.emit_u8(Self::TAG_NULL),
            Value::Boolean(b) => {
                writer.emit_u8(Self::TAG_BOOLEAN);
                writer.emit_u8(*b as u8);
            }
            Value::Int32(i) => {
                writer.emit_u8(Self::TAG_INT32);
                writer.emit_i32(*i);
            }
            Value::Int64(i) => {
                writer.emit_u8(Self::TAG_INT64);
                writer.emit_i64(*i);
            }
            Value::UInt32(u) => {
                writer.emit_u8(Self::TAG_UINT32);
                writer.emit_u32(*u);
            }
            Value::Single(f) => {
                writer.emit_u8(Self::TAG_SINGLE);
                writer.emit_f32(*f);
            }
            Value::Double(f) => {
                writer.emit_u8(Self::TAG_DOUBLE);
                writer.emit_f64(*f);
            }
            Value::String(s) => {
                writer.emit_u8(Self::TAG_STRING);
                writer.emit_string(s);
            }
            Value::Object(obj) => {
                writer.emit_u8(Self::TAG_OBJECT);
                obj.encode(writer);
            }
        }
    }

    /// Decode a tagged value
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let tag = reader.read_u8()?;
        Ok(match tag {
            Self::TAG_NULL => Value::Null,
            Self::TAG_BOOLEAN => Value::Boolean(reader.read_u8()? != 0),
            Self::TAG_INT32 => Value::Int32(reader.read_i32()?),
            Self::TAG_INT64 => Value::Int64(reader.read_i64()?),
            Self::TAG_UINT32 => Value::UInt32(reader.read_u32()?),
            Self::TAG_SINGLE => Value::Single(reader.read_f32()?),
            Self::TAG_DOUBLE => Value::Double(reader.read_f64()?),
            Self::TAG_STRING => Value::String(reader.read_string()?),
            Self::TAG_OBJECT => Value::Object(ObjectRef::decode(reader)?),
            _ => {
                return Err(DecodeError::InvalidTag {
                    kind: "value",
                    tag,
                    offset,
                })
            }
        })
    }
}

fn parse_int(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn unquote(text: &str) -> Option<&str> {
    text.strip_prefix('"')?.strip_suffix('"')
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::UInt32(u) => write!(f, "{}", u),
            Value::Single(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(obj) => write!(f, "{}", obj),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_roundtrip() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::from_name(tag.name()), Some(tag));
        }
        assert_eq!(TypeTag::from_name("SystemVoid"), None);
    }

    #[test]
    fn test_default_values_fit_their_type() {
        for tag in TypeTag::ALL {
            assert!(tag.default_value().is_assignable_to(tag), "{}", tag);
        }
    }

    #[test]
    fn test_assignability() {
        assert!(Value::Int32(1).is_assignable_to(TypeTag::Int32));
        assert!(Value::Int32(1).is_assignable_to(TypeTag::Object));
        assert!(!Value::Int32(1).is_assignable_to(TypeTag::Int64));
        assert!(!Value::Null.is_assignable_to(TypeTag::Boolean));
        assert!(Value::Null.is_assignable_to(TypeTag::String));

        let go = Value::Object(ObjectRef::new(ObjectKind::GameObject, 7));
        assert!(go.is_assignable_to(TypeTag::GameObject));
        assert!(!go.is_assignable_to(TypeTag::Transform));
        assert!(go.is_assignable_to(TypeTag::Object));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(Value::parse_literal(TypeTag::Int32, "-5"), Some(Value::Int32(-5)));
        assert_eq!(Value::parse_literal(TypeTag::UInt32, "0xFFFFFFFC"), Some(Value::UInt32(0xFFFF_FFFC)));
        assert_eq!(Value::parse_literal(TypeTag::Boolean, "true"), Some(Value::Boolean(true)));
        assert_eq!(Value::parse_literal(TypeTag::Single, "1.5"), Some(Value::Single(1.5)));
        assert_eq!(
            Value::parse_literal(TypeTag::String, "\"hello\""),
            Some(Value::String("hello".to_string()))
        );
        assert_eq!(Value::parse_literal(TypeTag::String, "null"), Some(Value::Null));
        assert_eq!(Value::parse_literal(TypeTag::Int32, "null"), None);
        assert_eq!(Value::parse_literal(TypeTag::Int32, "abc"), None);
    }

    #[test]
    fn test_invalid_value_tag() {
        let mut reader = BytecodeReader::new(&[42]);
        assert!(matches!(
            Value::decode(&mut reader),
            Err(DecodeError::InvalidTag { kind: "value", tag: 42, .. })
        ));
    }
}
