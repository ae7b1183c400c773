//! Address-indexed, typed variable storage
//!
//! A program ships a heap template; every running instance works on its own
//! clone. Slots that must point at the hosting entity are stored as
//! [`HeapValue::Unresolved`] until the host resolves them.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::value::{TypeTag, Value};
use thiserror::Error;

/// Heap access errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HeapError {
    /// Address outside the heap
    #[error("Invalid heap address {0:#x}")]
    InvalidAddress(u32),

    /// Value does not fit the slot's declared type
    #[error("Type mismatch at heap address {address:#x}: slot is {expected}, value is {actual}")]
    TypeMismatch {
        /// Heap address
        address: u32,
        /// Declared slot type
        expected: TypeTag,
        /// Offending value
        actual: String,
    },

    /// Slot still holds an unresolved reference
    #[error("Heap address {0:#x} holds an unresolved reference")]
    Unresolved(u32),
}

/// Placeholder for a host object that only exists once the program is bound
/// to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingReference {
    /// The instance itself, viewed as the given type
    This(TypeTag),
}

impl PendingReference {
    /// Type the reference resolves to
    pub fn target(&self) -> TypeTag {
        match self {
            PendingReference::This(tag) => *tag,
        }
    }
}

/// Contents of a heap slot
#[derive(Debug, Clone, PartialEq)]
pub enum HeapValue {
    /// A concrete value
    Resolved(Value),
    /// Waiting for host resolution
    Unresolved(PendingReference),
}

/// One heap slot
#[derive(Debug, Clone, PartialEq)]
pub struct HeapSlot {
    /// Declared type
    pub declared: TypeTag,
    /// Contents
    pub value: HeapValue,
}

/// Typed heap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap {
    slots: Vec<HeapSlot>,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the heap has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `address` names a slot
    pub fn contains(&self, address: u32) -> bool {
        (address as usize) < self.slots.len()
    }

    /// Append a slot holding `value`, returning its address
    pub fn push(&mut self, declared: TypeTag, value: Value) -> Result<u32, HeapError> {
        let address = self.slots.len() as u32;
        if !value.is_assignable_to(declared) {
            return Err(HeapError::TypeMismatch {
                address,
                expected: declared,
                actual: value.to_string(),
            });
        }
        self.slots.push(HeapSlot {
            declared,
            value: HeapValue::Resolved(value),
        });
        Ok(address)
    }

    /// Append a slot awaiting host resolution, returning its address
    pub fn push_pending(&mut self, declared: TypeTag, reference: PendingReference) -> u32 {
        let address = self.slots.len() as u32;
        self.slots.push(HeapSlot {
            declared,
            value: HeapValue::Unresolved(reference),
        });
        address
    }

    /// Borrow a slot
    pub fn slot(&self, address: u32) -> Result<&HeapSlot, HeapError> {
        self.slots
            .get(address as usize)
            .ok_or(HeapError::InvalidAddress(address))
    }

    /// Declared type of a slot
    pub fn declared_type(&self, address: u32) -> Result<TypeTag, HeapError> {
        Ok(self.slot(address)?.declared)
    }

    /// Read a resolved value
    pub fn get(&self, address: u32) -> Result<&Value, HeapError> {
        match &self.slot(address)?.value {
            HeapValue::Resolved(value) => Ok(value),
            HeapValue::Unresolved(_) => Err(HeapError::Unresolved(address)),
        }
    }

    /// Write a value, checking it against the declared type
    ///
    /// Writing to an unresolved slot resolves it.
    pub fn set(&mut self, address: u32, value: Value) -> Result<(), HeapError> {
        let slot = self
            .slots
            .get_mut(address as usize)
            .ok_or(HeapError::InvalidAddress(address))?;
        if !value.is_assignable_to(slot.declared) {
            return Err(HeapError::TypeMismatch {
                address,
                expected: slot.declared,
                actual: value.to_string(),
            });
        }
        slot.value = HeapValue::Resolved(value);
        Ok(())
    }

    /// Copy the value at `source` into `destination`
    pub fn copy(&mut self, source: u32, destination: u32) -> Result<(), HeapError> {
        let value = self.get(source)?.clone();
        self.set(destination, value)
    }

    /// Unresolved slots in address order
    pub fn pending_references(&self) -> impl Iterator<Item = (u32, PendingReference)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(address, slot)| match slot.value {
                HeapValue::Unresolved(reference) => Some((address as u32, reference)),
                HeapValue::Resolved(_) => None,
            })
    }

    /// Check if any slot is still unresolved
    pub fn has_pending_references(&self) -> bool {
        self.pending_references().next().is_some()
    }

    /// Encode all slots
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.slots.len() as u32);
        for slot in &self.slots {
            slot.declared.encode(writer);
            match &slot.value {
                HeapValue::Resolved(value) => {
                    writer.emit_u8(0);
                    value.encode(writer);
                }
                HeapValue::Unresolved(PendingReference::This(target)) => {
                    writer.emit_u8(1);
                    target.encode(writer);
                }
            }
        }
    }

    /// Decode all slots
    ///
    /// Declared types are not re-checked here; the verifier does that.
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut slots = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let declared = TypeTag::decode(reader)?;
            let offset = reader.position();
            let value = match reader.read_u8()? {
                0 => HeapValue::Resolved(Value::decode(reader)?),
                1 => HeapValue::Unresolved(PendingReference::This(TypeTag::decode(reader)?)),
                tag => {
                    return Err(DecodeError::InvalidTag {
                        kind: "heap slot",
                        tag,
                        offset,
                    })
                }
            };
            slots.push(HeapSlot { declared, value });
        }
        Ok(Self { slots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ObjectKind, ObjectRef};

    #[test]
    fn test_push_and_get() {
        let mut heap = Heap::new();
        let a = heap.push(TypeTag::Int32, Value::Int32(5)).unwrap();
        let b = heap.push(TypeTag::String, Value::Null).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(heap.get(a).unwrap(), &Value::Int32(5));
        assert_eq!(heap.get(b).unwrap(), &Value::Null);
        assert_eq!(heap.declared_type(b).unwrap(), TypeTag::String);
    }

    #[test]
    fn test_missing_address_is_an_error() {
        let heap = Heap::new();
        assert_eq!(heap.get(0), Err(HeapError::InvalidAddress(0)));
        assert_eq!(heap.declared_type(9), Err(HeapError::InvalidAddress(9)));
    }

    #[test]
    fn test_set_checks_declared_type() {
        let mut heap = Heap::new();
        let a = heap.push(TypeTag::Int32, Value::Int32(0)).unwrap();

        assert!(matches!(
            heap.set(a, Value::Boolean(true)),
            Err(HeapError::TypeMismatch { address: 0, expected: TypeTag::Int32, .. })
        ));
        heap.set(a, Value::Int32(3)).unwrap();
        assert_eq!(heap.get(a).unwrap().as_i32(), Some(3));
    }

    #[test]
    fn test_copy() {
        let mut heap = Heap::new();
        let src = heap.push(TypeTag::Int32, Value::Int32(9)).unwrap();
        let dst = heap.push(TypeTag::Int32, Value::Int32(0)).unwrap();
        let other = heap.push(TypeTag::Boolean, Value::Boolean(false)).unwrap();

        heap.copy(src, dst).unwrap();
        assert_eq!(heap.get(dst).unwrap(), &Value::Int32(9));
        assert!(heap.copy(src, other).is_err());
    }

    #[test]
    fn test_pending_references() {
        let mut heap = Heap::new();
        heap.push(TypeTag::Int32, Value::Int32(0)).unwrap();
        let this = heap.push_pending(TypeTag::GameObject, PendingReference::This(TypeTag::GameObject));

        assert!(heap.has_pending_references());
        assert_eq!(heap.get(this), Err(HeapError::Unresolved(this)));
        assert_eq!(
            heap.pending_references().collect::<Vec<_>>(),
            vec![(1, PendingReference::This(TypeTag::GameObject))]
        );

        heap.set(this, Value::Object(ObjectRef::new(ObjectKind::GameObject, 1)))
            .unwrap();
        assert!(!heap.has_pending_references());
    }

    #[test]
    fn test_encode_decode() {
        let mut heap = Heap::new();
        heap.push(TypeTag::String, Value::String("x".into())).unwrap();
        heap.push_pending(TypeTag::Transform, PendingReference::This(TypeTag::Transform));

        let mut writer = BytecodeWriter::new();
        heap.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = Heap::decode(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(decoded, heap);
    }
}
