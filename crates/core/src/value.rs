//! Property values and their persisted encoding
//!
//! Every property is stored as a `(kind, payload)` pair. References keep only
//! the rowid; the store identity is re-attached on decode. Anything that is not
//! a reference, integer or string is serialized opaquely with MessagePack. If
//! that fails the value degrades to its `Debug` text under the `Text` kind,
//! which reads back as the text itself, never as the original type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{KoyaError, KoyaResult};
use crate::types::{ObjectRef, RowId, StoreId};

/// A property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Reference to another object
    Ref(ObjectRef),
    /// Integer
    Int(i64),
    /// String
    Str(String),
    /// MessagePack-serialized payload
    Opaque(Vec<u8>),
    /// Lossy textual fallback; not round-trippable
    Text(String),
}

impl Value {
    /// Serialize any value opaquely, degrading to [`Value::Text`] on failure
    pub fn opaque<T: Serialize + fmt::Debug + ?Sized>(value: &T) -> Value {
        match rmp_serde::to_vec(value) {
            Ok(bytes) => Value::Opaque(bytes),
            Err(e) => {
                warn!(target: "koya::codec", error = %e, "Opaque encoding failed, storing text form");
                Value::Text(format!("{:?}", value))
            }
        }
    }

    /// Decode an opaque payload back into its original type
    pub fn decode_opaque<T: DeserializeOwned>(&self) -> KoyaResult<T> {
        match self {
            Value::Opaque(bytes) => Ok(rmp_serde::from_slice(bytes)?),
            other => Err(KoyaError::Serialization(format!(
                "expected opaque value, found {:?}",
                other.kind()
            ))),
        }
    }

    /// Kind tag this value is stored under
    pub fn kind(&self) -> PropertyKind {
        match self {
            Value::Ref(_) => PropertyKind::Reference,
            Value::Int(_) => PropertyKind::Integer,
            Value::Str(_) => PropertyKind::String,
            Value::Opaque(_) => PropertyKind::Opaque,
            Value::Text(_) => PropertyKind::Text,
        }
    }

    /// Referenced object, if this is a reference
    pub fn as_object_ref(&self) -> Option<ObjectRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Integer, if this is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String contents for `Str` and `Text`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Ref(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::opaque(&v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::opaque(&v)
    }
}

/// Typed extraction from a [`Value`]
pub trait FromValue: Sized {
    /// Convert, failing on a kind mismatch
    fn from_value(value: &Value) -> KoyaResult<Self>;
}

fn mismatch(expected: &str, found: &Value) -> KoyaError {
    KoyaError::Serialization(format!("expected {}, found {:?}", expected, found.kind()))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> KoyaResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> KoyaResult<Self> {
        value.as_int().ok_or_else(|| mismatch("integer", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> KoyaResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("string", value))
    }
}

impl FromValue for ObjectRef {
    fn from_value(value: &Value) -> KoyaResult<Self> {
        value
            .as_object_ref()
            .ok_or_else(|| mismatch("reference", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> KoyaResult<Self> {
        value.decode_opaque()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> KoyaResult<Self> {
        value.decode_opaque()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> KoyaResult<Self> {
        T::from_value(value).map(Some)
    }
}

// ============================================================================
// Persisted form
// ============================================================================

/// Single-character kind tags, as persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// `@`: payload is the target rowid
    Reference,
    /// `i`: payload is the decimal literal
    Integer,
    /// `s`: payload is UTF-8 text
    String,
    /// `r`: payload is MessagePack
    Opaque,
    /// `R`: payload is best-effort text
    Text,
}

impl PropertyKind {
    /// Persisted tag
    pub fn tag(self) -> char {
        match self {
            PropertyKind::Reference => '@',
            PropertyKind::Integer => 'i',
            PropertyKind::String => 's',
            PropertyKind::Opaque => 'r',
            PropertyKind::Text => 'R',
        }
    }

    /// Parse a persisted tag
    pub fn from_tag(tag: char) -> KoyaResult<Self> {
        match tag {
            '@' => Ok(PropertyKind::Reference),
            'i' => Ok(PropertyKind::Integer),
            's' => Ok(PropertyKind::String),
            'r' => Ok(PropertyKind::Opaque),
            'R' => Ok(PropertyKind::Text),
            other => Err(KoyaError::corruption(format!(
                "unknown property kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Wire(Option<char>, Vec<u8>);

/// A property record as stored under `p.*` and `P.*` keys
///
/// `kind == None` records a deletion in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProperty {
    /// Kind tag, `None` for a logged deletion
    pub kind: Option<PropertyKind>,
    /// Kind-specific payload
    pub payload: Vec<u8>,
}

impl StoredProperty {
    /// Encode a value
    pub fn encode(value: &Value) -> Self {
        let payload = match value {
            Value::Ref(r) => r.rowid.to_string().into_bytes(),
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Str(s) | Value::Text(s) => s.as_bytes().to_vec(),
            Value::Opaque(bytes) => bytes.clone(),
        };
        StoredProperty {
            kind: Some(value.kind()),
            payload,
        }
    }

    /// The deletion marker
    pub fn deleted() -> Self {
        StoredProperty {
            kind: None,
            payload: Vec::new(),
        }
    }

    /// True for the deletion marker
    pub fn is_deleted(&self) -> bool {
        self.kind.is_none()
    }

    /// Decode; references are bound to `store`. `None` for a deletion.
    pub fn decode(&self, store: StoreId) -> KoyaResult<Option<Value>> {
        let kind = match self.kind {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let text = || {
            std::str::from_utf8(&self.payload)
                .map_err(|e| KoyaError::corruption(format!("non-UTF-8 payload: {}", e)))
        };
        let value = match kind {
            PropertyKind::Reference => {
                Value::Ref(ObjectRef::new(store, text()?.parse::<RowId>()?))
            }
            PropertyKind::Integer => Value::Int(
                text()?
                    .parse()
                    .map_err(|_| KoyaError::corruption("invalid integer payload"))?,
            ),
            PropertyKind::String => Value::Str(text()?.to_string()),
            PropertyKind::Opaque => Value::Opaque(self.payload.clone()),
            PropertyKind::Text => Value::Text(text()?.to_string()),
        };
        Ok(Some(value))
    }

    /// Referenced rowid without decoding the whole value
    pub fn referenced_rowid(&self) -> Option<RowId> {
        if self.kind != Some(PropertyKind::Reference) {
            return None;
        }
        std::str::from_utf8(&self.payload).ok()?.parse().ok()
    }

    /// Serialize for the backend
    pub fn to_bytes(&self) -> KoyaResult<Vec<u8>> {
        let wire = Wire(self.kind.map(PropertyKind::tag), self.payload.clone());
        Ok(rmp_serde::to_vec(&wire)?)
    }

    /// Deserialize from the backend
    pub fn from_bytes(bytes: &[u8]) -> KoyaResult<Self> {
        let Wire(tag, payload) = rmp_serde::from_slice(bytes)?;
        let kind = tag.map(PropertyKind::from_tag).transpose()?;
        Ok(StoredProperty { kind, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn roundtrip(value: &Value, store: StoreId) -> Value {
        let bytes = StoredProperty::encode(value).to_bytes().unwrap();
        StoredProperty::from_bytes(&bytes)
            .unwrap()
            .decode(store)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_primitive_kinds_roundtrip() {
        let store = StoreId::new();
        for value in [
            Value::Int(-42),
            Value::Str("hello".into()),
            Value::Ref(ObjectRef::new(store, RowId::new(9))),
        ] {
            assert_eq!(roundtrip(&value, store), value);
        }
    }

    #[test]
    fn test_reference_rebinds_to_decoding_store() {
        let writer = StoreId::new();
        let reader = StoreId::new();
        let value = Value::Ref(ObjectRef::new(writer, RowId::new(5)));
        assert_eq!(
            roundtrip(&value, reader),
            Value::Ref(ObjectRef::new(reader, RowId::new(5)))
        );
    }

    #[test]
    fn test_opaque_map_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), vec![1u32, 2, 3]);
        let value = Value::opaque(&map);
        assert_eq!(value.kind(), PropertyKind::Opaque);
        let back: BTreeMap<String, Vec<u32>> =
            roundtrip(&value, StoreId::new()).decode_opaque().unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_float_and_bool_are_opaque() {
        assert_eq!(f64::from_value(&Value::from(2.5)).unwrap(), 2.5);
        assert!(bool::from_value(&Value::from(true)).unwrap());
    }

    #[derive(Debug)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not supported"))
        }
    }

    #[test]
    fn test_serialization_failure_degrades_to_text() {
        let value = Value::opaque(&Unserializable);
        assert_eq!(value, Value::Text("Unserializable".into()));
        assert!(value.decode_opaque::<u32>().is_err());
        assert_eq!(
            roundtrip(&value, StoreId::new()),
            Value::Text("Unserializable".into())
        );
    }

    #[test]
    fn test_deletion_marker() {
        let bytes = StoredProperty::deleted().to_bytes().unwrap();
        let stored = StoredProperty::from_bytes(&bytes).unwrap();
        assert!(stored.is_deleted());
        assert_eq!(stored.decode(StoreId::new()).unwrap(), None);
    }

    #[test]
    fn test_kind_tags() {
        for kind in [
            PropertyKind::Reference,
            PropertyKind::Integer,
            PropertyKind::String,
            PropertyKind::Opaque,
            PropertyKind::Text,
        ] {
            assert_eq!(PropertyKind::from_tag(kind.tag()).unwrap(), kind);
        }
        assert!(PropertyKind::from_tag('x').is_err());
    }

    #[test]
    fn test_referenced_rowid() {
        let store = StoreId::new();
        let stored = StoredProperty::encode(&Value::Ref(ObjectRef::new(store, RowId::new(12))));
        assert_eq!(stored.referenced_rowid(), Some(RowId::new(12)));
        assert_eq!(StoredProperty::encode(&Value::Int(12)).referenced_rowid(), None);
    }

    #[test]
    fn test_from_value_mismatch() {
        assert!(i64::from_value(&Value::Str("1".into())).is_err());
        assert_eq!(String::from_value(&Value::Str("x".into())).unwrap(), "x");
    }
}
