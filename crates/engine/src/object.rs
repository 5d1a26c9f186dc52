//! Object mapping: typed objects to and from stored fields
//!
//! A persistent type names its class tag and converts itself to a set of
//! [`Fields`] and back. Fields are stored as properties named `@<field>`.
//! The engine never inspects objects beyond this contract.
//!
//! [`ClassRegistry`] maps class tags to materializers so an object can be
//! loaded when only its stored tag is known.

use std::any::Any;
use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use koya_core::{FromValue, KoyaError, KoyaResult, ObjectRef, Value, ROOT_CLASS};

// ============================================================================
// Fields
// ============================================================================

/// Field values of one object, keyed by field name (without the `@` marker)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    /// Empty field set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Remove a field
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Raw value of a field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Typed value of a required field
    pub fn get_as<T: FromValue>(&self, name: &str) -> KoyaResult<T> {
        match self.0.get(name) {
            Some(value) => T::from_value(value),
            None => Err(KoyaError::Serialization(format!(
                "missing field '{}'",
                name
            ))),
        }
    }

    /// Typed value of an optional field
    pub fn get_optional<T: FromValue>(&self, name: &str) -> KoyaResult<Option<T>> {
        self.0.get(name).map(T::from_value).transpose()
    }

    /// Whether the field is present
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields in name order
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Fields(iter.into_iter().collect())
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ============================================================================
// Persistent / Model
// ============================================================================

/// A type whose instances live in a store
///
/// # Example
///
/// ```ignore
/// #[derive(Clone)]
/// struct Counter { value: i64 }
///
/// impl Persistent for Counter {
///     const CLASS: &'static str = "counter";
///
///     fn extract_fields(&self) -> Fields {
///         Fields::new().with("value", self.value)
///     }
///
///     fn materialize(_: &ObjectRef, fields: &Fields) -> KoyaResult<Self> {
///         Ok(Counter { value: fields.get_optional("value")?.unwrap_or(0) })
///     }
/// }
/// ```
pub trait Persistent: Clone + Send + Sync + 'static {
    /// Class tag written under `m.<rowid>`
    const CLASS: &'static str;

    /// Current field values, diffed against storage at commit
    fn extract_fields(&self) -> Fields;

    /// Rebuild an instance from stored fields
    fn materialize(reference: &ObjectRef, fields: &Fields) -> KoyaResult<Self>;
}

/// Object-safe view of a [`Persistent`] value, used by the cache
pub trait Model: Send + Sync {
    /// Class tag
    fn class(&self) -> &'static str;
    /// See [`Persistent::extract_fields`]
    fn extract_fields(&self) -> Fields;
    /// Clone behind the trait object
    fn clone_box(&self) -> Box<dyn Model>;
    /// For downcasting
    fn as_any(&self) -> &dyn Any;
    /// For downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Persistent> Model for T {
    fn class(&self) -> &'static str {
        T::CLASS
    }

    fn extract_fields(&self) -> Fields {
        Persistent::extract_fields(self)
    }

    fn clone_box(&self) -> Box<dyn Model> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Clone for Box<dyn Model> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model({})", self.class())
    }
}

// ============================================================================
// Root
// ============================================================================

/// The root object; its properties are free-form names set through the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    /// Reference to the root
    pub reference: ObjectRef,
}

impl Persistent for Root {
    const CLASS: &'static str = ROOT_CLASS;

    fn extract_fields(&self) -> Fields {
        Fields::new()
    }

    fn materialize(reference: &ObjectRef, _: &Fields) -> KoyaResult<Self> {
        Ok(Root {
            reference: *reference,
        })
    }
}

// ============================================================================
// ClassRegistry
// ============================================================================

/// Materializer signature stored in the registry
pub type Materializer = fn(&ObjectRef, &Fields) -> KoyaResult<Box<dyn Model>>;

fn materialize_boxed<T: Persistent>(
    reference: &ObjectRef,
    fields: &Fields,
) -> KoyaResult<Box<dyn Model>> {
    Ok(Box::new(T::materialize(reference, fields)?))
}

/// Class tag to materializer map, fixed once the store is built
#[derive(Clone)]
pub struct ClassRegistry {
    classes: HashMap<&'static str, Materializer>,
}

impl ClassRegistry {
    /// Registry knowing only [`Root`]
    pub fn new() -> Self {
        let mut registry = ClassRegistry {
            classes: HashMap::new(),
        };
        registry.register::<Root>();
        registry
    }

    /// Register `T` under its class tag
    pub fn register<T: Persistent>(&mut self) {
        self.classes.insert(T::CLASS, materialize_boxed::<T>);
    }

    /// Whether a tag is known
    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Registered tags, sorted
    pub fn classes(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.classes.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Materialize an object of the given tag
    pub fn materialize(
        &self,
        class: &str,
        reference: &ObjectRef,
        fields: &Fields,
    ) -> KoyaResult<Box<dyn Model>> {
        let materializer = self
            .classes
            .get(class)
            .ok_or_else(|| KoyaError::UnknownClass(class.to_string()))?;
        materializer(reference, fields)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.classes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koya_core::{RowId, StoreId};

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl Persistent for Point {
        const CLASS: &'static str = "point";

        fn extract_fields(&self) -> Fields {
            Fields::new().with("x", self.x).with("y", self.y)
        }

        fn materialize(_: &ObjectRef, fields: &Fields) -> KoyaResult<Self> {
            Ok(Point {
                x: fields.get_as("x")?,
                y: fields.get_as("y")?,
            })
        }
    }

    fn reference() -> ObjectRef {
        ObjectRef::new(StoreId::new(), RowId::new(2))
    }

    #[test]
    fn test_fields_typed_access() {
        let fields = Fields::new().with("name", "alice").with("age", 30);
        assert_eq!(fields.get_as::<String>("name").unwrap(), "alice");
        assert_eq!(fields.get_optional::<i64>("age").unwrap(), Some(30));
        assert_eq!(fields.get_optional::<i64>("missing").unwrap(), None);
        assert!(fields.get_as::<i64>("missing").is_err());
        assert!(fields.get_as::<i64>("name").is_err());
    }

    #[test]
    fn test_registry_materializes_registered_class() {
        let mut registry = ClassRegistry::new();
        registry.register::<Point>();
        let fields = Fields::new().with("x", 1).with("y", 2);
        let model = registry.materialize("point", &reference(), &fields).unwrap();
        assert_eq!(model.class(), "point");
        let point = model.as_any().downcast_ref::<Point>().unwrap();
        assert_eq!(point, &Point { x: 1, y: 2 });
    }

    #[test]
    fn test_registry_rejects_unknown_class() {
        let registry = ClassRegistry::new();
        let err = registry
            .materialize("point", &reference(), &Fields::new())
            .unwrap_err();
        assert!(matches!(err, KoyaError::UnknownClass(tag) if tag == "point"));
    }

    #[test]
    fn test_root_is_preregistered() {
        let registry = ClassRegistry::new();
        assert!(registry.contains(ROOT_CLASS));
        assert_eq!(registry.classes(), vec![ROOT_CLASS]);
    }

    #[test]
    fn test_boxed_model_clone_is_independent() {
        let original: Box<dyn Model> = Box::new(Point { x: 1, y: 1 });
        let mut copy = original.clone();
        copy.as_any_mut().downcast_mut::<Point>().unwrap().x = 9;
        assert_eq!(original.extract_fields().get_as::<i64>("x").unwrap(), 1);
        assert_eq!(copy.extract_fields().get_as::<i64>("x").unwrap(), 9);
    }
}
