//! Object identity and property operations
//!
//! Objects are rowids with a class tag under `m.<rowid>`. Properties live under
//! `p.<rowid>@<name>`. Every mutation is also appended to the property log
//! (when enabled) and marks the transaction as producing a new revision.

use std::collections::BTreeMap;

use koya_core::keys;
use koya_core::{
    scan_prefix, Backend, FromValue, KoyaError, KoyaResult, ObjectRef, RowId, StoredProperty,
    Value, FIELD_MARKER,
};
use tracing::trace;

use crate::cache::CacheEntry;
use crate::object::{Fields, Model, Persistent};
use crate::transaction::Transaction;

fn field_name(name: &str) -> String {
    format!("{}{}", FIELD_MARKER, name)
}

impl<'s> Transaction<'s> {
    pub(crate) fn backend(&self) -> &'s dyn Backend {
        self.store.backend.as_ref()
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Reference to the root object.
    pub fn root(&self) -> KoyaResult<ObjectRef> {
        self.check()?;
        Ok(self.store.root())
    }

    /// Next rowid from the persisted counter.
    pub fn allocate_rowid(&self) -> KoyaResult<RowId> {
        self.check()?;
        let backend = self.backend();
        let last = match backend.get(keys::ROWID_COUNTER)? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .map_err(|_| KoyaError::corruption("rowid counter is not UTF-8"))?
                .parse::<RowId>()?,
            None => RowId::new(0),
        };
        let next = RowId::new(last.as_u64() + 1);
        backend.put(keys::ROWID_COUNTER, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Allocate a rowid and tag it with `class`.
    pub fn create_object(&self, class: &str) -> KoyaResult<ObjectRef> {
        if class.is_empty() {
            return Err(KoyaError::invalid_input("class tag must not be empty"));
        }
        let rowid = self.allocate_rowid()?;
        self.backend()
            .put(&keys::class_key(rowid), class.as_bytes())?;
        self.with_active(|active| {
            active.dirty = true;
            active.created.push(rowid);
        })?;
        trace!(target: "koya::txn", %rowid, class, "Object created");
        Ok(self.reference(rowid))
    }

    /// Class tag of an object; `ObjectNotFound` if it has none.
    pub fn get_class(&self, rowid: RowId) -> KoyaResult<String> {
        self.check()?;
        match self.backend().get(&keys::class_key(rowid))? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| KoyaError::corruption(format!("class tag of {} is not UTF-8", rowid))),
            None => Err(KoyaError::ObjectNotFound(rowid)),
        }
    }

    /// Whether the object has a class tag.
    pub fn exists(&self, rowid: RowId) -> KoyaResult<bool> {
        self.check()?;
        Ok(self.backend().get(&keys::class_key(rowid))?.is_some())
    }

    fn require(&self, rowid: RowId) -> KoyaResult<()> {
        if self.exists(rowid)? {
            Ok(())
        } else {
            Err(KoyaError::ObjectNotFound(rowid))
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Write (or delete, with `None`) one property and log it.
    ///
    /// The single mutation path shared by property writes, cache write-back and
    /// revert. Does not touch the object cache.
    pub(crate) fn write_stored(
        &self,
        rowid: RowId,
        name: &str,
        stored: Option<&StoredProperty>,
    ) -> KoyaResult<()> {
        let candidate = self.revision()?;
        let backend = self.backend();
        let key = keys::property_key(rowid, name);
        match stored {
            Some(stored) => backend.put(&key, &stored.to_bytes()?)?,
            None => backend.delete(&key)?,
        }
        if self.store.use_log() {
            let entry = match stored {
                Some(stored) => stored.to_bytes()?,
                None => StoredProperty::deleted().to_bytes()?,
            };
            backend.put(&keys::log_key(candidate, rowid, name), &entry)?;
            backend.put(&keys::revision_key(candidate), b"1")?;
        }
        self.mark_dirty()
    }

    /// Field write used by cache write-back.
    pub(crate) fn write_field(&self, rowid: RowId, name: &str, value: Option<&Value>) -> KoyaResult<()> {
        let stored = value.map(StoredProperty::encode);
        self.write_stored(rowid, &field_name(name), stored.as_ref())
    }

    fn check_value(&self, value: &Value) -> KoyaResult<()> {
        if let Value::Ref(target) = value {
            if target.store != self.store_id() {
                return Err(KoyaError::invalid_input(format!(
                    "reference {} belongs to another store",
                    target
                )));
            }
        }
        Ok(())
    }

    /// Set a property
    ///
    /// Writing an object field (`@name`) directly flushes and forgets any
    /// materialized copy of the object, so later loads see the new value.
    pub fn set_property(&self, rowid: RowId, name: &str, value: impl Into<Value>) -> KoyaResult<()> {
        let value = value.into();
        self.check()?;
        self.check_value(&value)?;
        self.require(rowid)?;
        if name.starts_with(FIELD_MARKER) {
            self.flush_and_evict(rowid)?;
        }
        self.write_stored(rowid, name, Some(&StoredProperty::encode(&value)))
    }

    /// Read a property
    pub fn get_property(&self, rowid: RowId, name: &str) -> KoyaResult<Option<Value>> {
        self.check()?;
        match self.backend().get(&keys::property_key(rowid, name))? {
            Some(bytes) => StoredProperty::from_bytes(&bytes)?.decode(self.store_id()),
            None => Ok(None),
        }
    }

    /// Read a typed property.
    pub fn get_as<T: FromValue>(&self, rowid: RowId, name: &str) -> KoyaResult<Option<T>> {
        self.get_property(rowid, name)?
            .map(|value| T::from_value(&value))
            .transpose()
    }

    /// Delete a property; the deletion is logged even if it was absent.
    pub fn delete_property(&self, rowid: RowId, name: &str) -> KoyaResult<()> {
        self.check()?;
        if name.starts_with(FIELD_MARKER) {
            self.flush_and_evict(rowid)?;
        }
        self.write_stored(rowid, name, None)
    }

    /// All properties of an object, ordered by name.
    pub fn properties(&self, rowid: RowId) -> KoyaResult<Vec<(String, Value)>> {
        self.check()?;
        let prefix = keys::property_prefix(rowid);
        let mut out = Vec::new();
        for (key, bytes) in scan_prefix(self.backend(), &prefix)? {
            let (_, name) = keys::parse_property_key(&key)?;
            if let Some(value) = StoredProperty::from_bytes(&bytes)?.decode(self.store_id())? {
                out.push((name, value));
            }
        }
        Ok(out)
    }

    /// Property names of an object, ordered.
    pub fn property_names(&self, rowid: RowId) -> KoyaResult<Vec<String>> {
        Ok(self.properties(rowid)?.into_iter().map(|(n, _)| n).collect())
    }

    /// Property values of an object, in name order.
    pub fn property_values(&self, rowid: RowId) -> KoyaResult<Vec<Value>> {
        Ok(self.properties(rowid)?.into_iter().map(|(_, v)| v).collect())
    }

    /// Stored object fields (`@`-prefixed properties, marker stripped).
    pub fn fields(&self, rowid: RowId) -> KoyaResult<Fields> {
        Ok(self
            .properties(rowid)?
            .into_iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(FIELD_MARKER)
                    .map(|field| (field.to_string(), value))
            })
            .collect())
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// Pin an object as a GC root; false if it was already pinned.
    pub fn lock(&self, rowid: RowId) -> KoyaResult<bool> {
        self.require(rowid)?;
        let key = keys::lock_key(rowid);
        if self.backend().get(&key)?.is_some() {
            return Ok(false);
        }
        self.backend().put(&key, b"1")?;
        Ok(true)
    }

    /// Remove a pin; unpinned objects are not an error.
    pub fn unlock(&self, rowid: RowId) -> KoyaResult<()> {
        self.check()?;
        self.backend().delete(&keys::lock_key(rowid))
    }

    /// Whether an object is pinned.
    pub fn is_locked(&self, rowid: RowId) -> KoyaResult<bool> {
        self.check()?;
        Ok(self.backend().get(&keys::lock_key(rowid))?.is_some())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Live objects tagged `class`, in rowid order; runs a GC pass first.
    pub fn extent(&self, class: &str) -> KoyaResult<Vec<ObjectRef>> {
        self.store.gc()?;
        let mut out = Vec::new();
        for (key, bytes) in scan_prefix(self.backend(), keys::CLASS_PREFIX)? {
            if bytes == class.as_bytes() {
                out.push(self.reference(keys::parse_class_key(&key)?));
            }
        }
        out.sort_by_key(|r| r.rowid);
        Ok(out)
    }

    /// Live properties whose value references `rowid`; runs a GC pass first.
    pub fn referer(&self, rowid: RowId) -> KoyaResult<Vec<(ObjectRef, String)>> {
        self.store.gc()?;
        let mut out = Vec::new();
        for (key, bytes) in scan_prefix(self.backend(), keys::PROPERTY_PREFIX)? {
            if StoredProperty::from_bytes(&bytes)?.referenced_rowid() == Some(rowid) {
                let (owner, name) = keys::parse_property_key(&key)?;
                out.push((self.reference(owner), name));
            }
        }
        out.sort_by(|a, b| a.0.rowid.cmp(&b.0.rowid).then_with(|| a.1.cmp(&b.1)));
        Ok(out)
    }

    // ========================================================================
    // Typed objects
    // ========================================================================

    /// Create an object of type `T` with its fields written immediately.
    pub fn create<T: Persistent>(&self, object: &T) -> KoyaResult<ObjectRef> {
        let fields = Persistent::extract_fields(object);
        for (_, value) in &fields {
            self.check_value(value)?;
        }
        let reference = self.create_object(T::CLASS)?;
        for (name, value) in &fields {
            self.write_field(reference.rowid, name, Some(value))?;
        }
        self.with_cache(|cache| {
            cache.put(
                reference.rowid,
                CacheEntry {
                    object: Box::new(object.clone()),
                    synced: fields,
                },
            )
        });
        Ok(reference)
    }

    fn materialize_entry<T: Persistent>(&self, rowid: RowId) -> KoyaResult<CacheEntry> {
        let class = self.get_class(rowid)?;
        if class != T::CLASS {
            return Err(KoyaError::ClassMismatch {
                rowid,
                expected: T::CLASS.to_string(),
                found: class,
            });
        }
        let fields = self.fields(rowid)?;
        let object = T::materialize(&self.reference(rowid), &fields)?;
        Ok(CacheEntry {
            object: Box::new(object),
            synced: fields,
        })
    }

    fn cached_copy<T: Persistent>(&self, rowid: RowId) -> KoyaResult<Option<T>> {
        self.with_cache(|cache| match cache.get(rowid) {
            None => Ok(None),
            Some(entry) => match entry.object.as_any().downcast_ref::<T>() {
                Some(object) => Ok(Some(object.clone())),
                None => Err(KoyaError::ClassMismatch {
                    rowid,
                    expected: T::CLASS.to_string(),
                    found: entry.object.class().to_string(),
                }),
            },
        })
    }

    /// Copy of an object, materialized once per transaction.
    pub fn load<T: Persistent>(&self, rowid: RowId) -> KoyaResult<T> {
        self.check()?;
        if let Some(object) = self.cached_copy::<T>(rowid)? {
            return Ok(object);
        }
        let entry = self.materialize_entry::<T>(rowid)?;
        let object = entry
            .object
            .as_any()
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| KoyaError::invalid_operation("materializer returned wrong type"))?;
        self.with_cache(|cache| cache.put(rowid, entry));
        Ok(object)
    }

    /// Mutate an object in place; changes are written back at commit.
    pub fn update<T, R, F>(&self, rowid: RowId, f: F) -> KoyaResult<R>
    where
        T: Persistent,
        F: FnOnce(&mut T) -> R,
    {
        self.check()?;
        let mut entry = match self.with_cache(|cache| cache.take(rowid)) {
            Some(entry) => entry,
            None => self.materialize_entry::<T>(rowid)?,
        };
        if entry.object.as_any().downcast_ref::<T>().is_none() {
            let found = entry.object.class().to_string();
            self.with_cache(|cache| cache.put(rowid, entry));
            return Err(KoyaError::ClassMismatch {
                rowid,
                expected: T::CLASS.to_string(),
                found,
            });
        }
        let result = match entry.object.as_any_mut().downcast_mut::<T>() {
            Some(object) => f(object),
            None => return Err(KoyaError::invalid_operation("cached object changed type")),
        };
        self.with_cache(|cache| cache.put(rowid, entry));
        Ok(result)
    }

    /// Materialize an object through the class registry.
    pub fn resolve(&self, rowid: RowId) -> KoyaResult<Box<dyn Model>> {
        self.check()?;
        if let Some(entry) = self.with_cache(|cache| cache.get(rowid).cloned()) {
            return Ok(entry.object);
        }
        let class = self.get_class(rowid)?;
        let fields = self.fields(rowid)?;
        let object = self
            .store
            .registry
            .materialize(&class, &self.reference(rowid), &fields)?;
        self.with_cache(|cache| {
            cache.put(
                rowid,
                CacheEntry {
                    object: object.clone(),
                    synced: fields,
                },
            )
        });
        Ok(object)
    }

    /// Property-level snapshot of an object: class tag and every property.
    pub fn describe_object(&self, rowid: RowId) -> KoyaResult<(String, BTreeMap<String, Value>)> {
        let class = self.get_class(rowid)?;
        Ok((class, self.properties(rowid)?.into_iter().collect()))
    }
}
