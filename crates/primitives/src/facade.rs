//! Plumbing shared by every collection facade

use koya_core::{KoyaError, KoyaResult, ObjectRef, RowId};
use koya_engine::{Store, Transaction};

/// Allocate a new collection object tagged `class`
pub(crate) fn create_tagged(txn: &Transaction<'_>, class: &str) -> KoyaResult<ObjectRef> {
    txn.create_object(class)
}

/// Check that `reference` belongs to `store` and carries `class`
pub(crate) fn check_tagged(store: &Store, reference: ObjectRef, class: &str) -> KoyaResult<()> {
    if reference.store != store.id() {
        return Err(KoyaError::invalid_input(format!(
            "reference {} belongs to another store",
            reference
        )));
    }
    let found = store.get_class(reference.rowid)?;
    if found != class {
        return Err(KoyaError::ClassMismatch {
            rowid: reference.rowid,
            expected: class.to_string(),
            found,
        });
    }
    Ok(())
}

/// Read a reference-valued property as a rowid
pub(crate) fn get_link(txn: &Transaction<'_>, rowid: RowId, name: &str) -> KoyaResult<Option<RowId>> {
    Ok(txn
        .get_as::<ObjectRef>(rowid, name)?
        .map(|reference| reference.rowid))
}

/// Point a reference-valued property at `target`, or remove it
pub(crate) fn set_link(
    txn: &Transaction<'_>,
    rowid: RowId,
    name: &str,
    target: Option<RowId>,
) -> KoyaResult<()> {
    match target {
        Some(target) => txn.set_property(rowid, name, txn.reference(target)),
        None => txn.delete_property(rowid, name),
    }
}
