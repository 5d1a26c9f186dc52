//! CellList: a doubly linked list of cell objects
//!
//! ## Layout
//!
//! - Cell: `value`, plus `left` and `right` references to its neighbours
//! - List: `pivot_left` and `pivot_right` references to cells near either end
//!
//! Pivots are hints: a cell linked in front of the left pivot by another list
//! operation is still found by walking `left` from the pivot. Because cells
//! reference each other, every cell of a reachable list stays alive; a
//! detached cell is collected once nothing references it.

use std::sync::Arc;

use koya_core::{KoyaResult, ObjectRef, RowId, Value};
use koya_engine::{Store, Transaction};

use crate::facade::{check_tagged, create_tagged, get_link, set_link};

/// Class tag of cell objects.
pub const CELL_CLASS: &str = "cell";

/// Class tag of list objects.
pub const CELL_LIST_CLASS: &str = "cell_list";

const LEFT: &str = "left";
const RIGHT: &str = "right";
const VALUE: &str = "value";
const PIVOT_LEFT: &str = "pivot_left";
const PIVOT_RIGHT: &str = "pivot_right";

// ============================================================================
// Link operations on rowids, always inside a transaction
// ============================================================================

fn insert_right(txn: &Transaction<'_>, this: RowId, it: RowId) -> KoyaResult<()> {
    let right = get_link(txn, this, RIGHT)?;
    set_link(txn, it, LEFT, Some(this))?;
    set_link(txn, it, RIGHT, right)?;
    if let Some(right) = right {
        set_link(txn, right, LEFT, Some(it))?;
    }
    set_link(txn, this, RIGHT, Some(it))
}

fn insert_left(txn: &Transaction<'_>, this: RowId, it: RowId) -> KoyaResult<()> {
    let left = get_link(txn, this, LEFT)?;
    set_link(txn, it, RIGHT, Some(this))?;
    set_link(txn, it, LEFT, left)?;
    if let Some(left) = left {
        set_link(txn, left, RIGHT, Some(it))?;
    }
    set_link(txn, this, LEFT, Some(it))
}

fn detach(txn: &Transaction<'_>, this: RowId) -> KoyaResult<()> {
    let left = get_link(txn, this, LEFT)?;
    let right = get_link(txn, this, RIGHT)?;
    if let Some(left) = left {
        set_link(txn, left, RIGHT, right)?;
    }
    if let Some(right) = right {
        set_link(txn, right, LEFT, left)?;
    }
    if left.is_some() {
        set_link(txn, this, LEFT, None)?;
    }
    if right.is_some() {
        set_link(txn, this, RIGHT, None)?;
    }
    Ok(())
}

/// Follow `direction` links to the last cell; stops if the chain loops back.
fn end(txn: &Transaction<'_>, start: RowId, direction: &str) -> KoyaResult<RowId> {
    let mut current = start;
    while let Some(next) = get_link(txn, current, direction)? {
        if next == start {
            break;
        }
        current = next;
    }
    Ok(current)
}

/// Cells from the left end through every `right` link.
fn walk(txn: &Transaction<'_>, from: RowId) -> KoyaResult<Vec<RowId>> {
    let first = end(txn, from, LEFT)?;
    let mut cells = vec![first];
    let mut current = first;
    while let Some(next) = get_link(txn, current, RIGHT)? {
        if next == first {
            break;
        }
        cells.push(next);
        current = next;
    }
    Ok(cells)
}

/// Allocate a detached cell holding `value`.
fn create_cell(txn: &Transaction<'_>, value: Value) -> KoyaResult<RowId> {
    let reference = create_tagged(txn, CELL_CLASS)?;
    txn.set_property(reference.rowid, VALUE, value)?;
    Ok(reference.rowid)
}

// ============================================================================
// Cell
// ============================================================================

/// One list cell holding a value.
#[derive(Clone, Debug)]
pub struct Cell {
    store: Arc<Store>,
    reference: ObjectRef,
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Cell {
    /// Create a detached cell.
    pub fn create(store: &Arc<Store>, value: impl Into<Value>) -> KoyaResult<Self> {
        let value = value.into();
        let rowid = store.transaction(|txn| create_cell(txn, value))?;
        Ok(Self::bind(store, ObjectRef::new(store.id(), rowid)))
    }

    /// Open an existing cell.
    pub fn open(store: &Arc<Store>, reference: ObjectRef) -> KoyaResult<Self> {
        check_tagged(store, reference, CELL_CLASS)?;
        Ok(Self::bind(store, reference))
    }

    fn bind(store: &Arc<Store>, reference: ObjectRef) -> Self {
        Self {
            store: Arc::clone(store),
            reference,
        }
    }

    fn neighbour(&self, rowid: Option<RowId>) -> Option<Cell> {
        rowid.map(|rowid| Self::bind(&self.store, ObjectRef::new(self.store.id(), rowid)))
    }

    /// The cell object's reference.
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    fn rowid(&self) -> RowId {
        self.reference.rowid
    }

    /// The cell's value
    pub fn value(&self) -> KoyaResult<Option<Value>> {
        self.store
            .transaction(|txn| txn.get_property(self.rowid(), VALUE))
    }

    /// Replace the cell's value.
    pub fn set_value(&self, value: impl Into<Value>) -> KoyaResult<()> {
        let value = value.into();
        self.store
            .transaction(|txn| txn.set_property(self.rowid(), VALUE, value))
    }

    /// Left neighbour
    pub fn left(&self) -> KoyaResult<Option<Cell>> {
        let rowid = self
            .store
            .transaction(|txn| get_link(txn, self.rowid(), LEFT))?;
        Ok(self.neighbour(rowid))
    }

    /// Right neighbour
    pub fn right(&self) -> KoyaResult<Option<Cell>> {
        let rowid = self
            .store
            .transaction(|txn| get_link(txn, self.rowid(), RIGHT))?;
        Ok(self.neighbour(rowid))
    }

    /// Link `it` directly to the right of this cell.
    pub fn insert_right(&self, it: &Cell) -> KoyaResult<()> {
        self.store
            .transaction(|txn| insert_right(txn, self.rowid(), it.rowid()))
    }

    /// Link `it` directly to the left of this cell.
    pub fn insert_left(&self, it: &Cell) -> KoyaResult<()> {
        self.store
            .transaction(|txn| insert_left(txn, self.rowid(), it.rowid()))
    }

    /// Unlink this cell, joining its neighbours.
    pub fn detach(&self) -> KoyaResult<()> {
        self.store.transaction(|txn| detach(txn, self.rowid()))
    }

    /// Swap places with the right neighbour, if any.
    pub fn move_right(&self) -> KoyaResult<()> {
        self.store.transaction(|txn| {
            if let Some(right) = get_link(txn, self.rowid(), RIGHT)? {
                detach(txn, right)?;
                insert_left(txn, self.rowid(), right)?;
            }
            Ok(())
        })
    }

    /// Swap places with the left neighbour, if any.
    pub fn move_left(&self) -> KoyaResult<()> {
        self.store.transaction(|txn| {
            if let Some(left) = get_link(txn, self.rowid(), LEFT)? {
                detach(txn, left)?;
                insert_right(txn, self.rowid(), left)?;
            }
            Ok(())
        })
    }

    /// Values from this cell rightwards.
    pub fn values_from(&self) -> KoyaResult<Vec<Value>> {
        self.store.transaction(|txn| {
            let mut out = Vec::new();
            let mut current = Some(self.rowid());
            while let Some(rowid) = current {
                if let Some(value) = txn.get_property(rowid, VALUE)? {
                    out.push(value);
                }
                current = get_link(txn, rowid, RIGHT)?.filter(|next| *next != self.rowid());
            }
            Ok(out)
        })
    }
}

// ============================================================================
// CellList
// ============================================================================

/// Doubly linked list of [`Cell`]s.
///
/// # Example
///
/// ```ignore
/// let list = CellList::create(&store)?;
/// list.push("b")?;
/// list.unshift("a")?;
/// let c = list.push("c")?;
/// c.move_left()?;
/// assert_eq!(list.values()?, vec![Value::from("a"), Value::from("c"), Value::from("b")]);
/// ```
#[derive(Clone, Debug)]
pub struct CellList {
    store: Arc<Store>,
    reference: ObjectRef,
}

impl CellList {
    /// Create an empty list.
    pub fn create(store: &Arc<Store>) -> KoyaResult<Self> {
        let reference = store.transaction(|txn| create_tagged(txn, CELL_LIST_CLASS))?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// Open an existing list.
    pub fn open(store: &Arc<Store>, reference: ObjectRef) -> KoyaResult<Self> {
        check_tagged(store, reference, CELL_LIST_CLASS)?;
        Ok(Self {
            store: Arc::clone(store),
            reference,
        })
    }

    /// The list object's reference.
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    fn rowid(&self) -> RowId {
        self.reference.rowid
    }

    fn cell(&self, rowid: RowId) -> Cell {
        Cell::bind(&self.store, ObjectRef::new(self.store.id(), rowid))
    }

    /// Any cell of the list, preferring the `first` pivot.
    fn anchor(&self, txn: &Transaction<'_>, first: &str, second: &str) -> KoyaResult<Option<RowId>> {
        match get_link(txn, self.rowid(), first)? {
            Some(rowid) => Ok(Some(rowid)),
            None => get_link(txn, self.rowid(), second),
        }
    }

    /// Append a new cell holding `value`.
    ///
    /// The cell is created and linked in one transaction, so a concurrent GC
    /// never sees it unreachable.
    pub fn push(&self, value: impl Into<Value>) -> KoyaResult<Cell> {
        let value = value.into();
        let rowid = self.store.transaction(|txn| {
            let rowid = create_cell(txn, value)?;
            self.link_last(txn, rowid)?;
            Ok(rowid)
        })?;
        Ok(self.cell(rowid))
    }

    /// Append an existing detached cell.
    pub fn push_cell(&self, cell: &Cell) -> KoyaResult<()> {
        self.store
            .transaction(|txn| self.link_last(txn, cell.rowid()))
    }

    fn link_last(&self, txn: &Transaction<'_>, cell: RowId) -> KoyaResult<()> {
        match self.anchor(txn, PIVOT_RIGHT, PIVOT_LEFT)? {
            Some(anchor) => {
                let last = end(txn, anchor, RIGHT)?;
                insert_right(txn, last, cell)?;
            }
            None => set_link(txn, self.rowid(), PIVOT_LEFT, Some(cell))?,
        }
        set_link(txn, self.rowid(), PIVOT_RIGHT, Some(cell))
    }

    /// Prepend a new cell holding `value`.
    pub fn unshift(&self, value: impl Into<Value>) -> KoyaResult<Cell> {
        let value = value.into();
        let rowid = self.store.transaction(|txn| {
            let rowid = create_cell(txn, value)?;
            self.link_first(txn, rowid)?;
            Ok(rowid)
        })?;
        Ok(self.cell(rowid))
    }

    /// Prepend an existing detached cell.
    pub fn unshift_cell(&self, cell: &Cell) -> KoyaResult<()> {
        self.store
            .transaction(|txn| self.link_first(txn, cell.rowid()))
    }

    fn link_first(&self, txn: &Transaction<'_>, cell: RowId) -> KoyaResult<()> {
        match self.anchor(txn, PIVOT_LEFT, PIVOT_RIGHT)? {
            Some(anchor) => {
                let first = end(txn, anchor, LEFT)?;
                insert_left(txn, first, cell)?;
            }
            None => set_link(txn, self.rowid(), PIVOT_RIGHT, Some(cell))?,
        }
        set_link(txn, self.rowid(), PIVOT_LEFT, Some(cell))
    }

    /// Detach and return the last cell.
    pub fn pop(&self) -> KoyaResult<Option<Cell>> {
        let last = self.store.transaction(|txn| {
            let last = match self.anchor(txn, PIVOT_RIGHT, PIVOT_LEFT)? {
                Some(anchor) => end(txn, anchor, RIGHT)?,
                None => return Ok(None),
            };
            self.unlink(txn, last)?;
            Ok(Some(last))
        })?;
        Ok(last.map(|rowid| self.cell(rowid)))
    }

    /// Detach and return the first cell.
    pub fn shift(&self) -> KoyaResult<Option<Cell>> {
        let first = self.store.transaction(|txn| {
            let first = match self.anchor(txn, PIVOT_LEFT, PIVOT_RIGHT)? {
                Some(anchor) => end(txn, anchor, LEFT)?,
                None => return Ok(None),
            };
            self.unlink(txn, first)?;
            Ok(Some(first))
        })?;
        Ok(first.map(|rowid| self.cell(rowid)))
    }

    /// Detach `cell` from the list.
    pub fn remove(&self, cell: &Cell) -> KoyaResult<()> {
        self.store.transaction(|txn| self.unlink(txn, cell.rowid()))
    }

    fn unlink(&self, txn: &Transaction<'_>, cell: RowId) -> KoyaResult<()> {
        if get_link(txn, self.rowid(), PIVOT_RIGHT)? == Some(cell) {
            let left = get_link(txn, cell, LEFT)?;
            set_link(txn, self.rowid(), PIVOT_RIGHT, left)?;
        }
        if get_link(txn, self.rowid(), PIVOT_LEFT)? == Some(cell) {
            let right = get_link(txn, cell, RIGHT)?;
            set_link(txn, self.rowid(), PIVOT_LEFT, right)?;
        }
        detach(txn, cell)
    }

    /// Cells first to last.
    pub fn cells(&self) -> KoyaResult<Vec<Cell>> {
        let rowids = self.store.transaction(|txn| {
            match self.anchor(txn, PIVOT_LEFT, PIVOT_RIGHT)? {
                Some(anchor) => walk(txn, anchor),
                None => Ok(Vec::new()),
            }
        })?;
        Ok(rowids.into_iter().map(|rowid| self.cell(rowid)).collect())
    }

    /// Values first to last.
    pub fn values(&self) -> KoyaResult<Vec<Value>> {
        self.store.transaction(|txn| {
            let rowids = match self.anchor(txn, PIVOT_LEFT, PIVOT_RIGHT)? {
                Some(anchor) => walk(txn, anchor)?,
                None => return Ok(Vec::new()),
            };
            let mut out = Vec::with_capacity(rowids.len());
            for rowid in rowids {
                if let Some(value) = txn.get_property(rowid, VALUE)? {
                    out.push(value);
                }
            }
            Ok(out)
        })
    }

    /// Number of cells
    pub fn len(&self) -> KoyaResult<usize> {
        Ok(self.cells()?.len())
    }

    /// Whether the list has no cells.
    pub fn is_empty(&self) -> KoyaResult<bool> {
        self.store.transaction(|txn| {
            Ok(self.anchor(txn, PIVOT_LEFT, PIVOT_RIGHT)?.is_none())
        })
    }
}
