use std::cmp::Ordering;

use indexmap::IndexMap;

use eql_ir::{EdgeId, MultiSet, Prim, QualifiedName, SelectFilter, StorageFilter, Val, compare_vals};

use crate::error::Result;
use crate::memory::DbEntry;

/// Field values of one object, keyed by field name. A field that is absent
/// is left untouched by `update`.
pub type Fields = IndexMap<String, MultiSet>;

/// Rows of one SQLite table, in column order.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRows {
    pub name: String,
    pub rows: Vec<Vec<rusqlite::types::Value>>,
}

/// Full copy of a backend's contents. Only the backend that produced a
/// snapshot can restore it.
#[derive(Clone, Debug, PartialEq)]
pub enum Snapshot {
    Memory {
        entries: IndexMap<EdgeId, DbEntry>,
        next_id: EdgeId,
    },
    Tables(Vec<TableRows>),
}

/// The object store consumed by the evaluator. Writes reach a provider only
/// through [`crate::EdgeDatabase`], which applies them in insert, update,
/// delete order.
pub trait StorageProvider {
    /// Ids of the objects whose type is exactly `tp` and that satisfy `filter`.
    fn query_ids_for_a_type(&self, tp: &QualifiedName, filter: &StorageFilter) -> Result<Vec<EdgeId>>;

    fn project(&self, id: EdgeId, tp: &QualifiedName, field: &str) -> Result<MultiSet>;

    /// Every object pointing at one of `ids` through `field`. Each result
    /// carries the link properties of the edge it was found through.
    fn reverse_project(&self, ids: &[EdgeId], field: &str) -> Result<MultiSet>;

    fn insert(&mut self, id: EdgeId, tp: &QualifiedName, fields: &Fields) -> Result<()>;

    fn update(&mut self, id: EdgeId, tp: &QualifiedName, fields: &Fields) -> Result<()>;

    fn delete(&mut self, id: EdgeId, tp: &QualifiedName) -> Result<()>;

    /// A fresh id, larger than every id handed out before.
    fn next_id(&mut self) -> Result<EdgeId>;

    fn check_id_present(&self, id: EdgeId) -> Result<bool>;

    fn dump_state(&self) -> Result<Snapshot>;

    fn restore_state(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Marks the point that [`StorageProvider::abort_flush`] returns to.
    /// Ids handed out by `next_id` stay taken across an abort.
    fn begin_flush(&mut self) -> Result<()>;

    /// Undoes every write since the last `begin_flush`.
    fn abort_flush(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;
}

/// Id denoted by a filter argument: a reference, or a `uuid` scalar.
pub fn id_of(v: &Val) -> Option<EdgeId> {
    match v {
        Val::Ref(r) => Some(r.id),
        Val::Scalar(s) if s.tp.is("std", "uuid") => match s.val {
            Prim::Int(i) => Some(i),
            _ => None,
        },
        _ => None,
    }
}

/// Equality used by storage lookups. References compare by id.
pub fn values_match(stored: &Val, arg: &Val) -> bool {
    compare_vals(stored, arg) == Ordering::Equal
}

/// Evaluates `filter` against one object. An `Eq` holds when any stored
/// value equals any argument value, so `.p = x` and `.p IN x` coincide.
pub fn filter_holds(
    filter: &StorageFilter,
    id: EdgeId,
    field: &mut dyn FnMut(&str) -> Result<MultiSet>,
) -> Result<bool> {
    match filter {
        SelectFilter::True => Ok(true),
        SelectFilter::Eq { propname, arg } if propname == "id" => {
            Ok(arg.iter().any(|v| id_of(v) == Some(id)))
        }
        SelectFilter::Eq { propname, arg } => {
            let stored = field(propname)?;
            Ok(stored
                .iter()
                .any(|s| arg.iter().any(|a| values_match(s, a))))
        }
        SelectFilter::Conjunctive(parts) => {
            for p in parts {
                if !filter_holds(p, id, field)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        SelectFilter::Disjunctive(parts) => {
            for p in parts {
                if filter_holds(p, id, field)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}
