use indexmap::IndexMap;
use tracing::{debug, warn};

use eql_ir::{EdgeId, MultiSet, QualifiedName, StorageFilter};

use crate::error::Result;
use crate::memory::MemoryStorage;
use crate::provider::{Fields, Snapshot, StorageProvider};

/// Staging layer between the evaluator and a storage backend.
///
/// Writes accumulate here and reach the backend only in [`commit_dml`],
/// inserts first, then updates, then deletes. Reads see staged field values
/// of the objects being written; type scans see committed state only.
///
/// [`commit_dml`]: EdgeDatabase::commit_dml
pub struct EdgeDatabase {
    storage: Box<dyn StorageProvider>,
    to_insert: IndexMap<EdgeId, (QualifiedName, Fields)>,
    to_update: IndexMap<EdgeId, (QualifiedName, Fields)>,
    to_delete: IndexMap<EdgeId, QualifiedName>,
}

impl EdgeDatabase {
    pub fn new(storage: Box<dyn StorageProvider>) -> Self {
        Self {
            storage,
            to_insert: IndexMap::new(),
            to_update: IndexMap::new(),
            to_delete: IndexMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    pub fn storage(&self) -> &dyn StorageProvider {
        self.storage.as_ref()
    }

    pub fn next_id(&mut self) -> Result<EdgeId> {
        self.storage.next_id()
    }

    /// Stages a new object. Its fields normally arrive through a later
    /// [`EdgeDatabase::update`] on the same id.
    pub fn insert(&mut self, id: EdgeId, tp: QualifiedName, fields: Fields) {
        self.to_insert.insert(id, (tp, fields));
    }

    /// Stages a partial write. Repeated updates of one id merge, later
    /// values winning per field.
    pub fn update(&mut self, id: EdgeId, tp: QualifiedName, fields: Fields) {
        let (_, staged) = self
            .to_update
            .entry(id)
            .or_insert_with(|| (tp, Fields::new()));
        staged.extend(fields);
    }

    pub fn delete(&mut self, id: EdgeId, tp: QualifiedName) {
        self.to_delete.insert(id, tp);
    }

    pub fn has_staged(&self) -> bool {
        !(self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty())
    }

    pub fn query_ids_for_a_type(&self, tp: &QualifiedName, filter: &StorageFilter) -> Result<Vec<EdgeId>> {
        self.storage.query_ids_for_a_type(tp, filter)
    }

    pub fn project(&self, id: EdgeId, tp: &QualifiedName, field: &str) -> Result<MultiSet> {
        if let Some(v) = self.to_update.get(&id).and_then(|(_, f)| f.get(field)) {
            return Ok(v.clone());
        }
        if let Some((_, f)) = self.to_insert.get(&id) {
            return Ok(f.get(field).cloned().unwrap_or_default());
        }
        self.storage.project(id, tp, field)
    }

    pub fn reverse_project(&self, ids: &[EdgeId], field: &str) -> Result<MultiSet> {
        self.storage.reverse_project(ids, field)
    }

    pub fn check_id_present(&self, id: EdgeId) -> Result<bool> {
        self.storage.check_id_present(id)
    }

    /// Flushes staged writes and commits them. If any write fails, the
    /// backend is rolled back to its state before the flush and the staged
    /// writes are dropped.
    pub fn commit_dml(&mut self) -> Result<()> {
        if !self.has_staged() {
            return Ok(());
        }
        let inserts = std::mem::take(&mut self.to_insert);
        let updates = std::mem::take(&mut self.to_update);
        let deletes = std::mem::take(&mut self.to_delete);
        self.storage.begin_flush()?;
        if let Err(e) = self.flush(&inserts, &updates, &deletes) {
            warn!(error = %e, "flush failed, rolling back");
            self.storage.abort_flush()?;
            return Err(e);
        }
        debug!(
            inserted = inserts.len(),
            updated = updates.len(),
            deleted = deletes.len(),
            "committed staged writes"
        );
        Ok(())
    }

    fn flush(
        &mut self,
        inserts: &IndexMap<EdgeId, (QualifiedName, Fields)>,
        updates: &IndexMap<EdgeId, (QualifiedName, Fields)>,
        deletes: &IndexMap<EdgeId, QualifiedName>,
    ) -> Result<()> {
        for (id, (tp, fields)) in inserts {
            self.storage.insert(*id, tp, fields)?;
        }
        for (id, (tp, fields)) in updates {
            self.storage.update(*id, tp, fields)?;
        }
        for (id, tp) in deletes {
            self.storage.delete(*id, tp)?;
        }
        self.storage.commit()
    }

    /// Drops every staged write.
    pub fn discard_dml(&mut self) {
        self.to_insert.clear();
        self.to_update.clear();
        self.to_delete.clear();
    }

    pub fn dump_state(&self) -> Result<Snapshot> {
        self.storage.dump_state()
    }

    pub fn restore_state(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.discard_dml();
        self.storage.restore_state(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::{SelectFilter, Val};

    fn thing() -> QualifiedName {
        QualifiedName::new(["default", "Thing"])
    }

    fn field(name: &str, v: Val) -> Fields {
        [(name.to_string(), vec![v])].into_iter().collect()
    }

    #[test]
    fn staged_inserts_are_invisible_to_scans_until_commit() {
        let mut db = EdgeDatabase::in_memory();
        let id = db.next_id().unwrap();
        db.insert(id, thing(), Fields::new());
        db.update(id, thing(), field("x", Val::str("a")));
        assert_eq!(db.project(id, &thing(), "x").unwrap(), vec![Val::str("a")]);
        assert!(db.query_ids_for_a_type(&thing(), &SelectFilter::True).unwrap().is_empty());
        db.commit_dml().unwrap();
        assert_eq!(db.query_ids_for_a_type(&thing(), &SelectFilter::True).unwrap(), vec![id]);
        assert_eq!(db.project(id, &thing(), "x").unwrap(), vec![Val::str("a")]);
    }

    #[test]
    fn an_object_inserted_and_deleted_in_one_flush_is_gone() {
        let mut db = EdgeDatabase::in_memory();
        let id = db.next_id().unwrap();
        db.insert(id, thing(), Fields::new());
        db.delete(id, thing());
        db.commit_dml().unwrap();
        assert!(!db.check_id_present(id).unwrap());
    }

    #[test]
    fn discarded_writes_never_reach_storage() {
        let mut db = EdgeDatabase::in_memory();
        let id = db.next_id().unwrap();
        db.insert(id, thing(), Fields::new());
        db.discard_dml();
        db.commit_dml().unwrap();
        assert!(!db.check_id_present(id).unwrap());
    }

    #[test]
    fn later_updates_win_per_field() {
        let mut db = EdgeDatabase::in_memory();
        let id = db.next_id().unwrap();
        db.insert(id, thing(), Fields::new());
        db.update(id, thing(), field("x", Val::int(1)));
        db.update(id, thing(), field("y", Val::int(2)));
        db.update(id, thing(), field("x", Val::int(3)));
        db.commit_dml().unwrap();
        assert_eq!(db.project(id, &thing(), "x").unwrap(), vec![Val::int(3)]);
        assert_eq!(db.project(id, &thing(), "y").unwrap(), vec![Val::int(2)]);
    }

    #[test]
    fn a_failing_flush_leaves_storage_untouched() {
        let mut db = EdgeDatabase::in_memory();
        let kept = db.next_id().unwrap();
        db.insert(kept, thing(), field("x", Val::int(1)));
        db.commit_dml().unwrap();

        let id = db.next_id().unwrap();
        db.insert(id, thing(), Fields::new());
        db.update(kept, thing(), field("x", Val::int(2)));
        db.update(999, thing(), field("x", Val::int(3)));
        assert!(db.commit_dml().is_err());
        assert!(!db.check_id_present(id).unwrap());
        assert_eq!(db.project(kept, &thing(), "x").unwrap(), vec![Val::int(1)]);

        db.commit_dml().unwrap();
        assert!(!db.check_id_present(id).unwrap());
        assert!(db.next_id().unwrap() > id);
    }
}
