use indexmap::IndexMap;
use tracing::trace;

use eql_ir::{EdgeId, MultiSet, QualifiedName, RefVal, StorageFilter, Val};

use crate::error::{Result, StorageError};
use crate::provider::{Fields, Snapshot, StorageProvider, filter_holds};

#[derive(Clone, Debug, PartialEq)]
pub struct DbEntry {
    pub tp: QualifiedName,
    pub data: Fields,
}

/// Objects kept in an insertion-ordered map. Links are stored as references
/// whose field map holds only the edge's link properties.
#[derive(Clone, Debug)]
pub struct MemoryStorage {
    entries: IndexMap<EdgeId, DbEntry>,
    next_id: EdgeId,
    before_flush: Option<IndexMap<EdgeId, DbEntry>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            next_id: 1,
            before_flush: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EdgeId) -> Option<&DbEntry> {
        self.entries.get(&id)
    }

    fn entry(&self, id: EdgeId) -> Result<&DbEntry> {
        self.entries.get(&id).ok_or(StorageError::UnknownId(id))
    }
}

impl StorageProvider for MemoryStorage {
    fn query_ids_for_a_type(&self, tp: &QualifiedName, filter: &StorageFilter) -> Result<Vec<EdgeId>> {
        let mut out = Vec::new();
        for (id, entry) in &self.entries {
            if entry.tp != *tp {
                continue;
            }
            let mut field =
                |name: &str| -> Result<MultiSet> { Ok(entry.data.get(name).cloned().unwrap_or_default()) };
            if filter_holds(filter, *id, &mut field)? {
                out.push(*id);
            }
        }
        trace!(%tp, found = out.len(), "memory scan");
        Ok(out)
    }

    fn project(&self, id: EdgeId, _tp: &QualifiedName, field: &str) -> Result<MultiSet> {
        Ok(self.entry(id)?.data.get(field).cloned().unwrap_or_default())
    }

    fn reverse_project(&self, ids: &[EdgeId], field: &str) -> Result<MultiSet> {
        let mut out = Vec::new();
        for (source, entry) in &self.entries {
            let Some(targets) = entry.data.get(field) else {
                continue;
            };
            for t in targets {
                if let Val::Ref(r) = t {
                    if ids.contains(&r.id) {
                        out.push(Val::Ref(RefVal {
                            id: *source,
                            tpname: entry.tp.clone(),
                            val: r.val.link_props_only(),
                        }));
                    }
                }
            }
        }
        Ok(out)
    }

    fn insert(&mut self, id: EdgeId, tp: &QualifiedName, fields: &Fields) -> Result<()> {
        self.entries.insert(
            id,
            DbEntry {
                tp: tp.clone(),
                data: fields.clone(),
            },
        );
        Ok(())
    }

    fn update(&mut self, id: EdgeId, _tp: &QualifiedName, fields: &Fields) -> Result<()> {
        let entry = self.entries.get_mut(&id).ok_or(StorageError::UnknownId(id))?;
        for (k, v) in fields {
            entry.data.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn delete(&mut self, id: EdgeId, _tp: &QualifiedName) -> Result<()> {
        self.entries
            .shift_remove(&id)
            .map(|_| ())
            .ok_or(StorageError::UnknownId(id))
    }

    fn next_id(&mut self) -> Result<EdgeId> {
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn check_id_present(&self, id: EdgeId) -> Result<bool> {
        Ok(self.entries.contains_key(&id))
    }

    fn dump_state(&self) -> Result<Snapshot> {
        Ok(Snapshot::Memory {
            entries: self.entries.clone(),
            next_id: self.next_id,
        })
    }

    fn restore_state(&mut self, snapshot: &Snapshot) -> Result<()> {
        let Snapshot::Memory { entries, next_id } = snapshot else {
            return Err(StorageError::ForeignSnapshot);
        };
        self.entries = entries.clone();
        self.next_id = *next_id;
        self.before_flush = None;
        Ok(())
    }

    fn begin_flush(&mut self) -> Result<()> {
        self.before_flush = Some(self.entries.clone());
        Ok(())
    }

    fn abort_flush(&mut self) -> Result<()> {
        if let Some(entries) = self.before_flush.take() {
            self.entries = entries;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.before_flush = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::{Label, Marker, ObjectVal, SelectFilter};

    fn person() -> QualifiedName {
        QualifiedName::new(["default", "Person"])
    }

    fn fields(pairs: &[(&str, MultiSet)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let mut s = MemoryStorage::new();
        let a = s.next_id().unwrap();
        let b = s.next_id().unwrap();
        assert!(b > a);
    }

    #[test]
    fn equality_filters_match_any_argument() {
        let mut s = MemoryStorage::new();
        s.insert(1, &person(), &fields(&[("name", vec![Val::str("a")])])).unwrap();
        s.insert(2, &person(), &fields(&[("name", vec![Val::str("b")])])).unwrap();
        s.insert(3, &person(), &fields(&[("name", vec![Val::str("c")])])).unwrap();
        let f = SelectFilter::Eq {
            propname: "name".into(),
            arg: vec![Val::str("a"), Val::str("c")],
        };
        assert_eq!(s.query_ids_for_a_type(&person(), &f).unwrap(), vec![1, 3]);
        let by_id = SelectFilter::Eq {
            propname: "id".into(),
            arg: vec![Val::uuid(2)],
        };
        assert_eq!(s.query_ids_for_a_type(&person(), &by_id).unwrap(), vec![2]);
    }

    #[test]
    fn updates_only_touch_the_given_fields() {
        let mut s = MemoryStorage::new();
        s.insert(
            1,
            &person(),
            &fields(&[("name", vec![Val::str("a")]), ("age", vec![Val::int(3)])]),
        )
        .unwrap();
        s.update(1, &person(), &fields(&[("name", vec![Val::str("b")])])).unwrap();
        assert_eq!(s.project(1, &person(), "age").unwrap(), vec![Val::int(3)]);
        assert_eq!(s.project(1, &person(), "name").unwrap(), vec![Val::str("b")]);
    }

    #[test]
    fn backlinks_carry_link_properties() {
        let mut s = MemoryStorage::new();
        let mut lp = ObjectVal::empty();
        lp.0.insert(
            Label::LinkProp("since".into()),
            (Marker::Invisible, vec![Val::int(2020)]),
        );
        let link = Val::Ref(RefVal {
            id: 2,
            tpname: person(),
            val: lp.clone(),
        });
        s.insert(1, &person(), &fields(&[("friends", vec![link])])).unwrap();
        s.insert(2, &person(), &Fields::new()).unwrap();
        let back = s.reverse_project(&[2], "friends").unwrap();
        assert_eq!(
            back,
            vec![Val::Ref(RefVal {
                id: 1,
                tpname: person(),
                val: lp,
            })]
        );
    }

    #[test]
    fn snapshots_restore_deleted_objects() {
        let mut s = MemoryStorage::new();
        s.insert(1, &person(), &Fields::new()).unwrap();
        let snap = s.dump_state().unwrap();
        s.delete(1, &person()).unwrap();
        assert!(!s.check_id_present(1).unwrap());
        s.restore_state(&snap).unwrap();
        assert!(s.check_id_present(1).unwrap());
    }
}
