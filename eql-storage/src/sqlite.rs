//! SQLite-backed storage.
//!
//! Each object type gets a table keyed by `id` with one column per singular
//! field. Multi-valued fields and links with link properties live in a
//! `"T.field"` table of `(source, target, @prop...)` rows. Three reserved
//! tables hold the id-to-type map, the id counter and the schema text the
//! file was created with.

use std::path::Path;

use indexmap::IndexMap;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info, trace};

use eql_core::{DBSchema, ancestors};
use eql_ir::{
    CompositeKind, EdgeId, Label, Marker, MultiSet, ObjectVal, Prim, QualifiedName, RefVal,
    SelectFilter, StorageFilter, Tp, Val,
};

use crate::error::{Result, StorageError};
use crate::provider::{Fields, Snapshot, StorageProvider, TableRows, id_of};

const OBJECTS: &str = "objects";
const NEXT_ID: &str = "next_id_to_return_gen";
const SDL_SCHEMA: &str = "sdl_schema";
const FIRST_ID: EdgeId = 101;

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn link_table(tp: &QualifiedName, field: &str) -> String {
    quoted(&format!("{tp}.{field}"))
}

fn lp_column(name: &str) -> String {
    quoted(&format!("@{name}"))
}

/// How values of one field are laid out in SQLite.
#[derive(Clone, Debug, PartialEq)]
enum Codec {
    Int(QualifiedName),
    Float(QualifiedName),
    Bool(QualifiedName),
    Text(QualifiedName),
    /// Declared target, used when a dangling id has no entry in `objects`.
    Link(QualifiedName),
    Array(Box<Codec>),
    Tuple { labels: Vec<String>, items: Vec<Codec> },
}

impl Codec {
    fn column_class(&self) -> &'static str {
        match self {
            Codec::Int(_) | Codec::Bool(_) | Codec::Link(_) => "INTEGER",
            Codec::Float(_) => "REAL",
            _ => "TEXT",
        }
    }
}

fn scalar_codec(schema: &DBSchema, q: &QualifiedName) -> Codec {
    let chain = std::iter::once(q.clone()).chain(ancestors(schema, q));
    for n in chain {
        if n.module() != ["std"] {
            continue;
        }
        match n.last() {
            "int16" | "int32" | "int64" | "uuid" | "anyint" => return Codec::Int(q.clone()),
            "float32" | "float64" | "anyfloat" => return Codec::Float(q.clone()),
            "bool" => return Codec::Bool(q.clone()),
            "str" | "json" => return Codec::Text(q.clone()),
            _ => {}
        }
    }
    Codec::Text(q.clone())
}

fn link_target(tp: &Tp) -> Option<QualifiedName> {
    match tp {
        Tp::Union(a, b) => link_target(a).or_else(|| link_target(b)),
        t => t.link_name(),
    }
}

fn codec_for(schema: &DBSchema, tp: &Tp) -> Result<Codec> {
    if let Some(target) = link_target(tp) {
        return Ok(Codec::Link(target));
    }
    match tp {
        Tp::Scalar(q) => Ok(scalar_codec(schema, q)),
        Tp::Default { tp, .. } => codec_for(schema, tp),
        Tp::Composite {
            kind: CompositeKind::Array,
            tps,
            ..
        } if tps.len() == 1 => Ok(Codec::Array(Box::new(codec_for(schema, &tps[0])?))),
        Tp::Composite {
            kind: CompositeKind::Tuple,
            tps,
            labels,
        } => Ok(Codec::Tuple {
            labels: labels.clone(),
            items: tps
                .iter()
                .map(|t| codec_for(schema, t))
                .collect::<Result<_>>()?,
        }),
        other => Err(StorageError::Unstorable(format!("fields of type {other}"))),
    }
}

#[derive(Clone, Debug)]
struct FieldLayout {
    codec: Codec,
    singular: bool,
    link_props: IndexMap<String, Codec>,
}

impl FieldLayout {
    fn has_link_table(&self) -> bool {
        !self.singular || !self.link_props.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct Layout {
    types: IndexMap<QualifiedName, IndexMap<String, FieldLayout>>,
}

/// Storage type of a declared field, or `None` for computed fields.
fn stored_tp(tp: &Tp) -> Option<&Tp> {
    match tp {
        Tp::Computable { .. } | Tp::UncheckedComputable(_) => None,
        Tp::Default { tp, .. } => stored_tp(tp),
        other => Some(other),
    }
}

impl Layout {
    fn from_schema(schema: &DBSchema) -> Result<Layout> {
        let mut types = IndexMap::new();
        for (name, def) in schema.type_defs() {
            if def.is_abstract || name.module() == ["std"] {
                continue;
            }
            let Some(object) = def.object() else {
                continue;
            };
            let mut fields = IndexMap::new();
            for (label, rt) in &object.0 {
                let Some(tp) = stored_tp(&rt.tp) else {
                    continue;
                };
                let mut link_props = IndexMap::new();
                for (lp, lrt) in tp.link_props().map(|o| o.0.iter()).into_iter().flatten() {
                    if let Some(ltp) = stored_tp(&lrt.tp) {
                        link_props.insert(lp.clone(), codec_for(schema, ltp)?);
                    }
                }
                fields.insert(
                    label.clone(),
                    FieldLayout {
                        codec: codec_for(schema, tp)?,
                        singular: rt.mode.is_singular(),
                        link_props,
                    },
                );
            }
            types.insert(name, fields);
        }
        Ok(Layout { types })
    }
}

fn encode_json(v: &Val) -> Result<serde_json::Value> {
    use serde_json::Value as J;
    Ok(match v {
        Val::Scalar(s) => match &s.val {
            Prim::Int(i) => J::from(*i),
            Prim::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .ok_or_else(|| StorageError::Unstorable(format!("float {f}")))?,
            Prim::Str(s) => J::from(s.clone()),
            Prim::Bool(b) => J::from(*b),
        },
        Val::Arr(items) | Val::UnnamedTuple(items) => {
            J::Array(items.iter().map(encode_json).collect::<Result<_>>()?)
        }
        Val::NamedTuple(items) => J::Array(items.values().map(encode_json).collect::<Result<_>>()?),
        other => return Err(StorageError::Unstorable(format!("{other} inside a composite"))),
    })
}

fn encode(v: &Val) -> Result<SqlValue> {
    Ok(match v {
        Val::Scalar(s) => match &s.val {
            Prim::Int(i) => SqlValue::Integer(*i),
            Prim::Float(f) => SqlValue::Real(*f),
            Prim::Str(s) => SqlValue::Text(s.clone()),
            Prim::Bool(b) => SqlValue::Integer(i64::from(*b)),
        },
        Val::Ref(r) => SqlValue::Integer(r.id),
        Val::Arr(_) | Val::UnnamedTuple(_) | Val::NamedTuple(_) => SqlValue::Text(encode_json(v)?.to_string()),
        Val::Free(_) => return Err(StorageError::Unstorable("a free object".into())),
    })
}

fn malformed(what: impl std::fmt::Debug, codec: &Codec) -> StorageError {
    StorageError::Unstorable(format!("stored value {what:?} does not decode as {codec:?}"))
}

fn decode_json(codec: &Codec, j: &serde_json::Value) -> Result<Val> {
    use serde_json::Value as J;
    match (codec, j) {
        (Codec::Int(q), J::Number(n)) => n
            .as_i64()
            .map(|i| Val::scalar(q.clone(), Prim::Int(i)))
            .ok_or_else(|| malformed(j, codec)),
        (Codec::Float(q), J::Number(n)) => n
            .as_f64()
            .map(|f| Val::scalar(q.clone(), Prim::Float(f)))
            .ok_or_else(|| malformed(j, codec)),
        (Codec::Bool(q), J::Bool(b)) => Ok(Val::scalar(q.clone(), Prim::Bool(*b))),
        (Codec::Text(q), J::String(s)) => Ok(Val::scalar(q.clone(), Prim::Str(s.clone()))),
        (Codec::Array(inner), J::Array(items)) => Ok(Val::Arr(
            items
                .iter()
                .map(|i| decode_json(inner, i))
                .collect::<Result<_>>()?,
        )),
        (Codec::Tuple { labels, items }, J::Array(vs)) if vs.len() == items.len() => {
            let decoded = items
                .iter()
                .zip(vs)
                .map(|(c, v)| decode_json(c, v))
                .collect::<Result<Vec<_>>>()?;
            if labels.is_empty() {
                Ok(Val::UnnamedTuple(decoded))
            } else {
                Ok(Val::NamedTuple(labels.iter().cloned().zip(decoded).collect()))
            }
        }
        _ => Err(malformed(j, codec)),
    }
}

/// Decodes a non-link column value. `NULL` is the empty multiset.
fn decode(codec: &Codec, v: SqlValue) -> Result<Option<Val>> {
    Ok(Some(match (codec, v) {
        (_, SqlValue::Null) => return Ok(None),
        (Codec::Int(q), SqlValue::Integer(i)) => Val::scalar(q.clone(), Prim::Int(i)),
        (Codec::Float(q), SqlValue::Real(f)) => Val::scalar(q.clone(), Prim::Float(f)),
        (Codec::Float(q), SqlValue::Integer(i)) => Val::scalar(q.clone(), Prim::Float(i as f64)),
        (Codec::Bool(q), SqlValue::Integer(i)) => Val::scalar(q.clone(), Prim::Bool(i != 0)),
        (Codec::Text(q), SqlValue::Text(s)) => Val::scalar(q.clone(), Prim::Str(s)),
        (c @ (Codec::Array(_) | Codec::Tuple { .. }), SqlValue::Text(s)) => {
            let j: serde_json::Value =
                serde_json::from_str(&s).map_err(|_| malformed(&s, c))?;
            decode_json(c, &j)?
        }
        (c, other) => return Err(malformed(other, c)),
    }))
}

/// A database file whose schema text has been settled but whose tables may
/// not exist yet. Build the schema from [`SqliteOpener::sdl`], then call
/// [`SqliteOpener::finish`].
pub struct SqliteOpener {
    conn: Connection,
    sdl: String,
}

impl SqliteOpener {
    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub fn finish(self, schema: &DBSchema) -> Result<SqliteStorage> {
        SqliteStorage::create(self.conn, schema)
    }
}

pub struct SqliteStorage {
    conn: Connection,
    layout: Layout,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path`. A file created earlier
    /// must have been created with exactly `sdl`; passing `None` adopts
    /// whatever schema text the file holds.
    pub fn open(path: impl AsRef<Path>, sdl: Option<&str>) -> Result<SqliteOpener> {
        let conn = Connection::open(path)?;
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {SDL_SCHEMA} (content TEXT NOT NULL)"),
            [],
        )?;
        let stored: Option<String> = conn
            .query_row(&format!("SELECT content FROM {SDL_SCHEMA}"), [], |r| r.get(0))
            .optional()?;
        let sdl = match (stored, sdl) {
            (Some(s), Some(given)) if s != given => return Err(StorageError::SchemaMismatch),
            (Some(s), _) => s,
            (None, Some(given)) => {
                conn.execute(
                    &format!("INSERT INTO {SDL_SCHEMA} (content) VALUES (?1)"),
                    params![given],
                )?;
                given.to_string()
            }
            (None, None) => String::new(),
        };
        Ok(SqliteOpener { conn, sdl })
    }

    fn create(conn: Connection, schema: &DBSchema) -> Result<SqliteStorage> {
        let layout = Layout::from_schema(schema)?;
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {OBJECTS} (id INTEGER PRIMARY KEY, tp TEXT NOT NULL)"),
            [],
        )?;
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {NEXT_ID} (id INTEGER NOT NULL)"),
            [],
        )?;
        let seeded: Option<EdgeId> = conn
            .query_row(&format!("SELECT id FROM {NEXT_ID}"), [], |r| r.get(0))
            .optional()?;
        if seeded.is_none() {
            conn.execute(&format!("INSERT INTO {NEXT_ID} (id) VALUES (?1)"), params![FIRST_ID])?;
        }
        for (tp, fields) in &layout.types {
            let mut columns = vec!["id INTEGER PRIMARY KEY".to_string()];
            for (name, f) in fields {
                if f.has_link_table() {
                    let mut link_cols = vec![
                        "source INTEGER NOT NULL".to_string(),
                        format!("target {} NOT NULL", f.codec.column_class()),
                    ];
                    for (lp, c) in &f.link_props {
                        link_cols.push(format!("{} {}", lp_column(lp), c.column_class()));
                    }
                    let sql = format!(
                        "CREATE TABLE IF NOT EXISTS {} ({})",
                        link_table(tp, name),
                        link_cols.join(", ")
                    );
                    debug!(%sql, "creating link table");
                    conn.execute(&sql, [])?;
                } else {
                    columns.push(format!("{} {}", quoted(name), f.codec.column_class()));
                }
            }
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quoted(&tp.to_string()),
                columns.join(", ")
            );
            debug!(%sql, "creating type table");
            conn.execute(&sql, [])?;
        }
        conn.execute_batch("BEGIN")?;
        info!(types = layout.types.len(), "sqlite storage ready");
        Ok(SqliteStorage { conn, layout })
    }

    fn fields_of(&self, tp: &QualifiedName) -> Result<&IndexMap<String, FieldLayout>> {
        self.layout
            .types
            .get(tp)
            .ok_or_else(|| StorageError::UnknownType(tp.to_string()))
    }

    fn field_of(&self, tp: &QualifiedName, field: &str) -> Result<&FieldLayout> {
        self.fields_of(tp)?
            .get(field)
            .ok_or_else(|| StorageError::UnknownField {
                tp: tp.to_string(),
                field: field.to_string(),
            })
    }

    fn type_of_id(&self, id: EdgeId) -> Result<Option<QualifiedName>> {
        let tp: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT tp FROM {OBJECTS} WHERE id = ?1"),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(tp.map(|t| QualifiedName::new(t.split("::").map(str::to_string))))
    }

    fn link_val(&self, declared: &QualifiedName, id: EdgeId, props: ObjectVal) -> Result<Val> {
        let tpname = self.type_of_id(id)?.unwrap_or_else(|| declared.clone());
        Ok(Val::Ref(RefVal {
            id,
            tpname,
            val: props,
        }))
    }

    fn decode_field(&self, codec: &Codec, v: SqlValue) -> Result<Option<Val>> {
        match (codec, v) {
            (Codec::Link(_), SqlValue::Null) => Ok(None),
            (Codec::Link(declared), SqlValue::Integer(id)) => {
                self.link_val(declared, id, ObjectVal::empty()).map(Some)
            }
            (c, v) => decode(c, v),
        }
    }

    /// Rows of a link table as `(source, target, link properties)`.
    fn link_rows(
        &self,
        tp: &QualifiedName,
        field: &str,
        layout: &FieldLayout,
        column: &str,
        keys: &[SqlValue],
    ) -> Result<Vec<(EdgeId, SqlValue, ObjectVal)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cols = vec!["source".to_string(), "target".to_string()];
        cols.extend(layout.link_props.keys().map(|lp| lp_column(lp)));
        let holes = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {column} IN ({holes}) ORDER BY rowid",
            cols.join(", "),
            link_table(tp, field)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(keys.iter()), |r| {
                let mut row = Vec::with_capacity(cols.len());
                for i in 0..cols.len() {
                    row.push(r.get::<_, SqlValue>(i)?);
                }
                Ok(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(raw.len());
        for row in raw {
            let mut row = row.into_iter();
            let source = match row.next() {
                Some(SqlValue::Integer(i)) => i,
                other => return Err(malformed(other, &Codec::Link(tp.clone()))),
            };
            let target = row.next().unwrap_or(SqlValue::Null);
            let mut props = ObjectVal::empty();
            for ((lp, codec), v) in layout.link_props.iter().zip(row) {
                let vals: MultiSet = decode(codec, v)?.into_iter().collect();
                props
                    .0
                    .insert(Label::LinkProp(lp.clone()), (Marker::Invisible, vals));
            }
            out.push((source, target, props));
        }
        Ok(out)
    }

    fn insert_links(
        &self,
        tp: &QualifiedName,
        field: &str,
        layout: &FieldLayout,
        source: EdgeId,
        values: &MultiSet,
    ) -> Result<()> {
        let mut cols = vec!["source".to_string(), "target".to_string()];
        cols.extend(layout.link_props.keys().map(|lp| lp_column(lp)));
        let holes = vec!["?"; cols.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({holes})",
            link_table(tp, field),
            cols.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        for v in values {
            let mut row = vec![SqlValue::Integer(source), encode(v)?];
            for lp in layout.link_props.keys() {
                let lv = v
                    .object_val()
                    .and_then(|o| o.get(&Label::LinkProp(lp.clone())))
                    .and_then(|vs| vs.first());
                row.push(match lv {
                    Some(x) => encode(x)?,
                    None => SqlValue::Null,
                });
            }
            stmt.execute(params_from_iter(row))?;
        }
        Ok(())
    }

    fn single(tp: &QualifiedName, field: &str, values: &MultiSet) -> Result<SqlValue> {
        match values.as_slice() {
            [] => Ok(SqlValue::Null),
            [v] => encode(v),
            _ => Err(StorageError::Unstorable(format!(
                "{} values in single field {tp}.{field}",
                values.len()
            ))),
        }
    }

    fn where_clause(
        &self,
        tp: &QualifiedName,
        filter: &StorageFilter,
        params: &mut Vec<SqlValue>,
    ) -> Result<String> {
        Ok(match filter {
            SelectFilter::True => "1".into(),
            SelectFilter::Eq { propname, arg } if propname == "id" => {
                let ids: Vec<EdgeId> = arg.iter().filter_map(id_of).collect();
                if ids.is_empty() {
                    return Ok("0".into());
                }
                let holes = vec!["?"; ids.len()].join(", ");
                params.extend(ids.into_iter().map(SqlValue::Integer));
                format!("id IN ({holes})")
            }
            SelectFilter::Eq { propname, arg } => {
                if arg.is_empty() {
                    return Ok("0".into());
                }
                let f = self.field_of(tp, propname)?;
                for v in arg {
                    params.push(encode(v)?);
                }
                let holes = vec!["?"; arg.len()].join(", ");
                if f.has_link_table() {
                    format!(
                        "id IN (SELECT source FROM {} WHERE target IN ({holes}))",
                        link_table(tp, propname)
                    )
                } else {
                    format!("{} IN ({holes})", quoted(propname))
                }
            }
            SelectFilter::Conjunctive(parts) if parts.is_empty() => "1".into(),
            SelectFilter::Disjunctive(parts) if parts.is_empty() => "0".into(),
            SelectFilter::Conjunctive(parts) | SelectFilter::Disjunctive(parts) => {
                let sep = if matches!(filter, SelectFilter::Conjunctive(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let clauses = parts
                    .iter()
                    .map(|p| self.where_clause(tp, p, params).map(|c| format!("({c})")))
                    .collect::<Result<Vec<_>>>()?;
                clauses.join(sep)
            }
        })
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}

impl StorageProvider for SqliteStorage {
    fn query_ids_for_a_type(&self, tp: &QualifiedName, filter: &StorageFilter) -> Result<Vec<EdgeId>> {
        self.fields_of(tp)?;
        let mut params = Vec::new();
        let cond = self.where_clause(tp, filter, &mut params)?;
        let sql = format!("SELECT id FROM {} WHERE {cond} ORDER BY id", quoted(&tp.to_string()));
        trace!(%sql, "sqlite scan");
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params), |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<EdgeId>>>()?;
        Ok(ids)
    }

    fn project(&self, id: EdgeId, tp: &QualifiedName, field: &str) -> Result<MultiSet> {
        let f = self.field_of(tp, field)?;
        if f.has_link_table() {
            let rows = self.link_rows(tp, field, f, "source", &[SqlValue::Integer(id)])?;
            let mut out = Vec::with_capacity(rows.len());
            for (_, target, props) in rows {
                match (&f.codec, target) {
                    (Codec::Link(declared), SqlValue::Integer(t)) => {
                        out.push(self.link_val(declared, t, props)?)
                    }
                    (c, v) => out.extend(decode(c, v)?),
                }
            }
            return Ok(out);
        }
        let v: Option<SqlValue> = self
            .conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE id = ?1", quoted(field), quoted(&tp.to_string())),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let v = v.ok_or(StorageError::UnknownId(id))?;
        Ok(self.decode_field(&f.codec, v)?.into_iter().collect())
    }

    fn reverse_project(&self, ids: &[EdgeId], field: &str) -> Result<MultiSet> {
        let keys: Vec<SqlValue> = ids.iter().map(|i| SqlValue::Integer(*i)).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for (tp, fields) in &self.layout.types {
            let Some(f) = fields.get(field) else {
                continue;
            };
            if !matches!(f.codec, Codec::Link(_)) {
                continue;
            }
            if f.has_link_table() {
                for (source, _, props) in self.link_rows(tp, field, f, "target", &keys)? {
                    out.push(Val::Ref(RefVal {
                        id: source,
                        tpname: tp.clone(),
                        val: props,
                    }));
                }
            } else {
                let sql = format!(
                    "SELECT id FROM {} WHERE {} IN ({}) ORDER BY id",
                    quoted(&tp.to_string()),
                    quoted(field),
                    vec!["?"; keys.len()].join(", ")
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let sources = stmt
                    .query_map(params_from_iter(keys.iter()), |r| r.get(0))?
                    .collect::<rusqlite::Result<Vec<EdgeId>>>()?;
                out.extend(sources.into_iter().map(|s| Val::reference(s, tp.clone())));
            }
        }
        Ok(out)
    }

    fn insert(&mut self, id: EdgeId, tp: &QualifiedName, fields: &Fields) -> Result<()> {
        let layout = self.fields_of(tp)?;
        for name in fields.keys() {
            self.field_of(tp, name)?;
        }
        let mut cols = vec!["id".to_string()];
        let mut row = vec![SqlValue::Integer(id)];
        for (name, f) in layout {
            if f.has_link_table() {
                continue;
            }
            cols.push(quoted(name));
            row.push(match fields.get(name) {
                Some(vs) => Self::single(tp, name, vs)?,
                None => SqlValue::Null,
            });
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted(&tp.to_string()),
            cols.join(", "),
            vec!["?"; cols.len()].join(", ")
        );
        self.conn.execute(&sql, params_from_iter(row))?;
        for (name, f) in layout {
            if let (true, Some(vs)) = (f.has_link_table(), fields.get(name)) {
                self.insert_links(tp, name, f, id, vs)?;
            }
        }
        self.conn.execute(
            &format!("INSERT INTO {OBJECTS} (id, tp) VALUES (?1, ?2)"),
            params![id, tp.to_string()],
        )?;
        Ok(())
    }

    fn update(&mut self, id: EdgeId, tp: &QualifiedName, fields: &Fields) -> Result<()> {
        for (name, vs) in fields {
            let f = self.field_of(tp, name)?;
            if f.has_link_table() {
                self.conn.execute(
                    &format!("DELETE FROM {} WHERE source = ?1", link_table(tp, name)),
                    params![id],
                )?;
                self.insert_links(tp, name, f, id, vs)?;
            } else {
                let v = Self::single(tp, name, vs)?;
                self.conn.execute(
                    &format!(
                        "UPDATE {} SET {} = ?1 WHERE id = ?2",
                        quoted(&tp.to_string()),
                        quoted(name)
                    ),
                    params![v, id],
                )?;
            }
        }
        Ok(())
    }

    fn delete(&mut self, id: EdgeId, tp: &QualifiedName) -> Result<()> {
        for (name, f) in self.fields_of(tp)? {
            if f.has_link_table() {
                self.conn.execute(
                    &format!("DELETE FROM {} WHERE source = ?1", link_table(tp, name)),
                    params![id],
                )?;
            }
        }
        self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", quoted(&tp.to_string())),
            params![id],
        )?;
        self.conn
            .execute(&format!("DELETE FROM {OBJECTS} WHERE id = ?1"), params![id])?;
        Ok(())
    }

    fn next_id(&mut self) -> Result<EdgeId> {
        let id: EdgeId = self
            .conn
            .query_row(&format!("SELECT id FROM {NEXT_ID}"), [], |r| r.get(0))?;
        self.conn
            .execute(&format!("UPDATE {NEXT_ID} SET id = ?1"), params![id + 1])?;
        Ok(id)
    }

    fn check_id_present(&self, id: EdgeId) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {OBJECTS} WHERE id = ?1"),
            params![id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    fn dump_state(&self) -> Result<Snapshot> {
        let mut tables = Vec::new();
        for name in self.table_names()? {
            let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", quoted(&name)))?;
            let width = stmt.column_count();
            let rows = stmt
                .query_map([], |r| {
                    (0..width)
                        .map(|i| r.get::<_, SqlValue>(i))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            tables.push(TableRows { name, rows });
        }
        Ok(Snapshot::Tables(tables))
    }

    fn restore_state(&mut self, snapshot: &Snapshot) -> Result<()> {
        let Snapshot::Tables(tables) = snapshot else {
            return Err(StorageError::ForeignSnapshot);
        };
        for t in tables {
            self.conn
                .execute(&format!("DELETE FROM {}", quoted(&t.name)), [])?;
            for row in &t.rows {
                let sql = format!(
                    "INSERT INTO {} VALUES ({})",
                    quoted(&t.name),
                    vec!["?"; row.len()].join(", ")
                );
                self.conn.execute(&sql, params_from_iter(row.iter()))?;
            }
        }
        debug!(tables = tables.len(), "restored sqlite snapshot");
        Ok(())
    }

    // `next_id` writes happen before the savepoint, so a rollback keeps them.
    fn begin_flush(&mut self) -> Result<()> {
        self.conn.execute_batch("SAVEPOINT flush")?;
        Ok(())
    }

    fn abort_flush(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK TO flush; RELEASE flush")?;
        debug!("rolled back a failed flush");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT; BEGIN")?;
        info!("sqlite commit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_values_survive_a_json_column() {
        let codec = Codec::Tuple {
            labels: vec!["a".into(), "b".into()],
            items: vec![
                Codec::Int(QualifiedName::std("int64")),
                Codec::Array(Box::new(Codec::Text(QualifiedName::std("str")))),
            ],
        };
        let v = Val::NamedTuple(
            [
                ("a".to_string(), Val::int(1)),
                ("b".to_string(), Val::Arr(vec![Val::str("x"), Val::str("y")])),
            ]
            .into_iter()
            .collect(),
        );
        let stored = encode(&v).unwrap();
        assert_eq!(decode(&codec, stored).unwrap(), Some(v));
    }

    #[test]
    fn null_columns_decode_to_nothing() {
        assert_eq!(decode(&Codec::Bool(QualifiedName::std("bool")), SqlValue::Null).unwrap(), None);
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quoted("a\"b"), "\"a\"\"b\"");
    }
}
