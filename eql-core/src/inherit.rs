//! Copies inherited fields and constraints into subtypes.

use indexmap::IndexSet;

use eql_ir::{ObjectTp, QualifiedName, ResultTp, Tp};

use crate::error::SemanticError;
use crate::schema::{DBSchema, TypeBody};

type Result<T> = std::result::Result<T, SemanticError>;

/// Expands every object type of `module` with the fields of its bases.
/// Bases in other modules are already complete; bases in this module are
/// expanded first. A round without progress means the hierarchy is cyclic.
pub fn populate_inheritance(schema: &mut DBSchema, module: &[String]) -> Result<()> {
    let Some(m) = schema.module(module) else {
        return Ok(());
    };
    let mut pending: Vec<QualifiedName> = m
        .defs
        .keys()
        .map(|n| QualifiedName::in_module(module, n))
        .filter(|q| schema.is_object_type(q))
        .collect();
    let mut done: IndexSet<QualifiedName> = IndexSet::new();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|t| {
            schema
                .subtyping
                .get(t)
                .into_iter()
                .flatten()
                .all(|b| b.module() != module || done.contains(b))
        });
        if ready.is_empty() {
            let names: Vec<String> = blocked.iter().map(|q| q.to_string()).collect();
            return Err(SemanticError::schema(format!(
                "cyclic inheritance among {}",
                names.join(", ")
            )));
        }
        for t in ready {
            expand(schema, &t)?;
            done.insert(t);
        }
        pending = blocked;
    }
    Ok(())
}

fn expand(schema: &mut DBSchema, t: &QualifiedName) -> Result<()> {
    let bases = schema.subtyping.get(t).cloned().unwrap_or_default();
    let mut inherited = ObjectTp::empty();
    let mut constraints = Vec::new();
    for b in &bases {
        let def = schema
            .type_def(b)
            .ok_or_else(|| SemanticError::resolve(format!("unknown base type {b}")))?;
        let fields = def.object().ok_or_else(|| {
            SemanticError::schema(format!("object type {t} cannot extend scalar type {b}"))
        })?;
        for (k, rt) in &fields.0 {
            let merged = match inherited.get(k) {
                Some(prev) => merge_field(t, k, prev, rt)?,
                None => rt.clone(),
            };
            inherited.0.insert(k.clone(), merged);
        }
        for c in &def.constraints {
            if !constraints.contains(c) {
                constraints.push(c.clone());
            }
        }
    }

    let Some(def) = schema.unchecked_type_def_mut(t) else {
        return Err(SemanticError::internal(format!(
            "type {t} is not in an unchecked module"
        )));
    };
    let TypeBody::Object(own) = &def.body else {
        return Ok(());
    };
    let mut fields = inherited;
    for (k, rt) in &own.0 {
        let overridden = match fields.get(k) {
            Some(base) => override_field(base, rt),
            None => rt.clone(),
        };
        fields.0.insert(k.clone(), overridden);
    }
    def.body = TypeBody::Object(fields);
    for c in constraints {
        if !def.constraints.contains(&c) {
            def.constraints.push(c);
        }
    }
    Ok(())
}

/// The same field inherited from two bases must agree on cardinality and
/// target; link properties are combined.
fn merge_field(t: &QualifiedName, k: &str, a: &ResultTp, b: &ResultTp) -> Result<ResultTp> {
    if a == b {
        return Ok(a.clone());
    }
    let conflict = || {
        SemanticError::schema(format!(
            "{t} inherits conflicting definitions of `{k}`"
        ))
    };
    if a.mode != b.mode {
        return Err(conflict());
    }
    match (&a.tp, &b.tp) {
        (
            Tp::NamedNominalLink {
                name: n1,
                linkprop: l1,
            },
            Tp::NamedNominalLink {
                name: n2,
                linkprop: l2,
            },
        ) if n1 == n2 => {
            let mut linkprop = l1.clone();
            for (lk, lt) in &l2.0 {
                let merged = match linkprop.get(lk) {
                    Some(prev) => merge_field(t, lk, prev, lt)?,
                    None => lt.clone(),
                };
                linkprop.0.insert(lk.clone(), merged);
            }
            Ok(ResultTp::new(
                Tp::NamedNominalLink {
                    name: n1.clone(),
                    linkprop,
                },
                a.mode,
            ))
        }
        _ => Err(conflict()),
    }
}

/// A subtype's own declaration wins, keeping the base's link properties it
/// does not redeclare.
fn override_field(base: &ResultTp, own: &ResultTp) -> ResultTp {
    match (&base.tp, &own.tp) {
        (
            Tp::NamedNominalLink { linkprop: lb, .. },
            Tp::NamedNominalLink { name, linkprop: lo },
        ) => {
            let mut linkprop = lb.clone();
            for (k, v) in &lo.0 {
                linkprop.0.insert(k.clone(), v.clone());
            }
            ResultTp::new(
                Tp::NamedNominalLink {
                    name: name.clone(),
                    linkprop,
                },
                own.mode,
            )
        }
        _ => own.clone(),
    }
}
