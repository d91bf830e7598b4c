//! Nominal subtype relation and the structural subtyping walk over types.

use indexmap::IndexSet;

use eql_ir::{CMMode, Cardinal, ObjectTp, QualifiedName, Tp};

use crate::error::SemanticError;
use crate::resolve::resolve_type_name;
use crate::schema::DBSchema;

/// Resolves the declared bases of every type in `module` and records them in
/// the checked relation.
pub fn resolve_subtyping(schema: &mut DBSchema, module: &[String]) -> Result<(), SemanticError> {
    let pending: Vec<QualifiedName> = schema
        .unchecked_subtyping
        .keys()
        .filter(|k| k.module() == module)
        .cloned()
        .collect();
    for name in pending {
        let Some(raw) = schema.unchecked_subtyping.get(&name) else {
            continue;
        };
        let bases = raw
            .iter()
            .map(|b| resolve_type_name(schema, module, b))
            .collect::<Result<Vec<_>, _>>()?;
        schema.unchecked_subtyping.shift_remove(&name);
        schema.subtyping.insert(name, bases);
    }
    Ok(())
}

/// Every strict supertype of `name`, nearest first.
pub fn ancestors(schema: &DBSchema, name: &QualifiedName) -> Vec<QualifiedName> {
    let mut seen: IndexSet<QualifiedName> = IndexSet::new();
    let mut frontier = vec![name.clone()];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for n in &frontier {
            for base in schema.subtyping.get(n).into_iter().flatten() {
                if base != name && seen.insert(base.clone()) {
                    next.push(base.clone());
                }
            }
        }
        frontier = next;
    }
    seen.into_iter().collect()
}

/// Every strict subtype of `name`.
pub fn descendants(schema: &DBSchema, name: &QualifiedName) -> Vec<QualifiedName> {
    let mut seen: IndexSet<QualifiedName> = IndexSet::new();
    let mut frontier = vec![name.clone()];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for n in &frontier {
            for (child, bases) in &schema.subtyping {
                if bases.contains(n) && child != name && seen.insert(child.clone()) {
                    next.push(child.clone());
                }
            }
        }
        frontier = next;
    }
    seen.into_iter().collect()
}

pub fn is_nominal_subtype(schema: &DBSchema, sub: &QualifiedName, sup: &QualifiedName) -> bool {
    sub == sup || ancestors(schema, sub).contains(sup)
}

/// `name` and its subtypes, minus the abstract ones.
pub fn concrete_subtypes(schema: &DBSchema, name: &QualifiedName) -> Vec<QualifiedName> {
    std::iter::once(name.clone())
        .chain(descendants(schema, name))
        .filter(|n| schema.type_def(n).is_some_and(|t| !t.is_abstract))
        .collect()
}

pub fn is_cardinal_subtype(sub: CMMode, sup: CMMode) -> bool {
    sub.is_subcard_of(sup)
}

pub fn is_subtype(schema: &DBSchema, sub: &Tp, sup: &Tp) -> bool {
    let mut inst = Vec::new();
    type_subtyping_walk(schema, &mut inst, sub, sup)
}

/// Structural subtyping with nominal leaves. Every `Existential(i)` met on
/// the right records the type it was matched against in `inst`.
pub fn type_subtyping_walk(
    schema: &DBSchema,
    inst: &mut Vec<(usize, Tp)>,
    sub: &Tp,
    sup: &Tp,
) -> bool {
    if let Tp::Existential(i) = sup {
        inst.push((*i, sub.clone()));
        return true;
    }
    if sub == sup || matches!(sup, Tp::Any(_)) {
        return true;
    }
    match (sub, sup) {
        (Tp::Union(l, r), _) => {
            type_subtyping_walk(schema, inst, l, sup) && type_subtyping_walk(schema, inst, r, sup)
        }
        (_, Tp::Union(l, r)) => {
            either(inst, |inst| type_subtyping_walk(schema, inst, sub, l), |inst| {
                type_subtyping_walk(schema, inst, sub, r)
            })
        }
        (Tp::Intersect(l, r), _) => {
            either(inst, |inst| type_subtyping_walk(schema, inst, l, sup), |inst| {
                type_subtyping_walk(schema, inst, r, sup)
            })
        }
        (_, Tp::Intersect(l, r)) => {
            type_subtyping_walk(schema, inst, sub, l) && type_subtyping_walk(schema, inst, sub, r)
        }
        (Tp::Computable { tp, .. } | Tp::Default { tp, .. }, _) => {
            type_subtyping_walk(schema, inst, tp, sup)
        }
        (_, Tp::Computable { tp, .. } | Tp::Default { tp, .. }) => {
            type_subtyping_walk(schema, inst, sub, tp)
        }
        (Tp::Scalar(a), Tp::Scalar(b)) => is_nominal_subtype(schema, a, b),
        (
            Tp::NamedNominalLink { .. } | Tp::NominalLink { .. },
            Tp::NamedNominalLink { .. } | Tp::NominalLink { .. },
        ) => {
            let (Some(a), Some(b)) = (sub.link_name(), sup.link_name()) else {
                return false;
            };
            let empty = ObjectTp::empty();
            is_nominal_subtype(schema, &a, &b)
                && link_props_subtype(
                    schema,
                    inst,
                    sub.link_props().unwrap_or(&empty),
                    sup.link_props().unwrap_or(&empty),
                )
        }
        (Tp::Object(a), Tp::Object(b)) => {
            a.0.len() == b.0.len()
                && b.0.iter().all(|(k, want)| {
                    a.get(k).is_some_and(|have| {
                        is_cardinal_subtype(have.mode, want.mode)
                            && type_subtyping_walk(schema, inst, &have.tp, &want.tp)
                    })
                })
        }
        (
            Tp::Composite {
                kind: k1,
                tps: t1,
                labels: l1,
            },
            Tp::Composite {
                kind: k2,
                tps: t2,
                labels: l2,
            },
        ) => {
            k1 == k2
                && t1.len() == t2.len()
                && (l2.is_empty() || l1 == l2)
                && t1
                    .iter()
                    .zip(t2)
                    .all(|(a, b)| type_subtyping_walk(schema, inst, a, b))
        }
        _ => false,
    }
}

/// Link properties subtype by width: every property the supertype names
/// must be present with a compatible type, unless it is optional.
fn link_props_subtype(
    schema: &DBSchema,
    inst: &mut Vec<(usize, Tp)>,
    sub: &ObjectTp,
    sup: &ObjectTp,
) -> bool {
    sup.0.iter().all(|(k, want)| match sub.get(k) {
        Some(have) => {
            is_cardinal_subtype(have.mode, want.mode)
                && type_subtyping_walk(schema, inst, &have.tp, &want.tp)
        }
        None => want.mode.lower == Cardinal::Zero,
    })
}

/// Tries `first`, then `second`, discarding instantiations recorded by a
/// failed attempt.
fn either(
    inst: &mut Vec<(usize, Tp)>,
    first: impl FnOnce(&mut Vec<(usize, Tp)>) -> bool,
    second: impl FnOnce(&mut Vec<(usize, Tp)>) -> bool,
) -> bool {
    let mark = inst.len();
    if first(inst) {
        return true;
    }
    inst.truncate(mark);
    if second(inst) {
        return true;
    }
    inst.truncate(mark);
    false
}
