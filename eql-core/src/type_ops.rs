use eql_ir::{
    CMMode, CompositeKind, Label, ObjectTp, RawName, ResultTp, Tp, map_tp,
};

use crate::error::SemanticError;
use crate::schema::DBSchema;

/// Operands of a (possibly nested) union, left to right.
pub fn union_members(tp: &Tp) -> Vec<&Tp> {
    match tp {
        Tp::Union(l, r) => {
            let mut out = union_members(l);
            out.extend(union_members(r));
            out
        }
        other => vec![other],
    }
}

/// Union without duplicate operands.
pub fn union(a: Tp, b: Tp) -> Tp {
    let mut members: Vec<Tp> = Vec::new();
    for m in union_members(&a).into_iter().chain(union_members(&b)) {
        if !members.contains(m) {
            members.push(m.clone());
        }
    }
    build_union(members).unwrap_or(a)
}

pub fn union_all(tps: impl IntoIterator<Item = Tp>) -> Option<Tp> {
    tps.into_iter().reduce(union)
}

fn build_union(members: Vec<Tp>) -> Option<Tp> {
    members
        .into_iter()
        .reduce(|acc, t| Tp::Union(Box::new(acc), Box::new(t)))
}

pub fn intersect(a: Tp, b: Tp) -> Tp {
    if a == b {
        a
    } else {
        Tp::Intersect(Box::new(a), Box::new(b))
    }
}

/// Loosest bounds covering both modes, used where one of two branches runs.
pub fn mode_join(a: CMMode, b: CMMode) -> CMMode {
    CMMode::new(a.lower.min(b.lower), a.upper.max(b.upper))
}

/// Drops link-property detail from every nominal link inside `tp`.
pub fn strip_link_props(tp: &Tp) -> Tp {
    map_tp(
        &mut |t| match t {
            Tp::NamedNominalLink { name, .. } => Some(Tp::NamedNominalLink {
                name: name.clone(),
                linkprop: ObjectTp::empty(),
            }),
            Tp::NominalLink { name, .. } => Some(Tp::NamedNominalLink {
                name: RawName::Qualified(name.clone()),
                linkprop: ObjectTp::empty(),
            }),
            _ => None,
        },
        tp,
    )
}

/// Field type and cardinality of `label` on one value of type `tp`. The
/// caller multiplies in the subject's cardinality.
pub fn tp_project(schema: &DBSchema, tp: &Tp, label: &Label) -> Result<ResultTp, SemanticError> {
    match (tp, label) {
        (Tp::NamedNominalLink { .. } | Tp::NominalLink { .. }, Label::Str(l)) => {
            if let Tp::NominalLink { subject, .. } = tp {
                if let Some(rt) = subject.get(l) {
                    return Ok(rt.clone());
                }
            }
            if l == "id" {
                return Ok(ResultTp::one(Tp::uuid_tp()));
            }
            let name = tp.link_name().ok_or_else(|| {
                SemanticError::internal(format!("unresolved link type {tp}"))
            })?;
            let fields = schema.object_fields(&name).ok_or_else(|| {
                SemanticError::type_error(format!("{name} is not an object type"))
            })?;
            fields.get(l).cloned().ok_or_else(|| {
                SemanticError::type_error(format!("object type {name} has no field `{l}`"))
            })
        }
        (Tp::NamedNominalLink { .. } | Tp::NominalLink { .. }, Label::LinkProp(l)) => tp
            .link_props()
            .and_then(|lp| lp.get(l))
            .cloned()
            .ok_or_else(|| SemanticError::type_error(format!("{tp} has no link property `@{l}`"))),
        (Tp::Union(a, b), _) => {
            let x = tp_project(schema, a, label)?;
            let y = tp_project(schema, b, label)?;
            if matches!(x.tp, Tp::Computable { .. }) || matches!(y.tp, Tp::Computable { .. }) {
                return Err(SemanticError::type_error(format!(
                    "computed field `{label}` cannot be projected from a union type"
                )));
            }
            Ok(ResultTp::new(union(x.tp, y.tp), mode_join(x.mode, y.mode)))
        }
        (Tp::Intersect(a, b), _) => {
            tp_project(schema, a, label).or_else(|_| tp_project(schema, b, label))
        }
        (
            Tp::Composite {
                kind: CompositeKind::Tuple,
                tps,
                labels,
            },
            Label::Str(l),
        ) => tuple_index(tps, labels, l)
            .map(|i| ResultTp::one(tps[i].clone()))
            .ok_or_else(|| SemanticError::type_error(format!("tuple {tp} has no element `{l}`"))),
        _ => Err(SemanticError::type_error(format!(
            "cannot project `{label}` from a value of type {tp}"
        ))),
    }
}

/// Position of a tuple element named either by label or by index.
pub fn tuple_index(tps: &[Tp], labels: &[String], l: &str) -> Option<usize> {
    if let Some(i) = labels.iter().position(|x| x == l) {
        return Some(i);
    }
    l.parse::<usize>().ok().filter(|i| *i < tps.len())
}

pub fn is_tuple(tp: &Tp) -> bool {
    matches!(
        tp,
        Tp::Composite {
            kind: CompositeKind::Tuple,
            ..
        }
    )
}

/// Right-biased merge of two field maps.
pub fn merge_object_tps(base: &ObjectTp, over: &ObjectTp) -> ObjectTp {
    let mut out = base.clone();
    for (k, v) in &over.0 {
        out.0.insert(k.clone(), v.clone());
    }
    out
}

/// Type of a shaped value: the subject's type with the shape's fields and
/// link properties layered on top.
pub fn combine_with_shape(tp: &Tp, fields: &ObjectTp, linkprops: &ObjectTp) -> Result<Tp, SemanticError> {
    match tp {
        Tp::NamedNominalLink {
            name: RawName::Qualified(name),
            linkprop,
        } => Ok(Tp::NominalLink {
            subject: fields.clone(),
            name: name.clone(),
            linkprop: merge_object_tps(linkprop, linkprops),
        }),
        Tp::NominalLink {
            subject,
            name,
            linkprop,
        } => Ok(Tp::NominalLink {
            subject: merge_object_tps(subject, fields),
            name: name.clone(),
            linkprop: merge_object_tps(linkprop, linkprops),
        }),
        Tp::Union(a, b) => Ok(Tp::Union(
            Box::new(combine_with_shape(a, fields, linkprops)?),
            Box::new(combine_with_shape(b, fields, linkprops)?),
        )),
        Tp::Intersect(a, b) => Ok(Tp::Intersect(
            Box::new(combine_with_shape(a, fields, linkprops)?),
            Box::new(combine_with_shape(b, fields, linkprops)?),
        )),
        other => Err(SemanticError::type_error(format!(
            "shapes apply to object types, not {other}"
        ))),
    }
}

/// Product of cardinalities, `One` for an empty list.
pub fn mode_product(modes: impl IntoIterator<Item = CMMode>) -> CMMode {
    modes.into_iter().fold(CMMode::ONE, |acc, m| acc * m)
}

pub fn mode_sum(modes: impl IntoIterator<Item = CMMode>) -> Option<CMMode> {
    modes.into_iter().reduce(|acc, m| acc + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::QualifiedName;

    #[test]
    fn union_drops_duplicate_members() {
        let u = union(Tp::int_tp(), union(Tp::str_tp(), Tp::int_tp()));
        assert_eq!(union_members(&u).len(), 2);
        assert_eq!(union(Tp::int_tp(), Tp::int_tp()), Tp::int_tp());
    }

    #[test]
    fn stripping_turns_nominal_links_into_named_ones() {
        let mut lp = ObjectTp::empty();
        lp.0.insert("since".into(), ResultTp::one(Tp::int_tp()));
        let t = Tp::NominalLink {
            subject: ObjectTp::empty(),
            name: QualifiedName::new(["default", "Person"]),
            linkprop: lp,
        };
        assert_eq!(
            strip_link_props(&Tp::arr(t)),
            Tp::arr(Tp::named_link(QualifiedName::new(["default", "Person"])))
        );
    }

    #[test]
    fn tuple_elements_project_by_name_or_position() {
        let t = Tp::named_tuple(vec![("a".into(), Tp::int_tp()), ("b".into(), Tp::str_tp())]);
        let schema = DBSchema::new();
        assert_eq!(tp_project(&schema, &t, &Label::Str("b".into())).unwrap().tp, Tp::str_tp());
        assert_eq!(tp_project(&schema, &t, &Label::Str("0".into())).unwrap().tp, Tp::int_tp());
        assert!(tp_project(&schema, &t, &Label::Str("2".into())).is_err());
    }
}
