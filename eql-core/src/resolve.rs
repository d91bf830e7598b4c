use eql_ir::{ObjectTp, QualifiedName, RawName, ResultTp, Tp};

use crate::error::SemanticError;
use crate::schema::{DBSchema, ModuleEntity, TypeBody};

/// Modules searched after the current one when resolving a bare name.
pub const DEFAULT_OPEN_SCOPES: &[&str] = &["std"];

/// Looks `name` up in `module`, then in each default open scope.
pub fn try_resolve_simple_name(
    schema: &DBSchema,
    module: &[String],
    name: &str,
) -> Option<QualifiedName> {
    let here = QualifiedName::in_module(module, name);
    if schema.lookup(&here).is_some() {
        return Some(here);
    }
    DEFAULT_OPEN_SCOPES
        .iter()
        .map(|scope| QualifiedName::new([*scope, name]))
        .find(|q| schema.lookup(q).is_some())
}

pub fn resolve_raw_name(
    schema: &DBSchema,
    module: &[String],
    name: &RawName,
) -> Result<QualifiedName, SemanticError> {
    let found = match name {
        RawName::Qualified(q) => schema.lookup(q).map(|_| q.clone()),
        RawName::Unqualified(n) => try_resolve_simple_name(schema, module, n),
    };
    found.ok_or_else(|| SemanticError::resolve(format!("unknown name `{name}`")))
}

pub fn resolve_type_name(
    schema: &DBSchema,
    module: &[String],
    name: &RawName,
) -> Result<QualifiedName, SemanticError> {
    let q = resolve_raw_name(schema, module, name)?;
    match schema.lookup(&q) {
        Some(ModuleEntity::TypeDef(_)) => Ok(q),
        _ => Err(SemanticError::resolve(format!("`{name}` is not a type"))),
    }
}

pub fn resolve_func_name(
    schema: &DBSchema,
    module: &[String],
    name: &RawName,
) -> Result<QualifiedName, SemanticError> {
    let q = resolve_raw_name(schema, module, name)
        .map_err(|_| SemanticError::resolve(format!("unknown function `{name}`")))?;
    match schema.lookup(&q) {
        Some(ModuleEntity::FuncDefs(_)) => Ok(q),
        _ => Err(SemanticError::resolve(format!("`{name}` is not a function"))),
    }
}

/// Replaces every unresolved type name inside `tp` with the scalar or link
/// type it denotes. Computed field bodies are left for the type checker.
pub fn resolve_tp(schema: &DBSchema, module: &[String], tp: &Tp) -> Result<Tp, SemanticError> {
    Ok(match tp {
        Tp::UncheckedName(raw) => {
            let q = resolve_type_name(schema, module, raw)?;
            match schema.type_def(&q).map(|t| &t.body) {
                Some(TypeBody::Scalar) => Tp::Scalar(q),
                _ => Tp::named_link(q),
            }
        }
        Tp::NamedNominalLink { name, linkprop } => {
            let q = resolve_type_name(schema, module, name)?;
            if !schema.is_object_type(&q) {
                return Err(SemanticError::type_error(format!(
                    "link target {q} is not an object type"
                )));
            }
            Tp::NamedNominalLink {
                name: RawName::Qualified(q),
                linkprop: resolve_object_tp(schema, module, linkprop)?,
            }
        }
        Tp::NominalLink {
            subject,
            name,
            linkprop,
        } => Tp::NominalLink {
            subject: resolve_object_tp(schema, module, subject)?,
            name: name.clone(),
            linkprop: resolve_object_tp(schema, module, linkprop)?,
        },
        Tp::Object(o) => Tp::Object(resolve_object_tp(schema, module, o)?),
        Tp::Composite { kind, tps, labels } => Tp::Composite {
            kind: *kind,
            tps: tps
                .iter()
                .map(|t| resolve_tp(schema, module, t))
                .collect::<Result<_, _>>()?,
            labels: labels.clone(),
        },
        Tp::Union(a, b) => Tp::Union(
            Box::new(resolve_tp(schema, module, a)?),
            Box::new(resolve_tp(schema, module, b)?),
        ),
        Tp::Intersect(a, b) => Tp::Intersect(
            Box::new(resolve_tp(schema, module, a)?),
            Box::new(resolve_tp(schema, module, b)?),
        ),
        Tp::Default { expr, tp } => Tp::Default {
            expr: expr.clone(),
            tp: Box::new(resolve_tp(schema, module, tp)?),
        },
        Tp::Computable { expr, tp } => Tp::Computable {
            expr: expr.clone(),
            tp: Box::new(resolve_tp(schema, module, tp)?),
        },
        Tp::OverloadedTarget { linkprop } => Tp::OverloadedTarget {
            linkprop: linkprop
                .as_ref()
                .map(|lp| resolve_object_tp(schema, module, lp))
                .transpose()?,
        },
        Tp::Scalar(_) | Tp::UncheckedComputable(_) | Tp::Any(_) | Tp::Existential(_) => tp.clone(),
    })
}

pub fn resolve_object_tp(schema: &DBSchema, module: &[String], o: &ObjectTp) -> Result<ObjectTp, SemanticError> {
    o.0.iter()
        .map(|(k, rt)| Ok((k.clone(), ResultTp::new(resolve_tp(schema, module, &rt.tp)?, rt.mode))))
        .collect::<Result<_, SemanticError>>()
        .map(ObjectTp)
}
