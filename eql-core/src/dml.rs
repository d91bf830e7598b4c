//! Checking of INSERT and UPDATE, including default-value ordering.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use eql_ir::{
    CMMode, Cardinal, Expr, Label, RawName, ResultTp, ShapeExpr, Tp, abstract_over_expr,
    appears_in_expr, instantiate_expr, map_expr, walk_expr,
};

use crate::error::SemanticError;
use crate::resolve::resolve_type_name;
use crate::sema::{TcCtx, check_binding, check_type};
use crate::type_ops::tp_project;

type Result<T> = std::result::Result<T, SemanticError>;

/// Declared type of a stored field, or an error for computed ones.
fn stored_field_tp<'t>(label: &str, field: &'t ResultTp) -> Result<&'t Tp> {
    match &field.tp {
        Tp::Computable { .. } | Tp::UncheckedComputable(_) => Err(SemanticError::type_error(
            format!("cannot assign to computed field `{label}`"),
        )),
        Tp::Default { tp, .. } => Ok(tp),
        tp => Ok(tp),
    }
}

/// Checks `INSERT name { new }`. Fields left out take their default, whose
/// expression may read other fields of the new object; defaults are
/// evaluated in dependency order, each bound once with `With`.
pub fn check_insert(
    ctx: &TcCtx<'_>,
    name: &RawName,
    new: &IndexMap<String, Expr>,
) -> Result<(ResultTp, Expr)> {
    let qn = resolve_type_name(ctx.schema, &ctx.module, name)?;
    let td = ctx
        .schema
        .type_def(&qn)
        .ok_or_else(|| SemanticError::resolve(format!("unknown type {qn}")))?;
    let fields = td
        .object()
        .ok_or_else(|| SemanticError::type_error(format!("cannot insert scalar type {qn}")))?;
    if td.is_abstract {
        return Err(SemanticError::type_error(format!(
            "cannot insert abstract type {qn}"
        )));
    }

    let mut supplied: IndexMap<String, Expr> = IndexMap::new();
    for (label, value) in new {
        if label == "id" {
            return Err(SemanticError::type_error("`id` is assigned by the database"));
        }
        let field = fields.get(label).ok_or_else(|| {
            SemanticError::type_error(format!("object type {qn} has no field `{label}`"))
        })?;
        let tp = stored_field_tp(label, field)?;
        let value = check_type(ctx, value, &ResultTp::new(tp.clone(), field.mode), true)?;
        supplied.insert(label.clone(), value);
    }

    let mut defaults = IndexMap::new();
    for (label, field) in &fields.0 {
        if supplied.contains_key(label) {
            continue;
        }
        match &field.tp {
            Tp::Default { expr, tp } => {
                defaults.insert(label.clone(), (expr.as_ref().clone(), tp.as_ref().clone(), field.mode));
            }
            Tp::Computable { .. } | Tp::UncheckedComputable(_) => {}
            _ if field.mode.lower == Cardinal::One => {
                return Err(SemanticError::type_error(format!(
                    "missing value for required field `{label}` of {qn}"
                )));
            }
            _ => {}
        }
    }

    let result_tp = ResultTp::one(Tp::named_link(qn.clone()));
    if defaults.is_empty() {
        return Ok((
            result_tp,
            Expr::Insert {
                name: RawName::Qualified(qn),
                new: supplied,
            },
        ));
    }

    // Each default body reads fields of the new object through its binder.
    let mut opened: IndexMap<String, OpenedDefault> = IndexMap::new();
    for (label, (b, tp, mode)) in defaults {
        let row = ctx.names.fresh("new");
        let body = instantiate_expr(ctx.names, &Expr::free(&row), &b);
        let deps = read_fields(&body, &row);
        opened.insert(
            label,
            OpenedDefault {
                body,
                row,
                tp,
                mode,
                deps,
            },
        );
    }
    let order = default_order(&qn.to_string(), &opened)?;
    debug!(object_type = %qn, order = ?order, "ordered defaults");

    let mut vars: IndexMap<String, String> = IndexMap::new();
    let mut bindings: Vec<(String, Expr)> = Vec::new();
    let mut inner = ctx.clone();
    for (label, value) in supplied {
        let var = ctx.names.fresh(&label);
        let field = fields
            .get(&label)
            .ok_or_else(|| SemanticError::internal(format!("field `{label}` vanished")))?;
        let tp = stored_field_tp(&label, field)?.clone();
        inner = inner.with_var(&var, ResultTp::new(tp, field.mode));
        vars.insert(label, var.clone());
        bindings.push((var, value));
    }
    for label in order {
        let Some(d) = opened.shift_remove(&label) else {
            continue;
        };
        let body = substitute_fields(&d.body, &d.row, &vars, fields.0.keys());
        if appears_in_expr(&Expr::free(&d.row), &body) {
            return Err(SemanticError::type_error(format!(
                "default of {qn}.{label} may only read stored fields of the new object"
            )));
        }
        let value = check_type(&inner, &body, &ResultTp::new(d.tp.clone(), d.mode), true)?;
        let var = ctx.names.fresh(&label);
        inner = inner.with_var(&var, ResultTp::new(d.tp, d.mode));
        vars.insert(label, var.clone());
        bindings.push((var, value));
    }

    let insert = Expr::Insert {
        name: RawName::Qualified(qn),
        new: vars
            .iter()
            .map(|(label, var)| (label.clone(), Expr::free(var)))
            .collect(),
    };
    let expr = bindings.into_iter().rev().fold(insert, |next, (var, value)| {
        Expr::with(value, abstract_over_expr(ctx.names, &next, &var))
    });
    Ok((result_tp, expr))
}

/// A default body opened over a fresh variable standing for the new object.
struct OpenedDefault {
    body: Expr,
    row: String,
    tp: Tp,
    mode: CMMode,
    deps: IndexSet<String>,
}

/// Labels `l` for which `row.l` occurs in `body`.
fn read_fields(body: &Expr, row: &str) -> IndexSet<String> {
    let mut out = IndexSet::new();
    walk_expr(
        &mut |e| {
            if let Expr::ObjectProj { subject, label } = e {
                if matches!(subject.as_ref(), Expr::FreeVar(v) if v == row) {
                    out.insert(label.clone());
                }
            }
            false
        },
        body,
    );
    out
}

/// Replaces `row.l` with the variable bound to `l`, or with the empty set
/// when the new object has no value for the stored field `l`.
fn substitute_fields<'a>(
    body: &Expr,
    row: &str,
    vars: &IndexMap<String, String>,
    labels: impl Iterator<Item = &'a String>,
) -> Expr {
    let stored: IndexSet<&String> = labels.collect();
    map_expr(
        &mut |e: &Expr| match e {
            Expr::ObjectProj { subject, label }
                if matches!(subject.as_ref(), Expr::FreeVar(v) if v == row) =>
            {
                match vars.get(label) {
                    Some(var) => Some(Expr::free(var)),
                    None if stored.contains(label) => Some(Expr::empty_set()),
                    None => None,
                }
            }
            _ => None,
        },
        body,
    )
}

/// Orders defaults so that each comes after the defaults it reads.
fn default_order(type_name: &str, opened: &IndexMap<String, OpenedDefault>) -> Result<Vec<String>> {
    let mut pending: Vec<&String> = opened.keys().collect();
    let mut order: Vec<String> = Vec::new();
    while !pending.is_empty() {
        let (ready, blocked): (Vec<&String>, Vec<&String>) = pending.into_iter().partition(|label| {
            opened[label.as_str()]
                .deps
                .iter()
                .all(|dep| !opened.contains_key(dep) || order.contains(dep))
        });
        if ready.is_empty() {
            let cycle: Vec<&str> = blocked.iter().map(|s| s.as_str()).collect();
            return Err(SemanticError::type_error(format!(
                "circular dependencies among defaults of {type_name}: {}",
                cycle.join(", ")
            )));
        }
        order.extend(ready.into_iter().cloned());
        pending = blocked;
    }
    Ok(order)
}

/// Checks the shape of an UPDATE against the type of the updated objects.
pub fn check_update_shape(ctx: &TcCtx<'_>, shape: &ShapeExpr, subject_tp: &Tp) -> Result<ShapeExpr> {
    let mut out = ShapeExpr::empty();
    for (label, b) in &shape.0 {
        let Label::Str(name) = label else {
            return Err(SemanticError::type_error(format!(
                "cannot update link property `{label}` directly"
            )));
        };
        if name == "id" {
            return Err(SemanticError::type_error("`id` cannot be updated"));
        }
        let field = tp_project(ctx.schema, subject_tp, label)?;
        let tp = stored_field_tp(name, &field)?.clone();
        let b = check_binding(
            ctx,
            b,
            ResultTp::one(subject_tp.clone()),
            &ResultTp::new(tp, field.mode),
            true,
        )?;
        out.0.insert(label.clone(), b);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(deps: &[(&str, &[&str])]) -> IndexMap<String, OpenedDefault> {
        deps.iter()
            .map(|(l, ds)| {
                (
                    l.to_string(),
                    OpenedDefault {
                        body: Expr::empty_set(),
                        row: "new~0".into(),
                        tp: Tp::int_tp(),
                        mode: CMMode::ONE,
                        deps: ds.iter().map(|d| d.to_string()).collect(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn defaults_follow_their_dependencies() {
        let o = opened(&[("c", &["b"]), ("b", &["a"]), ("a", &["name"])]);
        assert_eq!(default_order("T", &o).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cyclic_defaults_are_rejected() {
        let o = opened(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let err = default_order("T", &o).unwrap_err();
        assert!(err.message().contains("circular dependencies"));
    }
}
