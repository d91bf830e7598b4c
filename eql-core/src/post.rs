//! Rewrites applied to checked IR before evaluation.

use tracing::trace;

use eql_ir::{
    BindingExpr, Expr, QualifiedName, RawName, SelectFilter, appears_in_expr, map_expr, map_shape,
};

/// Pushes equality filters down to storage, then marks object projections
/// for deduplication.
pub fn post_process(e: &Expr) -> Expr {
    insert_dedup(&push_filters(e))
}

fn is_std(fun: &RawName, name: &str) -> bool {
    matches!(fun, RawName::Qualified(q) if q.is("std", name))
}

/// Storage predicate implied by `filter`. Parts that cannot be expressed
/// become `True`, so the predicate only narrows the candidate rows; the
/// filter itself still runs on every row.
fn storage_filter(filter: &BindingExpr) -> SelectFilter<Expr> {
    let row = Expr::BoundVar(filter.var.clone());
    convert(&row, &filter.body).unwrap_or(SelectFilter::True)
}

fn convert(row: &Expr, e: &Expr) -> Option<SelectFilter<Expr>> {
    let Expr::FunApp { fun, args, .. } = e else {
        return None;
    };
    match args.as_slice() {
        [l, r] if is_std(fun, "=") => eq_filter(row, l, r).or_else(|| eq_filter(row, r, l)),
        [l, r] if is_std(fun, "and") => {
            let parts: Vec<_> = [l, r]
                .into_iter()
                .filter_map(|a| convert(row, a))
                .collect();
            match parts.len() {
                0 => None,
                _ => Some(SelectFilter::Conjunctive(parts)),
            }
        }
        [l, r] if is_std(fun, "or") => Some(SelectFilter::Disjunctive(vec![
            convert(row, l)?,
            convert(row, r)?,
        ])),
        _ => None,
    }
}

fn eq_filter(row: &Expr, field: &Expr, arg: &Expr) -> Option<SelectFilter<Expr>> {
    let Expr::ObjectProj { subject, label } = field else {
        return None;
    };
    if **subject != *row || appears_in_expr(row, arg) {
        return None;
    }
    Some(SelectFilter::Eq {
        propname: label.clone(),
        arg: arg.clone(),
    })
}

/// Attaches `filter` to every type scan in `subject`.
fn attach(subject: &Expr, filter: &SelectFilter<Expr>) -> Option<Expr> {
    let scan = |name: &QualifiedName| Expr::QualifiedNameWithFilter {
        name: name.clone(),
        filter: Box::new(filter.clone()),
    };
    match subject {
        Expr::QualifiedName(q) => Some(scan(q)),
        Expr::MultiSet(items) if !items.is_empty() => items
            .iter()
            .map(|i| match i {
                Expr::QualifiedName(q) => Some(scan(q)),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Expr::MultiSet),
        Expr::Shaped { expr, shape } => Some(Expr::shaped(attach(expr, filter)?, shape.clone())),
        _ => None,
    }
}

fn filter_rewrite(e: &Expr) -> Option<Expr> {
    let Expr::FilterOrder {
        subject,
        filter,
        order,
    } = e
    else {
        return None;
    };
    let sf = storage_filter(filter);
    if sf == SelectFilter::True {
        return None;
    }
    let scanned = attach(subject, &sf)?;
    trace!(filter = %filter.body, "pushing filter down to storage");
    Some(Expr::filter_order(
        push_filters(&scanned),
        map_binding_body(filter, push_filters),
        order
            .iter()
            .map(|k| eql_ir::OrderKey {
                key: map_binding_body(&k.key, push_filters),
                ..k.clone()
            })
            .collect(),
    ))
}

fn map_binding_body(b: &BindingExpr, f: impl Fn(&Expr) -> Expr) -> BindingExpr {
    BindingExpr::new(b.var.clone(), f(&b.body))
}

pub fn push_filters(e: &Expr) -> Expr {
    map_expr(&mut filter_rewrite, e)
}

/// Projections that reach objects wrap their result in `ConditionalDedup`.
/// A shape applied directly to the projection goes inside the marker, so
/// link properties it exposes can keep two links to one object apart.
fn dedup_rewrite(e: &Expr) -> Option<Expr> {
    let marked = |inner: Expr| Some(Expr::ConditionalDedup(Box::new(inner)));
    match e {
        Expr::ObjectProj { .. } | Expr::BackLink { .. } => marked(project_children(e)),
        Expr::Shaped { expr, shape }
            if matches!(expr.as_ref(), Expr::ObjectProj { .. } | Expr::BackLink { .. }) =>
        {
            marked(Expr::shaped(
                project_children(expr),
                map_shape(&mut dedup_rewrite, shape),
            ))
        }
        _ => None,
    }
}

fn project_children(e: &Expr) -> Expr {
    match e {
        Expr::ObjectProj { subject, label } => Expr::ObjectProj {
            subject: Box::new(insert_dedup(subject)),
            label: label.clone(),
        },
        Expr::BackLink { subject, label } => Expr::BackLink {
            subject: Box::new(insert_dedup(subject)),
            label: label.clone(),
        },
        other => insert_dedup(other),
    }
}

pub fn insert_dedup(e: &Expr) -> Expr {
    map_expr(&mut dedup_rewrite, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::{QualifiedName, ShapeExpr};

    fn std_eq(l: Expr, r: Expr) -> Expr {
        Expr::std_app("=", vec![l, r])
    }

    fn user() -> Expr {
        Expr::QualifiedName(QualifiedName::new(["default", "User"]))
    }

    #[test]
    fn equality_filters_reach_the_type_scan() {
        let row = Expr::BoundVar("x".into());
        let e = Expr::filter_order(
            user(),
            BindingExpr::new("x", std_eq(Expr::proj(row, "email"), Expr::str("a@b"))),
            Vec::new(),
        );
        let Expr::FilterOrder { subject, .. } = push_filters(&e) else {
            panic!("filter was dropped");
        };
        assert_eq!(
            *subject,
            Expr::QualifiedNameWithFilter {
                name: QualifiedName::new(["default", "User"]),
                filter: Box::new(SelectFilter::Eq {
                    propname: "email".into(),
                    arg: Expr::str("a@b"),
                }),
            }
        );
    }

    #[test]
    fn filters_reading_the_row_on_both_sides_stay_put() {
        let row = Expr::BoundVar("x".into());
        let e = Expr::filter_order(
            user(),
            BindingExpr::new(
                "x",
                std_eq(Expr::proj(row.clone(), "a"), Expr::proj(row, "b")),
            ),
            Vec::new(),
        );
        assert_eq!(push_filters(&e), e);
    }

    #[test]
    fn shaped_link_projections_dedup_outside_the_shape() {
        let proj = Expr::proj(Expr::BoundVar("a".into()), "bs");
        let e = Expr::shaped(proj.clone(), ShapeExpr::empty());
        let out = insert_dedup(&e);
        assert_eq!(
            out,
            Expr::ConditionalDedup(Box::new(Expr::shaped(proj, ShapeExpr::empty())))
        );
    }
}
