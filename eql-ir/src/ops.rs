#![forbid(unsafe_code)]

use std::cell::Cell;

use crate::expr::{BindingExpr, Expr, OrderKey, SelectFilter, ShapeExpr};
use crate::tp::{ObjectTp, ResultTp, Tp};

/// Fresh variable names for one compilation. Generated names contain `~`,
/// which the lexer never accepts in an identifier, so they cannot collide
/// with user-written names.
#[derive(Debug, Default)]
pub struct NameGen {
    next: Cell<u64>,
}

impl NameGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self, prefix: &str) -> String {
        let n = self.next.get() + 1;
        self.next.set(n);
        let stem = prefix.split('~').next().unwrap_or(prefix);
        format!("{stem}~{n}")
    }
}

/// A rewrite applied top-down by [`map_expr`]. Returning `Some` replaces the
/// node and stops the descent below it.
pub trait ExprRewrite {
    fn rewrite(&mut self, expr: &Expr) -> Option<Expr>;

    fn rewrite_binding(&mut self, _binding: &BindingExpr) -> Option<BindingExpr> {
        None
    }
}

impl<F> ExprRewrite for F
where
    F: FnMut(&Expr) -> Option<Expr>,
{
    fn rewrite(&mut self, expr: &Expr) -> Option<Expr> {
        self(expr)
    }
}

pub fn map_binding<R: ExprRewrite + ?Sized>(r: &mut R, b: &BindingExpr) -> BindingExpr {
    if let Some(done) = r.rewrite_binding(b) {
        return done;
    }
    BindingExpr {
        var: b.var.clone(),
        body: Box::new(map_expr(r, &b.body)),
    }
}

pub fn map_shape<R: ExprRewrite + ?Sized>(r: &mut R, s: &ShapeExpr) -> ShapeExpr {
    ShapeExpr(
        s.0.iter()
            .map(|(k, b)| (k.clone(), map_binding(r, b)))
            .collect(),
    )
}

fn map_order<R: ExprRewrite + ?Sized>(r: &mut R, order: &[OrderKey]) -> Vec<OrderKey> {
    order
        .iter()
        .map(|k| OrderKey {
            direction: k.direction,
            empty: k.empty,
            key: map_binding(r, &k.key),
        })
        .collect()
}

fn map_filter<R: ExprRewrite + ?Sized>(r: &mut R, f: &SelectFilter<Expr>) -> SelectFilter<Expr> {
    match f {
        SelectFilter::Eq { propname, arg } => SelectFilter::Eq {
            propname: propname.clone(),
            arg: map_expr(r, arg),
        },
        SelectFilter::Conjunctive(cs) => {
            SelectFilter::Conjunctive(cs.iter().map(|c| map_filter(r, c)).collect())
        }
        SelectFilter::Disjunctive(ds) => {
            SelectFilter::Disjunctive(ds.iter().map(|d| map_filter(r, d)).collect())
        }
        SelectFilter::True => SelectFilter::True,
    }
}

/// Rebuilds `expr` bottom-up after offering every node to `r` first.
/// Types embedded in expressions are left untouched.
pub fn map_expr<R: ExprRewrite + ?Sized>(r: &mut R, expr: &Expr) -> Expr {
    if let Some(done) = r.rewrite(expr) {
        return done;
    }
    let mut go = |e: &Expr| Box::new(map_expr(r, e));
    match expr {
        Expr::Val(_)
        | Expr::FreeVar(_)
        | Expr::BoundVar(_)
        | Expr::Parameter { .. }
        | Expr::QualifiedName(_)
        | Expr::FreeObject => expr.clone(),
        Expr::QualifiedNameWithFilter { name, filter } => Expr::QualifiedNameWithFilter {
            name: name.clone(),
            filter: Box::new(map_filter(r, filter)),
        },
        Expr::ObjectProj { subject, label } => Expr::ObjectProj {
            subject: go(subject),
            label: label.clone(),
        },
        Expr::TupleProj { subject, label } => Expr::TupleProj {
            subject: go(subject),
            label: label.clone(),
        },
        Expr::LinkPropProj { subject, linkprop } => Expr::LinkPropProj {
            subject: go(subject),
            linkprop: linkprop.clone(),
        },
        Expr::BackLink { subject, label } => Expr::BackLink {
            subject: go(subject),
            label: label.clone(),
        },
        Expr::IsTp { subject, tp } => Expr::IsTp {
            subject: go(subject),
            tp: tp.clone(),
        },
        Expr::TpIntersect { subject, tp } => Expr::TpIntersect {
            subject: go(subject),
            tp: tp.clone(),
        },
        Expr::FunApp {
            fun,
            overloading_index,
            args,
            kwargs,
        } => Expr::FunApp {
            fun: fun.clone(),
            overloading_index: *overloading_index,
            args: args.iter().map(|a| map_expr(r, a)).collect(),
            kwargs: kwargs
                .iter()
                .map(|(k, a)| (k.clone(), map_expr(r, a)))
                .collect(),
        },
        Expr::TypeCast { tp, arg } => Expr::TypeCast {
            tp: tp.clone(),
            arg: go(arg),
        },
        Expr::CheckedTypeCast {
            from,
            to,
            kind,
            arg,
        } => Expr::CheckedTypeCast {
            from: from.clone(),
            to: to.clone(),
            kind: *kind,
            arg: go(arg),
        },
        Expr::Union(l, rr) => {
            let l = go(l);
            Expr::Union(l, Box::new(map_expr(r, rr)))
        }
        Expr::MultiSet(es) => Expr::MultiSet(es.iter().map(|e| map_expr(r, e)).collect()),
        Expr::Shaped { expr, shape } => {
            let expr = go(expr);
            Expr::Shaped {
                expr,
                shape: map_shape(r, shape),
            }
        }
        Expr::FilterOrder {
            subject,
            filter,
            order,
        } => {
            let subject = go(subject);
            let filter = map_binding(r, filter);
            Expr::FilterOrder {
                subject,
                filter,
                order: map_order(r, order),
            }
        }
        Expr::OffsetLimit {
            subject,
            offset,
            limit,
        } => {
            let subject = go(subject);
            let offset = go(offset);
            Expr::OffsetLimit {
                subject,
                offset,
                limit: Box::new(map_expr(r, limit)),
            }
        }
        Expr::Insert { name, new } => Expr::Insert {
            name: name.clone(),
            new: new
                .iter()
                .map(|(k, e)| (k.clone(), map_expr(r, e)))
                .collect(),
        },
        Expr::Update { subject, shape } => {
            let subject = go(subject);
            Expr::Update {
                subject,
                shape: map_shape(r, shape),
            }
        }
        Expr::Delete { subject } => Expr::Delete {
            subject: go(subject),
        },
        Expr::With { bound, next } => {
            let bound = go(bound);
            Expr::With {
                bound,
                next: map_binding(r, next),
            }
        }
        Expr::For { bound, next } => {
            let bound = go(bound);
            Expr::For {
                bound,
                next: map_binding(r, next),
            }
        }
        Expr::OptionalFor { bound, next } => {
            let bound = go(bound);
            Expr::OptionalFor {
                bound,
                next: map_binding(r, next),
            }
        }
        Expr::Binding(b) => Expr::Binding(Box::new(map_binding(r, b))),
        Expr::Subquery(e) => Expr::Subquery(go(e)),
        Expr::Detached(e) => Expr::Detached(go(e)),
        Expr::IfElse {
            then_branch,
            condition,
            else_branch,
        } => {
            let then_branch = go(then_branch);
            let condition = go(condition);
            Expr::IfElse {
                then_branch,
                condition,
                else_branch: Box::new(map_expr(r, else_branch)),
            }
        }
        Expr::UnnamedTuple(es) => Expr::UnnamedTuple(es.iter().map(|e| map_expr(r, e)).collect()),
        Expr::NamedTuple(es) => Expr::NamedTuple(
            es.iter()
                .map(|(k, e)| (k.clone(), map_expr(r, e)))
                .collect(),
        ),
        Expr::Arr(es) => Expr::Arr(es.iter().map(|e| map_expr(r, e)).collect()),
        Expr::ConditionalDedup(e) => Expr::ConditionalDedup(go(e)),
    }
}

pub fn map_object_tp(f: &mut impl FnMut(&Tp) -> Option<Tp>, o: &ObjectTp) -> ObjectTp {
    ObjectTp(
        o.0.iter()
            .map(|(k, rt)| (k.clone(), ResultTp::new(map_tp(f, &rt.tp), rt.mode)))
            .collect(),
    )
}

/// Type counterpart of [`map_expr`]. Binder bodies of computed and default
/// fields are not entered.
pub fn map_tp(f: &mut impl FnMut(&Tp) -> Option<Tp>, tp: &Tp) -> Tp {
    if let Some(done) = f(tp) {
        return done;
    }
    match tp {
        Tp::Object(o) => Tp::Object(map_object_tp(f, o)),
        Tp::Composite { kind, tps, labels } => Tp::Composite {
            kind: *kind,
            tps: tps.iter().map(|t| map_tp(f, t)).collect(),
            labels: labels.clone(),
        },
        Tp::Union(l, r) => {
            let l = map_tp(f, l);
            Tp::Union(Box::new(l), Box::new(map_tp(f, r)))
        }
        Tp::Intersect(l, r) => {
            let l = map_tp(f, l);
            Tp::Intersect(Box::new(l), Box::new(map_tp(f, r)))
        }
        Tp::NamedNominalLink { name, linkprop } => Tp::NamedNominalLink {
            name: name.clone(),
            linkprop: map_object_tp(f, linkprop),
        },
        Tp::NominalLink {
            subject,
            name,
            linkprop,
        } => {
            let subject = map_object_tp(f, subject);
            Tp::NominalLink {
                subject,
                name: name.clone(),
                linkprop: map_object_tp(f, linkprop),
            }
        }
        Tp::Computable { expr, tp } => Tp::Computable {
            expr: expr.clone(),
            tp: Box::new(map_tp(f, tp)),
        },
        Tp::Default { expr, tp } => Tp::Default {
            expr: expr.clone(),
            tp: Box::new(map_tp(f, tp)),
        },
        Tp::OverloadedTarget { linkprop } => Tp::OverloadedTarget {
            linkprop: linkprop.as_ref().map(|lp| map_object_tp(f, lp)),
        },
        Tp::Scalar(_)
        | Tp::UncheckedName(_)
        | Tp::UncheckedComputable(_)
        | Tp::Any(_)
        | Tp::Existential(_) => tp.clone(),
    }
}

/// Visits every node without rebuilding. Returning `true` from `f` stops the
/// descent below that node.
pub fn walk_expr(f: &mut impl FnMut(&Expr) -> bool, expr: &Expr) {
    let mut hook = |e: &Expr| {
        if f(e) { Some(e.clone()) } else { None }
    };
    map_expr(&mut hook, expr);
}

/// Names of free variables in order of first occurrence.
pub fn get_free_vars(e: &Expr) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    walk_expr(
        &mut |e| {
            if let Expr::FreeVar(v) = e {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            false
        },
        e,
    );
    out
}

fn bound_var_names(e: &Expr) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    walk_expr(
        &mut |e| {
            if let Expr::BoundVar(v) = e {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            false
        },
        e,
    );
    out
}

pub fn appears_in_expr(search: &Expr, subject: &Expr) -> bool {
    let mut found = false;
    walk_expr(
        &mut |e| {
            if found || e == search {
                found = true;
            }
            found
        },
        subject,
    );
    found
}

/// Renames the binder if its variable is in `avoid`.
pub fn ensure_no_capture(names: &NameGen, avoid: &[String], b: &BindingExpr) -> BindingExpr {
    if !avoid.contains(&b.var) {
        return b.clone();
    }
    let mut candidate = names.fresh(&b.var);
    while avoid.contains(&candidate) {
        candidate = names.fresh(&b.var);
    }
    let body = subst_expr_for_expr(
        names,
        &Expr::BoundVar(candidate.clone()),
        &Expr::BoundVar(b.var.clone()),
        &b.body,
    );
    BindingExpr::new(candidate, body)
}

struct Subst<'a> {
    names: &'a NameGen,
    expr2: &'a Expr,
    replace: &'a Expr,
    avoid: Vec<String>,
}

impl ExprRewrite for Subst<'_> {
    fn rewrite(&mut self, expr: &Expr) -> Option<Expr> {
        (expr == self.replace).then(|| self.expr2.clone())
    }

    fn rewrite_binding(&mut self, b: &BindingExpr) -> Option<BindingExpr> {
        if let Expr::BoundVar(v) = self.replace {
            if *v == b.var {
                return Some(b.clone());
            }
        }
        let renamed = ensure_no_capture(self.names, &self.avoid, b);
        let body = map_expr(self, &renamed.body);
        Some(BindingExpr::new(renamed.var, body))
    }
}

/// `subject[expr2 / replace]`, renaming binders that would capture a bound
/// variable occurring in `expr2`.
pub fn subst_expr_for_expr(names: &NameGen, expr2: &Expr, replace: &Expr, subject: &Expr) -> Expr {
    let mut s = Subst {
        names,
        expr2,
        replace,
        avoid: bound_var_names(expr2),
    };
    map_expr(&mut s, subject)
}

pub fn instantiate_expr(names: &NameGen, e2: &Expr, b: &BindingExpr) -> Expr {
    subst_expr_for_expr(names, e2, &Expr::BoundVar(b.var.clone()), &b.body)
}

/// `λvar. expr[BoundVar(var) / FreeVar(var)]`.
pub fn abstract_over_expr(names: &NameGen, expr: &Expr, var: &str) -> BindingExpr {
    let body = subst_expr_for_expr(
        names,
        &Expr::BoundVar(var.to_string()),
        &Expr::FreeVar(var.to_string()),
        expr,
    );
    BindingExpr::new(var, body)
}

pub fn abstract_over_fresh(names: &NameGen, expr: &Expr) -> BindingExpr {
    let var = names.fresh("n");
    abstract_over_expr(names, expr, &var)
}

pub fn binding_is_unnamed(b: &BindingExpr) -> bool {
    !appears_in_expr(&Expr::BoundVar(b.var.clone()), &b.body)
}

/// Opens the binder with a fresh free variable, applies `op`, and closes it
/// again over the same variable.
pub fn operate_under_binding<E>(
    names: &NameGen,
    b: &BindingExpr,
    op: impl FnOnce(Expr) -> Result<Expr, E>,
) -> Result<BindingExpr, E> {
    let var = names.fresh(&b.var);
    let opened = instantiate_expr(names, &Expr::FreeVar(var.clone()), b);
    let body = op(opened)?;
    Ok(abstract_over_expr(names, &body, &var))
}

/// A chain of projections rooted at a free variable.
pub fn is_path(e: &Expr) -> bool {
    match e {
        Expr::FreeVar(_) => true,
        Expr::ObjectProj { subject, .. }
        | Expr::LinkPropProj { subject, .. }
        | Expr::BackLink { subject, .. }
        | Expr::TpIntersect { subject, .. } => is_path(subject),
        _ => false,
    }
}

struct Canonical<'a> {
    names: &'a NameGen,
    depth: usize,
}

impl ExprRewrite for Canonical<'_> {
    fn rewrite(&mut self, _expr: &Expr) -> Option<Expr> {
        None
    }

    fn rewrite_binding(&mut self, b: &BindingExpr) -> Option<BindingExpr> {
        let var = format!("#{}", self.depth);
        let body = subst_expr_for_expr(
            self.names,
            &Expr::BoundVar(var.clone()),
            &Expr::BoundVar(b.var.clone()),
            &b.body,
        );
        let mut inner = Canonical {
            names: self.names,
            depth: self.depth + 1,
        };
        Some(BindingExpr::new(var, map_expr(&mut inner, &body)))
    }
}

/// Structural equality up to the names of bound variables.
pub fn alpha_equivalent(a: &Expr, b: &Expr) -> bool {
    let names = NameGen::new();
    let mut ca = Canonical {
        names: &names,
        depth: 0,
    };
    let left = map_expr(&mut ca, a);
    let mut cb = Canonical {
        names: &names,
        depth: 0,
    };
    left == map_expr(&mut cb, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_are_distinct_and_unwritable() {
        let names = NameGen::new();
        let a = names.fresh("x");
        let b = names.fresh(&a);
        assert_ne!(a, b);
        assert!(a.contains('~'));
        assert!(b.starts_with("x~"));
    }

    #[test]
    fn substitution_renames_capturing_binder() {
        let names = NameGen::new();
        // λy. (x, y)   with x := BoundVar(y) from an outer scope
        let inner = BindingExpr::new(
            "y",
            Expr::UnnamedTuple(vec![Expr::free("x"), Expr::BoundVar("y".into())]),
        );
        let subject = Expr::Binding(Box::new(inner));
        let out = subst_expr_for_expr(
            &names,
            &Expr::BoundVar("y".into()),
            &Expr::free("x"),
            &subject,
        );
        let Expr::Binding(b) = out else {
            panic!("expected binding");
        };
        assert_ne!(b.var, "y");
        assert_eq!(
            *b.body,
            Expr::UnnamedTuple(vec![Expr::BoundVar("y".into()), Expr::BoundVar(b.var.clone())])
        );
    }

    #[test]
    fn shadowed_binder_stops_substitution() {
        let names = NameGen::new();
        let b = BindingExpr::new(
            "x",
            Expr::Binding(Box::new(BindingExpr::new("x", Expr::BoundVar("x".into())))),
        );
        let out = instantiate_expr(&names, &Expr::int(1), &b);
        assert_eq!(
            out,
            Expr::Binding(Box::new(BindingExpr::new("x", Expr::BoundVar("x".into()))))
        );
    }

    #[test]
    fn unnamed_binding_detection() {
        assert!(binding_is_unnamed(&BindingExpr::new("x", Expr::int(3))));
        assert!(!binding_is_unnamed(&BindingExpr::new("x", Expr::BoundVar("x".into()))));
    }

    #[test]
    fn paths_are_rooted_at_free_variables() {
        let p = Expr::proj(Expr::proj(Expr::free("User"), "deck"), "name");
        assert!(is_path(&p));
        assert!(!is_path(&Expr::proj(Expr::int(1), "x")));
    }
}
