//! Path factoring.
//!
//! Within one query level, a path that shares a prefix with another path of
//! the same level refers to the same objects. Every such common prefix is
//! bound once with `OptionalFor` (an absent link must leave the row empty,
//! not drop it) and its occurrences are replaced by the bound variable.
//!
//! Levels: `Direct` positions belong to the query itself; `Semi` positions
//! are optional or set-of function arguments and order keys; everything
//! under a binder, a subquery, an INSERT, or an array or tuple constructor
//! is `Nested`. Only direct paths start a hoist; paths at any level can be
//! the partner that shares the prefix. Each nested unit is then factored on
//! its own. Nothing inside `DETACHED` takes part.

use tracing::trace;

use eql_ir::{
    BindingExpr, Expr, Label, NameGen, OrderKey, ParamModifier, RawName, ShapeExpr,
    abstract_over_expr, instantiate_expr, is_path, map_expr,
};

use crate::resolve::resolve_func_name;
use crate::schema::DBSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    Direct,
    Semi,
    Nested,
}

impl Level {
    fn fenced(self) -> Level {
        match self {
            Level::Direct => Level::Semi,
            Level::Semi | Level::Nested => Level::Nested,
        }
    }
}

pub struct Factorer<'a> {
    schema: &'a DBSchema,
    module: &'a [String],
    names: &'a NameGen,
}

/// Factors every query level of `e`.
pub fn factor_paths(schema: &DBSchema, module: &[String], names: &NameGen, e: &Expr) -> Expr {
    Factorer {
        schema,
        module,
        names,
    }
    .select_hoist(e, &[])
}

/// Steps of a path from its root outward: `[r, r.a, r.a.b]`.
fn prefixes(e: &Expr) -> Vec<&Expr> {
    let mut out = match e {
        Expr::ObjectProj { subject, .. }
        | Expr::LinkPropProj { subject, .. }
        | Expr::BackLink { subject, .. }
        | Expr::TpIntersect { subject, .. } => prefixes(subject),
        _ => Vec::new(),
    };
    out.push(e);
    out
}

fn common_prefix(a: &Expr, b: &Expr) -> Option<Expr> {
    prefixes(a)
        .into_iter()
        .zip(prefixes(b))
        .take_while(|(x, y)| x == y)
        .last()
        .map(|(x, _)| x.clone())
}

/// `e[to / from]`, leaving detached expressions alone.
fn replace(e: &Expr, from: &Expr, to: &Expr) -> Expr {
    map_expr(
        &mut |x: &Expr| {
            if x == from {
                Some(to.clone())
            } else if matches!(x, Expr::Detached(_)) {
                Some(x.clone())
            } else {
                None
            }
        },
        e,
    )
}

/// Common prefixes of a direct path and any other path, shortest first.
/// A bare singleton variable is already bound once and never hoisted.
fn hoist_candidates(occurrences: &[(Expr, Level)], singletons: &[String]) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::new();
    for (i, (x, level)) in occurrences.iter().enumerate() {
        if *level != Level::Direct {
            continue;
        }
        for (j, (y, _)) in occurrences.iter().enumerate() {
            if i == j {
                continue;
            }
            let Some(p) = common_prefix(x, y) else {
                continue;
            };
            if matches!(&p, Expr::FreeVar(v) if singletons.contains(v)) {
                continue;
            }
            if !out.contains(&p) {
                out.push(p);
            }
        }
    }
    out.sort_by_key(|p| prefixes(p).len());
    out
}

/// An ORDER BY whose keys are plain fields of the row is left in place.
fn has_simple_keys(filter: &BindingExpr, order: &[OrderKey]) -> bool {
    filter.body.is_true_literal()
        && order.iter().all(|k| {
            matches!(
                k.key.body.as_ref(),
                Expr::ObjectProj { subject, .. } if matches!(subject.as_ref(), Expr::BoundVar(v) if *v == k.key.var)
            )
        })
}

impl Factorer<'_> {
    fn arg_modifiers(&self, fun: &RawName) -> Vec<ParamModifier> {
        resolve_func_name(self.schema, self.module, fun)
            .ok()
            .and_then(|q| {
                self.schema
                    .func_defs(&q)?
                    .first()
                    .map(|d| d.tp.args_mod.clone())
            })
            .unwrap_or_default()
    }

    fn select_hoist(&self, e: &Expr, singletons: &[String]) -> Expr {
        let mut occurrences = Vec::new();
        self.collect(e, Level::Direct, &mut occurrences);
        let mut pending = hoist_candidates(&occurrences, singletons);

        let mut body = e.clone();
        let mut hoisted: Vec<(Expr, String)> = Vec::new();
        while !pending.is_empty() {
            let h = pending.remove(0);
            let var = self.names.fresh("p");
            let v = Expr::free(&var);
            trace!(path = %h, var = %var, "hoisting path");
            body = replace(&body, &h, &v);
            pending = pending.iter().fold(Vec::new(), |mut acc, p| {
                let p = replace(p, &h, &v);
                if !acc.contains(&p) {
                    acc.push(p);
                }
                acc
            });
            hoisted.push((h, var));
        }

        let mut inner: Vec<String> = singletons.to_vec();
        inner.extend(hoisted.iter().map(|(_, v)| v.clone()));
        let mut out = self.descend(&body, &inner);
        for (h, var) in hoisted.into_iter().rev() {
            out = Expr::optional_for(h, abstract_over_expr(self.names, &out, &var));
        }
        out
    }

    fn collect(&self, e: &Expr, level: Level, out: &mut Vec<(Expr, Level)>) {
        if is_path(e) {
            out.push((e.clone(), level));
            return;
        }
        match e {
            Expr::Detached(_) => {}
            Expr::FunApp {
                fun, args, kwargs, ..
            } => {
                let mods = self.arg_modifiers(fun);
                for (i, a) in args.iter().enumerate() {
                    let l = match mods.get(i) {
                        Some(ParamModifier::Optional | ParamModifier::SetOf) => level.fenced(),
                        _ => level,
                    };
                    self.collect(a, l, out);
                }
                for a in kwargs.values() {
                    self.collect(a, level.fenced(), out);
                }
            }
            Expr::FilterOrder {
                subject,
                filter,
                order,
            } => {
                self.collect(subject, level, out);
                self.collect(&filter.body, Level::Nested, out);
                for k in order {
                    self.collect(&k.key.body, level.fenced(), out);
                }
            }
            Expr::Shaped { expr, shape } => {
                self.collect(expr, level, out);
                for b in shape.0.values() {
                    self.collect(&b.body, Level::Nested, out);
                }
            }
            Expr::Update { subject, shape } => {
                self.collect(subject, level, out);
                for b in shape.0.values() {
                    self.collect(&b.body, Level::Nested, out);
                }
            }
            Expr::With { bound, next } | Expr::For { bound, next } | Expr::OptionalFor { bound, next } => {
                self.collect(bound, level, out);
                self.collect(&next.body, Level::Nested, out);
            }
            Expr::Binding(b) => self.collect(&b.body, Level::Nested, out),
            Expr::Insert { new, .. } => {
                for v in new.values() {
                    self.collect(v, Level::Nested, out);
                }
            }
            Expr::Subquery(inner) => self.collect(inner, Level::Nested, out),
            Expr::UnnamedTuple(items) | Expr::Arr(items) => {
                for i in items {
                    self.collect(i, Level::Nested, out);
                }
            }
            Expr::NamedTuple(items) => {
                for i in items.values() {
                    self.collect(i, Level::Nested, out);
                }
            }
            Expr::ObjectProj { subject, .. }
            | Expr::TupleProj { subject, .. }
            | Expr::LinkPropProj { subject, .. }
            | Expr::BackLink { subject, .. }
            | Expr::IsTp { subject, .. }
            | Expr::TpIntersect { subject, .. }
            | Expr::Delete { subject } => self.collect(subject, level, out),
            Expr::TypeCast { arg, .. } | Expr::CheckedTypeCast { arg, .. } => {
                self.collect(arg, level, out)
            }
            Expr::ConditionalDedup(inner) => self.collect(inner, level, out),
            Expr::Union(l, r) => {
                self.collect(l, level, out);
                self.collect(r, level, out);
            }
            Expr::MultiSet(items) => {
                for i in items {
                    self.collect(i, level, out);
                }
            }
            Expr::OffsetLimit {
                subject,
                offset,
                limit,
            } => {
                self.collect(subject, level, out);
                self.collect(offset, level, out);
                self.collect(limit, level, out);
            }
            Expr::IfElse {
                then_branch,
                condition,
                else_branch,
            } => {
                self.collect(then_branch, level, out);
                self.collect(condition, level, out);
                self.collect(else_branch, level, out);
            }
            Expr::Val(_)
            | Expr::FreeVar(_)
            | Expr::BoundVar(_)
            | Expr::Parameter { .. }
            | Expr::QualifiedName(_)
            | Expr::QualifiedNameWithFilter { .. }
            | Expr::FreeObject => {}
        }
    }

    /// Opens `b` with `var` and factors its body as a unit of its own.
    fn open_with(&self, b: &BindingExpr, var: &str, singletons: &[String], singleton: bool) -> BindingExpr {
        let body = instantiate_expr(self.names, &Expr::free(var), b);
        let mut inner = singletons.to_vec();
        if singleton && !inner.iter().any(|s| s == var) {
            inner.push(var.to_string());
        }
        let body = self.select_hoist(&body, &inner);
        abstract_over_expr(self.names, &body, var)
    }

    fn open(&self, b: &BindingExpr, singletons: &[String], singleton: bool) -> BindingExpr {
        let var = self.names.fresh(&b.var);
        self.open_with(b, &var, singletons, singleton)
    }

    fn open_shape(&self, shape: &ShapeExpr, singletons: &[String]) -> ShapeExpr {
        ShapeExpr(
            shape
                .0
                .iter()
                .map(|(l, b)| (l.clone(), self.open(b, singletons, true)))
                .collect(),
        )
    }

    /// Rebuilds `e` with every nested unit factored. Direct and semi
    /// positions were handled by the enclosing `select_hoist`.
    fn descend(&self, e: &Expr, singletons: &[String]) -> Expr {
        let d = |x: &Expr| Box::new(self.descend(x, singletons));
        let unit = |x: &Expr| self.select_hoist(x, singletons);
        match e {
            Expr::Detached(inner) => Expr::Detached(Box::new(self.select_hoist(inner, &[]))),
            Expr::FunApp {
                fun,
                overloading_index,
                args,
                kwargs,
            } => {
                let mods = self.arg_modifiers(fun);
                Expr::FunApp {
                    fun: fun.clone(),
                    overloading_index: *overloading_index,
                    args: args
                        .iter()
                        .enumerate()
                        .map(|(i, a)| match mods.get(i) {
                            Some(ParamModifier::Optional | ParamModifier::SetOf) => unit(a),
                            _ => self.descend(a, singletons),
                        })
                        .collect(),
                    kwargs: kwargs.iter().map(|(k, a)| (k.clone(), unit(a))).collect(),
                }
            }
            Expr::FilterOrder {
                subject,
                filter,
                order,
            } => {
                if !order.is_empty() && !has_simple_keys(filter, order) {
                    let rewritten = self.materialize_order_keys(subject, filter, order);
                    return self.descend(&rewritten, singletons);
                }
                let subject_out = self.descend(subject, singletons);
                let (filter, order) = match subject.as_ref() {
                    Expr::FreeVar(u) if singletons.contains(u) => (
                        self.open_with(filter, u, singletons, true),
                        order
                            .iter()
                            .map(|k| OrderKey {
                                key: self.open_with(&k.key, u, singletons, true),
                                ..k.clone()
                            })
                            .collect(),
                    ),
                    _ => (
                        self.open(filter, singletons, true),
                        order
                            .iter()
                            .map(|k| OrderKey {
                                key: self.open(&k.key, singletons, true),
                                ..k.clone()
                            })
                            .collect(),
                    ),
                };
                Expr::filter_order(subject_out, filter, order)
            }
            Expr::Shaped { expr, shape } => Expr::Shaped {
                expr: d(expr),
                shape: self.open_shape(shape, singletons),
            },
            Expr::Update { subject, shape } => Expr::Update {
                subject: d(subject),
                shape: self.open_shape(shape, singletons),
            },
            Expr::With { bound, next } => Expr::With {
                bound: d(bound),
                next: self.open(next, singletons, false),
            },
            Expr::For { bound, next } => Expr::For {
                bound: d(bound),
                next: self.open(next, singletons, true),
            },
            Expr::OptionalFor { bound, next } => Expr::OptionalFor {
                bound: d(bound),
                next: self.open(next, singletons, true),
            },
            Expr::Binding(b) => Expr::Binding(Box::new(self.open(b, singletons, false))),
            Expr::Insert { name, new } => Expr::Insert {
                name: name.clone(),
                new: new.iter().map(|(k, v)| (k.clone(), unit(v))).collect(),
            },
            Expr::Subquery(inner) => Expr::Subquery(Box::new(unit(inner))),
            Expr::UnnamedTuple(items) => Expr::UnnamedTuple(items.iter().map(unit).collect()),
            Expr::Arr(items) => Expr::Arr(items.iter().map(unit).collect()),
            Expr::NamedTuple(items) => {
                Expr::NamedTuple(items.iter().map(|(k, v)| (k.clone(), unit(v))).collect())
            }
            Expr::ObjectProj { subject, label } => Expr::ObjectProj {
                subject: d(subject),
                label: label.clone(),
            },
            Expr::TupleProj { subject, label } => Expr::TupleProj {
                subject: d(subject),
                label: label.clone(),
            },
            Expr::LinkPropProj { subject, linkprop } => Expr::LinkPropProj {
                subject: d(subject),
                linkprop: linkprop.clone(),
            },
            Expr::BackLink { subject, label } => Expr::BackLink {
                subject: d(subject),
                label: label.clone(),
            },
            Expr::IsTp { subject, tp } => Expr::IsTp {
                subject: d(subject),
                tp: tp.clone(),
            },
            Expr::TpIntersect { subject, tp } => Expr::TpIntersect {
                subject: d(subject),
                tp: tp.clone(),
            },
            Expr::Delete { subject } => Expr::Delete { subject: d(subject) },
            Expr::TypeCast { tp, arg } => Expr::TypeCast {
                tp: tp.clone(),
                arg: d(arg),
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
                arg: d(arg),
            },
            Expr::ConditionalDedup(inner) => Expr::ConditionalDedup(d(inner)),
            Expr::Union(l, r) => Expr::Union(d(l), d(r)),
            Expr::MultiSet(items) => {
                Expr::MultiSet(items.iter().map(|i| self.descend(i, singletons)).collect())
            }
            Expr::OffsetLimit {
                subject,
                offset,
                limit,
            } => Expr::OffsetLimit {
                subject: d(subject),
                offset: d(offset),
                limit: d(limit),
            },
            Expr::IfElse {
                then_branch,
                condition,
                else_branch,
            } => Expr::IfElse {
                then_branch: d(then_branch),
                condition: d(condition),
                else_branch: d(else_branch),
            },
            Expr::Val(_)
            | Expr::FreeVar(_)
            | Expr::BoundVar(_)
            | Expr::Parameter { .. }
            | Expr::QualifiedName(_)
            | Expr::QualifiedNameWithFilter { .. }
            | Expr::FreeObject => e.clone(),
        }
    }

    /// `S FILTER F ORDER BY O` becomes
    /// `FOR t IN ((FOR r IN (S FILTER F) UNION {subject := r, key0 := O0(r), ...})
    /// ORDER BY .key0 ...) UNION t.subject`, so each key is computed once
    /// per row.
    fn materialize_order_keys(&self, subject: &Expr, filter: &BindingExpr, order: &[OrderKey]) -> Expr {
        let names = self.names;
        let filtered = Expr::filter_order(subject.clone(), filter.clone(), Vec::new());

        let row = names.fresh("r");
        let row_e = Expr::free(&row);
        let mut shape = ShapeExpr::empty();
        shape.0.insert(
            Label::Str("subject".into()),
            BindingExpr::new(names.fresh("_"), row_e.clone()),
        );
        for (i, k) in order.iter().enumerate() {
            let key = instantiate_expr(names, &row_e, &k.key);
            shape.0.insert(
                Label::Str(format!("key{i}")),
                BindingExpr::new(names.fresh("_"), key),
            );
        }
        let keyed = Expr::for_each(
            filtered,
            abstract_over_expr(names, &Expr::shaped(Expr::FreeObject, shape), &row),
        );

        let keys = order
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let t = names.fresh("t");
                OrderKey {
                    direction: k.direction,
                    empty: k.empty,
                    key: abstract_over_expr(names, &Expr::proj(Expr::free(&t), format!("key{i}")), &t),
                }
            })
            .collect();
        let always = BindingExpr::new(names.fresh("_"), Expr::bool(true));
        let sorted = Expr::filter_order(keyed, always, keys);

        let t = names.fresh("t");
        Expr::for_each(
            sorted,
            abstract_over_expr(names, &Expr::proj(Expr::free(&t), "subject"), &t),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::alpha_equivalent;

    fn factor(e: &Expr) -> Expr {
        let schema = DBSchema::new();
        let names = NameGen::new();
        factor_paths(&schema, &["default".to_string()], &names, e)
    }

    fn person(label: &str) -> Expr {
        Expr::proj(Expr::free("Person"), label)
    }

    #[test]
    fn shared_prefixes_are_bound_once() {
        let e = Expr::app("++", vec![person("first"), person("last")]);
        let out = factor(&e);
        let Expr::OptionalFor { bound, next } = &out else {
            panic!("expected a hoisted binding, got {out}");
        };
        assert_eq!(**bound, Expr::free("Person"));
        let v = Expr::BoundVar(next.var.clone());
        assert_eq!(
            *next.body,
            Expr::app("++", vec![Expr::proj(v.clone(), "first"), Expr::proj(v, "last")])
        );
    }

    #[test]
    fn single_paths_are_left_alone() {
        let e = Expr::app("++", vec![person("first"), Expr::str("!")]);
        assert_eq!(factor(&e), e);
    }

    #[test]
    fn detached_paths_do_not_correlate() {
        let e = Expr::app(
            "++",
            vec![person("first"), Expr::Detached(Box::new(person("last")))],
        );
        assert_eq!(factor(&e), e);
    }

    #[test]
    fn factoring_reaches_a_fixed_point() {
        let e = Expr::UnnamedTuple(vec![Expr::app(
            "++",
            vec![
                Expr::proj(person("friends"), "name"),
                Expr::proj(person("friends"), "email"),
            ],
        )]);
        let once = factor(&e);
        assert!(!alpha_equivalent(&once, &e));
        assert!(alpha_equivalent(&factor(&once), &once));
    }
}
