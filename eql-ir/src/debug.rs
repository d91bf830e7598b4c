#![forbid(unsafe_code)]

use std::fmt;

use crate::expr::{BindingExpr, EmptyOrder, Expr, OrderDirection, SelectFilter, ShapeExpr};
use crate::tp::{CompositeKind, Marker, ObjectTp, RawName, Tp};
use crate::val::{ObjectVal, Prim, Val};

fn join<T>(items: impl IntoIterator<Item = T>, f: impl Fn(T) -> String) -> String {
    items.into_iter().map(f).collect::<Vec<_>>().join(", ")
}

pub fn show_prim(p: &Prim) -> String {
    match p {
        Prim::Int(i) => i.to_string(),
        Prim::Float(x) => format!("{x:?}"),
        Prim::Str(s) => format!("{s:?}"),
        Prim::Bool(b) => b.to_string(),
    }
}

fn show_object_val(o: &ObjectVal) -> String {
    join(&o.0, |(k, (m, vs))| {
        let hidden = if *m == Marker::Invisible { "~" } else { "" };
        format!("{hidden}{k}: {{{}}}", join(vs, show_val))
    })
}

pub fn show_val(v: &Val) -> String {
    match v {
        Val::Scalar(s) => show_prim(&s.val),
        Val::Ref(r) => {
            if r.val.0.is_empty() {
                format!("<{} #{}>", r.tpname, r.id)
            } else {
                format!("<{} #{}> {{{}}}", r.tpname, r.id, show_object_val(&r.val))
            }
        }
        Val::Free(o) => format!("{{{}}}", show_object_val(o)),
        Val::UnnamedTuple(vs) => format!("({})", join(vs, show_val)),
        Val::NamedTuple(vs) => format!("({})", join(vs, |(k, v)| format!("{k} := {}", show_val(v)))),
        Val::Arr(vs) => format!("[{}]", join(vs, show_val)),
    }
}

fn show_object_tp(o: &ObjectTp) -> String {
    join(&o.0, |(k, rt)| format!("{k}: {} {}", show_tp(&rt.tp), rt.mode))
}

pub fn show_tp(tp: &Tp) -> String {
    match tp {
        Tp::Object(o) => format!("{{{}}}", show_object_tp(o)),
        Tp::Scalar(q) => q.to_string(),
        Tp::Composite { kind, tps, labels } => {
            let kw = match kind {
                CompositeKind::Array => "array",
                CompositeKind::Tuple => "tuple",
                CompositeKind::Enum => "enum",
                CompositeKind::Range => "range",
                CompositeKind::MultiRange => "multirange",
            };
            let inner = if labels.is_empty() {
                join(tps, show_tp)
            } else {
                join(labels.iter().zip(tps), |(l, t)| format!("{l}: {}", show_tp(t)))
            };
            format!("{kw}<{inner}>")
        }
        Tp::Union(l, r) => format!("({} | {})", show_tp(l), show_tp(r)),
        Tp::Intersect(l, r) => format!("({} & {})", show_tp(l), show_tp(r)),
        Tp::UncheckedName(name) => format!("?{name}"),
        Tp::NamedNominalLink { name, linkprop } => show_link(&name.to_string(), linkprop),
        Tp::NominalLink { name, linkprop, .. } => show_link(&name.to_string(), linkprop),
        Tp::Computable { tp, .. } => format!("computed {}", show_tp(tp)),
        Tp::UncheckedComputable(_) => "computed ?".to_string(),
        Tp::OverloadedTarget { .. } => "overloaded".to_string(),
        Tp::Default { tp, .. } => format!("default {}", show_tp(tp)),
        Tp::Any(Some(s)) => format!("any{s}"),
        Tp::Any(None) => "anytype".to_string(),
        Tp::Existential(i) => format!("some{i}"),
    }
}

fn show_link(name: &str, linkprop: &ObjectTp) -> String {
    if linkprop.0.is_empty() {
        name.to_string()
    } else {
        format!("{name} {{@{}}}", show_object_tp(linkprop))
    }
}

fn show_binding(b: &BindingExpr) -> String {
    format!("λ{}. {}", b.var, show_expr(&b.body))
}

fn show_shape(s: &ShapeExpr) -> String {
    join(&s.0, |(k, b)| format!("{k} := {}", show_binding(b)))
}

fn show_filter(f: &SelectFilter<Expr>) -> String {
    match f {
        SelectFilter::Eq { propname, arg } => format!(".{propname} = {}", show_expr(arg)),
        SelectFilter::Conjunctive(cs) => format!("({})", cs.iter().map(show_filter).collect::<Vec<_>>().join(" and ")),
        SelectFilter::Disjunctive(ds) => format!("({})", ds.iter().map(show_filter).collect::<Vec<_>>().join(" or ")),
        SelectFilter::True => "true".to_string(),
    }
}

fn show_fun(fun: &RawName, idx: Option<usize>) -> String {
    match idx {
        Some(i) => format!("{fun}#{i}"),
        None => fun.to_string(),
    }
}

/// Compact single-line rendering used in diagnostics and trace logs.
pub fn show_expr(e: &Expr) -> String {
    match e {
        Expr::Val(v) => show_val(v),
        Expr::FreeVar(v) => v.clone(),
        Expr::BoundVar(v) => format!("^{v}"),
        Expr::Parameter { name, tp, is_required } => {
            let opt = if *is_required { "" } else { "optional " };
            format!("<{opt}{}>${name}", show_tp(tp))
        }
        Expr::QualifiedName(q) => q.to_string(),
        Expr::QualifiedNameWithFilter { name, filter } => format!("{name}[{}]", show_filter(filter)),
        Expr::FreeObject => "{}".to_string(),
        Expr::ObjectProj { subject, label } => format!("{}.{label}", show_expr(subject)),
        Expr::TupleProj { subject, label } => format!("{}.{label}", show_expr(subject)),
        Expr::LinkPropProj { subject, linkprop } => format!("{}@{linkprop}", show_expr(subject)),
        Expr::BackLink { subject, label } => format!("{}.<{label}", show_expr(subject)),
        Expr::IsTp { subject, tp } => format!("({} is {tp})", show_expr(subject)),
        Expr::TpIntersect { subject, tp } => format!("{}[is {tp}]", show_expr(subject)),
        Expr::FunApp { fun, overloading_index, args, kwargs } => {
            let mut parts: Vec<String> = args.iter().map(show_expr).collect();
            parts.extend(kwargs.iter().map(|(k, v)| format!("{k} := {}", show_expr(v))));
            format!("{}({})", show_fun(fun, *overloading_index), parts.join(", "))
        }
        Expr::TypeCast { tp, arg } => format!("<{}>{}", show_tp(tp), show_expr(arg)),
        Expr::CheckedTypeCast { to, arg, .. } => format!("<{}>!{}", show_tp(to), show_expr(arg)),
        Expr::Union(l, r) => format!("({} union {})", show_expr(l), show_expr(r)),
        Expr::MultiSet(es) => format!("{{{}}}", join(es, show_expr)),
        Expr::Shaped { expr, shape } => format!("{} {{{}}}", show_expr(expr), show_shape(shape)),
        Expr::FilterOrder { subject, filter, order } => {
            let mut s = format!("{} filter {}", show_expr(subject), show_binding(filter));
            if !order.is_empty() {
                let keys = join(order, |k| {
                    let dir = match k.direction {
                        OrderDirection::Ascending => "asc",
                        OrderDirection::Descending => "desc",
                    };
                    let empty = match k.empty {
                        EmptyOrder::EmptyFirst => "empty first",
                        EmptyOrder::EmptyLast => "empty last",
                    };
                    format!("{} {dir} {empty}", show_binding(&k.key))
                });
                s.push_str(&format!(" order by {keys}"));
            }
            s
        }
        Expr::OffsetLimit { subject, offset, limit } => {
            format!("{} offset {} limit {}", show_expr(subject), show_expr(offset), show_expr(limit))
        }
        Expr::Insert { name, new } => {
            format!("insert {name} {{{}}}", join(new, |(k, v)| format!("{k} := {}", show_expr(v))))
        }
        Expr::Update { subject, shape } => format!("update {} set {{{}}}", show_expr(subject), show_shape(shape)),
        Expr::Delete { subject } => format!("delete {}", show_expr(subject)),
        Expr::With { bound, next } => format!("with {} in {}", show_expr(bound), show_binding(next)),
        Expr::For { bound, next } => format!("for {} in {}", show_expr(bound), show_binding(next)),
        Expr::OptionalFor { bound, next } => {
            format!("optional for {} in {}", show_expr(bound), show_binding(next))
        }
        Expr::Binding(b) => show_binding(b),
        Expr::Subquery(e) => format!("select ({})", show_expr(e)),
        Expr::Detached(e) => format!("detached ({})", show_expr(e)),
        Expr::IfElse { then_branch, condition, else_branch } => format!(
            "({} if {} else {})",
            show_expr(then_branch),
            show_expr(condition),
            show_expr(else_branch)
        ),
        Expr::UnnamedTuple(es) => format!("({})", join(es, show_expr)),
        Expr::NamedTuple(es) => format!("({})", join(es, |(k, v)| format!("{k} := {}", show_expr(v)))),
        Expr::Arr(es) => format!("[{}]", join(es, show_expr)),
        Expr::ConditionalDedup(e) => format!("dedup({})", show_expr(e)),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&show_expr(self))
    }
}

impl fmt::Display for Tp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&show_tp(self))
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&show_val(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tp::QualifiedName;

    #[test]
    fn renders_paths_and_calls() {
        let e = Expr::app("=", vec![Expr::proj(Expr::free("Person"), "name"), Expr::str("Alice")]);
        assert_eq!(show_expr(&e), "=(Person.name, \"Alice\")");
    }

    #[test]
    fn renders_references() {
        let v = Val::reference(101, QualifiedName::new(["default", "Person"]));
        assert_eq!(show_val(&v), "<default::Person #101>");
    }
}
