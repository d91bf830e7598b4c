//! Lowering from the concrete syntax tree to the query IR.
//!
//! Lowering is purely structural: names stay unresolved, operators become
//! calls to unqualified functions, and leading-dot paths are rooted at
//! [`PARTIAL_PATH_NAME`] until the enclosing shape element, filter or order
//! clause turns them into a binder.

use indexmap::IndexMap;

use eql_ast::{
    self as ast, Alias, AssignOp, BinOp, CallArg, ExprKind, NonesOrder, PathStep, PointerKind,
    QueryKind, ShapeElementBody, SortDirection, Span, TypeExprKind,
};
use eql_ir::{
    BindingExpr, EmptyOrder, Expr, Label, ModuleName, NameGen, OrderDirection, OrderKey,
    PARTIAL_PATH_NAME, QualifiedName, RawName, ShapeExpr, Tp, Val, abstract_over_expr,
    appears_in_expr, subst_expr_for_expr,
};

use crate::error::SemanticError;

/// A lowered statement plus the `MODULE` alias of its `WITH` block, if any.
#[derive(Clone, Debug)]
pub struct Lowered {
    pub expr: Expr,
    pub module: Option<ModuleName>,
}

pub fn lower_query(names: &NameGen, q: &ast::Query) -> Result<Lowered, SemanticError> {
    let l = Lowerer { names };
    let (expr, module) = l.query(q, true)?;
    l.ensure_no_partial_path(&expr, q.span)?;
    Ok(Lowered { expr, module })
}

pub fn lower_expr(names: &NameGen, e: &ast::Expr) -> Result<Expr, SemanticError> {
    let l = Lowerer { names };
    let out = l.expr(e)?;
    l.ensure_no_partial_path(&out, e.span)?;
    Ok(out)
}

/// Lowers an expression whose leading-dot paths refer to an object, such as
/// a computed field or a default. The result binds that object.
pub fn lower_object_binding(names: &NameGen, e: &ast::Expr) -> Result<BindingExpr, SemanticError> {
    let l = Lowerer { names };
    let body = l.expr(e)?;
    Ok(l.partial_binding(&body))
}

/// Lowers a function body into one nested binder per parameter.
pub fn lower_function_body(
    names: &NameGen,
    params: &[String],
    body: &ast::Expr,
) -> Result<Expr, SemanticError> {
    let mut out = lower_expr(names, body)?;
    for p in params.iter().rev() {
        out = Expr::Binding(Box::new(abstract_over_expr(names, &out, p)));
    }
    Ok(out)
}

pub fn lower_type(t: &ast::TypeExpr) -> Tp {
    match &t.kind {
        TypeExprKind::Name(q) if !q.is_qualified() && q.name == "anytype" => Tp::Any(None),
        TypeExprKind::Name(q) => Tp::UncheckedName(raw_name(q)),
        TypeExprKind::Array(inner) => Tp::arr(lower_type(inner)),
        TypeExprKind::Tuple(items) => Tp::unnamed_tuple(items.iter().map(lower_type).collect()),
        TypeExprKind::NamedTuple(items) => Tp::named_tuple(
            items
                .iter()
                .map(|(n, t)| (n.node.clone(), lower_type(t)))
                .collect(),
        ),
    }
}

pub fn raw_name(q: &ast::QualName) -> RawName {
    if q.is_qualified() {
        RawName::Qualified(QualifiedName::in_module(&q.module, &q.name))
    } else {
        RawName::Unqualified(q.name.clone())
    }
}

struct Lowerer<'a> {
    names: &'a NameGen,
}

impl Lowerer<'_> {
    fn ensure_no_partial_path(&self, e: &Expr, span: Span) -> Result<(), SemanticError> {
        if appears_in_expr(&Expr::free(PARTIAL_PATH_NAME), e) {
            return Err(SemanticError::elab(
                "a leading-dot path needs an enclosing shape, filter or order clause",
                span,
            ));
        }
        Ok(())
    }

    /// Closes `body` over the implicit subject of its leading-dot paths.
    fn partial_binding(&self, body: &Expr) -> BindingExpr {
        let var = self.names.fresh("x");
        let renamed = subst_expr_for_expr(
            self.names,
            &Expr::free(var.clone()),
            &Expr::free(PARTIAL_PATH_NAME),
            body,
        );
        abstract_over_expr(self.names, &renamed, &var)
    }

    fn query(&self, q: &ast::Query, top: bool) -> Result<(Expr, Option<ModuleName>), SemanticError> {
        let mut out = match &q.kind {
            QueryKind::Select(s) => self.select(s)?,
            QueryKind::Insert(i) => self.insert(i)?,
            QueryKind::Update(u) => self.update(u)?,
            QueryKind::Delete(d) => self.delete(d)?,
            QueryKind::For(f) => {
                let bound = self.expr(&f.iterator_expr)?;
                let body = self.expr(&f.body)?;
                Expr::for_each(bound, abstract_over_expr(self.names, &body, &f.iterator.node))
            }
        };
        let mut module = None;
        for alias in q.aliases.iter().rev() {
            match alias {
                Alias::Expr { name, expr } => {
                    let bound = self.expr(expr)?;
                    out = Expr::with(bound, abstract_over_expr(self.names, &out, &name.node));
                }
                Alias::Module { span, name } => {
                    if !top {
                        return Err(SemanticError::elab(
                            "MODULE aliases are only supported on the outermost statement",
                            *span,
                        ));
                    }
                    module = Some(name.clone());
                }
            }
        }
        Ok((out, module))
    }

    fn select(&self, s: &ast::SelectQuery) -> Result<Expr, SemanticError> {
        let result = self.expr(&s.result)?;
        let (subject, alias) = match &s.result_alias {
            Some(alias) => (Expr::free(alias.node.clone()), Some((alias, result))),
            None => (result, None),
        };
        let filtered = self.filter_order(subject, s.filter.as_ref(), &s.order_by)?;
        let out = self.offset_limit(filtered, s.offset.as_ref(), s.limit.as_ref())?;
        Ok(match alias {
            Some((name, bound)) => {
                Expr::with(bound, abstract_over_expr(self.names, &out, &name.node))
            }
            None => out,
        })
    }

    fn insert(&self, i: &ast::InsertQuery) -> Result<Expr, SemanticError> {
        let mut new = IndexMap::new();
        for el in &i.shape {
            let value = match (&el.kind, &el.body) {
                (
                    PointerKind::Property,
                    ShapeElementBody::Compute {
                        op: AssignOp::Assign,
                        expr,
                    },
                ) => self.expr(expr)?,
                _ => {
                    return Err(SemanticError::elab(
                        "INSERT shapes may only contain `field := expr` elements",
                        el.span,
                    ));
                }
            };
            if new.insert(el.name.node.clone(), value).is_some() {
                return Err(SemanticError::elab(
                    format!("field `{}` is assigned twice", el.name.node),
                    el.span,
                ));
            }
        }
        Ok(Expr::Insert {
            name: raw_name(&i.subject),
            new,
        })
    }

    fn update(&self, u: &ast::UpdateQuery) -> Result<Expr, SemanticError> {
        let subject = self.expr(&u.subject)?;
        let subject = self.filter_order(subject, u.filter.as_ref(), &[])?;
        let mut shape = ShapeExpr::empty();
        for el in &u.shape {
            let ShapeElementBody::Compute { op, expr } = &el.body else {
                return Err(SemanticError::elab(
                    "UPDATE shapes may only contain assignments",
                    el.span,
                ));
            };
            if el.kind == PointerKind::LinkProperty {
                return Err(SemanticError::elab(
                    "link properties cannot be updated directly",
                    el.span,
                ));
            }
            let value = self.expr(expr)?;
            let current = Expr::proj(Expr::free(PARTIAL_PATH_NAME), el.name.node.clone());
            let body = match op {
                AssignOp::Assign => value,
                AssignOp::Append => Expr::Union(Box::new(current), Box::new(value)),
                AssignOp::Subtract => Expr::app("except", vec![current, value]),
            };
            let label = Label::Str(el.name.node.clone());
            if shape.0.insert(label, self.partial_binding(&body)).is_some() {
                return Err(SemanticError::elab(
                    format!("field `{}` is assigned twice", el.name.node),
                    el.span,
                ));
            }
        }
        Ok(Expr::Update {
            subject: Box::new(subject),
            shape,
        })
    }

    fn delete(&self, d: &ast::DeleteQuery) -> Result<Expr, SemanticError> {
        let subject = self.expr(&d.subject)?;
        let subject = self.filter_order(subject, d.filter.as_ref(), &d.order_by)?;
        let subject = self.offset_limit(subject, d.offset.as_ref(), d.limit.as_ref())?;
        Ok(Expr::Delete {
            subject: Box::new(subject),
        })
    }

    fn filter_order(
        &self,
        subject: Expr,
        filter: Option<&ast::Expr>,
        order_by: &[ast::SortExpr],
    ) -> Result<Expr, SemanticError> {
        if filter.is_none() && order_by.is_empty() {
            return Ok(subject);
        }
        let filter = match filter {
            Some(f) => self.partial_binding(&self.expr(f)?),
            None => BindingExpr::new(self.names.fresh("x"), Expr::bool(true)),
        };
        let mut order = Vec::with_capacity(order_by.len());
        for key in order_by {
            let direction = match key.direction {
                SortDirection::Asc => OrderDirection::Ascending,
                SortDirection::Desc => OrderDirection::Descending,
            };
            // empty sorts as the smallest value unless told otherwise
            let empty = match (key.empty, direction) {
                (Some(NonesOrder::First), _) => EmptyOrder::EmptyFirst,
                (Some(NonesOrder::Last), _) => EmptyOrder::EmptyLast,
                (None, OrderDirection::Ascending) => EmptyOrder::EmptyFirst,
                (None, OrderDirection::Descending) => EmptyOrder::EmptyLast,
            };
            order.push(OrderKey {
                direction,
                empty,
                key: self.partial_binding(&self.expr(&key.expr)?),
            });
        }
        Ok(Expr::filter_order(subject, filter, order))
    }

    fn offset_limit(
        &self,
        subject: Expr,
        offset: Option<&ast::Expr>,
        limit: Option<&ast::Expr>,
    ) -> Result<Expr, SemanticError> {
        if offset.is_none() && limit.is_none() {
            return Ok(subject);
        }
        let offset = match offset {
            Some(o) => self.expr(o)?,
            None => Expr::int(0),
        };
        let limit = match limit {
            Some(l) => self.expr(l)?,
            None => Expr::empty_set(),
        };
        Ok(Expr::OffsetLimit {
            subject: Box::new(subject),
            offset: Box::new(offset),
            limit: Box::new(limit),
        })
    }

    fn shape(&self, elements: &[ast::ShapeElement]) -> Result<ShapeExpr, SemanticError> {
        let mut shape = ShapeExpr::empty();
        for el in elements {
            let name = el.name.node.clone();
            let here = Expr::free(PARTIAL_PATH_NAME);
            let (label, body) = match (&el.kind, &el.body) {
                (PointerKind::Property, ShapeElementBody::Select { shape: inner, filter, order_by, offset, limit }) => {
                    let mut body = Expr::proj(here, name.clone());
                    if let Some(inner) = inner {
                        body = Expr::shaped(body, self.shape(inner)?);
                    }
                    let body = self.filter_order(body, filter.as_ref(), order_by)?;
                    let body = self.offset_limit(body, offset.as_ref(), limit.as_ref())?;
                    (Label::Str(name), body)
                }
                (
                    PointerKind::LinkProperty,
                    ShapeElementBody::Select {
                        shape: None,
                        filter: None,
                        order_by,
                        offset: None,
                        limit: None,
                    },
                ) if order_by.is_empty() => (
                    Label::LinkProp(name.clone()),
                    Expr::LinkPropProj {
                        subject: Box::new(here),
                        linkprop: name,
                    },
                ),
                (PointerKind::LinkProperty, ShapeElementBody::Select { .. }) => {
                    return Err(SemanticError::elab(
                        "link properties cannot carry a nested shape or clauses",
                        el.span,
                    ));
                }
                (kind, ShapeElementBody::Compute { op: AssignOp::Assign, expr }) => {
                    let label = match kind {
                        PointerKind::Property => Label::Str(name),
                        PointerKind::LinkProperty => Label::LinkProp(name),
                    };
                    (label, self.expr(expr)?)
                }
                (_, ShapeElementBody::Compute { .. }) => {
                    return Err(SemanticError::elab(
                        "`+=` and `-=` are only allowed in UPDATE",
                        el.span,
                    ));
                }
            };
            if shape.0.contains_key(&label) {
                return Err(SemanticError::elab(
                    format!("duplicate shape element `{label}`"),
                    el.span,
                ));
            }
            shape.0.insert(label, self.partial_binding(&body));
        }
        Ok(shape)
    }

    fn exprs(&self, es: &[ast::Expr]) -> Result<Vec<Expr>, SemanticError> {
        es.iter().map(|e| self.expr(e)).collect()
    }

    fn expr(&self, e: &ast::Expr) -> Result<Expr, SemanticError> {
        Ok(match &e.kind {
            ExprKind::IntLit(i) => Expr::int(*i),
            ExprKind::FloatLit(f) => Expr::Val(Val::float(*f)),
            ExprKind::StrLit(s) => Expr::str(s.clone()),
            ExprKind::BoolLit(b) => Expr::bool(*b),
            ExprKind::Set(items) => Expr::MultiSet(self.exprs(items)?),
            ExprKind::Array(items) => Expr::Arr(self.exprs(items)?),
            ExprKind::Tuple(items) => Expr::UnnamedTuple(self.exprs(items)?),
            ExprKind::NamedTuple(items) => {
                let mut out = IndexMap::new();
                for (name, item) in items {
                    if out.insert(name.node.clone(), self.expr(item)?).is_some() {
                        return Err(SemanticError::elab(
                            format!("duplicate tuple element `{}`", name.node),
                            name.span,
                        ));
                    }
                }
                Expr::NamedTuple(out)
            }
            ExprKind::Name(q) => match raw_name(q) {
                RawName::Unqualified(n) => Expr::FreeVar(n),
                RawName::Qualified(q) => Expr::QualifiedName(q),
            },
            ExprKind::Path { root, steps } => {
                let mut out = match root {
                    Some(r) => self.expr(r)?,
                    None => Expr::free(PARTIAL_PATH_NAME),
                };
                for step in steps {
                    out = path_step(out, step);
                }
                out
            }
            ExprKind::Shape { subject, elements } => {
                Expr::shaped(self.expr(subject)?, self.shape(elements)?)
            }
            ExprKind::FreeObject(elements) => Expr::shaped(Expr::FreeObject, self.shape(elements)?),
            ExprKind::Cast { ty, expr } => Expr::TypeCast {
                tp: lower_type(ty),
                arg: Box::new(self.expr(expr)?),
            },
            ExprKind::Param { name, ty, optional } => Expr::Parameter {
                name: name.clone(),
                tp: lower_type(ty),
                is_required: !optional,
            },
            ExprKind::Detached(inner) => Expr::Detached(Box::new(self.expr(inner)?)),
            ExprKind::Unary { op, expr } => Expr::app(op.fn_name(), vec![self.expr(expr)?]),
            ExprKind::Binary {
                left,
                op: BinOp::Union,
                right,
            } => Expr::Union(Box::new(self.expr(left)?), Box::new(self.expr(right)?)),
            ExprKind::Binary { left, op, right } => {
                Expr::app(op.fn_name(), vec![self.expr(left)?, self.expr(right)?])
            }
            ExprKind::IsType { expr, ty, negated } => {
                let TypeExprKind::Name(q) = &ty.kind else {
                    return Err(SemanticError::elab(
                        "IS expects a type name",
                        ty.span,
                    ));
                };
                let test = Expr::IsTp {
                    subject: Box::new(self.expr(expr)?),
                    tp: raw_name(q),
                };
                if *negated {
                    Expr::app("not", vec![test])
                } else {
                    test
                }
            }
            ExprKind::IfElse {
                then_branch,
                condition,
                else_branch,
            } => Expr::IfElse {
                then_branch: Box::new(self.expr(then_branch)?),
                condition: Box::new(self.expr(condition)?),
                else_branch: Box::new(self.expr(else_branch)?),
            },
            ExprKind::Index { subject, index } => {
                Expr::app("_[_]", vec![self.expr(subject)?, self.expr(index)?])
            }
            ExprKind::Slice {
                subject,
                start,
                stop,
            } => {
                let subject = self.expr(subject)?;
                match (start, stop) {
                    (Some(a), Some(b)) => {
                        Expr::app("_[_:_]", vec![subject, self.expr(a)?, self.expr(b)?])
                    }
                    (Some(a), None) => Expr::app("_[_:]", vec![subject, self.expr(a)?]),
                    (None, Some(b)) => Expr::app("_[:_]", vec![subject, self.expr(b)?]),
                    (None, None) => {
                        return Err(SemanticError::elab(
                            "a slice needs a start or an end",
                            e.span,
                        ));
                    }
                }
            }
            ExprKind::Call { func, args } => {
                let mut positional = Vec::new();
                let mut kwargs = IndexMap::new();
                for arg in args {
                    match arg {
                        CallArg::Positional(a) => positional.push(self.expr(a)?),
                        CallArg::Named { name, value } => {
                            if kwargs.insert(name.node.clone(), self.expr(value)?).is_some() {
                                return Err(SemanticError::elab(
                                    format!("argument `{}` is passed twice", name.node),
                                    name.span,
                                ));
                            }
                        }
                    }
                }
                Expr::FunApp {
                    fun: raw_name(func),
                    overloading_index: None,
                    args: positional,
                    kwargs,
                }
            }
            ExprKind::Query(q) => Expr::Subquery(Box::new(self.query(q, false)?.0)),
        })
    }
}

fn path_step(subject: Expr, step: &PathStep) -> Expr {
    let subject = Box::new(subject);
    match step {
        PathStep::Prop(id) if id.node.parse::<usize>().is_ok() => Expr::TupleProj {
            subject,
            label: id.node.clone(),
        },
        PathStep::Prop(id) => Expr::ObjectProj {
            subject,
            label: id.node.clone(),
        },
        PathStep::BackLink(id) => Expr::BackLink {
            subject,
            label: id.node.clone(),
        },
        PathStep::LinkProp(id) => Expr::LinkPropProj {
            subject,
            linkprop: id.node.clone(),
        },
        PathStep::TypeIntersect(q) => Expr::TpIntersect {
            subject,
            tp: raw_name(q),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::{BindingExpr, alpha_equivalent};

    fn lower(src: &str) -> Expr {
        let q = eql_parse::parse_query(src).unwrap();
        lower_query(&NameGen::new(), &q).unwrap().expr
    }

    #[test]
    fn operators_become_unqualified_calls() {
        let e = lower("SELECT 1 + 2");
        assert_eq!(e, Expr::app("+", vec![Expr::int(1), Expr::int(2)]));
    }

    #[test]
    fn union_keeps_its_own_node() {
        assert!(matches!(lower("SELECT 1 UNION 2"), Expr::Union(..)));
    }

    #[test]
    fn shape_elements_bind_their_subject() {
        let e = lower("SELECT Person { name }");
        let Expr::Shaped { expr, shape } = e else {
            panic!("expected shape");
        };
        assert_eq!(*expr, Expr::free("Person"));
        let b = &shape.0[&Label::Str("name".into())];
        assert_eq!(*b.body, Expr::proj(Expr::BoundVar(b.var.clone()), "name"));
    }

    #[test]
    fn link_property_elements_use_their_own_label() {
        let Expr::Shaped { shape, .. } = lower("SELECT Person { friends: { @since } }") else {
            panic!("expected shape");
        };
        let outer = &shape.0[&Label::Str("friends".into())];
        let Expr::Shaped { shape: inner, .. } = &*outer.body else {
            panic!("expected nested shape");
        };
        assert!(inner.0.contains_key(&Label::LinkProp("since".into())));
    }

    #[test]
    fn filter_binds_partial_paths_to_the_row() {
        let e = lower("SELECT Person FILTER .age > 3");
        let expected = Expr::filter_order(
            Expr::free("Person"),
            BindingExpr::new(
                "r",
                Expr::app(">", vec![Expr::proj(Expr::BoundVar("r".into()), "age"), Expr::int(3)]),
            ),
            vec![],
        );
        assert!(alpha_equivalent(&e, &expected));
    }

    #[test]
    fn order_without_filter_gets_a_true_filter() {
        let Expr::FilterOrder { filter, order, .. } = lower("SELECT Person ORDER BY .name DESC") else {
            panic!("expected filter");
        };
        assert!(filter.body.is_true_literal());
        assert_eq!(order[0].direction, OrderDirection::Descending);
        assert_eq!(order[0].empty, EmptyOrder::EmptyLast);
    }

    #[test]
    fn with_aliases_become_binders() {
        let e = lower("WITH x := 1, y := x + 1 SELECT y");
        let expected = Expr::with(
            Expr::int(1),
            BindingExpr::new(
                "a",
                Expr::with(
                    Expr::app("+", vec![Expr::BoundVar("a".into()), Expr::int(1)]),
                    BindingExpr::new("b", Expr::BoundVar("b".into())),
                ),
            ),
        );
        assert!(alpha_equivalent(&e, &expected));
    }

    #[test]
    fn update_append_reads_the_current_value() {
        let Expr::Update { shape, .. } = lower("UPDATE Person SET { tags += 'x' }") else {
            panic!("expected update");
        };
        let b = &shape.0[&Label::Str("tags".into())];
        assert!(matches!(&*b.body, Expr::Union(l, _) if **l == Expr::proj(Expr::BoundVar(b.var.clone()), "tags")));
    }

    #[test]
    fn leading_dot_outside_a_clause_is_rejected() {
        let q = eql_parse::parse_query("SELECT .name").unwrap();
        assert!(lower_query(&NameGen::new(), &q).is_err());
    }

    #[test]
    fn duplicate_shape_elements_are_rejected() {
        let q = eql_parse::parse_query("SELECT Person { name, name }").unwrap();
        let err = lower_query(&NameGen::new(), &q).unwrap_err();
        assert!(err.message().contains("duplicate"));
    }

    #[test]
    fn module_alias_is_reported() {
        let q = eql_parse::parse_query("WITH MODULE test SELECT Person").unwrap();
        let lowered = lower_query(&NameGen::new(), &q).unwrap();
        assert_eq!(lowered.module, Some(vec!["test".to_string()]));
    }
}
