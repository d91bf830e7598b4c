//! Bidirectional type checking of elaborated IR.
//!
//! [`synthesize`] infers a type and cardinality for an expression and
//! returns the checked expression: names resolved, casts made explicit,
//! overloads picked and object-type names expanded to their concrete
//! subtypes. [`check_type`] checks against an expected type, inserting an
//! implicit (or, for assignments, an assignment) cast where one exists.

use indexmap::IndexMap;
use tracing::trace;

use eql_ir::{
    BindingExpr, CMMode, Cardinal, Expr, Label, ModuleName, NameGen, OrderKey, RawName, ResultTp,
    ShapeExpr, Tp, TpCastKind, Val, abstract_over_expr, instantiate_expr, PARTIAL_PATH_NAME,
};

use crate::casts::check_castable;
use crate::error::SemanticError;
use crate::resolve::{resolve_tp, resolve_type_name, try_resolve_simple_name};
use crate::schema::{DBSchema, TypeBody};
use crate::subtype::{concrete_subtypes, is_nominal_subtype, is_subtype};
use crate::type_ops::{
    combine_with_shape, intersect, is_tuple, mode_join, mode_product, mode_sum, tp_project,
    tuple_index, union, union_all, union_members,
};
use crate::{dml, overload};

type Result<T> = std::result::Result<T, SemanticError>;

#[derive(Clone)]
pub struct TcCtx<'a> {
    pub schema: &'a DBSchema,
    pub module: ModuleName,
    pub varctx: IndexMap<String, ResultTp>,
    pub names: &'a NameGen,
}

impl<'a> TcCtx<'a> {
    pub fn new(schema: &'a DBSchema, module: &[String], names: &'a NameGen) -> Self {
        Self {
            schema,
            module: module.to_vec(),
            varctx: IndexMap::new(),
            names,
        }
    }

    pub fn with_var(&self, var: &str, rt: ResultTp) -> TcCtx<'a> {
        let mut next = self.clone();
        next.varctx.insert(var.to_string(), rt);
        next
    }
}

/// Opens `b` with a fresh variable of type `bound`, synthesizes the body and
/// closes it over the same variable.
pub fn synthesize_binding(
    ctx: &TcCtx<'_>,
    b: &BindingExpr,
    bound: ResultTp,
) -> Result<(ResultTp, BindingExpr)> {
    let var = ctx.names.fresh(&b.var);
    let body = instantiate_expr(ctx.names, &Expr::free(&var), b);
    let (rt, body) = synthesize(&ctx.with_var(&var, bound), &body)?;
    Ok((rt, abstract_over_expr(ctx.names, &body, &var)))
}

pub fn check_binding(
    ctx: &TcCtx<'_>,
    b: &BindingExpr,
    bound: ResultTp,
    expected: &ResultTp,
    with_assignment_cast: bool,
) -> Result<BindingExpr> {
    let var = ctx.names.fresh(&b.var);
    let body = instantiate_expr(ctx.names, &Expr::free(&var), b);
    let body = check_type(&ctx.with_var(&var, bound), &body, expected, with_assignment_cast)?;
    Ok(abstract_over_expr(ctx.names, &body, &var))
}

fn check_binding_no_card(
    ctx: &TcCtx<'_>,
    b: &BindingExpr,
    bound: ResultTp,
    tp: &Tp,
) -> Result<(CMMode, BindingExpr)> {
    let var = ctx.names.fresh(&b.var);
    let body = instantiate_expr(ctx.names, &Expr::free(&var), b);
    let (mode, body) = check_type_no_card(&ctx.with_var(&var, bound), &body, tp, false)?;
    Ok((mode, abstract_over_expr(ctx.names, &body, &var)))
}

/// Checks `e` against `tp`, ignoring cardinality. Returns the cardinality
/// of `e` and the checked expression, wrapped in a cast when the match
/// needs one.
pub fn check_type_no_card(
    ctx: &TcCtx<'_>,
    e: &Expr,
    tp: &Tp,
    with_assignment_cast: bool,
) -> Result<(CMMode, Expr)> {
    match e {
        Expr::MultiSet(items) if items.is_empty() => return Ok((CMMode::AT_MOST_ONE, e.clone())),
        Expr::Arr(items)
            if items.is_empty() && matches!(tp, Tp::Composite { .. } | Tp::Any(_)) =>
        {
            return Ok((CMMode::ONE, e.clone()));
        }
        _ => {}
    }
    let (rt, checked) = synthesize(ctx, e)?;
    if is_subtype(ctx.schema, &rt.tp, tp) {
        return Ok((rt.mode, checked));
    }
    match check_castable(ctx.schema, &rt.tp, tp) {
        Some(kind @ TpCastKind::Implicit) => Ok((rt.mode, cast_to(rt.tp, tp, kind, checked))),
        Some(kind @ TpCastKind::Assignment) if with_assignment_cast => {
            Ok((rt.mode, cast_to(rt.tp, tp, kind, checked)))
        }
        _ => Err(SemanticError::type_error(format!(
            "expected a value of type {tp}, found {}",
            rt.tp
        ))),
    }
}

pub fn check_type(
    ctx: &TcCtx<'_>,
    e: &Expr,
    expected: &ResultTp,
    with_assignment_cast: bool,
) -> Result<Expr> {
    let (mode, checked) = check_type_no_card(ctx, e, &expected.tp, with_assignment_cast)?;
    if !mode.is_subcard_of(expected.mode) {
        return Err(SemanticError::type_error(format!(
            "cardinality mismatch: expected {}, found {mode}",
            expected.mode
        )));
    }
    Ok(checked)
}

fn cast_to(from: Tp, to: &Tp, kind: TpCastKind, arg: Expr) -> Expr {
    Expr::CheckedTypeCast {
        from,
        to: to.clone(),
        kind,
        arg: Box::new(arg),
    }
}

/// One member type of a set of scalars that every other member converts
/// to. `None` when some member is not a scalar or no member accepts all
/// the others.
fn join_scalars(ctx: &TcCtx<'_>, tps: &[Tp]) -> Option<Tp> {
    if !tps.iter().all(|t| matches!(t, Tp::Scalar(_))) {
        return None;
    }
    overload::join(ctx, tps)
}

/// Casts `item` to `joined` unless it already has a subtype of it.
fn cast_member(ctx: &TcCtx<'_>, tp: Tp, joined: &Tp, item: Expr) -> Expr {
    if is_subtype(ctx.schema, &tp, joined) {
        item
    } else {
        cast_to(tp, joined, TpCastKind::Implicit, item)
    }
}

/// Type of a literal value.
pub fn tp_of_val(v: &Val) -> Result<Tp> {
    Ok(match v {
        Val::Scalar(s) => Tp::Scalar(s.tp.clone()),
        Val::Ref(r) => Tp::named_link(r.tpname.clone()),
        Val::Free(_) => Tp::free_object(),
        Val::UnnamedTuple(vs) => Tp::unnamed_tuple(vs.iter().map(tp_of_val).collect::<Result<_>>()?),
        Val::NamedTuple(fields) => Tp::named_tuple(
            fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), tp_of_val(v)?)))
                .collect::<Result<_>>()?,
        ),
        Val::Arr(vs) => {
            let elems = vs.iter().map(tp_of_val).collect::<Result<Vec<_>>>()?;
            let elem = union_all(elems).ok_or_else(|| {
                SemanticError::type_error("an empty array literal needs a type; cast it")
            })?;
            Tp::arr(elem)
        }
    })
}

/// Infers the type and cardinality of `e`.
pub fn synthesize(ctx: &TcCtx<'_>, e: &Expr) -> Result<(ResultTp, Expr)> {
    let (rt, checked) = synthesize_inner(ctx, e)?;
    match &rt.tp {
        Tp::Object(_) => Err(SemanticError::internal(format!(
            "expression {e} synthesized a bare object type"
        ))),
        Tp::UncheckedName(n) => Err(SemanticError::internal(format!(
            "unresolved type name {n} after checking"
        ))),
        _ => {
            trace!(expr = %e, tp = %rt.tp, mode = %rt.mode, "synthesized");
            Ok((rt, checked))
        }
    }
}

fn synthesize_inner(ctx: &TcCtx<'_>, e: &Expr) -> Result<(ResultTp, Expr)> {
    match e {
        Expr::Val(v) => Ok((ResultTp::one(tp_of_val(v)?), e.clone())),

        Expr::FreeVar(v) => {
            if v == PARTIAL_PATH_NAME {
                return Err(SemanticError::internal("leading-dot path survived elaboration"));
            }
            if let Some(rt) = ctx.varctx.get(v) {
                return Ok((rt.clone(), e.clone()));
            }
            let q = try_resolve_simple_name(ctx.schema, &ctx.module, v)
                .ok_or_else(|| SemanticError::resolve(format!("unknown name `{v}`")))?;
            synthesize_inner(ctx, &Expr::QualifiedName(q))
        }

        Expr::QualifiedName(q) => {
            let td = ctx.schema.type_def(q).ok_or_else(|| {
                if ctx.schema.lookup(q).is_some() {
                    SemanticError::type_error(format!("function {q} used as a value"))
                } else {
                    SemanticError::resolve(format!("unknown name `{q}`"))
                }
            })?;
            if matches!(td.body, TypeBody::Scalar) {
                return Err(SemanticError::type_error(format!(
                    "scalar type {q} cannot be used as a set of values"
                )));
            }
            let members = concrete_subtypes(ctx.schema, q)
                .into_iter()
                .map(Expr::QualifiedName)
                .collect();
            Ok((
                ResultTp::new(Tp::named_link(q.clone()), CMMode::ANY),
                Expr::MultiSet(members),
            ))
        }

        Expr::QualifiedNameWithFilter { .. } => Err(SemanticError::internal(
            "storage filters are introduced after checking",
        )),

        Expr::FreeObject => Ok((ResultTp::one(Tp::free_object()), Expr::FreeObject)),

        Expr::ObjectProj { subject, label } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            if is_tuple(&srt.tp) {
                return project_tuple(srt, subject, label);
            }
            let field = tp_project(ctx.schema, &srt.tp, &Label::Str(label.clone()))?;
            let mode = srt.mode * field.mode;
            match field.tp {
                Tp::Computable { expr, tp } => Ok((
                    ResultTp::new(*tp, mode),
                    Expr::for_each(subject, *expr),
                )),
                Tp::UncheckedComputable(_) => Err(SemanticError::type_error(format!(
                    "computed field `{label}` is used before its own type is known"
                ))),
                Tp::Default { tp, .. } => Ok((
                    ResultTp::new(*tp, mode),
                    Expr::proj(subject, label.clone()),
                )),
                tp => Ok((ResultTp::new(tp, mode), Expr::proj(subject, label.clone()))),
            }
        }

        Expr::TupleProj { subject, label } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            project_tuple(srt, subject, label)
        }

        Expr::LinkPropProj { subject, linkprop } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            let field = tp_project(ctx.schema, &srt.tp, &Label::LinkProp(linkprop.clone()))?;
            Ok((
                ResultTp::new(field.tp, srt.mode * field.mode),
                Expr::LinkPropProj {
                    subject: Box::new(subject),
                    linkprop: linkprop.clone(),
                },
            ))
        }

        Expr::BackLink { subject, label } => {
            let (_, subject) = synthesize(ctx, subject)?;
            let mut sources: Vec<Tp> = Vec::new();
            for (name, td) in ctx.schema.type_defs() {
                if td.is_abstract {
                    continue;
                }
                let Some(field) = td.object().and_then(|o| o.get(label)) else {
                    continue;
                };
                if let Tp::NamedNominalLink { linkprop, .. } = &field.tp {
                    let source = Tp::NamedNominalLink {
                        name: RawName::Qualified(name),
                        linkprop: linkprop.clone(),
                    };
                    if !sources.contains(&source) {
                        sources.push(source);
                    }
                }
            }
            let tp = union_all(sources).ok_or_else(|| {
                SemanticError::type_error(format!("no object type has a link named `{label}`"))
            })?;
            Ok((
                ResultTp::new(tp, CMMode::ANY),
                Expr::BackLink {
                    subject: Box::new(subject),
                    label: label.clone(),
                },
            ))
        }

        Expr::IsTp { subject, tp } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            let q = resolve_type_name(ctx.schema, &ctx.module, tp)?;
            Ok((
                ResultTp::new(Tp::bool_tp(), srt.mode),
                Expr::IsTp {
                    subject: Box::new(subject),
                    tp: RawName::Qualified(q),
                },
            ))
        }

        Expr::TpIntersect { subject, tp } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            let q = resolve_type_name(ctx.schema, &ctx.module, tp)?;
            let target = Tp::named_link(q.clone());
            let members = union_members(&srt.tp);
            let result = if members.iter().all(|m| m.link_name().is_some()) {
                let kept = members
                    .into_iter()
                    .filter(|m| {
                        m.link_name()
                            .is_some_and(|n| is_nominal_subtype(ctx.schema, &n, &q))
                    })
                    .cloned();
                union_all(kept).unwrap_or(target)
            } else {
                intersect(srt.tp.clone(), target)
            };
            Ok((
                ResultTp::new(result, CMMode::new(Cardinal::Zero, srt.mode.upper)),
                Expr::TpIntersect {
                    subject: Box::new(subject),
                    tp: RawName::Qualified(q),
                },
            ))
        }

        Expr::FunApp {
            fun, args, kwargs, ..
        } => overload::synthesize_fun_app(ctx, fun, args, kwargs),

        Expr::TypeCast { tp, arg } => {
            let target = resolve_tp(ctx.schema, &ctx.module, tp)?;
            match arg.as_ref() {
                Expr::MultiSet(items) if items.is_empty() => {
                    return Ok((ResultTp::new(target, CMMode::AT_MOST_ONE), Expr::empty_set()));
                }
                Expr::Arr(items) if items.is_empty() => {
                    return Ok((ResultTp::one(target), Expr::Arr(Vec::new())));
                }
                _ => {}
            }
            let (art, arg) = synthesize(ctx, arg)?;
            let kind = check_castable(ctx.schema, &art.tp, &target).ok_or_else(|| {
                SemanticError::type_error(format!("cannot cast {} to {target}", art.tp))
            })?;
            Ok((
                ResultTp::new(target.clone(), art.mode),
                cast_to(art.tp, &target, kind, arg),
            ))
        }

        Expr::CheckedTypeCast {
            from,
            to,
            kind,
            arg,
        } => {
            let (art, arg) = synthesize(ctx, arg)?;
            Ok((
                ResultTp::new(to.clone(), art.mode),
                Expr::CheckedTypeCast {
                    from: from.clone(),
                    to: to.clone(),
                    kind: *kind,
                    arg: Box::new(arg),
                },
            ))
        }

        Expr::Parameter {
            name,
            tp,
            is_required,
        } => {
            let tp = resolve_tp(ctx.schema, &ctx.module, tp)?;
            let mode = if *is_required {
                CMMode::ONE
            } else {
                CMMode::AT_MOST_ONE
            };
            Ok((
                ResultTp::new(tp.clone(), mode),
                Expr::Parameter {
                    name: name.clone(),
                    tp,
                    is_required: *is_required,
                },
            ))
        }

        Expr::Shaped { expr, shape } => {
            let (srt, subject) = synthesize(ctx, expr)?;
            let (tp, shape) = check_shape_transform(ctx, shape, &srt.tp)?;
            Ok((ResultTp::new(tp, srt.mode), Expr::shaped(subject, shape)))
        }

        Expr::Union(l, r) => {
            let (lrt, l) = synthesize(ctx, l)?;
            let (rrt, r) = synthesize(ctx, r)?;
            let mode = lrt.mode + rrt.mode;
            if let Some(tp) = join_scalars(ctx, &[lrt.tp.clone(), rrt.tp.clone()]) {
                let l = cast_member(ctx, lrt.tp, &tp, l);
                let r = cast_member(ctx, rrt.tp, &tp, r);
                return Ok((ResultTp::new(tp, mode), Expr::Union(Box::new(l), Box::new(r))));
            }
            Ok((
                ResultTp::new(union(lrt.tp, rrt.tp), mode),
                Expr::Union(Box::new(l), Box::new(r)),
            ))
        }

        Expr::MultiSet(items) => {
            if items.is_empty() {
                return Err(SemanticError::type_error(
                    "an empty set needs a type; cast it, as in <str>{}",
                ));
            }
            let mut tps = Vec::new();
            let mut modes = Vec::new();
            let mut out = Vec::new();
            for item in items {
                let (rt, item) = synthesize(ctx, item)?;
                tps.push(rt.tp);
                modes.push(rt.mode);
                out.push(item);
            }
            let mode = mode_sum(modes).ok_or_else(|| SemanticError::internal("empty set literal"))?;
            if let Some(tp) = join_scalars(ctx, &tps) {
                let out = tps
                    .into_iter()
                    .zip(out)
                    .map(|(t, item)| cast_member(ctx, t, &tp, item))
                    .collect();
                return Ok((ResultTp::new(tp, mode), Expr::MultiSet(out)));
            }
            let tp = union_all(tps).ok_or_else(|| SemanticError::internal("empty set literal"))?;
            Ok((ResultTp::new(tp, mode), Expr::MultiSet(out)))
        }

        Expr::Subquery(inner) => {
            let (rt, inner) = synthesize(ctx, inner)?;
            Ok((rt, Expr::Subquery(Box::new(inner))))
        }

        Expr::Detached(inner) => {
            let (rt, inner) = synthesize(ctx, inner)?;
            Ok((rt, Expr::Detached(Box::new(inner))))
        }

        Expr::ConditionalDedup(inner) => {
            let (rt, inner) = synthesize(ctx, inner)?;
            Ok((rt, Expr::ConditionalDedup(Box::new(inner))))
        }

        Expr::With { bound, next } => {
            let (brt, bound) = synthesize(ctx, bound)?;
            let (nrt, next) = synthesize_binding(ctx, next, brt)?;
            Ok((nrt, Expr::with(bound, next)))
        }

        Expr::For { bound, next } => {
            let (brt, bound) = synthesize(ctx, bound)?;
            let (nrt, next) = synthesize_binding(ctx, next, ResultTp::one(brt.tp))?;
            Ok((
                ResultTp::new(nrt.tp, nrt.mode * brt.mode),
                Expr::for_each(bound, next),
            ))
        }

        Expr::OptionalFor { bound, next } => {
            let (brt, bound) = synthesize(ctx, bound)?;
            let var_mode = if brt.mode.lower == Cardinal::Zero {
                CMMode::AT_MOST_ONE
            } else {
                CMMode::ONE
            };
            let (nrt, next) = synthesize_binding(ctx, next, ResultTp::new(brt.tp, var_mode))?;
            let outer = CMMode::new(Cardinal::One, brt.mode.upper);
            Ok((
                ResultTp::new(nrt.tp, nrt.mode * outer),
                Expr::optional_for(bound, next),
            ))
        }

        Expr::FilterOrder {
            subject,
            filter,
            order,
        } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            let row = ResultTp::one(srt.tp.clone());
            let (_, filter) = check_binding_no_card(ctx, filter, row.clone(), &Tp::bool_tp())?;
            let order = order
                .iter()
                .map(|k| {
                    let (_, key) = synthesize_binding(ctx, &k.key, row.clone())?;
                    Ok(OrderKey {
                        direction: k.direction,
                        empty: k.empty,
                        key,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let mode = if filter.body.is_true_literal() {
                srt.mode
            } else if is_exclusive_filter(ctx.schema, &srt.tp, &filter) {
                CMMode::AT_MOST_ONE
            } else {
                CMMode::new(Cardinal::Zero, srt.mode.upper)
            };
            Ok((
                ResultTp::new(srt.tp, mode),
                Expr::filter_order(subject, filter, order),
            ))
        }

        Expr::OffsetLimit {
            subject,
            offset,
            limit,
        } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            let offset = check_single_int(ctx, offset, "OFFSET")?;
            let limit = check_single_int(ctx, limit, "LIMIT")?;
            let upper = match &limit {
                Expr::Val(v) if v.as_int().is_some_and(|n| n <= 1) => Cardinal::One,
                _ => srt.mode.upper,
            };
            Ok((
                ResultTp::new(srt.tp, CMMode::new(Cardinal::Zero, upper.min(srt.mode.upper))),
                Expr::OffsetLimit {
                    subject: Box::new(subject),
                    offset: Box::new(offset),
                    limit: Box::new(limit),
                },
            ))
        }

        Expr::Insert { name, new } => dml::check_insert(ctx, name, new),

        Expr::Update { subject, shape } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            let shape = dml::check_update_shape(ctx, shape, &srt.tp)?;
            Ok((
                srt,
                Expr::Update {
                    subject: Box::new(subject),
                    shape,
                },
            ))
        }

        Expr::Delete { subject } => {
            let (srt, subject) = synthesize(ctx, subject)?;
            if !union_members(&srt.tp).iter().all(|m| m.link_name().is_some()) {
                return Err(SemanticError::type_error(format!(
                    "only objects can be deleted, not values of type {}",
                    srt.tp
                )));
            }
            Ok((
                srt,
                Expr::Delete {
                    subject: Box::new(subject),
                },
            ))
        }

        Expr::IfElse {
            then_branch,
            condition,
            else_branch,
        } => {
            let (cmode, condition) = check_type_no_card(ctx, condition, &Tp::bool_tp(), false)?;
            let (trt, then_branch) = synthesize(ctx, then_branch)?;
            let (ert, else_branch) = synthesize(ctx, else_branch)?;
            Ok((
                ResultTp::new(union(trt.tp, ert.tp), mode_join(trt.mode, ert.mode) * cmode),
                Expr::IfElse {
                    then_branch: Box::new(then_branch),
                    condition: Box::new(condition),
                    else_branch: Box::new(else_branch),
                },
            ))
        }

        Expr::UnnamedTuple(items) => {
            let (tps, modes, items) = synthesize_all(ctx, items.iter())?;
            Ok((
                ResultTp::new(Tp::unnamed_tuple(tps), mode_product(modes)),
                Expr::UnnamedTuple(items),
            ))
        }

        Expr::NamedTuple(fields) => {
            let (tps, modes, items) = synthesize_all(ctx, fields.values())?;
            let labels: Vec<String> = fields.keys().cloned().collect();
            Ok((
                ResultTp::new(
                    Tp::named_tuple(labels.iter().cloned().zip(tps).collect()),
                    mode_product(modes),
                ),
                Expr::NamedTuple(labels.into_iter().zip(items).collect()),
            ))
        }

        Expr::Arr(items) => {
            let Some((first, rest)) = items.split_first() else {
                return Err(SemanticError::type_error(
                    "an empty array literal needs a type; cast it, as in <array<str>>[]",
                ));
            };
            let (frt, first) = synthesize(ctx, first)?;
            let mut modes = vec![frt.mode];
            let mut out = vec![first];
            for item in rest {
                let (mode, item) = check_type_no_card(ctx, item, &frt.tp, false)?;
                modes.push(mode);
                out.push(item);
            }
            Ok((
                ResultTp::new(Tp::arr(frt.tp), mode_product(modes)),
                Expr::Arr(out),
            ))
        }

        Expr::BoundVar(v) => Err(SemanticError::internal(format!(
            "bound variable `{v}` escaped its binder"
        ))),
        Expr::Binding(_) => Err(SemanticError::internal("bare binder in expression position")),
    }
}

fn synthesize_all<'e>(
    ctx: &TcCtx<'_>,
    items: impl Iterator<Item = &'e Expr>,
) -> Result<(Vec<Tp>, Vec<CMMode>, Vec<Expr>)> {
    let mut tps = Vec::new();
    let mut modes = Vec::new();
    let mut out = Vec::new();
    for item in items {
        let (rt, item) = synthesize(ctx, item)?;
        tps.push(rt.tp);
        modes.push(rt.mode);
        out.push(item);
    }
    Ok((tps, modes, out))
}

fn project_tuple(srt: ResultTp, subject: Expr, label: &str) -> Result<(ResultTp, Expr)> {
    let Tp::Composite { tps, labels, .. } = &srt.tp else {
        return Err(SemanticError::type_error(format!(
            "cannot project `{label}` from a value of type {}",
            srt.tp
        )));
    };
    let i = tuple_index(tps, labels, label).ok_or_else(|| {
        SemanticError::type_error(format!("tuple {} has no element `{label}`", srt.tp))
    })?;
    Ok((
        ResultTp::new(tps[i].clone(), srt.mode),
        Expr::TupleProj {
            subject: Box::new(subject),
            label: label.to_string(),
        },
    ))
}

fn check_single_int(ctx: &TcCtx<'_>, e: &Expr, clause: &str) -> Result<Expr> {
    let (mode, e) = check_type_no_card(ctx, e, &Tp::int_tp(), false)?;
    if !mode.is_singular() {
        return Err(SemanticError::type_error(format!(
            "{clause} expects at most one value, found cardinality {mode}"
        )));
    }
    Ok(e)
}

/// Checks every element of `shape` against one value of `subject_tp` and
/// returns the shaped type.
pub fn check_shape_transform(
    ctx: &TcCtx<'_>,
    shape: &ShapeExpr,
    subject_tp: &Tp,
) -> Result<(Tp, ShapeExpr)> {
    let mut fields = eql_ir::ObjectTp::empty();
    let mut linkprops = eql_ir::ObjectTp::empty();
    let mut out = ShapeExpr::empty();
    for (label, b) in &shape.0 {
        let (rt, b) = synthesize_binding(ctx, b, ResultTp::one(subject_tp.clone()))?;
        match label {
            Label::Str(l) => fields.0.insert(l.clone(), rt),
            Label::LinkProp(l) => linkprops.0.insert(l.clone(), rt),
        };
        out.0.insert(label.clone(), b);
    }
    Ok((combine_with_shape(subject_tp, &fields, &linkprops)?, out))
}

/// A filter `.f = v` selects at most one object when `f` is `id` or carries
/// an exclusive constraint on every type in the subject, and `v` is a
/// single literal or parameter.
fn is_exclusive_filter(schema: &DBSchema, subject_tp: &Tp, filter: &BindingExpr) -> bool {
    let Expr::FunApp {
        fun: RawName::Qualified(f),
        args,
        ..
    } = filter.body.as_ref()
    else {
        return false;
    };
    if !f.is("std", "=") || args.len() != 2 {
        return false;
    }
    let row = Expr::BoundVar(filter.var.clone());
    let field_of = |e: &Expr| match e {
        Expr::ObjectProj { subject, label } if **subject == row => Some(label.clone()),
        _ => None,
    };
    let (label, other) = match (field_of(&args[0]), field_of(&args[1])) {
        (Some(l), _) => (l, &args[1]),
        (None, Some(l)) => (l, &args[0]),
        (None, None) => return false,
    };
    if !is_single_value(other) {
        return false;
    }
    label == "id"
        || union_members(subject_tp).iter().all(|m| {
            m.link_name()
                .and_then(|n| schema.type_def(&n))
                .is_some_and(|td| td.is_exclusive(&label))
        })
}

fn is_single_value(e: &Expr) -> bool {
    match e {
        Expr::Val(_) | Expr::Parameter { .. } => true,
        Expr::CheckedTypeCast { arg, .. } => is_single_value(arg),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::QualifiedName;

    use crate::schema::{ModuleEntity, ModuleState, TypeDef, DBModule};

    fn schema() -> DBSchema {
        let mut s = DBSchema::new();
        let std = vec!["std".to_string()];
        let mut m = DBModule::default();
        for scalar in ["int64", "str", "bool", "uuid"] {
            m.defs.insert(
                scalar.into(),
                ModuleEntity::TypeDef(TypeDef {
                    body: TypeBody::Scalar,
                    is_abstract: false,
                    constraints: Vec::new(),
                    indexes: Vec::new(),
                }),
            );
        }
        s.set_module(std, ModuleState::Checked(m));
        s
    }

    #[test]
    fn literals_are_singletons() {
        let s = schema();
        let names = NameGen::new();
        let ctx = TcCtx::new(&s, &["default".to_string()], &names);
        let (rt, _) = synthesize(&ctx, &Expr::int(3)).unwrap();
        assert_eq!(rt, ResultTp::one(Tp::int_tp()));
    }

    #[test]
    fn set_literals_sum_cardinalities() {
        let s = schema();
        let names = NameGen::new();
        let ctx = TcCtx::new(&s, &["default".to_string()], &names);
        let (rt, _) = synthesize(&ctx, &Expr::MultiSet(vec![Expr::int(1), Expr::int(2)])).unwrap();
        assert_eq!(rt.mode, CMMode::AT_LEAST_ONE);
        assert!(synthesize(&ctx, &Expr::empty_set()).is_err());
    }

    #[test]
    fn mixed_numeric_sets_cast_to_the_wider_member() {
        let mut s = schema();
        s.casts.insert(
            (QualifiedName::std("int64"), QualifiedName::std("float64")),
            TpCastKind::Implicit,
        );
        let names = NameGen::new();
        let ctx = TcCtx::new(&s, &["default".to_string()], &names);
        let set = Expr::MultiSet(vec![Expr::int(1), Expr::Val(Val::float(2.5))]);
        let (rt, out) = synthesize(&ctx, &set).unwrap();
        assert_eq!(rt.tp, Tp::float_tp());
        let Expr::MultiSet(items) = out else {
            panic!("expected a set, got {out}");
        };
        assert!(matches!(&items[0], Expr::CheckedTypeCast { to, .. } if *to == Tp::float_tp()));
        assert!(matches!(&items[1], Expr::Val(_)));
    }

    #[test]
    fn with_binds_the_full_cardinality() {
        let s = schema();
        let names = NameGen::new();
        let ctx = TcCtx::new(&s, &["default".to_string()], &names);
        let e = Expr::with(
            Expr::MultiSet(vec![Expr::str("a"), Expr::str("b")]),
            BindingExpr::new("x", Expr::BoundVar("x".into())),
        );
        let (rt, _) = synthesize(&ctx, &e).unwrap();
        assert_eq!(rt, ResultTp::new(Tp::str_tp(), CMMode::AT_LEAST_ONE));
    }

    #[test]
    fn unknown_names_fail_to_resolve() {
        let s = schema();
        let names = NameGen::new();
        let ctx = TcCtx::new(&s, &["default".to_string()], &names);
        let err = synthesize(&ctx, &Expr::QualifiedName(QualifiedName::new(["default", "Nope"])))
            .unwrap_err();
        assert!(matches!(err, SemanticError::Resolve { .. }));
    }
}
