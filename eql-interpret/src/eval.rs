use std::cmp::Ordering;

use indexmap::IndexMap;
use tracing::{debug, trace};

use eql_core::{DBSchema, FuncImpl, is_nominal_subtype, is_subtype};
use eql_ir::{
    BindingExpr, EdgeId, EmptyOrder, Expr, Label, Marker, MultiSet, ObjectVal, OrderDirection,
    OrderKey, ParamModifier, QualifiedName, RawName, RefVal, ShapeExpr, StorageFilter, Tp, Val,
    compare_vals, object_dedup, param_var_name,
};
use eql_storage::{EdgeDatabase, Fields};

use crate::builtins::{builtin, cast_val};
use crate::error::{EvalError, Result};

/// Bound parameter values, keyed by parameter name without the `$`.
pub type Variables = IndexMap<String, MultiSet>;

/// Tree-walking evaluator over checked IR.
///
/// Variables live on a stack that grows as binders are entered. Computed
/// fields and function bodies are closed terms, so a plain stack is enough.
pub struct Evaluator<'a> {
    schema: &'a DBSchema,
    db: &'a mut EdgeDatabase,
    vars: Vec<(String, MultiSet)>,
}

/// Evaluates one statement and flushes its writes. Writes staged by a
/// statement that fails are discarded.
pub fn run_expr(
    schema: &DBSchema,
    db: &mut EdgeDatabase,
    expr: &Expr,
    variables: &Variables,
) -> Result<MultiSet> {
    let out = Evaluator::new(schema, &mut *db)
        .with_variables(variables)
        .eval(expr);
    match out {
        Ok(vals) => {
            db.commit_dml()?;
            Ok(vals)
        }
        Err(e) => {
            debug!(error = %e, "statement failed, discarding staged writes");
            db.discard_dml();
            Err(e)
        }
    }
}

impl<'a> Evaluator<'a> {
    pub fn new(schema: &'a DBSchema, db: &'a mut EdgeDatabase) -> Self {
        Self {
            schema,
            db,
            vars: Vec::new(),
        }
    }

    pub fn with_variables(mut self, variables: &Variables) -> Self {
        for (name, vals) in variables {
            self.vars.push((param_var_name(name), vals.clone()));
        }
        self
    }

    pub fn eval(&mut self, e: &Expr) -> Result<MultiSet> {
        match e {
            Expr::Val(v) => Ok(vec![v.clone()]),
            Expr::FreeVar(v) | Expr::BoundVar(v) => self.lookup(v),
            Expr::Parameter {
                name,
                tp,
                is_required,
            } => self.parameter(name, tp, *is_required),
            Expr::QualifiedName(q) => self.scan(q, &StorageFilter::True),
            Expr::QualifiedNameWithFilter { name, filter } => {
                let filter = filter.try_map(&mut |arg| self.eval(arg))?;
                self.scan(name, &filter)
            }
            Expr::FreeObject => Ok(vec![Val::Free(ObjectVal::empty())]),

            Expr::ObjectProj { subject, label } => {
                let mut out = Vec::new();
                for v in self.eval(subject)? {
                    out.extend(self.project(&v, label)?);
                }
                Ok(out)
            }
            Expr::TupleProj { subject, label } => self
                .eval(subject)?
                .iter()
                .map(|v| tuple_proj(v, label))
                .collect(),
            Expr::LinkPropProj { subject, linkprop } => {
                let key = Label::LinkProp(linkprop.clone());
                Ok(self
                    .eval(subject)?
                    .iter()
                    .flat_map(|v| {
                        v.object_val()
                            .and_then(|o| o.get(&key))
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect())
            }
            Expr::BackLink { subject, label } => {
                let ids = self
                    .eval(subject)?
                    .iter()
                    .map(ref_id)
                    .collect::<Result<Vec<EdgeId>>>()?;
                Ok(self.db.reverse_project(&ids, label)?)
            }
            Expr::IsTp { subject, tp } => {
                let q = qualified(tp)?;
                Ok(self
                    .eval(subject)?
                    .iter()
                    .map(|v| Val::bool(self.value_is(v, q)))
                    .collect())
            }
            Expr::TpIntersect { subject, tp } => {
                let q = qualified(tp)?;
                let vals = self.eval(subject)?;
                Ok(vals.into_iter().filter(|v| self.value_is(v, q)).collect())
            }

            Expr::FunApp {
                fun,
                overloading_index,
                args,
                kwargs,
            } => {
                if !kwargs.is_empty() {
                    return Err(EvalError::internal(format!(
                        "keyword arguments of {fun} survived checking"
                    )));
                }
                self.call(fun, *overloading_index, args)
            }
            Expr::TypeCast { tp, .. } => Err(EvalError::internal(format!(
                "unchecked cast to {tp}"
            ))),
            Expr::CheckedTypeCast { to, arg, .. } => {
                let vals = self.eval(arg)?;
                vals.iter().map(|v| cast_val(self.schema, v, to)).collect()
            }

            Expr::Union(l, r) => {
                let mut out = self.eval(l)?;
                out.extend(self.eval(r)?);
                Ok(out)
            }
            Expr::MultiSet(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(self.eval(item)?);
                }
                Ok(out)
            }
            Expr::Shaped { expr, shape } => {
                let vals = self.eval(expr)?;
                vals.into_iter()
                    .map(|v| self.apply_shape(v, shape))
                    .collect()
            }
            Expr::FilterOrder {
                subject,
                filter,
                order,
            } => self.filter_order(subject, filter, order),
            Expr::OffsetLimit {
                subject,
                offset,
                limit,
            } => {
                let vals = self.eval(subject)?;
                let skip = self.count_arg(offset, "OFFSET")?.unwrap_or(0);
                let take = self.count_arg(limit, "LIMIT")?.unwrap_or(usize::MAX);
                Ok(vals.into_iter().skip(skip).take(take).collect())
            }

            Expr::Insert { name, new } => self.insert(qualified(name)?, new),
            Expr::Update { subject, shape } => self.update(subject, shape),
            Expr::Delete { subject } => {
                let vals = self.eval(subject)?;
                for v in &vals {
                    let r = v.as_ref().ok_or_else(|| {
                        EvalError::runtime(format!("cannot delete {v}, it is not an object"))
                    })?;
                    self.db.delete(r.id, r.tpname.clone());
                }
                debug!(count = vals.len(), "staged deletes");
                Ok(vals)
            }

            Expr::With { bound, next } => {
                let vals = self.eval(bound)?;
                self.eval_binding(next, vals)
            }
            Expr::For { bound, next } => {
                let mut out = Vec::new();
                for v in self.eval(bound)? {
                    out.extend(self.eval_binding(next, vec![v])?);
                }
                Ok(out)
            }
            Expr::OptionalFor { bound, next } => {
                let vals = self.eval(bound)?;
                if vals.is_empty() {
                    return self.eval_binding(next, Vec::new());
                }
                let mut out = Vec::new();
                for v in vals {
                    out.extend(self.eval_binding(next, vec![v])?);
                }
                Ok(out)
            }
            Expr::Binding(_) => Err(EvalError::internal("bare binder outside a function body")),

            Expr::Subquery(inner) | Expr::Detached(inner) => self.eval(inner),
            Expr::ConditionalDedup(inner) => Ok(object_dedup(self.eval(inner)?)),
            Expr::IfElse {
                then_branch,
                condition,
                else_branch,
            } => {
                let mut out = Vec::new();
                for c in self.eval(condition)? {
                    let branch = match c.as_bool() {
                        Some(true) => then_branch,
                        Some(false) => else_branch,
                        None => {
                            return Err(EvalError::runtime(format!(
                                "IF condition evaluated to {c}"
                            )));
                        }
                    };
                    out.extend(self.eval(branch)?);
                }
                Ok(out)
            }

            Expr::UnnamedTuple(items) => Ok(self
                .product(items.iter())?
                .into_iter()
                .map(Val::UnnamedTuple)
                .collect()),
            Expr::NamedTuple(fields) => {
                let rows = self.product(fields.values())?;
                Ok(rows
                    .into_iter()
                    .map(|row| Val::NamedTuple(fields.keys().cloned().zip(row).collect()))
                    .collect())
            }
            Expr::Arr(items) => Ok(self
                .product(items.iter())?
                .into_iter()
                .map(Val::Arr)
                .collect()),
        }
    }

    fn eval_binding(&mut self, b: &BindingExpr, vals: MultiSet) -> Result<MultiSet> {
        self.vars.push((b.var.clone(), vals));
        let out = self.eval(&b.body);
        self.vars.pop();
        out
    }

    fn lookup(&self, name: &str) -> Result<MultiSet> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EvalError::internal(format!("unbound variable {name}")))
    }

    fn parameter(&self, name: &str, tp: &Tp, required: bool) -> Result<MultiSet> {
        let key = param_var_name(name);
        match self.vars.iter().rev().find(|(k, _)| *k == key) {
            Some((_, vals)) if !vals.is_empty() || !required => {
                vals.iter().map(|v| cast_val(self.schema, v, tp)).collect()
            }
            None if !required => Ok(Vec::new()),
            _ => Err(EvalError::MissingParameter(name.to_string())),
        }
    }

    fn scan(&self, tp: &QualifiedName, filter: &StorageFilter) -> Result<MultiSet> {
        let ids = self.db.query_ids_for_a_type(tp, filter)?;
        trace!(%tp, found = ids.len(), "scanned");
        Ok(ids
            .into_iter()
            .map(|id| Val::reference(id, tp.clone()))
            .collect())
    }

    fn project(&self, v: &Val, label: &str) -> Result<MultiSet> {
        let key = Label::Str(label.to_string());
        match v {
            Val::Ref(r) => {
                if let Some(vals) = r.val.get(&key) {
                    return Ok(vals.clone());
                }
                if label == "id" {
                    return Ok(vec![Val::uuid(r.id)]);
                }
                Ok(self.db.project(r.id, &r.tpname, label)?)
            }
            Val::Free(o) => o.get(&key).cloned().ok_or_else(|| {
                EvalError::runtime(format!("free object has no field `{label}`"))
            }),
            Val::NamedTuple(_) | Val::UnnamedTuple(_) => Ok(vec![tuple_proj(v, label)?]),
            other => Err(EvalError::runtime(format!(
                "cannot project `{label}` from {other}"
            ))),
        }
    }

    fn value_is(&self, v: &Val, tp: &QualifiedName) -> bool {
        match v {
            Val::Ref(r) => is_nominal_subtype(self.schema, &r.tpname, tp),
            Val::Free(_) => is_nominal_subtype(self.schema, &QualifiedName::std("FreeObject"), tp),
            Val::Scalar(s) => is_subtype(
                self.schema,
                &Tp::Scalar(s.tp.clone()),
                &Tp::Scalar(tp.clone()),
            ),
            _ => false,
        }
    }

    fn apply_shape(&mut self, v: Val, shape: &ShapeExpr) -> Result<Val> {
        let mut computed = Vec::with_capacity(shape.0.len());
        for (label, b) in &shape.0 {
            computed.push((label.clone(), self.eval_binding(b, vec![v.clone()])?));
        }
        match v {
            Val::Ref(mut r) => {
                overlay(&mut r.val, computed, Marker::Visible);
                Ok(Val::Ref(r))
            }
            Val::Free(mut o) => {
                overlay(&mut o, computed, Marker::Visible);
                Ok(Val::Free(o))
            }
            other => Err(EvalError::runtime(format!(
                "cannot apply a shape to {other}"
            ))),
        }
    }

    fn filter_order(
        &mut self,
        subject: &Expr,
        filter: &BindingExpr,
        order: &[OrderKey],
    ) -> Result<MultiSet> {
        let vals = self.eval(subject)?;
        let unfiltered = matches!(filter.body.as_ref(), Expr::Val(b) if b.as_bool() == Some(true));
        let mut kept = Vec::with_capacity(vals.len());
        for v in vals {
            if unfiltered
                || self
                    .eval_binding(filter, vec![v.clone()])?
                    .iter()
                    .any(|b| b.as_bool() == Some(true))
            {
                kept.push(v);
            }
        }
        if order.is_empty() {
            return Ok(kept);
        }
        let mut keyed = Vec::with_capacity(kept.len());
        for v in kept {
            let mut keys = Vec::with_capacity(order.len());
            for k in order {
                keys.push(self.eval_binding(&k.key, vec![v.clone()])?);
            }
            keyed.push((keys, v));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_keys(order, a, b));
        Ok(keyed.into_iter().map(|(_, v)| v).collect())
    }

    fn count_arg(&mut self, e: &Expr, clause: &str) -> Result<Option<usize>> {
        let vals = self.eval(e)?;
        let Some(v) = vals.first() else {
            return Ok(None);
        };
        let n = v
            .as_int()
            .ok_or_else(|| EvalError::runtime(format!("{clause} must be an integer, got {v}")))?;
        usize::try_from(n)
            .map(Some)
            .map_err(|_| EvalError::runtime(format!("{clause} must not be negative, got {n}")))
    }

    fn insert(&mut self, tp: &QualifiedName, new: &IndexMap<String, Expr>) -> Result<MultiSet> {
        let id = self.db.next_id()?;
        let mut fields = Fields::new();
        for (label, e) in new {
            let vals = self.eval(e)?;
            fields.insert(label.clone(), vals.iter().map(storage_form).collect());
        }
        self.db.insert(id, tp.clone(), Fields::new());
        self.db.update(id, tp.clone(), fields.clone());
        debug!(%tp, id, "staged insert");
        let mut val = ObjectVal::empty();
        overlay(
            &mut val,
            fields.into_iter().map(|(k, v)| (Label::Str(k), v)).collect(),
            Marker::Invisible,
        );
        Ok(vec![Val::Ref(RefVal {
            id,
            tpname: tp.clone(),
            val,
        })])
    }

    fn update(&mut self, subject: &Expr, shape: &ShapeExpr) -> Result<MultiSet> {
        let targets = self.eval(subject)?;
        let mut out = Vec::with_capacity(targets.len());
        for t in targets {
            let Val::Ref(r) = &t else {
                return Err(EvalError::runtime(format!(
                    "cannot update {t}, it is not an object"
                )));
            };
            let mut fields = Fields::new();
            for (label, b) in &shape.0 {
                let vals = self.eval_binding(b, vec![t.clone()])?;
                fields.insert(label.name().to_string(), vals.iter().map(storage_form).collect());
            }
            self.db.update(r.id, r.tpname.clone(), fields.clone());

            let mut val = ObjectVal(
                r.val
                    .0
                    .iter()
                    .map(|(k, (_, vs))| (k.clone(), (Marker::Invisible, vs.clone())))
                    .collect(),
            );
            overlay(
                &mut val,
                fields.into_iter().map(|(k, v)| (Label::Str(k), v)).collect(),
                Marker::Invisible,
            );
            out.push(Val::Ref(RefVal {
                id: r.id,
                tpname: r.tpname.clone(),
                val,
            }));
        }
        debug!(count = out.len(), "staged updates");
        Ok(out)
    }

    fn call(&mut self, fun: &RawName, index: Option<usize>, args: &[Expr]) -> Result<MultiSet> {
        let schema = self.schema;
        let name = qualified(fun)?;
        let def = schema
            .func_defs(name)
            .and_then(|defs| defs.get(index.unwrap_or(0)))
            .ok_or_else(|| EvalError::internal(format!("no overload {index:?} of {name}")))?;

        let mut evaluated = Vec::with_capacity(args.len());
        for a in args {
            evaluated.push(self.eval(a)?);
        }
        let calls = arg_combinations(&def.tp.args_mod, evaluated);
        trace!(%name, calls = calls.len(), "applying function");

        let mut out = Vec::new();
        match &def.body {
            FuncImpl::Builtin => {
                let f = builtin(name).ok_or_else(|| EvalError::MissingBuiltin(name.to_string()))?;
                for c in calls {
                    out.extend(f(&def.tp.ret_tp.tp, c)?);
                }
            }
            FuncImpl::Defined(body) => {
                for c in calls {
                    out.extend(self.apply_defined(body, c)?);
                }
            }
        }
        Ok(out)
    }

    /// Runs a user-defined function body, a chain of binders with one
    /// binder per parameter, on one argument combination.
    fn apply_defined(&mut self, body: &Expr, args: Vec<MultiSet>) -> Result<MultiSet> {
        let outer = std::mem::take(&mut self.vars);
        let mut cur = body;
        let mut args = args.into_iter();
        while let Expr::Binding(b) = cur {
            let Some(a) = args.next() else {
                break;
            };
            self.vars.push((b.var.clone(), a));
            cur = &b.body;
        }
        let out = self.eval(cur);
        self.vars = outer;
        out
    }

    /// Cartesian product of the evaluated items, in item order.
    fn product<'e>(&mut self, items: impl Iterator<Item = &'e Expr>) -> Result<Vec<Vec<Val>>> {
        let mut rows: Vec<Vec<Val>> = vec![Vec::new()];
        for item in items {
            let vals = self.eval(item)?;
            rows = rows
                .into_iter()
                .flat_map(|row| {
                    vals.iter().map(move |v| {
                        let mut row = row.clone();
                        row.push(v.clone());
                        row
                    })
                })
                .collect();
        }
        Ok(rows)
    }
}

/// Splits evaluated arguments into the argument lists of the individual
/// calls. Singleton positions fan out per element, an empty optional
/// position contributes one empty argument and set positions pass through.
fn arg_combinations(mods: &[ParamModifier], args: Vec<MultiSet>) -> Vec<Vec<MultiSet>> {
    let mut calls: Vec<Vec<MultiSet>> = vec![Vec::new()];
    for (i, vals) in args.into_iter().enumerate() {
        let choices: Vec<MultiSet> = match mods.get(i).copied().unwrap_or(ParamModifier::Singleton) {
            ParamModifier::SetOf => vec![vals],
            ParamModifier::Optional if vals.is_empty() => vec![Vec::new()],
            ParamModifier::Optional | ParamModifier::Singleton => {
                vals.into_iter().map(|v| vec![v]).collect()
            }
        };
        calls = calls
            .into_iter()
            .flat_map(|call| {
                choices.iter().map(move |c| {
                    let mut call = call.clone();
                    call.push(c.clone());
                    call
                })
            })
            .collect();
    }
    calls
}

fn compare_keys(order: &[OrderKey], a: &[MultiSet], b: &[MultiSet]) -> Ordering {
    for ((k, x), y) in order.iter().zip(a).zip(b) {
        let empty_first = k.empty == EmptyOrder::EmptyFirst;
        let ord = match (x.first(), y.first()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) if empty_first => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) if empty_first => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => match k.direction {
                OrderDirection::Ascending => compare_vals(l, r),
                OrderDirection::Descending => compare_vals(r, l),
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Replaces or appends entries, keeping the position of untouched ones.
fn overlay(obj: &mut ObjectVal, entries: Vec<(Label, MultiSet)>, marker: Marker) {
    for (label, vals) in entries {
        obj.0.shift_remove(&label);
        obj.0.insert(label, (marker, vals));
    }
}

/// What a link target looks like once stored: its id, type and the
/// link properties set on the edge.
fn storage_form(v: &Val) -> Val {
    match v {
        Val::Ref(r) => Val::Ref(RefVal {
            id: r.id,
            tpname: r.tpname.clone(),
            val: ObjectVal(
                r.val
                    .0
                    .iter()
                    .filter(|(k, _)| matches!(k, Label::LinkProp(_)))
                    .map(|(k, (_, vs))| (k.clone(), (Marker::Invisible, vs.clone())))
                    .collect(),
            ),
        }),
        other => other.clone(),
    }
}

fn tuple_proj(v: &Val, label: &str) -> Result<Val> {
    let found = match v {
        Val::UnnamedTuple(items) => label.parse::<usize>().ok().and_then(|i| items.get(i)),
        Val::NamedTuple(items) => items.get(label).or_else(|| {
            label
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_index(i))
                .map(|(_, v)| v)
        }),
        _ => None,
    };
    found
        .cloned()
        .ok_or_else(|| EvalError::runtime(format!("{v} has no element `{label}`")))
}

fn ref_id(v: &Val) -> Result<EdgeId> {
    v.as_ref()
        .map(|r| r.id)
        .ok_or_else(|| EvalError::runtime(format!("expected an object, got {v}")))
}

fn qualified(name: &RawName) -> Result<&QualifiedName> {
    match name {
        RawName::Qualified(q) => Ok(q),
        RawName::Unqualified(n) => Err(EvalError::internal(format!("unresolved name {n}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(direction: OrderDirection, empty: EmptyOrder) -> OrderKey {
        OrderKey {
            direction,
            empty,
            key: BindingExpr::new("x", Expr::BoundVar("x".into())),
        }
    }

    #[test]
    fn singleton_arguments_fan_out_and_sets_pass_whole() {
        let calls = arg_combinations(
            &[ParamModifier::Singleton, ParamModifier::SetOf],
            vec![vec![Val::int(1), Val::int(2)], vec![Val::int(7), Val::int(8)]],
        );
        assert_eq!(
            calls,
            vec![
                vec![vec![Val::int(1)], vec![Val::int(7), Val::int(8)]],
                vec![vec![Val::int(2)], vec![Val::int(7), Val::int(8)]],
            ]
        );
    }

    #[test]
    fn empty_optional_argument_still_calls_once() {
        let calls = arg_combinations(
            &[ParamModifier::Optional, ParamModifier::Singleton],
            vec![vec![], vec![Val::int(1)]],
        );
        assert_eq!(calls, vec![vec![vec![], vec![Val::int(1)]]]);
        let none = arg_combinations(&[ParamModifier::Singleton], vec![vec![]]);
        assert!(none.is_empty());
    }

    #[test]
    fn empty_keys_follow_their_annotation() {
        let first = [key(OrderDirection::Ascending, EmptyOrder::EmptyFirst)];
        let last = [key(OrderDirection::Descending, EmptyOrder::EmptyLast)];
        let empty = vec![vec![]];
        let one = vec![vec![Val::int(1)]];
        let two = vec![vec![Val::int(2)]];
        assert_eq!(compare_keys(&first, &empty, &one), Ordering::Less);
        assert_eq!(compare_keys(&last, &empty, &one), Ordering::Greater);
        assert_eq!(compare_keys(&last, &two, &one), Ordering::Less);
        assert_eq!(compare_keys(&first, &two, &one), Ordering::Greater);
    }

    #[test]
    fn stored_links_keep_only_link_properties() {
        let mut val = ObjectVal::empty();
        val.0.insert(Label::Str("name".into()), (Marker::Visible, vec![Val::str("b")]));
        val.0.insert(Label::LinkProp("w".into()), (Marker::Visible, vec![Val::int(1)]));
        let stored = storage_form(&Val::Ref(RefVal {
            id: 3,
            tpname: QualifiedName::new(["default", "B"]),
            val,
        }));
        let r = stored.as_ref().unwrap();
        assert_eq!(r.val.0.len(), 1);
        assert_eq!(
            r.val.0.get(&Label::LinkProp("w".into())),
            Some(&(Marker::Invisible, vec![Val::int(1)]))
        );
    }

    #[test]
    fn tuples_project_by_position_and_name() {
        let t = Val::UnnamedTuple(vec![Val::int(1), Val::str("a")]);
        assert_eq!(tuple_proj(&t, "1").unwrap(), Val::str("a"));
        assert!(tuple_proj(&t, "2").is_err());
        let named = Val::NamedTuple([("x".to_string(), Val::int(5))].into_iter().collect());
        assert_eq!(tuple_proj(&named, "x").unwrap(), Val::int(5));
        assert_eq!(tuple_proj(&named, "0").unwrap(), Val::int(5));
    }

    #[test]
    fn offset_and_limit_skip_and_truncate() {
        let schema = DBSchema::new();
        let mut db = EdgeDatabase::in_memory();
        let e = Expr::OffsetLimit {
            subject: Box::new(Expr::MultiSet((1..=5).map(|i| Expr::Val(Val::int(i))).collect())),
            offset: Box::new(Expr::Val(Val::int(1))),
            limit: Box::new(Expr::MultiSet(vec![])),
        };
        let out = run_expr(&schema, &mut db, &e, &Variables::new()).unwrap();
        assert_eq!(out, (2..=5).map(Val::int).collect::<Vec<_>>());
    }

    #[test]
    fn missing_required_parameter_is_an_error() {
        let schema = DBSchema::new();
        let mut db = EdgeDatabase::in_memory();
        let e = Expr::Parameter {
            name: "x".into(),
            tp: Tp::int_tp(),
            is_required: true,
        };
        let err = run_expr(&schema, &mut db, &e, &Variables::new()).unwrap_err();
        assert!(matches!(err, EvalError::MissingParameter(n) if n == "x"));
        let optional = Expr::Parameter {
            name: "x".into(),
            tp: Tp::int_tp(),
            is_required: false,
        };
        assert!(run_expr(&schema, &mut db, &optional, &Variables::new()).unwrap().is_empty());
    }
}
