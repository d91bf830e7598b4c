//! Native implementations of the `std` functions and operators, and the
//! runtime side of casts.

use std::cmp::Ordering;

use eql_core::{DBSchema, ancestors};
use eql_ir::{CompositeKind, MultiSet, Prim, QualifiedName, Tp, Val, compare_vals, show_val};

use crate::error::{EvalError, Result};
use crate::json::val_to_json;

/// A builtin receives the declared return type and one multiset per
/// parameter, already split according to the parameter modifiers.
pub type Builtin = fn(&Tp, Vec<MultiSet>) -> Result<MultiSet>;

pub fn builtin(name: &QualifiedName) -> Option<Builtin> {
    if name.module() != ["std"] {
        return None;
    }
    let f: Builtin = match name.last() {
        "+" => add,
        "-" => sub,
        "*" => mul,
        "/" => div,
        "//" => floor_div,
        "%" => modulo,
        "^" => pow,

        "=" => eq,
        "!=" => ne,
        "?=" => opt_eq,
        "?!=" => opt_ne,
        "<" => lt,
        ">" => gt,
        "<=" => le,
        ">=" => ge,

        "and" => and,
        "or" => or,
        "not" => not,

        "in" => is_in,
        "not in" => not_in,
        "exists" => exists,
        "distinct" => distinct,
        "??" => coalesce,
        "except" => except,

        "++" => concat,
        "like" => like,
        "ilike" => ilike,
        "_[_]" => index,
        "_[_:_]" => slice,
        "_[_:]" => slice_from,
        "_[:_]" => slice_to,
        "len" => len,
        "str_upper" => str_upper,
        "str_lower" => str_lower,
        "contains" => contains,
        "to_str" => to_str,
        "to_json" => to_json,
        "array_agg" => array_agg,
        "array_unpack" => array_unpack,

        "count" => count,
        "sum" => sum,
        "min" => min,
        "max" => max,
        "all" => all,
        "any" => any,
        "enumerate" => enumerate,
        "assert_single" => assert_single,
        "round" => round,
        _ => return None,
    };
    Some(f)
}

fn arg(args: &[MultiSet], i: usize) -> Result<&Val> {
    args.get(i)
        .and_then(|a| a.first())
        .ok_or_else(|| EvalError::internal(format!("missing argument {i}")))
}

fn set(args: &[MultiSet], i: usize) -> Result<&MultiSet> {
    args.get(i)
        .ok_or_else(|| EvalError::internal(format!("missing argument {i}")))
}

fn int_arg(args: &[MultiSet], i: usize) -> Result<i64> {
    let v = arg(args, i)?;
    v.as_int()
        .ok_or_else(|| EvalError::runtime(format!("expected an integer, got {v}")))
}

fn str_arg(args: &[MultiSet], i: usize) -> Result<&str> {
    let v = arg(args, i)?;
    v.as_str()
        .ok_or_else(|| EvalError::runtime(format!("expected a string, got {v}")))
}

fn bool_arg(args: &[MultiSet], i: usize) -> Result<bool> {
    let v = arg(args, i)?;
    v.as_bool()
        .ok_or_else(|| EvalError::runtime(format!("expected a boolean, got {v}")))
}

fn float_of(v: &Val) -> Result<f64> {
    match v.as_prim() {
        Some(Prim::Int(i)) => Ok(*i as f64),
        Some(Prim::Float(f)) => Ok(*f),
        _ => Err(EvalError::runtime(format!("expected a number, got {v}"))),
    }
}

fn one(v: Val) -> Result<MultiSet> {
    Ok(vec![v])
}

// Arithmetic

fn arith(
    args: &[MultiSet],
    op: &str,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Result<MultiSet> {
    let (l, r) = (arg(args, 0)?, arg(args, 1)?);
    match (l.as_prim(), r.as_prim()) {
        (Some(Prim::Int(a)), Some(Prim::Int(b))) => {
            let v = int(*a, *b)
                .ok_or_else(|| EvalError::runtime(format!("integer overflow in {a} {op} {b}")))?;
            one(Val::int(v))
        }
        _ => one(Val::float(float(float_of(l)?, float_of(r)?))),
    }
}

fn add(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    arith(&args, "+", i64::checked_add, |a, b| a + b)
}

fn sub(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    if args.len() == 1 {
        let v = arg(&args, 0)?;
        return match v.as_prim() {
            Some(Prim::Int(i)) => i
                .checked_neg()
                .map(|n| vec![Val::int(n)])
                .ok_or_else(|| EvalError::runtime(format!("integer overflow in -{i}"))),
            _ => one(Val::float(-float_of(v)?)),
        };
    }
    arith(&args, "-", i64::checked_sub, |a, b| a - b)
}

fn mul(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    arith(&args, "*", i64::checked_mul, |a, b| a * b)
}

fn nonzero_divisor(args: &[MultiSet]) -> Result<()> {
    if float_of(arg(args, 1)?)? == 0.0 {
        return Err(EvalError::runtime("division by zero"));
    }
    Ok(())
}

fn div(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    nonzero_divisor(&args)?;
    one(Val::float(float_of(arg(&args, 0)?)? / float_of(arg(&args, 1)?)?))
}

fn floor_div(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    nonzero_divisor(&args)?;
    arith(
        &args,
        "//",
        |a, b| {
            let q = a.checked_div(b)?;
            Some(if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q })
        },
        |a, b| (a / b).floor(),
    )
}

fn modulo(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    nonzero_divisor(&args)?;
    arith(
        &args,
        "%",
        |a, b| {
            let r = a.checked_rem(b)?;
            Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        },
        |a, b| a - b * (a / b).floor(),
    )
}

fn pow(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let base = float_of(arg(&args, 0)?)?;
    let exp = float_of(arg(&args, 1)?)?;
    one(Val::float(base.powf(exp)))
}

// Comparison

fn compare(args: &[MultiSet], pred: fn(Ordering) -> bool) -> Result<MultiSet> {
    one(Val::bool(pred(compare_vals(arg(args, 0)?, arg(args, 1)?))))
}

fn eq(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    compare(&args, Ordering::is_eq)
}

fn ne(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    compare(&args, Ordering::is_ne)
}

fn lt(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    compare(&args, Ordering::is_lt)
}

fn gt(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    compare(&args, Ordering::is_gt)
}

fn le(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    compare(&args, Ordering::is_le)
}

fn ge(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    compare(&args, Ordering::is_ge)
}

/// Equality where two empty operands are equal and one empty operand is not.
fn optional_equal(args: &[MultiSet]) -> Result<bool> {
    let (l, r) = (set(args, 0)?, set(args, 1)?);
    Ok(match (l.first(), r.first()) {
        (None, None) => true,
        (Some(a), Some(b)) => compare_vals(a, b).is_eq(),
        _ => false,
    })
}

fn opt_eq(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(optional_equal(&args)?))
}

fn opt_ne(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(!optional_equal(&args)?))
}

// Logic

fn and(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(bool_arg(&args, 0)? && bool_arg(&args, 1)?))
}

fn or(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(bool_arg(&args, 0)? || bool_arg(&args, 1)?))
}

fn not(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(!bool_arg(&args, 0)?))
}

// Sets

fn contains_val(haystack: &MultiSet, needle: &Val) -> bool {
    haystack.iter().any(|v| compare_vals(v, needle).is_eq())
}

fn is_in(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(contains_val(set(&args, 1)?, arg(&args, 0)?)))
}

fn not_in(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(!contains_val(set(&args, 1)?, arg(&args, 0)?)))
}

fn exists(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(!set(&args, 0)?.is_empty()))
}

fn distinct(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let mut out: MultiSet = Vec::new();
    for v in set(&args, 0)? {
        if !contains_val(&out, v) {
            out.push(v.clone());
        }
    }
    Ok(out)
}

fn coalesce(_: &Tp, mut args: Vec<MultiSet>) -> Result<MultiSet> {
    let fallback = args.pop().unwrap_or_default();
    let first = args.pop().unwrap_or_default();
    Ok(if first.is_empty() { fallback } else { first })
}

/// Removes one left occurrence per matching right element.
fn except(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let mut out = set(&args, 0)?.clone();
    for v in set(&args, 1)? {
        if let Some(pos) = out.iter().position(|o| compare_vals(o, v).is_eq()) {
            out.remove(pos);
        }
    }
    Ok(out)
}

// Strings and arrays

fn concat(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    match (arg(&args, 0)?, arg(&args, 1)?) {
        (Val::Arr(a), Val::Arr(b)) => one(Val::Arr(a.iter().chain(b).cloned().collect())),
        (l, r) => match (l.as_str(), r.as_str()) {
            (Some(a), Some(b)) => one(Val::str(format!("{a}{b}"))),
            _ => Err(EvalError::runtime(format!("cannot concatenate {l} and {r}"))),
        },
    }
}

fn like_match(s: &[char], p: &[char]) -> bool {
    match p.split_first() {
        None => s.is_empty(),
        Some(('%', rest)) => (0..=s.len()).any(|i| like_match(&s[i..], rest)),
        Some(('_', rest)) => !s.is_empty() && like_match(&s[1..], rest),
        Some(('\\', [c, rest @ ..])) => s.first() == Some(c) && like_match(&s[1..], rest),
        Some((c, rest)) => s.first() == Some(c) && like_match(&s[1..], rest),
    }
}

fn like(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let s: Vec<char> = str_arg(&args, 0)?.chars().collect();
    let p: Vec<char> = str_arg(&args, 1)?.chars().collect();
    one(Val::bool(like_match(&s, &p)))
}

fn ilike(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let s: Vec<char> = str_arg(&args, 0)?.to_lowercase().chars().collect();
    let p: Vec<char> = str_arg(&args, 1)?.to_lowercase().chars().collect();
    one(Val::bool(like_match(&s, &p)))
}

/// Elements of a string or array operand, with a way to rebuild the operand.
enum Seq {
    Str(Vec<char>),
    Arr(Vec<Val>),
}

impl Seq {
    fn of(v: &Val) -> Result<Seq> {
        match v {
            Val::Arr(items) => Ok(Seq::Arr(items.clone())),
            other => other
                .as_str()
                .map(|s| Seq::Str(s.chars().collect()))
                .ok_or_else(|| EvalError::runtime(format!("cannot index into {other}"))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Seq::Str(cs) => cs.len(),
            Seq::Arr(items) => items.len(),
        }
    }

    fn element(&self, i: usize) -> Val {
        match self {
            Seq::Str(cs) => Val::str(cs[i].to_string()),
            Seq::Arr(items) => items[i].clone(),
        }
    }

    fn range(&self, start: usize, stop: usize) -> Val {
        match self {
            Seq::Str(cs) => Val::str(cs[start..stop].iter().collect::<String>()),
            Seq::Arr(items) => Val::Arr(items[start..stop].to_vec()),
        }
    }
}

/// Resolves a possibly negative position against `len`, clamped to `0..=len`.
fn clamp_bound(i: i64, len: usize) -> usize {
    let len_i = len as i64;
    let resolved = if i < 0 { len_i + i } else { i };
    resolved.clamp(0, len_i) as usize
}

fn index(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let seq = Seq::of(arg(&args, 0)?)?;
    let i = int_arg(&args, 1)?;
    let len = seq.len() as i64;
    let resolved = if i < 0 { len + i } else { i };
    if resolved < 0 || resolved >= len {
        return Err(EvalError::runtime(format!(
            "index {i} is out of bounds for length {len}"
        )));
    }
    one(seq.element(resolved as usize))
}

fn sliced(seq: Seq, start: Option<i64>, stop: Option<i64>) -> Result<MultiSet> {
    let len = seq.len();
    let start = start.map_or(0, |s| clamp_bound(s, len));
    let stop = stop.map_or(len, |s| clamp_bound(s, len));
    one(seq.range(start, stop.max(start)))
}

fn slice(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let seq = Seq::of(arg(&args, 0)?)?;
    sliced(seq, Some(int_arg(&args, 1)?), Some(int_arg(&args, 2)?))
}

fn slice_from(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let seq = Seq::of(arg(&args, 0)?)?;
    sliced(seq, Some(int_arg(&args, 1)?), None)
}

fn slice_to(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let seq = Seq::of(arg(&args, 0)?)?;
    sliced(seq, None, Some(int_arg(&args, 1)?))
}

fn len(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::int(Seq::of(arg(&args, 0)?)?.len() as i64))
}

fn str_upper(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::str(str_arg(&args, 0)?.to_uppercase()))
}

fn str_lower(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::str(str_arg(&args, 0)?.to_lowercase()))
}

fn contains(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(str_arg(&args, 0)?.contains(str_arg(&args, 1)?)))
}

fn to_str(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::str(text_of(arg(&args, 0)?)))
}

fn to_json(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(json_scalar(arg(&args, 0)?))
}

fn array_agg(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::Arr(set(&args, 0)?.clone()))
}

fn array_unpack(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    match arg(&args, 0)? {
        Val::Arr(items) => Ok(items.clone()),
        other => Err(EvalError::runtime(format!("cannot unpack {other}"))),
    }
}

// Aggregates

fn count(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::int(set(&args, 0)?.len() as i64))
}

fn sum(ret: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let vals = set(&args, 0)?;
    if ret.is_scalar_named("float64") {
        let total = vals.iter().map(float_of).sum::<Result<f64>>()?;
        return one(Val::float(total));
    }
    let mut total: i64 = 0;
    for v in vals {
        let i = v
            .as_int()
            .ok_or_else(|| EvalError::runtime(format!("cannot sum {v}")))?;
        total = total
            .checked_add(i)
            .ok_or_else(|| EvalError::runtime("integer overflow in sum"))?;
    }
    one(Val::int(total))
}

fn min(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    Ok(set(&args, 0)?
        .iter()
        .min_by(|a, b| compare_vals(a, b))
        .cloned()
        .into_iter()
        .collect())
}

fn max(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    Ok(set(&args, 0)?
        .iter()
        .max_by(|a, b| compare_vals(a, b))
        .cloned()
        .into_iter()
        .collect())
}

fn all(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(set(&args, 0)?.iter().all(|v| v.as_bool() == Some(true))))
}

fn any(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    one(Val::bool(set(&args, 0)?.iter().any(|v| v.as_bool() == Some(true))))
}

fn enumerate(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    Ok(set(&args, 0)?
        .iter()
        .enumerate()
        .map(|(i, v)| Val::UnnamedTuple(vec![Val::int(i as i64), v.clone()]))
        .collect())
}

fn assert_single(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let vals = set(&args, 0)?;
    if vals.len() > 1 {
        return Err(EvalError::runtime(format!(
            "assert_single violation: got {} elements",
            vals.len()
        )));
    }
    Ok(vals.clone())
}

fn round(_: &Tp, args: Vec<MultiSet>) -> Result<MultiSet> {
    let v = float_of(arg(&args, 0)?)?;
    let digits = match args.get(1).and_then(|a| a.first()) {
        Some(d) => d
            .as_int()
            .ok_or_else(|| EvalError::runtime(format!("round digits must be an integer, got {d}")))?,
        None => 0,
    };
    let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
    one(Val::float((v * scale).round_ties_even() / scale))
}

// Casts

/// Storage class of a scalar type, found through its ancestors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScalarKind {
    Int { min: i64, max: i64 },
    Float,
    Str,
    Bool,
    Uuid,
    Json,
    Opaque,
}

fn scalar_kind(schema: &DBSchema, tp: &QualifiedName) -> ScalarKind {
    let mut chain = vec![tp.clone()];
    chain.extend(ancestors(schema, tp));
    for q in &chain {
        if q.module() != ["std"] {
            continue;
        }
        let kind = match q.last() {
            "int16" => ScalarKind::Int {
                min: i16::MIN.into(),
                max: i16::MAX.into(),
            },
            "int32" => ScalarKind::Int {
                min: i32::MIN.into(),
                max: i32::MAX.into(),
            },
            "int64" | "anyint" => ScalarKind::Int {
                min: i64::MIN,
                max: i64::MAX,
            },
            "float32" | "float64" | "anyfloat" => ScalarKind::Float,
            "str" => ScalarKind::Str,
            "bool" => ScalarKind::Bool,
            "uuid" => ScalarKind::Uuid,
            "json" => ScalarKind::Json,
            _ => continue,
        };
        return kind;
    }
    ScalarKind::Opaque
}

/// Converts `v` to a value of type `to`. Objects and values of unknown
/// scalar types pass through unchanged.
pub fn cast_val(schema: &DBSchema, v: &Val, to: &Tp) -> Result<Val> {
    match (to, v) {
        (Tp::Scalar(q), Val::Scalar(s)) => {
            let prim = match scalar_kind(schema, q) {
                ScalarKind::Opaque => Some(s.val.clone()),
                kind if s.tp.is("std", "json") => from_json_text(kind, &s.val),
                kind => convert_prim(kind, v),
            };
            prim.map(|p| Val::scalar(q.clone(), p))
                .ok_or_else(|| EvalError::runtime(format!("cannot cast {v} to {q}")))
        }
        (
            Tp::Composite {
                kind: CompositeKind::Array,
                tps,
                ..
            },
            Val::Arr(items),
        ) => match tps.first() {
            Some(elem) => Ok(Val::Arr(
                items
                    .iter()
                    .map(|i| cast_val(schema, i, elem))
                    .collect::<Result<_>>()?,
            )),
            None => Ok(v.clone()),
        },
        (
            Tp::Composite {
                kind: CompositeKind::Tuple,
                tps,
                labels,
            },
            Val::UnnamedTuple(_) | Val::NamedTuple(_),
        ) => {
            let items: Vec<&Val> = match v {
                Val::NamedTuple(items) => items.values().collect(),
                Val::UnnamedTuple(items) => items.iter().collect(),
                _ => Vec::new(),
            };
            if items.len() != tps.len() {
                return Err(EvalError::runtime(format!("cannot cast {v} to {to}")));
            }
            let cast = items
                .into_iter()
                .zip(tps)
                .map(|(i, t)| cast_val(schema, i, t))
                .collect::<Result<Vec<_>>>()?;
            if labels.is_empty() {
                Ok(Val::UnnamedTuple(cast))
            } else {
                Ok(Val::NamedTuple(labels.iter().cloned().zip(cast).collect()))
            }
        }
        (Tp::Default { tp, .. }, _) => cast_val(schema, v, tp),
        _ => Ok(v.clone()),
    }
}

fn convert_prim(kind: ScalarKind, v: &Val) -> Option<Prim> {
    let p = v.as_prim()?;
    match (kind, p) {
        (ScalarKind::Int { min, max }, Prim::Int(i)) => in_range(*i, min, max),
        (ScalarKind::Int { min, max }, Prim::Float(f)) => {
            let r = f.round_ties_even();
            if !r.is_finite() || r < i64::MIN as f64 || r > i64::MAX as f64 {
                return None;
            }
            in_range(r as i64, min, max)
        }
        (ScalarKind::Int { min, max }, Prim::Str(s)) => in_range(s.trim().parse().ok()?, min, max),
        (ScalarKind::Float, Prim::Int(i)) => Some(Prim::Float(*i as f64)),
        (ScalarKind::Float, Prim::Float(f)) => Some(Prim::Float(*f)),
        (ScalarKind::Float, Prim::Str(s)) => s.trim().parse().ok().map(Prim::Float),
        (ScalarKind::Str, _) => Some(Prim::Str(text_of(v))),
        (ScalarKind::Bool, Prim::Bool(b)) => Some(Prim::Bool(*b)),
        (ScalarKind::Bool, Prim::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Prim::Bool(true)),
            "false" => Some(Prim::Bool(false)),
            _ => None,
        },
        (ScalarKind::Uuid, Prim::Int(i)) => Some(Prim::Int(*i)),
        (ScalarKind::Uuid, Prim::Str(s)) => s.trim().parse().ok().map(Prim::Int),
        (ScalarKind::Json, _) => Some(Prim::Str(val_to_json(v).to_string())),
        _ => None,
    }
}

/// Reads a scalar out of a json value, which is stored as its text.
fn from_json_text(kind: ScalarKind, p: &Prim) -> Option<Prim> {
    let Prim::Str(text) = p else {
        return None;
    };
    let parsed: serde_json::Value = serde_json::from_str(text).ok()?;
    match kind {
        ScalarKind::Json => Some(Prim::Str(text.clone())),
        ScalarKind::Str => parsed.as_str().map(|s| Prim::Str(s.to_string())),
        ScalarKind::Int { min, max } => in_range(parsed.as_i64()?, min, max),
        ScalarKind::Float => parsed.as_f64().map(Prim::Float),
        ScalarKind::Bool => parsed.as_bool().map(Prim::Bool),
        ScalarKind::Uuid | ScalarKind::Opaque => None,
    }
}

fn in_range(i: i64, min: i64, max: i64) -> Option<Prim> {
    (min..=max).contains(&i).then_some(Prim::Int(i))
}

/// Text form used by `to_str` and casts to `str`.
fn text_of(v: &Val) -> String {
    match v {
        Val::Scalar(s) => match &s.val {
            Prim::Str(t) => t.clone(),
            Prim::Int(i) => i.to_string(),
            Prim::Float(f) => f.to_string(),
            Prim::Bool(b) => b.to_string(),
        },
        other => show_val(other),
    }
}

fn json_scalar(v: &Val) -> Val {
    Val::scalar(
        QualifiedName::std("json"),
        Prim::Str(val_to_json(v).to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<MultiSet>) -> Result<MultiSet> {
        let f = builtin(&QualifiedName::std(name)).unwrap();
        f(&Tp::int_tp(), args)
    }

    fn ints(xs: &[i64]) -> MultiSet {
        xs.iter().copied().map(Val::int).collect()
    }

    #[test]
    fn integer_division_floors() {
        assert_eq!(call("//", vec![ints(&[7]), ints(&[2])]).unwrap(), ints(&[3]));
        assert_eq!(call("//", vec![ints(&[-7]), ints(&[2])]).unwrap(), ints(&[-4]));
        assert_eq!(call("//", vec![ints(&[7]), ints(&[-2])]).unwrap(), ints(&[-4]));
        assert_eq!(call("%", vec![ints(&[-7]), ints(&[2])]).unwrap(), ints(&[1]));
        assert_eq!(call("%", vec![ints(&[7]), ints(&[-2])]).unwrap(), ints(&[-1]));
        assert!(call("//", vec![ints(&[1]), ints(&[0])]).is_err());
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(call("+", vec![ints(&[i64::MAX]), ints(&[1])]).is_err());
        assert!(call("-", vec![ints(&[i64::MIN])]).is_err());
    }

    #[test]
    fn mixed_arithmetic_widens_to_float() {
        let out = call("+", vec![ints(&[1]), vec![Val::float(0.5)]]).unwrap();
        assert_eq!(out, vec![Val::float(1.5)]);
    }

    #[test]
    fn like_patterns() {
        let s = |x: &str| vec![Val::str(x)];
        assert_eq!(call("like", vec![s("hello"), s("h%o")]).unwrap(), vec![Val::bool(true)]);
        assert_eq!(call("like", vec![s("hello"), s("h_llo")]).unwrap(), vec![Val::bool(true)]);
        assert_eq!(call("like", vec![s("hello"), s("H%")]).unwrap(), vec![Val::bool(false)]);
        assert_eq!(call("ilike", vec![s("hello"), s("H%")]).unwrap(), vec![Val::bool(true)]);
        assert_eq!(call("like", vec![s("50%"), s("50\\%")]).unwrap(), vec![Val::bool(true)]);
    }

    #[test]
    fn indexing_and_slicing() {
        let s = vec![Val::str("hello")];
        assert_eq!(call("_[_]", vec![s.clone(), ints(&[-1])]).unwrap(), vec![Val::str("o")]);
        assert!(call("_[_]", vec![s.clone(), ints(&[5])]).is_err());
        assert_eq!(
            call("_[_:_]", vec![s.clone(), ints(&[1]), ints(&[-1])]).unwrap(),
            vec![Val::str("ell")]
        );
        assert_eq!(call("_[_:]", vec![s.clone(), ints(&[10])]).unwrap(), vec![Val::str("")]);
        let arr = vec![Val::Arr(ints(&[1, 2, 3]))];
        assert_eq!(call("_[:_]", vec![arr, ints(&[2])]).unwrap(), vec![Val::Arr(ints(&[1, 2]))]);
    }

    #[test]
    fn set_operators() {
        assert_eq!(
            call("except", vec![ints(&[1, 2, 2, 3]), ints(&[2, 3])]).unwrap(),
            ints(&[1, 2])
        );
        assert_eq!(call("distinct", vec![ints(&[1, 2, 1])]).unwrap(), ints(&[1, 2]));
        assert_eq!(call("??", vec![vec![], ints(&[4, 5])]).unwrap(), ints(&[4, 5]));
        assert_eq!(call("??", vec![ints(&[1]), ints(&[4, 5])]).unwrap(), ints(&[1]));
        assert_eq!(call("?=", vec![vec![], vec![]]).unwrap(), vec![Val::bool(true)]);
        assert_eq!(call("?=", vec![vec![], ints(&[1])]).unwrap(), vec![Val::bool(false)]);
        assert_eq!(call("in", vec![ints(&[2]), ints(&[1, 2])]).unwrap(), vec![Val::bool(true)]);
    }

    #[test]
    fn sum_of_nothing_follows_the_return_type() {
        let f = builtin(&QualifiedName::std("sum")).unwrap();
        assert_eq!(f(&Tp::int_tp(), vec![vec![]]).unwrap(), ints(&[0]));
        assert_eq!(f(&Tp::float_tp(), vec![vec![]]).unwrap(), vec![Val::float(0.0)]);
    }

    #[test]
    fn enumerate_pairs_positions() {
        let out = call("enumerate", vec![vec![Val::str("a"), Val::str("b")]]).unwrap();
        assert_eq!(
            out,
            vec![
                Val::UnnamedTuple(vec![Val::int(0), Val::str("a")]),
                Val::UnnamedTuple(vec![Val::int(1), Val::str("b")]),
            ]
        );
    }

    #[test]
    fn casts_between_std_scalars() {
        let schema = DBSchema::new();
        let int16 = Tp::scalar("int16");
        assert_eq!(
            cast_val(&schema, &Val::float(2.5), &Tp::int_tp()).unwrap(),
            Val::int(2)
        );
        assert_eq!(
            cast_val(&schema, &Val::str(" 42 "), &Tp::int_tp()).unwrap(),
            Val::int(42)
        );
        assert!(cast_val(&schema, &Val::int(70_000), &int16).is_err());
        assert_eq!(
            cast_val(&schema, &Val::int(7), &Tp::str_tp()).unwrap(),
            Val::str("7")
        );
        assert_eq!(
            cast_val(&schema, &Val::str("TRUE"), &Tp::bool_tp()).unwrap(),
            Val::bool(true)
        );
        let json = cast_val(&schema, &Val::int(3), &Tp::scalar("json")).unwrap();
        assert_eq!(cast_val(&schema, &json, &Tp::int_tp()).unwrap(), Val::int(3));
        assert!(cast_val(&schema, &json, &Tp::str_tp()).is_err());
    }
}
