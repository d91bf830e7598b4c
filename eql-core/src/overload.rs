//! Overload resolution for function and operator calls.

use indexmap::IndexMap;
use tracing::warn;

use eql_ir::{
    CMMode, Cardinal, Expr, ParamModifier, RawName, ResultTp, Tp, TpCastKind, map_tp,
};

use crate::casts::check_castable;
use crate::error::SemanticError;
use crate::resolve::resolve_func_name;
use crate::schema::FuncDef;
use crate::sema::{TcCtx, synthesize};
use crate::subtype::{is_subtype, type_subtyping_walk};
use crate::type_ops::{mode_product, strip_link_props};

type Result<T> = std::result::Result<T, SemanticError>;

/// An argument after synthesis. Empty-set literals have no type of their own
/// and match any parameter.
#[derive(Clone, Debug)]
struct Arg {
    tp: Option<Tp>,
    mode: CMMode,
    expr: Expr,
}

struct Candidate {
    index: usize,
    args: Vec<Expr>,
    ret: ResultTp,
}

fn synthesize_arg(ctx: &TcCtx<'_>, e: &Expr) -> Result<Arg> {
    if matches!(e, Expr::MultiSet(items) if items.is_empty()) {
        return Ok(Arg {
            tp: None,
            mode: CMMode::AT_MOST_ONE,
            expr: e.clone(),
        });
    }
    let (rt, expr) = synthesize(ctx, e)?;
    Ok(Arg {
        tp: Some(rt.tp),
        mode: rt.mode,
        expr,
    })
}

/// Resolves `fun` to one of its overloads and types the call. Strict
/// subtyping is tried first; implicit casts of individual arguments only
/// when no overload matches without them.
pub fn synthesize_fun_app(
    ctx: &TcCtx<'_>,
    fun: &RawName,
    args: &[Expr],
    kwargs: &IndexMap<String, Expr>,
) -> Result<(ResultTp, Expr)> {
    let name = resolve_func_name(ctx.schema, &ctx.module, fun)?;
    let defs = ctx
        .schema
        .func_defs(&name)
        .ok_or_else(|| SemanticError::resolve(format!("`{name}` is not a function")))?;

    let positional = args
        .iter()
        .map(|a| synthesize_arg(ctx, a))
        .collect::<Result<Vec<_>>>()?;
    let named = kwargs
        .iter()
        .map(|(k, a)| Ok((k.clone(), synthesize_arg(ctx, a)?)))
        .collect::<Result<IndexMap<_, _>>>()?;

    for allow_casts in [false, true] {
        let mut matches = Vec::new();
        for (index, def) in defs.iter().enumerate() {
            if let Some(c) = try_match(ctx, index, def, &positional, &named, allow_casts)? {
                matches.push(c);
            }
        }
        if matches.len() > 1 {
            warn!(
                function = %name,
                candidates = matches.len(),
                "ambiguous call, using the first matching overload"
            );
        }
        if let Some(c) = matches.into_iter().next() {
            let call = Expr::FunApp {
                fun: RawName::Qualified(name),
                overloading_index: Some(c.index),
                args: c.args,
                kwargs: IndexMap::new(),
            };
            return Ok((c.ret, call));
        }
    }

    let shown: Vec<String> = positional
        .iter()
        .map(show_arg)
        .chain(named.iter().map(|(k, a)| format!("{k} := {}", show_arg(a))))
        .collect();
    let candidates: Vec<String> = defs.iter().map(|d| signature(&name.to_string(), d)).collect();
    Err(SemanticError::type_error(format!(
        "no overload of {name} accepts ({}); candidates: {}",
        shown.join(", "),
        candidates.join("; ")
    )))
}

fn show_arg(a: &Arg) -> String {
    a.tp.as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "{}".to_string())
}

pub fn signature(name: &str, def: &FuncDef) -> String {
    let params: Vec<String> = def
        .tp
        .args_tp
        .iter()
        .zip(&def.tp.args_mod)
        .zip(&def.tp.args_label)
        .map(|((tp, m), label)| match m {
            ParamModifier::Singleton => format!("{label}: {tp}"),
            ParamModifier::Optional => format!("{label}: optional {tp}"),
            ParamModifier::SetOf => format!("{label}: set of {tp}"),
        })
        .collect();
    format!("{name}({}) -> {}", params.join(", "), def.tp.ret_tp.tp)
}

fn try_match(
    ctx: &TcCtx<'_>,
    index: usize,
    def: &FuncDef,
    positional: &[Arg],
    named: &IndexMap<String, Arg>,
    allow_casts: bool,
) -> Result<Option<Candidate>> {
    let sig = &def.tp;
    let arity = sig.args_tp.len();
    if positional.len() > arity {
        return Ok(None);
    }
    let mut slots: Vec<Option<Arg>> = positional.iter().cloned().map(Some).collect();
    slots.resize(arity, None);
    for (label, arg) in named {
        let Some(i) = sig.args_label.iter().position(|l| l == label) else {
            return Ok(None);
        };
        if slots[i].is_some() {
            return Ok(None);
        }
        slots[i] = Some(arg.clone());
    }
    let mut filled = Vec::with_capacity(arity);
    for (i, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(a) => filled.push(a),
            None => match def.defaults.get(&sig.args_label[i]) {
                Some(d) => filled.push(synthesize_arg(ctx, d)?),
                None => return Ok(None),
            },
        }
    }

    let mut inst: Vec<(usize, Tp)> = Vec::new();
    let mut out_args = Vec::with_capacity(arity);
    for (arg, param) in filled.iter().zip(&sig.args_tp) {
        let Some(tp) = &arg.tp else {
            out_args.push(arg.expr.clone());
            continue;
        };
        if type_subtyping_walk(ctx.schema, &mut inst, tp, param) {
            out_args.push(arg.expr.clone());
            continue;
        }
        if allow_casts && !has_existential(param) {
            if let Some(TpCastKind::Implicit) = check_castable(ctx.schema, tp, param) {
                out_args.push(Expr::CheckedTypeCast {
                    from: tp.clone(),
                    to: param.clone(),
                    kind: TpCastKind::Implicit,
                    arg: Box::new(arg.expr.clone()),
                });
                continue;
            }
        }
        return Ok(None);
    }

    let Some(solved) = solve_existentials(ctx, inst) else {
        return Ok(None);
    };
    let ret_tp = map_tp(
        &mut |t| match t {
            Tp::Existential(i) => Some(solved.get(i).cloned().unwrap_or(Tp::Any(None))),
            _ => None,
        },
        &sig.ret_tp.tp,
    );
    let arg_modes = filled.iter().zip(&sig.args_mod).map(|(a, m)| match m {
        ParamModifier::Singleton => a.mode,
        ParamModifier::Optional => CMMode::new(Cardinal::One, a.mode.upper.max(Cardinal::One)),
        ParamModifier::SetOf => CMMode::ONE,
    });
    let mode = sig.ret_tp.mode * mode_product(arg_modes);
    Ok(Some(Candidate {
        index,
        args: out_args,
        ret: ResultTp::new(ret_tp, mode),
    }))
}

fn has_existential(tp: &Tp) -> bool {
    let mut found = false;
    map_tp(
        &mut |t| {
            if matches!(t, Tp::Existential(_)) {
                found = true;
            }
            None
        },
        tp,
    );
    found
}

/// Picks one type per existential: the instantiation that every other
/// instantiation of the same index is a subtype of. When the instantiations
/// only disagree on link properties, they are stripped and joined again.
fn solve_existentials(ctx: &TcCtx<'_>, inst: Vec<(usize, Tp)>) -> Option<IndexMap<usize, Tp>> {
    let mut grouped: IndexMap<usize, Vec<Tp>> = IndexMap::new();
    for (i, tp) in inst {
        let group = grouped.entry(i).or_default();
        if !group.contains(&tp) {
            group.push(tp);
        }
    }
    let mut solved = IndexMap::new();
    for (i, cands) in grouped {
        let tp = match join(ctx, &cands) {
            Some(tp) => tp,
            None => {
                let stripped: Vec<Tp> = cands.iter().map(strip_link_props).collect();
                let tp = join(ctx, &stripped)?;
                warn!(
                    existential = i,
                    "instantiations disagree on link properties; dropping them"
                );
                tp
            }
        };
        solved.insert(i, tp);
    }
    Some(solved)
}

/// The candidate every other candidate converts to, by subtyping or else
/// by an implicit cast.
pub(crate) fn join(ctx: &TcCtx<'_>, cands: &[Tp]) -> Option<Tp> {
    let by = |accept: &dyn Fn(&Tp, &Tp) -> bool| {
        cands
            .iter()
            .find(|c| cands.iter().all(|o| accept(o, c)))
            .cloned()
    };
    by(&|o, c| is_subtype(ctx.schema, o, c)).or_else(|| {
        by(&|o, c| {
            is_subtype(ctx.schema, o, c)
                || check_castable(ctx.schema, o, c) == Some(TpCastKind::Implicit)
        })
    })
}
