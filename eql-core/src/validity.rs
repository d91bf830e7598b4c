//! Validation of unchecked modules: names, inheritance, computed fields,
//! defaults, function bodies and casts.

use tracing::{debug, info};

use eql_ir::{
    CMMode, Expr, NameGen, ParamModifier, QualifiedName, ResultTp, Tp, abstract_over_expr,
    instantiate_expr, map_tp,
};

use crate::error::SemanticError;
use crate::inherit::populate_inheritance;
use crate::resolve::{resolve_object_tp, resolve_tp, resolve_type_name};
use crate::schema::{DBSchema, FuncImpl, ModuleEntity, TypeBody};
use crate::sema::{TcCtx, check_binding, check_type, synthesize, synthesize_binding};

type Result<T> = std::result::Result<T, SemanticError>;

/// Validates every unchecked module in declaration order.
pub fn check_unchecked_modules(schema: &mut DBSchema, names: &NameGen) -> Result<()> {
    for module in schema.unchecked_module_names() {
        check_module_validity(schema, names, &module)?;
    }
    Ok(())
}

pub fn check_module_validity(schema: &mut DBSchema, names: &NameGen, module: &[String]) -> Result<()> {
    info!(module = %module.join("::"), "checking module");
    crate::subtype::resolve_subtyping(schema, module)?;
    resolve_casts(schema, module)?;
    resolve_declared_types(schema, module)?;
    populate_inheritance(schema, module)?;
    check_computed_fields(schema, names, module)?;
    check_function_bodies(schema, names, module)?;
    schema.mark_checked(module);
    debug!(module = %module.join("::"), "module checked");
    Ok(())
}

fn resolve_casts(schema: &mut DBSchema, module: &[String]) -> Result<()> {
    let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut schema.unchecked_casts)
        .into_iter()
        .partition(|c| c.module == module);
    schema.unchecked_casts = rest;
    for c in mine {
        let from = resolve_type_name(schema, module, &c.from)?;
        let to = resolve_type_name(schema, module, &c.to)?;
        schema.casts.insert((from, to), c.kind);
    }
    Ok(())
}

fn module_entries(schema: &DBSchema, module: &[String]) -> Vec<QualifiedName> {
    schema
        .module(module)
        .map(|m| {
            m.defs
                .keys()
                .map(|n| QualifiedName::in_module(module, n))
                .collect()
        })
        .unwrap_or_default()
}

/// Resolves the names in field types and function signatures.
fn resolve_declared_types(schema: &mut DBSchema, module: &[String]) -> Result<()> {
    for name in module_entries(schema, module) {
        if let Some(fields) = schema.object_fields(&name) {
            let resolved = resolve_object_tp(schema, module, fields)?;
            if let Some(def) = schema.unchecked_type_def_mut(&name) {
                def.body = TypeBody::Object(resolved);
            }
        } else if let Some(defs) = schema.func_defs(&name) {
            let mut resolved = defs.to_vec();
            for def in &mut resolved {
                for tp in &mut def.tp.args_tp {
                    *tp = resolve_tp(schema, module, tp)?;
                }
                def.tp.ret_tp.tp = resolve_tp(schema, module, &def.tp.ret_tp.tp)?;
            }
            if let Some(defs) = schema.unchecked_func_defs_mut(&name) {
                *defs = resolved;
            }
        }
    }
    Ok(())
}

/// Infers the type of each computed field and checks each default against
/// its field. Fields are handled one at a time so a computed field can read
/// one declared before it.
fn check_computed_fields(schema: &mut DBSchema, names: &NameGen, module: &[String]) -> Result<()> {
    for name in module_entries(schema, module) {
        let Some(fields) = schema.object_fields(&name) else {
            continue;
        };
        let labels: Vec<String> = fields.0.keys().cloned().collect();
        for label in labels {
            let updated = {
                let Some(field) = schema.object_fields(&name).and_then(|f| f.get(&label)) else {
                    continue;
                };
                let ctx = TcCtx::new(schema, module, names);
                let this = ResultTp::one(Tp::named_link(name.clone()));
                match &field.tp {
                    Tp::UncheckedComputable(b) => {
                        let (rt, b) = synthesize_binding(&ctx, b, this).map_err(|e| {
                            SemanticError::type_error(format!(
                                "in computed field {name}.{label}: {}",
                                e.message()
                            ))
                        })?;
                        Some(ResultTp::new(
                            Tp::Computable {
                                expr: Box::new(b),
                                tp: Box::new(rt.tp),
                            },
                            rt.mode,
                        ))
                    }
                    Tp::Default { expr, tp } => {
                        let expected = ResultTp::new(tp.as_ref().clone(), field.mode);
                        check_binding(&ctx, expr, this, &expected, true).map_err(|e| {
                            SemanticError::type_error(format!(
                                "in default of {name}.{label}: {}",
                                e.message()
                            ))
                        })?;
                        None
                    }
                    _ => None,
                }
            };
            if let Some(rt) = updated {
                if let Some(def) = schema.unchecked_type_def_mut(&name) {
                    if let TypeBody::Object(fields) = &mut def.body {
                        fields.0.insert(label, rt);
                    }
                }
            }
        }
    }
    Ok(())
}

fn is_polymorphic(tp: &Tp) -> bool {
    let mut found = false;
    map_tp(
        &mut |t| {
            if matches!(t, Tp::Existential(_) | Tp::Any(_)) {
                found = true;
            }
            None
        },
        tp,
    );
    found
}

fn param_mode(m: ParamModifier) -> CMMode {
    match m {
        ParamModifier::Singleton => CMMode::ONE,
        ParamModifier::Optional => CMMode::AT_MOST_ONE,
        ParamModifier::SetOf => CMMode::ANY,
    }
}

/// Type checks the bodies and default arguments of functions defined in
/// EdgeQL. The checked body replaces the lowered one.
fn check_function_bodies(schema: &mut DBSchema, names: &NameGen, module: &[String]) -> Result<()> {
    for name in module_entries(schema, module) {
        let Some(defs) = schema.func_defs(&name) else {
            continue;
        };
        let mut checked = defs.to_vec();
        {
            let ctx = TcCtx::new(schema, module, names);
            for def in &mut checked {
                for d in def.defaults.values_mut() {
                    let (_, e) = synthesize(&ctx, d)?;
                    *d = e;
                }
                let FuncImpl::Defined(body) = &def.body else {
                    continue;
                };
                if def.tp.args_tp.iter().any(is_polymorphic) || is_polymorphic(&def.tp.ret_tp.tp) {
                    return Err(SemanticError::schema(format!(
                        "polymorphic function {name} must be implemented as a builtin"
                    )));
                }
                let params: Vec<ResultTp> = def
                    .tp
                    .args_tp
                    .iter()
                    .zip(&def.tp.args_mod)
                    .map(|(tp, m)| ResultTp::new(tp.clone(), param_mode(*m)))
                    .collect();
                let body = check_function_body(&ctx, body, &params, &def.tp.ret_tp).map_err(|e| {
                    SemanticError::type_error(format!("in body of {name}: {}", e.message()))
                })?;
                def.body = FuncImpl::Defined(body);
            }
        }
        if let Some(defs) = schema.unchecked_func_defs_mut(&name) {
            *defs = checked;
        }
    }
    Ok(())
}

/// Opens one binder per parameter, checks the innermost body against the
/// declared return type and closes the binders again.
fn check_function_body(
    ctx: &TcCtx<'_>,
    body: &Expr,
    params: &[ResultTp],
    ret: &ResultTp,
) -> Result<Expr> {
    match (body, params.split_first()) {
        (Expr::Binding(b), Some((param, rest))) => {
            let var = ctx.names.fresh(&b.var);
            let opened = instantiate_expr(ctx.names, &Expr::free(&var), b);
            let inner = check_function_body(&ctx.with_var(&var, param.clone()), &opened, rest, ret)?;
            Ok(Expr::Binding(Box::new(abstract_over_expr(ctx.names, &inner, &var))))
        }
        (_, None) => check_type(ctx, body, ret, true),
        _ => Err(SemanticError::internal(
            "function body binders do not match its parameters",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{DEFAULT_MODULE, add_decls};
    use crate::schema::ModuleState;

    fn check(ddl: &str, sdl: &str) -> Result<DBSchema> {
        let names = NameGen::new();
        let mut schema = DBSchema::new();
        let std_ast = eql_parse::parse_ddl(ddl).unwrap();
        add_decls(&mut schema, &names, &["std".to_string()], &std_ast)?;
        let user = eql_parse::parse_sdl(sdl).unwrap();
        add_decls(&mut schema, &names, &[DEFAULT_MODULE.to_string()], &user)?;
        check_unchecked_modules(&mut schema, &names)?;
        Ok(schema)
    }

    const MINI_STD: &str = r#"
        CREATE MODULE std;
        CREATE SCALAR TYPE std::str;
        CREATE SCALAR TYPE std::int64;
        CREATE SCALAR TYPE std::uuid;
        CREATE SCALAR TYPE std::bool;
        CREATE ABSTRACT TYPE std::BaseObject;
        CREATE ABSTRACT TYPE std::Object EXTENDING std::BaseObject;
        CREATE INFIX OPERATOR std::`++`(l: std::str, r: std::str) -> std::str USING BUILTIN;
    "#;

    #[test]
    fn inherited_fields_are_copied_into_subtypes() {
        let s = check(
            MINI_STD,
            "abstract type Named { required name: str; } type User extending Named { age: int64; }",
        )
        .unwrap();
        let fields = s.object_fields(&QualifiedName::new(["default", "User"])).unwrap();
        assert_eq!(fields.0.keys().collect::<Vec<_>>(), vec!["name", "age"]);
        assert!(matches!(
            s.module_state(&[DEFAULT_MODULE.to_string()]),
            Some(ModuleState::Checked(_))
        ));
    }

    #[test]
    fn computed_fields_get_their_inferred_type() {
        let s = check(MINI_STD, "type P { required name: str; shout := .name ++ '!'; }").unwrap();
        let fields = s.object_fields(&QualifiedName::new(["default", "P"])).unwrap();
        let shout = fields.get("shout").unwrap();
        assert!(matches!(&shout.tp, Tp::Computable { tp, .. } if **tp == Tp::str_tp()));
        assert_eq!(shout.mode, CMMode::ONE);
    }

    #[test]
    fn inheritance_cycles_are_rejected() {
        let err = check(MINI_STD, "type A extending B; type B extending A;").unwrap_err();
        assert!(err.message().contains("cyclic inheritance"));
    }

    #[test]
    fn unknown_field_types_fail_to_resolve() {
        assert!(check(MINI_STD, "type A { x: Missing; }").is_err());
    }
}
