#![forbid(unsafe_code)]

//! Schema handling, type checking and query rewriting for EdgeQL.

mod builder;
mod casts;
mod dml;
mod error;
mod factor;
mod inherit;
mod lower;
mod overload;
mod post;
mod resolve;
mod schema;
mod sema;
mod stdlib;
mod subtype;
mod type_ops;
mod validity;

use tracing::debug;

use eql_ir::{Expr, ModuleName, NameGen, ResultTp};

pub use builder::{DEFAULT_MODULE, add_decls};
pub use casts::check_castable;
pub use error::SemanticError;
pub use factor::factor_paths;
pub use lower::{Lowered, lower_expr, lower_query};
pub use post::post_process;
pub use resolve::{DEFAULT_OPEN_SCOPES, resolve_func_name, resolve_raw_name, resolve_type_name};
pub use schema::{
    Constraint, DBModule, DBSchema, FuncDef, FuncImpl, ModuleEntity, ModuleState, TypeBody,
    TypeDef,
};
pub use sema::{TcCtx, check_type, synthesize};
pub use stdlib::{STD_DDL, std_schema};
pub use subtype::{ancestors, concrete_subtypes, descendants, is_nominal_subtype, is_subtype};
pub use type_ops::tp_project;
pub use validity::{check_module_validity, check_unchecked_modules};

/// A statement ready for evaluation.
#[derive(Clone, Debug)]
pub struct Prepared {
    pub expr: Expr,
    pub tp: ResultTp,
}

/// Elaborates, factors, checks and post-processes one statement.
/// `module` is used unless the statement names its own with `WITH MODULE`.
pub fn prepare(
    schema: &DBSchema,
    names: &NameGen,
    module: &[String],
    factor: bool,
    query: &eql_ast::Query,
) -> Result<Prepared, SemanticError> {
    let Lowered {
        expr,
        module: aliased,
    } = lower_query(names, query)?;
    let module: ModuleName = aliased.unwrap_or_else(|| module.to_vec());
    debug!(expr = %expr, "elaborated");

    let expr = if factor {
        let out = factor_paths(schema, &module, names, &expr);
        debug!(expr = %out, "factored paths");
        out
    } else {
        expr
    };

    let ctx = TcCtx::new(schema, &module, names);
    let (tp, expr) = synthesize(&ctx, &expr)?;
    debug!(tp = %tp.tp, mode = %tp.mode, "type checked");

    let expr = post_process(&expr);
    Ok(Prepared { expr, tp })
}

/// Adds SDL declarations to `module` and validates them.
pub fn add_sdl(schema: &mut DBSchema, names: &NameGen, module: &[String], sdl: &str) -> miette::Result<()> {
    let parsed = eql_parse::parse_sdl(sdl)?;
    add_decls(schema, names, module, &parsed)?;
    check_unchecked_modules(schema, names)?;
    Ok(())
}

/// Adds DDL commands and validates every module they touch.
pub fn add_ddl(schema: &mut DBSchema, names: &NameGen, ddl: &str) -> miette::Result<()> {
    let parsed = eql_parse::parse_ddl(ddl)?;
    add_decls(schema, names, &[DEFAULT_MODULE.to_string()], &parsed)?;
    check_unchecked_modules(schema, names)?;
    Ok(())
}
