//! Adds parsed SDL/DDL declarations to the unchecked part of a schema.

use indexmap::IndexMap;
use tracing::debug;

use eql_ast::{
    self as ast, CastKind, ExprKind, FunctionBody, ParamKind, PathStep, PointerCardinality,
    PointerDeclKind, PointerTarget, SchemaDecl, TypeExprKind,
};
use eql_ir::{
    CMMode, Cardinal, FunArgRetType, ModuleName, NameGen, ObjectTp, ParamModifier, QualifiedName,
    RawName, ResultTp, Tp, TpCastKind, map_tp,
};

use crate::error::SemanticError;
use crate::lower::{lower_expr, lower_function_body, lower_object_binding, lower_type, raw_name};
use crate::schema::{
    Constraint, DBSchema, FuncDef, FuncImpl, ModuleEntity, TypeBody, TypeDef, UncheckedCast,
};

type Result<T> = std::result::Result<T, SemanticError>;

/// Module that receives top-level SDL declarations.
pub const DEFAULT_MODULE: &str = "default";

/// Adds every declaration of `schema_ast`. Unqualified declarations land in
/// `module`; qualified ones in the module they name.
pub fn add_decls(
    schema: &mut DBSchema,
    names: &NameGen,
    module: &[String],
    schema_ast: &ast::Schema,
) -> Result<()> {
    for decl in &schema_ast.decls {
        add_decl(schema, names, module, decl)?;
    }
    Ok(())
}

fn add_decl(schema: &mut DBSchema, names: &NameGen, module: &[String], decl: &SchemaDecl) -> Result<()> {
    match decl {
        SchemaDecl::Module(m) => {
            if schema.module(&m.name).is_none() {
                schema.unchecked_module_mut(&m.name)?;
            }
            for d in &m.decls {
                add_decl(schema, names, &m.name, d)?;
            }
            Ok(())
        }
        SchemaDecl::Type(t) => add_object_type(schema, names, module, t),
        SchemaDecl::ScalarType(s) => {
            let (home, name) = placement(module, &s.name);
            insert_type(
                schema,
                &home,
                &name,
                TypeDef {
                    body: TypeBody::Scalar,
                    is_abstract: s.is_abstract,
                    constraints: Vec::new(),
                    indexes: Vec::new(),
                },
                s.extending.iter().map(raw_name).collect(),
            )
        }
        SchemaDecl::Function(f) => add_function(schema, names, module, f),
        SchemaDecl::Cast(c) => {
            let from = type_name_of(&c.from)?;
            let to = type_name_of(&c.to)?;
            schema.unchecked_casts.push(UncheckedCast {
                module: module.to_vec(),
                from,
                to,
                kind: match c.kind {
                    CastKind::Implicit => TpCastKind::Implicit,
                    CastKind::Assignment => TpCastKind::Assignment,
                    CastKind::Explicit => TpCastKind::Explicit,
                },
            });
            Ok(())
        }
    }
}

fn placement(module: &[String], name: &ast::QualName) -> (ModuleName, String) {
    if name.is_qualified() {
        (name.module.clone(), name.name.clone())
    } else {
        (module.to_vec(), name.name.clone())
    }
}

fn type_name_of(t: &ast::TypeExpr) -> Result<RawName> {
    match &t.kind {
        TypeExprKind::Name(q) => Ok(raw_name(q)),
        _ => Err(SemanticError::schema(
            "casts can only be declared between named types",
        )),
    }
}

fn insert_type(
    schema: &mut DBSchema,
    module: &[String],
    name: &str,
    def: TypeDef,
    bases: Vec<RawName>,
) -> Result<()> {
    let qn = QualifiedName::in_module(module, name);
    let m = schema.unchecked_module_mut(module)?;
    if m.defs.contains_key(name) {
        return Err(SemanticError::schema(format!("{qn} is already defined")));
    }
    m.defs.insert(name.to_string(), ModuleEntity::TypeDef(def));
    debug!(name = %qn, "declared type");
    schema.unchecked_subtyping.insert(qn, bases);
    Ok(())
}

fn add_object_type(
    schema: &mut DBSchema,
    names: &NameGen,
    module: &[String],
    t: &ast::TypeDecl,
) -> Result<()> {
    let (home, name) = placement(module, &t.name);
    let mut fields = ObjectTp::empty();
    let mut constraints = Vec::new();
    for p in &t.pointers {
        let (tp, pointer_constraints) = lower_pointer(names, p)?;
        if fields.0.insert(p.name.node.clone(), tp).is_some() {
            return Err(SemanticError::schema(format!(
                "field `{}` is declared twice in {name}",
                p.name.node
            )));
        }
        constraints.extend(pointer_constraints);
    }
    for c in &t.constraints {
        if c.name.name != "exclusive" {
            continue;
        }
        let field = c.on.as_ref().and_then(single_path_field).ok_or_else(|| {
            SemanticError::schema(format!(
                "exclusive constraint on {name} must name a single field, as in `on (.email)`"
            ))
        })?;
        constraints.push(Constraint::Exclusive {
            name: field,
            delegated: c.delegated,
        });
    }

    let mut bases: Vec<RawName> = t.extending.iter().map(raw_name).collect();
    if bases.is_empty() && home != ["std"] {
        bases.push(RawName::Qualified(QualifiedName::std("Object")));
    }
    let def = TypeDef {
        body: TypeBody::Object(fields),
        is_abstract: t.is_abstract,
        constraints,
        indexes: t
            .indexes
            .iter()
            .map(|ix| ix.iter().map(|i| i.node.clone()).collect())
            .collect(),
    };
    insert_type(schema, &home, &name, def, bases)
}

fn single_path_field(e: &ast::Expr) -> Option<String> {
    match &e.kind {
        ExprKind::Path { root: None, steps } => match steps.as_slice() {
            [PathStep::Prop(id)] => Some(id.node.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn pointer_mode(p: &ast::PointerDecl) -> CMMode {
    let lower = if p.required { Cardinal::One } else { Cardinal::Zero };
    let upper = match p.cardinality {
        Some(PointerCardinality::Multi) => Cardinal::Inf,
        _ => Cardinal::One,
    };
    CMMode::new(lower, upper)
}

/// Field type of a declared pointer, plus the exclusive constraints
/// declared inside it.
fn lower_pointer(names: &NameGen, p: &ast::PointerDecl) -> Result<(ResultTp, Vec<Constraint>)> {
    let mode = pointer_mode(p);
    let (ty, link_props, constraints, default) = match &p.target {
        PointerTarget::Computed(e) => {
            let b = lower_object_binding(names, e)?;
            return Ok((ResultTp::new(Tp::UncheckedComputable(Box::new(b)), mode), Vec::new()));
        }
        PointerTarget::Typed {
            ty,
            link_props,
            constraints,
            default,
        } => (ty, link_props, constraints, default),
    };

    let mut tp = lower_type(ty);
    if p.kind == PointerDeclKind::Link || !link_props.is_empty() {
        let Tp::UncheckedName(target) = tp else {
            return Err(SemanticError::schema(format!(
                "link `{}` must target a named object type",
                p.name.node
            )));
        };
        let mut linkprop = ObjectTp::empty();
        for lp in link_props {
            let (lp_tp, _) = lower_pointer(names, lp)?;
            linkprop.0.insert(lp.name.node.clone(), lp_tp);
        }
        tp = Tp::NamedNominalLink {
            name: target,
            linkprop,
        };
    }
    if let Some(d) = default {
        tp = Tp::Default {
            expr: Box::new(lower_object_binding(names, d)?),
            tp: Box::new(tp),
        };
    }
    let constraints = constraints
        .iter()
        .filter(|c| c.name.name == "exclusive")
        .map(|c| Constraint::Exclusive {
            name: p.name.node.clone(),
            delegated: c.delegated,
        })
        .collect();
    Ok((ResultTp::new(tp, mode), constraints))
}

fn modifier(kind: ParamKind) -> ParamModifier {
    match kind {
        ParamKind::Singleton => ParamModifier::Singleton,
        ParamKind::Optional => ParamModifier::Optional,
        ParamKind::SetOf => ParamModifier::SetOf,
    }
}

/// `anytype` in a signature is the placeholder instantiated per call.
fn signature_tp(t: &ast::TypeExpr) -> Tp {
    map_tp(
        &mut |tp| match tp {
            Tp::Any(None) => Some(Tp::Existential(0)),
            _ => None,
        },
        &lower_type(t),
    )
}

fn add_function(
    schema: &mut DBSchema,
    names: &NameGen,
    module: &[String],
    f: &ast::FunctionDecl,
) -> Result<()> {
    let (home, name) = placement(module, &f.name);
    let qn = QualifiedName::in_module(&home, &name);

    let mut defaults = IndexMap::new();
    for p in &f.params {
        if let Some(d) = &p.default {
            defaults.insert(p.name.node.clone(), lower_expr(names, d)?);
        }
    }
    let ret_mode = match f.ret_kind {
        ParamKind::Singleton => CMMode::ONE,
        ParamKind::Optional => CMMode::AT_MOST_ONE,
        ParamKind::SetOf => CMMode::ANY,
    };
    let tp = FunArgRetType {
        args_tp: f.params.iter().map(|p| signature_tp(&p.ty)).collect(),
        args_mod: f.params.iter().map(|p| modifier(p.kind)).collect(),
        args_label: f.params.iter().map(|p| p.name.node.clone()).collect(),
        ret_tp: ResultTp::new(signature_tp(&f.ret), ret_mode),
    };
    let body = match &f.body {
        FunctionBody::Builtin => FuncImpl::Builtin,
        FunctionBody::Expr(e) => {
            let params: Vec<String> = f.params.iter().map(|p| p.name.node.clone()).collect();
            FuncImpl::Defined(lower_function_body(names, &params, e)?)
        }
    };

    let m = schema.unchecked_module_mut(&home)?;
    match m
        .defs
        .entry(name)
        .or_insert_with(|| ModuleEntity::FuncDefs(Vec::new()))
    {
        ModuleEntity::FuncDefs(defs) => {
            defs.push(FuncDef { tp, body, defaults });
            Ok(())
        }
        ModuleEntity::TypeDef(_) => Err(SemanticError::schema(format!(
            "{qn} is already defined as a type"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(sdl: &str) -> DBSchema {
        let parsed = eql_parse::parse_sdl(sdl).unwrap();
        let mut schema = DBSchema::new();
        let names = NameGen::new();
        add_decls(&mut schema, &names, &[DEFAULT_MODULE.to_string()], &parsed).unwrap();
        schema
    }

    #[test]
    fn object_types_extend_object_by_default() {
        let s = build("type Person { required name: str; multi friends: Person; }");
        let qn = QualifiedName::new(["default", "Person"]);
        assert_eq!(
            s.unchecked_subtyping.get(&qn),
            Some(&vec![RawName::Qualified(QualifiedName::std("Object"))])
        );
        let fields = s.object_fields(&qn).unwrap();
        assert_eq!(fields.get("name").unwrap().mode, CMMode::ONE);
        assert_eq!(fields.get("friends").unwrap().mode, CMMode::ANY);
    }

    #[test]
    fn links_with_properties_become_nominal_links() {
        let s = build("type Person { multi link friends: Person { strength: float64; } }");
        let fields = s
            .object_fields(&QualifiedName::new(["default", "Person"]))
            .unwrap();
        match &fields.get("friends").unwrap().tp {
            Tp::NamedNominalLink { linkprop, .. } => assert!(linkprop.get("strength").is_some()),
            other => panic!("unexpected field type {other:?}"),
        }
    }

    #[test]
    fn exclusive_constraints_are_recorded_per_field() {
        let s = build("type User { required email: str { constraint exclusive; } }");
        let td = s.type_def(&QualifiedName::new(["default", "User"])).unwrap();
        assert!(td.is_exclusive("email"));
        assert!(!td.is_exclusive("name"));
    }
}
