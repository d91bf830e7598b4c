use eql_ast::{
    Alias, AssignOp, CastKind, ExprKind, FunctionBody, NonesOrder, ParamKind, PointerCardinality,
    PointerDeclKind, PointerTarget, QueryKind, SchemaDecl, ShapeElementBody, SortDirection,
    TypeExprKind,
};
use eql_parse::{parse_ddl, parse_query, parse_script, parse_sdl};

#[test]
fn select_with_shape_filter_order_and_limit() {
    let q = parse_query(
        "SELECT Person { name, friends: { name } FILTER .age > 20 LIMIT 2, n := count(.friends) } \
         FILTER .name = 'Alice' ORDER BY .age DESC EMPTY LAST THEN .name OFFSET 1 LIMIT 10",
    )
    .expect("select should parse");
    let QueryKind::Select(sel) = q.kind else {
        panic!("expected select");
    };
    let ExprKind::Shape { elements, .. } = &sel.result.kind else {
        panic!("expected shape");
    };
    assert_eq!(elements.len(), 3);
    match &elements[1].body {
        ShapeElementBody::Select {
            shape: Some(inner),
            filter: Some(_),
            limit: Some(_),
            ..
        } => assert_eq!(inner.len(), 1),
        other => panic!("unexpected nested element {other:?}"),
    }
    assert!(matches!(
        elements[2].body,
        ShapeElementBody::Compute {
            op: AssignOp::Assign,
            ..
        }
    ));
    assert!(sel.filter.is_some());
    assert_eq!(sel.order_by.len(), 2);
    assert_eq!(sel.order_by[0].direction, SortDirection::Desc);
    assert_eq!(sel.order_by[0].empty, Some(NonesOrder::Last));
    assert_eq!(sel.order_by[1].direction, SortDirection::Asc);
    assert!(sel.offset.is_some() && sel.limit.is_some());
}

#[test]
fn dml_statements_parse() {
    let script = parse_script(
        "INSERT Person { name := 'Bob', friends := (SELECT Person FILTER .name = 'Alice') };\n\
         UPDATE Person FILTER .name = 'Bob' SET { friends += (SELECT Person), age := 3 };\n\
         DELETE Person FILTER .name = 'Bob';\n\
         FOR x IN {1, 2} UNION (INSERT Counter { n := x });",
    )
    .expect("dml should parse");
    assert_eq!(script.stmts.len(), 4);
    assert!(matches!(script.stmts[0].kind, QueryKind::Insert(_)));
    let QueryKind::Update(upd) = &script.stmts[1].kind else {
        panic!("expected update");
    };
    assert!(matches!(
        upd.shape[0].body,
        ShapeElementBody::Compute {
            op: AssignOp::Append,
            ..
        }
    ));
    assert!(matches!(script.stmts[2].kind, QueryKind::Delete(_)));
    assert!(matches!(script.stmts[3].kind, QueryKind::For(_)));
}

#[test]
fn with_block_aliases_and_module() {
    let q = parse_query("WITH MODULE default, p := Person SELECT p.name")
        .expect("with block should parse");
    assert_eq!(q.aliases.len(), 2);
    assert!(matches!(&q.aliases[0], Alias::Module { name, .. } if name == &["default"]));
    assert!(matches!(&q.aliases[1], Alias::Expr { name, .. } if name.node == "p"));
}

#[test]
fn with_requires_a_statement() {
    let err = parse_query("WITH x := 1 x").expect_err("expected parse error");
    assert!(
        err.to_string().contains("expected a statement"),
        "unexpected error message: {err}"
    );
}

#[test]
fn sdl_module_with_types_and_links() {
    let schema = parse_sdl(
        r#"
module default {
    abstract type Named {
        required name: str {
            constraint exclusive;
        };
    }
    type Person extending Named {
        age: int64 { default := 0 };
        multi friends: Person {
            since: int64;
        };
        property nick := .name ++ '!';
        index on (.age);
    }
    scalar type Score extending int64;
    function double(x: int64) -> int64 using (x * 2);
}
"#,
    )
    .expect("sdl should parse");
    let [SchemaDecl::Module(module)] = schema.decls.as_slice() else {
        panic!("expected one module");
    };
    assert_eq!(module.name, vec!["default".to_string()]);
    assert_eq!(module.decls.len(), 4);

    let SchemaDecl::Type(named) = &module.decls[0] else {
        panic!("expected type");
    };
    assert!(named.is_abstract);
    assert!(named.pointers[0].required);
    let PointerTarget::Typed { constraints, .. } = &named.pointers[0].target else {
        panic!("expected typed pointer");
    };
    assert_eq!(constraints[0].name.name, "exclusive");

    let SchemaDecl::Type(person) = &module.decls[1] else {
        panic!("expected type");
    };
    assert_eq!(person.extending[0].name, "Named");
    assert_eq!(person.pointers.len(), 3);
    let PointerTarget::Typed { default, .. } = &person.pointers[0].target else {
        panic!("expected typed pointer");
    };
    assert!(default.is_some());
    assert_eq!(person.pointers[1].cardinality, Some(PointerCardinality::Multi));
    let PointerTarget::Typed { link_props, .. } = &person.pointers[1].target else {
        panic!("expected typed pointer");
    };
    assert_eq!(link_props[0].name.node, "since");
    assert!(matches!(person.pointers[2].target, PointerTarget::Computed(_)));
    assert_eq!(person.indexes.len(), 1);
    assert_eq!(person.indexes[0][0].node, "age");

    assert!(matches!(module.decls[2], SchemaDecl::ScalarType(_)));
    let SchemaDecl::Function(f) = &module.decls[3] else {
        panic!("expected function");
    };
    assert!(matches!(f.body, FunctionBody::Expr(_)));
}

#[test]
fn ddl_statements_parse() {
    let schema = parse_ddl(
        r#"
CREATE MODULE std IF NOT EXISTS;
CREATE ABSTRACT SCALAR TYPE std::anyint;
CREATE SCALAR TYPE std::int64 EXTENDING std::anyint;
CREATE TYPE default::Person {
    CREATE REQUIRED PROPERTY name -> std::str {
        CREATE CONSTRAINT std::exclusive;
    };
    CREATE MULTI LINK friends -> default::Person {
        CREATE PROPERTY since -> std::int64;
    };
    CREATE PROPERTY score -> std::int64 {
        SET default := 0;
    };
};
CREATE FUNCTION std::count(s: SET OF anytype) -> std::int64 {
    SET volatility := 'Immutable';
    USING BUILTIN;
};
CREATE INFIX OPERATOR std::`+`(l: std::int64, r: std::int64) -> std::int64 {
    USING BUILTIN;
};
CREATE FUNCTION std::array_get(a: array<anytype>, i: std::int64, default: OPTIONAL anytype = {}) -> OPTIONAL anytype {
    USING BUILTIN;
};
CREATE CAST FROM std::int64 TO std::float64 {
    ALLOW IMPLICIT;
    USING BUILTIN;
};
"#,
    )
    .expect("ddl should parse");
    assert_eq!(schema.decls.len(), 8);

    let SchemaDecl::Type(person) = &schema.decls[3] else {
        panic!("expected type");
    };
    assert_eq!(person.name.module, vec!["default".to_string()]);
    assert_eq!(person.pointers[1].kind, PointerDeclKind::Link);
    let PointerTarget::Typed { default, .. } = &person.pointers[2].target else {
        panic!("expected typed pointer");
    };
    assert!(default.is_some());

    let SchemaDecl::Function(count) = &schema.decls[4] else {
        panic!("expected function");
    };
    assert_eq!(count.params[0].kind, ParamKind::SetOf);
    assert!(matches!(count.body, FunctionBody::Builtin));

    let SchemaDecl::Function(plus) = &schema.decls[5] else {
        panic!("expected operator");
    };
    assert_eq!(plus.name.name, "+");

    let SchemaDecl::Function(get) = &schema.decls[6] else {
        panic!("expected function");
    };
    assert_eq!(get.ret_kind, ParamKind::Optional);
    assert!(matches!(get.params[0].ty.kind, TypeExprKind::Array(_)));
    assert!(get.params[2].default.is_some());

    let SchemaDecl::Cast(cast) = &schema.decls[7] else {
        panic!("expected cast");
    };
    assert_eq!(cast.kind, CastKind::Implicit);
}
