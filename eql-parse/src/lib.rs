#![forbid(unsafe_code)]

mod error;
mod parser;
mod schema;

use eql_lex::Lexer;
use miette::IntoDiagnostic;

pub use error::ParseError;
pub use parser::Parser;

/// Parses a `;`-separated script of queries.
pub fn parse_script(src: &str) -> miette::Result<eql_ast::Script> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_script().into_diagnostic()
}

/// Parses exactly one query; a trailing `;` is allowed.
pub fn parse_query(src: &str) -> miette::Result<eql_ast::Query> {
    let script = parse_script(src)?;
    let mut stmts = script.stmts.into_iter();
    match (stmts.next(), stmts.next()) {
        (Some(query), None) => Ok(query),
        _ => Err(miette::miette!("expected exactly one query")),
    }
}

pub fn parse_expr(src: &str) -> miette::Result<eql_ast::Expr> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_expr_eof().into_diagnostic()
}

/// Parses declarative schema (`module m { type T { ... } }`).
pub fn parse_sdl(src: &str) -> miette::Result<eql_ast::Schema> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_sdl().into_diagnostic()
}

/// Parses a sequence of `CREATE ...` statements.
pub fn parse_ddl(src: &str) -> miette::Result<eql_ast::Schema> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_ddl().into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ast::{BinOp, ExprKind, PathStep, QueryKind, UnaryOp};

    fn select_result(src: &str) -> eql_ast::Expr {
        match parse_query(src).unwrap().kind {
            QueryKind::Select(sel) => sel.result,
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let e = parse_expr("1 + 2 * 3").unwrap();
        let ExprKind::Binary { op, right, .. } = e.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn union_is_the_loosest_operator() {
        let e = parse_expr("1 IF true ELSE 2 UNION 3").unwrap();
        let ExprKind::Binary { op, left, .. } = e.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Union);
        assert!(matches!(left.kind, ExprKind::IfElse { .. }));
    }

    #[test]
    fn power_is_right_associative_and_beats_negation() {
        let e = parse_expr("-2 ^ 3 ^ 2").unwrap();
        let ExprKind::Unary { op, expr } = e.kind else {
            panic!("expected unary");
        };
        assert_eq!(op, UnaryOp::Neg);
        let ExprKind::Binary { right, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn negative_literals_fold() {
        assert_eq!(parse_expr("-5").unwrap().kind, ExprKind::IntLit(-5));
    }

    #[test]
    fn not_in_is_one_operator() {
        let e = parse_expr("1 NOT IN {2, 3}").unwrap();
        assert!(matches!(e.kind, ExprKind::Binary { op: BinOp::NotIn, .. }));
    }

    #[test]
    fn path_steps_accumulate() {
        let e = parse_expr("User.friends@since").unwrap();
        let ExprKind::Path { root, steps } = e.kind else {
            panic!("expected path");
        };
        assert!(matches!(root.map(|r| r.kind), Some(ExprKind::Name(_))));
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[1], PathStep::LinkProp(_)));
    }

    #[test]
    fn partial_paths_and_backlinks() {
        let e = parse_expr(".<friends[IS User].name").unwrap();
        let ExprKind::Path { root, steps } = e.kind else {
            panic!("expected path");
        };
        assert!(root.is_none());
        assert!(matches!(steps[0], PathStep::BackLink(_)));
        assert!(matches!(steps[1], PathStep::TypeIntersect(_)));
        assert!(matches!(steps[2], PathStep::Prop(_)));
    }

    #[test]
    fn braces_disambiguate_sets_and_free_objects() {
        assert!(matches!(parse_expr("{1, 2}").unwrap().kind, ExprKind::Set(ref v) if v.len() == 2));
        assert!(matches!(parse_expr("{}").unwrap().kind, ExprKind::Set(ref v) if v.is_empty()));
        assert!(matches!(
            parse_expr("{ a := 1 }").unwrap().kind,
            ExprKind::FreeObject(_)
        ));
    }

    #[test]
    fn parens_make_tuples_only_with_commas() {
        assert_eq!(parse_expr("(1)").unwrap().kind, ExprKind::IntLit(1));
        assert!(matches!(parse_expr("(1,)").unwrap().kind, ExprKind::Tuple(ref v) if v.len() == 1));
        assert!(matches!(
            parse_expr("(a := 1, b := 2)").unwrap().kind,
            ExprKind::NamedTuple(ref v) if v.len() == 2
        ));
    }

    #[test]
    fn casts_and_parameters() {
        assert!(matches!(parse_expr("<str>1").unwrap().kind, ExprKind::Cast { .. }));
        assert!(matches!(
            parse_expr("<optional int64>$limit").unwrap().kind,
            ExprKind::Param { optional: true, .. }
        ));
        assert!(parse_expr("<optional str>1").is_err());
    }

    #[test]
    fn slices_and_indexes() {
        assert!(matches!(parse_expr("x[1]").unwrap().kind, ExprKind::Index { .. }));
        assert!(matches!(
            parse_expr("x[:2]").unwrap().kind,
            ExprKind::Slice { start: None, stop: Some(_), .. }
        ));
        assert!(matches!(
            parse_expr("x[1:]").unwrap().kind,
            ExprKind::Slice { start: Some(_), stop: None, .. }
        ));
    }

    #[test]
    fn bare_expressions_are_selects() {
        assert_eq!(select_result("1;").kind, ExprKind::IntLit(1));
    }

    #[test]
    fn trailing_input_is_rejected() {
        assert!(parse_expr("1 2").is_err());
    }
}
