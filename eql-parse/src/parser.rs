#![forbid(unsafe_code)]

use std::mem;

use eql_ast::{
    Alias, AssignOp, BinOp, CallArg, DeleteQuery, Expr, ExprKind, ForQuery, Ident, InsertQuery,
    NonesOrder, PathStep, PointerKind, QualName, Query, QueryKind, Script, SelectQuery,
    ShapeElement, ShapeElementBody, SortDirection, SortExpr, Span, TypeExpr, TypeExprKind,
    UnaryOp, UpdateQuery, span_between,
};
use eql_lex::{Keyword, Token, TokenKind};

use crate::error::ParseError;

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
    eof: Token,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        let end = tokens.last().map(|t| t.span).unwrap_or_else(|| span_between(0, 0));
        Self {
            tokens,
            idx: 0,
            eof: Token {
                kind: TokenKind::Eof,
                span: end,
            },
        }
    }

    pub fn parse_script(&mut self) -> Result<Script, ParseError> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(TokenKind::Semi).is_some() {}
            if self.at(TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_query()?);
            if !self.at(TokenKind::Eof) {
                self.expect(TokenKind::Semi)?;
            }
        }
        Ok(Script { stmts })
    }

    pub fn parse_query(&mut self) -> Result<Query, ParseError> {
        let start = self.peek_span();
        let mut aliases = Vec::new();
        if self.eat_kw(Keyword::With) {
            loop {
                aliases.push(self.parse_alias()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }

        let kind = if self.eat_kw(Keyword::Select) {
            QueryKind::Select(self.parse_select_body()?)
        } else if self.eat_kw(Keyword::Insert) {
            let subject = self.parse_qual_name()?;
            let shape = if self.at(TokenKind::LBrace) {
                self.parse_shape()?
            } else {
                Vec::new()
            };
            QueryKind::Insert(InsertQuery { subject, shape })
        } else if self.eat_kw(Keyword::Update) {
            let subject = self.parse_expr()?;
            let filter = self.parse_filter()?;
            self.expect_kw(Keyword::Set)?;
            let shape = self.parse_shape()?;
            QueryKind::Update(UpdateQuery {
                subject,
                filter,
                shape,
            })
        } else if self.eat_kw(Keyword::Delete) {
            let subject = self.parse_expr()?;
            let filter = self.parse_filter()?;
            let order_by = self.parse_order_by()?;
            let (offset, limit) = self.parse_offset_limit()?;
            QueryKind::Delete(DeleteQuery {
                subject,
                filter,
                order_by,
                offset,
                limit,
            })
        } else if self.eat_kw(Keyword::For) {
            let iterator = self.expect_ident()?;
            self.expect_kw(Keyword::In)?;
            let iterator_expr = self.parse_if_else_expr()?;
            self.expect_kw(Keyword::Union)?;
            let body = self.parse_expr()?;
            QueryKind::For(ForQuery {
                iterator,
                iterator_expr,
                body,
            })
        } else if aliases.is_empty() {
            let result = self.parse_expr()?;
            QueryKind::Select(SelectQuery {
                result_alias: None,
                result,
                filter: None,
                order_by: Vec::new(),
                offset: None,
                limit: None,
            })
        } else {
            return Err(ParseError {
                message: "expected a statement after WITH".to_string(),
                span: self.peek_span(),
            });
        };

        Ok(Query {
            span: join(start, self.prev_span()),
            aliases,
            kind,
        })
    }

    fn parse_alias(&mut self) -> Result<Alias, ParseError> {
        if self.at_word("module") && !matches!(self.peek_kind_n(1), TokenKind::Assign) {
            let kw = self.bump();
            let name = self.parse_module_path()?;
            return Ok(Alias::Module {
                span: join(kw.span, self.prev_span()),
                name,
            });
        }
        let name = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let expr = self.parse_expr()?;
        Ok(Alias::Expr { name, expr })
    }

    pub(crate) fn parse_module_path(&mut self) -> Result<Vec<String>, ParseError> {
        let mut parts = vec![self.expect_ident()?.node];
        while self.eat(TokenKind::ColonColon).is_some() {
            parts.push(self.expect_ident()?.node);
        }
        Ok(parts)
    }

    fn parse_select_body(&mut self) -> Result<SelectQuery, ParseError> {
        let result_alias = if self.at_ident() && matches!(self.peek_kind_n(1), TokenKind::Assign) {
            let name = self.expect_ident()?;
            self.bump();
            Some(name)
        } else {
            None
        };
        let result = self.parse_expr()?;
        let filter = self.parse_filter()?;
        let order_by = self.parse_order_by()?;
        let (offset, limit) = self.parse_offset_limit()?;
        Ok(SelectQuery {
            result_alias,
            result,
            filter,
            order_by,
            offset,
            limit,
        })
    }

    fn parse_filter(&mut self) -> Result<Option<Expr>, ParseError> {
        if self.eat_kw(Keyword::Filter) {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_order_by(&mut self) -> Result<Vec<SortExpr>, ParseError> {
        let mut keys = Vec::new();
        if !self.eat_kw(Keyword::Order) {
            return Ok(keys);
        }
        self.expect_kw(Keyword::By)?;
        loop {
            let expr = self.parse_expr()?;
            let direction = if self.eat_word("desc") {
                SortDirection::Desc
            } else {
                self.eat_word("asc");
                SortDirection::Asc
            };
            let empty = if self.eat_word("empty") {
                if self.eat_word("first") {
                    Some(NonesOrder::First)
                } else {
                    self.expect_word("last")?;
                    Some(NonesOrder::Last)
                }
            } else {
                None
            };
            keys.push(SortExpr {
                span: join(expr.span, self.prev_span()),
                expr,
                direction,
                empty,
            });
            if !self.eat_word("then") {
                break;
            }
        }
        Ok(keys)
    }

    fn parse_offset_limit(&mut self) -> Result<(Option<Expr>, Option<Expr>), ParseError> {
        let offset = if self.eat_kw(Keyword::Offset) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let limit = if self.eat_kw(Keyword::Limit) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok((offset, limit))
    }

    pub(crate) fn parse_shape(&mut self) -> Result<Vec<ShapeElement>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        self.parse_shape_rest()
    }

    /// Elements after the opening brace, up to and including the closing one.
    fn parse_shape_rest(&mut self) -> Result<Vec<ShapeElement>, ParseError> {
        let mut elements = Vec::new();
        while !self.at(TokenKind::RBrace) {
            elements.push(self.parse_shape_element()?);
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(elements)
    }

    fn parse_shape_element(&mut self) -> Result<ShapeElement, ParseError> {
        let start = self.peek_span();
        let kind = if self.eat(TokenKind::At).is_some() {
            PointerKind::LinkProperty
        } else {
            PointerKind::Property
        };
        let name = self.expect_ident()?;

        let op = match self.peek_kind() {
            TokenKind::Assign => Some(AssignOp::Assign),
            TokenKind::PlusAssign => Some(AssignOp::Append),
            TokenKind::MinusAssign => Some(AssignOp::Subtract),
            _ => None,
        };
        let body = if let Some(op) = op {
            self.bump();
            let expr = self.parse_expr()?;
            ShapeElementBody::Compute { op, expr }
        } else {
            let shape = if self.eat(TokenKind::Colon).is_some() {
                Some(self.parse_shape()?)
            } else {
                None
            };
            let filter = self.parse_filter()?;
            let order_by = self.parse_order_by()?;
            let (offset, limit) = self.parse_offset_limit()?;
            ShapeElementBody::Select {
                shape,
                filter,
                order_by,
                offset,
                limit,
            }
        };

        Ok(ShapeElement {
            span: join(start, self.prev_span()),
            kind,
            name,
            body,
        })
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_if_else_expr()?;
        while self.eat_kw(Keyword::Union) {
            let right = self.parse_if_else_expr()?;
            left = binary(left, BinOp::Union, right);
        }
        Ok(left)
    }

    pub fn parse_expr_eof(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        self.eat(TokenKind::Semi);
        if !self.at(TokenKind::Eof) {
            return Err(ParseError {
                message: "unexpected trailing input".to_string(),
                span: self.peek_span(),
            });
        }
        Ok(expr)
    }

    fn parse_if_else_expr(&mut self) -> Result<Expr, ParseError> {
        let then_branch = self.parse_or_expr()?;
        if !self.eat_kw(Keyword::If) {
            return Ok(then_branch);
        }
        let condition = self.parse_or_expr()?;
        self.expect_kw(Keyword::Else)?;
        let else_branch = self.parse_if_else_expr()?;
        Ok(Expr {
            span: join(then_branch.span, else_branch.span),
            kind: ExprKind::IfElse {
                then_branch: Box::new(then_branch),
                condition: Box::new(condition),
                else_branch: Box::new(else_branch),
            },
        })
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expr()?;
        while self.eat_kw(Keyword::Or) {
            let right = self.parse_and_expr()?;
            left = binary(left, BinOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not_expr()?;
        while self.eat_kw(Keyword::And) {
            let right = self.parse_not_expr()?;
            left = binary(left, BinOp::And, right);
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at_kw(Keyword::Not) {
            let t = self.bump();
            let expr = self.parse_not_expr()?;
            return Ok(unary(t.span, UnaryOp::Not, expr));
        }
        self.parse_cmp_expr()
    }

    fn parse_cmp_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_add_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => Some(BinOp::Eq),
                TokenKind::Neq => Some(BinOp::Ne),
                TokenKind::OptEq => Some(BinOp::OptEq),
                TokenKind::OptNeq => Some(BinOp::OptNe),
                TokenKind::Lt => Some(BinOp::Lt),
                TokenKind::Gt => Some(BinOp::Gt),
                TokenKind::Le => Some(BinOp::Le),
                TokenKind::Ge => Some(BinOp::Ge),
                TokenKind::Kw(Keyword::Like) => Some(BinOp::Like),
                TokenKind::Kw(Keyword::ILike) => Some(BinOp::ILike),
                TokenKind::Kw(Keyword::In) => Some(BinOp::In),
                TokenKind::Kw(Keyword::Not)
                    if matches!(self.peek_kind_n(1), TokenKind::Kw(Keyword::In)) =>
                {
                    self.bump();
                    Some(BinOp::NotIn)
                }
                _ => None,
            };
            if let Some(op) = op {
                self.bump();
                let right = self.parse_add_expr()?;
                left = binary(left, op, right);
                continue;
            }
            if self.eat_kw(Keyword::Is) {
                let negated = self.eat_kw(Keyword::Not);
                let ty = self.parse_type_expr()?;
                left = Expr {
                    span: join(left.span, ty.span),
                    kind: ExprKind::IsType {
                        expr: Box::new(left),
                        ty,
                        negated,
                    },
                };
                continue;
            }
            break;
        }
        Ok(left)
    }

    fn parse_add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                TokenKind::Concat => BinOp::Concat,
                _ => break,
            };
            self.bump();
            let right = self.parse_mul_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_coalesce_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_coalesce_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_coalesce_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary_expr()?;
        while self.eat(TokenKind::Coalesce).is_some() {
            let right = self.parse_unary_expr()?;
            left = binary(left, BinOp::Coalesce, right);
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Kw(Keyword::Exists) => Some(UnaryOp::Exists),
            TokenKind::Kw(Keyword::Distinct) => Some(UnaryOp::Distinct),
            _ => None,
        };
        if let Some(op) = op {
            let t = self.bump();
            let expr = self.parse_unary_expr()?;
            if op == UnaryOp::Neg {
                if let ExprKind::IntLit(n) = expr.kind {
                    return Ok(Expr {
                        span: join(t.span, expr.span),
                        kind: ExprKind::IntLit(n.wrapping_neg()),
                    });
                }
            }
            return Ok(unary(t.span, op, expr));
        }
        self.parse_pow_expr()
    }

    fn parse_pow_expr(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_cast_expr()?;
        if self.eat(TokenKind::Caret).is_some() {
            let exp = self.parse_unary_expr()?;
            return Ok(binary(base, BinOp::Pow, exp));
        }
        Ok(base)
    }

    fn parse_cast_expr(&mut self) -> Result<Expr, ParseError> {
        if !self.at(TokenKind::Lt) {
            return self.parse_postfix_expr();
        }
        let lt = self.bump();
        let optional = self.eat_word("optional");
        let ty = self.parse_type_expr()?;
        self.expect(TokenKind::Gt)?;

        if self.eat(TokenKind::Dollar).is_some() {
            let tok = self.bump();
            let name = match tok.kind {
                TokenKind::Ident(s) | TokenKind::QuotedIdent(s) => s,
                TokenKind::Int(n) => n.to_string(),
                _ => {
                    return Err(ParseError {
                        message: "expected a parameter name after `$`".to_string(),
                        span: tok.span,
                    });
                }
            };
            return Ok(Expr {
                span: join(lt.span, tok.span),
                kind: ExprKind::Param { name, ty, optional },
            });
        }
        if optional {
            return Err(ParseError {
                message: "`optional` is only allowed on parameters".to_string(),
                span: ty.span,
            });
        }
        let expr = self.parse_cast_expr()?;
        Ok(Expr {
            span: join(lt.span, expr.span),
            kind: ExprKind::Cast {
                ty,
                expr: Box::new(expr),
            },
        })
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot | TokenKind::DotLt | TokenKind::At => {
                    let step = self.parse_path_step()?;
                    expr = push_step(expr, step, self.prev_span());
                }
                TokenKind::LBracket => {
                    expr = self.parse_bracket_suffix(expr)?;
                }
                TokenKind::LBrace => {
                    let elements = self.parse_shape()?;
                    expr = Expr {
                        span: join(expr.span, self.prev_span()),
                        kind: ExprKind::Shape {
                            subject: Box::new(expr),
                            elements,
                        },
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_path_step(&mut self) -> Result<PathStep, ParseError> {
        let sep = self.bump();
        match sep.kind {
            TokenKind::DotLt => Ok(PathStep::BackLink(self.expect_ident()?)),
            TokenKind::At => Ok(PathStep::LinkProp(self.expect_ident()?)),
            _ => {
                let tok = self.bump();
                match tok.kind {
                    TokenKind::Ident(s) | TokenKind::QuotedIdent(s) => {
                        Ok(PathStep::Prop(Ident::new(tok.span, s)))
                    }
                    TokenKind::Int(n) => Ok(PathStep::Prop(Ident::new(tok.span, n.to_string()))),
                    _ => Err(ParseError {
                        message: "expected a property name after `.`".to_string(),
                        span: tok.span,
                    }),
                }
            }
        }
    }

    fn parse_bracket_suffix(&mut self, subject: Expr) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LBracket)?;
        let start_span = subject.span;
        if self.eat_kw(Keyword::Is) {
            let ty = self.parse_qual_name()?;
            self.expect(TokenKind::RBracket)?;
            return Ok(push_step(subject, PathStep::TypeIntersect(ty), self.prev_span()));
        }
        let start = if self.at(TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let kind = if self.eat(TokenKind::Colon).is_some() {
            let stop = if self.at(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            ExprKind::Slice {
                subject: Box::new(subject),
                start,
                stop,
            }
        } else {
            let index = start.ok_or_else(|| ParseError {
                message: "empty index".to_string(),
                span: self.peek_span(),
            })?;
            ExprKind::Index {
                subject: Box::new(subject),
                index,
            }
        };
        let rb = self.expect(TokenKind::RBracket)?;
        Ok(Expr {
            span: join(start_span, rb.span),
            kind,
        })
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        let lit = |kind| Ok(Expr { span: tok.span, kind });
        match &tok.kind {
            TokenKind::Int(n) => {
                self.bump();
                lit(ExprKind::IntLit(*n))
            }
            TokenKind::Float(x) => {
                self.bump();
                lit(ExprKind::FloatLit(*x))
            }
            TokenKind::String(s) => {
                self.bump();
                lit(ExprKind::StrLit(s.clone()))
            }
            TokenKind::Kw(Keyword::True) => {
                self.bump();
                lit(ExprKind::BoolLit(true))
            }
            TokenKind::Kw(Keyword::False) => {
                self.bump();
                lit(ExprKind::BoolLit(false))
            }
            TokenKind::Kw(
                Keyword::Select
                | Keyword::Insert
                | Keyword::Update
                | Keyword::Delete
                | Keyword::With
                | Keyword::For,
            ) => {
                let query = self.parse_query()?;
                Ok(Expr {
                    span: query.span,
                    kind: ExprKind::Query(Box::new(query)),
                })
            }
            TokenKind::Kw(Keyword::Detached) => {
                self.bump();
                let expr = self.parse_postfix_expr()?;
                Ok(Expr {
                    span: join(tok.span, expr.span),
                    kind: ExprKind::Detached(Box::new(expr)),
                })
            }
            TokenKind::Dot | TokenKind::DotLt | TokenKind::At => {
                let step = self.parse_path_step()?;
                Ok(Expr {
                    span: join(tok.span, self.prev_span()),
                    kind: ExprKind::Path {
                        root: None,
                        steps: vec![step],
                    },
                })
            }
            TokenKind::LParen => self.parse_paren_expr(),
            TokenKind::LBracket => {
                self.bump();
                let elems = self.parse_expr_list(TokenKind::RBracket)?;
                Ok(Expr {
                    span: join(tok.span, self.prev_span()),
                    kind: ExprKind::Array(elems),
                })
            }
            TokenKind::LBrace => {
                self.bump();
                let is_free_object = match (self.peek_kind(), self.peek_kind_n(1)) {
                    (TokenKind::Ident(_) | TokenKind::QuotedIdent(_), TokenKind::Assign) => true,
                    (TokenKind::At, _) => true,
                    _ => false,
                };
                if is_free_object {
                    let elements = self.parse_shape_rest()?;
                    return Ok(Expr {
                        span: join(tok.span, self.prev_span()),
                        kind: ExprKind::FreeObject(elements),
                    });
                }
                let elems = self.parse_expr_list(TokenKind::RBrace)?;
                Ok(Expr {
                    span: join(tok.span, self.prev_span()),
                    kind: ExprKind::Set(elems),
                })
            }
            TokenKind::Ident(_) | TokenKind::QuotedIdent(_) => {
                let name = self.parse_qual_name()?;
                if self.eat(TokenKind::LParen).is_none() {
                    return Ok(Expr {
                        span: name.span,
                        kind: ExprKind::Name(name),
                    });
                }
                let args = self.parse_args()?;
                let rp = self.expect(TokenKind::RParen)?;
                Ok(Expr {
                    span: join(name.span, rp.span),
                    kind: ExprKind::Call { func: name, args },
                })
            }
            _ => Err(ParseError {
                message: "expected an expression".to_string(),
                span: tok.span,
            }),
        }
    }

    fn parse_paren_expr(&mut self) -> Result<Expr, ParseError> {
        let lp = self.expect(TokenKind::LParen)?;
        if let Some(rp) = self.eat(TokenKind::RParen) {
            return Ok(Expr {
                span: join(lp.span, rp.span),
                kind: ExprKind::Tuple(Vec::new()),
            });
        }

        if self.at_ident() && matches!(self.peek_kind_n(1), TokenKind::Assign) {
            let mut fields = Vec::new();
            while !self.at(TokenKind::RParen) {
                let name = self.expect_ident()?;
                self.expect(TokenKind::Assign)?;
                fields.push((name, self.parse_expr()?));
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
            let rp = self.expect(TokenKind::RParen)?;
            return Ok(Expr {
                span: join(lp.span, rp.span),
                kind: ExprKind::NamedTuple(fields),
            });
        }

        let first = self.parse_expr()?;
        if self.eat(TokenKind::Comma).is_none() {
            self.expect(TokenKind::RParen)?;
            return Ok(first);
        }
        let mut elems = vec![first];
        elems.extend(self.parse_expr_list(TokenKind::RParen)?);
        Ok(Expr {
            span: join(lp.span, self.prev_span()),
            kind: ExprKind::Tuple(elems),
        })
    }

    /// Comma-separated expressions up to and including `close`; a trailing
    /// comma is allowed.
    fn parse_expr_list(&mut self, close: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut elems = Vec::new();
        while !self.at(close.clone()) {
            elems.push(self.parse_expr()?);
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(close)?;
        Ok(elems)
    }

    fn parse_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            if self.at_ident() && matches!(self.peek_kind_n(1), TokenKind::Assign) {
                let name = self.expect_ident()?;
                self.bump();
                let value = self.parse_expr()?;
                args.push(CallArg::Named { name, value });
            } else {
                args.push(CallArg::Positional(self.parse_expr()?));
            }
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(args)
    }

    pub(crate) fn parse_qual_name(&mut self) -> Result<QualName, ParseError> {
        let first = self.expect_ident()?;
        let start = first.span;
        let mut parts = vec![first.node];
        while self.eat(TokenKind::ColonColon).is_some() {
            parts.push(self.expect_ident()?.node);
        }
        let name = parts.pop().unwrap_or_default();
        Ok(QualName {
            span: join(start, self.prev_span()),
            module: parts,
            name,
        })
    }

    pub(crate) fn parse_type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let name = self.parse_qual_name()?;
        if name.is_qualified() || !self.at(TokenKind::Lt) {
            return Ok(TypeExpr {
                span: name.span,
                kind: TypeExprKind::Name(name),
            });
        }
        let kind = match name.name.to_ascii_lowercase().as_str() {
            "array" => {
                self.bump();
                let elem = self.parse_type_expr()?;
                self.expect(TokenKind::Gt)?;
                TypeExprKind::Array(Box::new(elem))
            }
            "tuple" => {
                self.bump();
                let named = self.at_ident() && matches!(self.peek_kind_n(1), TokenKind::Colon);
                let mut unnamed = Vec::new();
                let mut fields = Vec::new();
                while !self.at(TokenKind::Gt) {
                    if named {
                        let label = self.expect_ident()?;
                        self.expect(TokenKind::Colon)?;
                        fields.push((label, self.parse_type_expr()?));
                    } else {
                        unnamed.push(self.parse_type_expr()?);
                    }
                    if self.eat(TokenKind::Comma).is_none() {
                        break;
                    }
                }
                self.expect(TokenKind::Gt)?;
                if named {
                    TypeExprKind::NamedTuple(fields)
                } else {
                    TypeExprKind::Tuple(unnamed)
                }
            }
            _ => TypeExprKind::Name(name.clone()),
        };
        Ok(TypeExpr {
            span: join(name.span, self.prev_span()),
            kind,
        })
    }

    pub(crate) fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.bump();
        match tok.kind {
            TokenKind::Ident(name) | TokenKind::QuotedIdent(name) => Ok(Ident::new(tok.span, name)),
            _ => Err(ParseError {
                message: "expected identifier".to_string(),
                span: tok.span,
            }),
        }
    }

    pub(crate) fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        if self.at(expected.clone()) {
            Ok(self.bump())
        } else {
            Err(ParseError {
                message: format!("expected {expected:?}, found {:?}", self.peek_kind()),
                span: self.peek_span(),
            })
        }
    }

    pub(crate) fn expect_kw(&mut self, kw: Keyword) -> Result<Token, ParseError> {
        if self.at_kw(kw) {
            Ok(self.bump())
        } else {
            Err(ParseError {
                message: format!("expected {}", format!("{kw:?}").to_uppercase()),
                span: self.peek_span(),
            })
        }
    }

    pub(crate) fn expect_word(&mut self, word: &str) -> Result<Token, ParseError> {
        if self.at_word(word) {
            Ok(self.bump())
        } else {
            Err(ParseError {
                message: format!("expected {}", word.to_uppercase()),
                span: self.peek_span(),
            })
        }
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        self.at(kind).then(|| self.bump())
    }

    pub(crate) fn eat_kw(&mut self, kw: Keyword) -> bool {
        let hit = self.at_kw(kw);
        if hit {
            self.bump();
        }
        hit
    }

    /// Unreserved words are plain identifiers, matched case-insensitively.
    pub(crate) fn eat_word(&mut self, word: &str) -> bool {
        let hit = self.at_word(word);
        if hit {
            self.bump();
        }
        hit
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        mem::discriminant(self.peek_kind()) == mem::discriminant(&kind)
    }

    pub(crate) fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Kw(k) if *k == kw)
    }

    pub(crate) fn at_word(&self, word: &str) -> bool {
        self.word_at(0, word)
    }

    pub(crate) fn word_at(&self, n: usize, word: &str) -> bool {
        matches!(self.peek_kind_n(n), TokenKind::Ident(s) if s.eq_ignore_ascii_case(word))
    }

    pub(crate) fn at_ident(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(_) | TokenKind::QuotedIdent(_))
    }

    pub(crate) fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if !matches!(tok.kind, TokenKind::Eof) {
            self.idx += 1;
        }
        tok
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.idx).unwrap_or(&self.eof)
    }

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    pub(crate) fn peek_kind_n(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.idx + n)
            .map(|t| &t.kind)
            .unwrap_or(&self.eof.kind)
    }

    pub(crate) fn peek_span(&self) -> Span {
        self.peek().span
    }

    pub(crate) fn prev_span(&self) -> Span {
        match self.idx.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(t) => t.span,
            None => self.peek_span(),
        }
    }
}

fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr {
        span: join(left.span, right.span),
        kind: ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

fn unary(start: Span, op: UnaryOp, expr: Expr) -> Expr {
    Expr {
        span: join(start, expr.span),
        kind: ExprKind::Unary {
            op,
            expr: Box::new(expr),
        },
    }
}

/// Appends a step, extending an existing path instead of nesting it.
fn push_step(expr: Expr, step: PathStep, end: Span) -> Expr {
    let span = join(expr.span, end);
    match expr.kind {
        ExprKind::Path { root, mut steps } => {
            steps.push(step);
            Expr {
                span,
                kind: ExprKind::Path { root, steps },
            }
        }
        kind => Expr {
            span,
            kind: ExprKind::Path {
                root: Some(Box::new(Expr {
                    span: expr.span,
                    kind,
                })),
                steps: vec![step],
            },
        },
    }
}

pub(crate) fn join(a: Span, b: Span) -> Span {
    let a0: usize = a.offset();
    let b0: usize = b.offset();
    let b1 = b0 + b.len();
    if b0 >= a0 {
        span_between(a0, b1.max(a0 + a.len()))
    } else {
        let a1 = a0 + a.len();
        span_between(b0, a1)
    }
}
