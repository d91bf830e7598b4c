//! Schema declarations in both surface forms: the declarative SDL
//! (`module m { type T { ... } }`) and the `CREATE ...` DDL used by the
//! standard library. Both produce the same [`Schema`].

use eql_ast::{
    CastDecl, CastKind, ConstraintDecl, Expr, ExprKind, FuncParam, FunctionBody, FunctionDecl,
    Ident, ModuleDecl, ParamKind, PathStep, PointerCardinality, PointerDecl, PointerDeclKind,
    PointerTarget, ScalarTypeDecl, Schema, SchemaDecl, Span, TypeDecl,
};
use eql_lex::{Keyword, TokenKind};

use crate::error::ParseError;
use crate::parser::{Parser, join};

#[derive(Default)]
struct PointerBody {
    link_props: Vec<PointerDecl>,
    constraints: Vec<ConstraintDecl>,
    default: Option<Expr>,
}

impl Parser<'_> {
    pub fn parse_sdl(&mut self) -> Result<Schema, ParseError> {
        let mut decls = Vec::new();
        while !self.at(TokenKind::Eof) {
            if self.eat(TokenKind::Semi).is_some() {
                continue;
            }
            decls.push(self.parse_sdl_decl()?);
        }
        Ok(Schema { decls })
    }

    pub fn parse_ddl(&mut self) -> Result<Schema, ParseError> {
        let mut decls = Vec::new();
        while !self.at(TokenKind::Eof) {
            if self.eat(TokenKind::Semi).is_some() {
                continue;
            }
            decls.push(self.parse_ddl_stmt()?);
        }
        Ok(Schema { decls })
    }

    fn parse_sdl_decl(&mut self) -> Result<SchemaDecl, ParseError> {
        let start = self.peek_span();
        if self.eat_word("module") {
            let name = self.parse_module_path()?;
            self.expect(TokenKind::LBrace)?;
            let mut decls = Vec::new();
            while !self.at(TokenKind::RBrace) {
                if self.eat(TokenKind::Semi).is_some() {
                    continue;
                }
                decls.push(self.parse_sdl_decl()?);
            }
            self.expect(TokenKind::RBrace)?;
            return Ok(SchemaDecl::Module(ModuleDecl {
                span: join(start, self.prev_span()),
                name,
                decls,
            }));
        }

        let is_abstract = self.eat_word("abstract");
        if self.eat_word("scalar") {
            self.expect_word("type")?;
            return self.parse_scalar_decl(start, is_abstract);
        }
        if self.eat_word("type") {
            let mut decl = self.parse_type_head(start, is_abstract)?;
            if self.eat(TokenKind::LBrace).is_some() {
                while !self.at(TokenKind::RBrace) {
                    if self.eat(TokenKind::Semi).is_some() {
                        continue;
                    }
                    self.parse_sdl_type_item(&mut decl)?;
                }
                self.expect(TokenKind::RBrace)?;
            }
            decl.span = join(start, self.prev_span());
            return Ok(SchemaDecl::Type(decl));
        }
        if !is_abstract && self.eat_word("function") {
            return self.parse_function_decl(start);
        }
        Err(ParseError {
            message: "expected `module`, `type`, `scalar type` or `function`".to_string(),
            span: self.peek_span(),
        })
    }

    fn parse_sdl_type_item(&mut self, decl: &mut TypeDecl) -> Result<(), ParseError> {
        if self.at_constraint() {
            decl.constraints.push(self.parse_constraint()?);
        } else if self.at_word("index") {
            decl.indexes.push(self.parse_index()?);
        } else {
            decl.pointers.push(self.parse_sdl_pointer()?);
        }
        self.eat(TokenKind::Semi);
        Ok(())
    }

    fn parse_sdl_pointer(&mut self) -> Result<PointerDecl, ParseError> {
        let start = self.peek_span();
        let (required, cardinality, kind) = self.parse_pointer_qualifiers();
        let name = self.expect_ident()?;

        let target = if self.eat(TokenKind::Assign).is_some() {
            PointerTarget::Computed(self.parse_expr()?)
        } else {
            if self.eat(TokenKind::Colon).is_none() {
                self.expect(TokenKind::Arrow)?;
            }
            let ty = self.parse_type_expr()?;
            let body = if self.at(TokenKind::LBrace) {
                self.parse_sdl_pointer_body()?
            } else {
                PointerBody::default()
            };
            PointerTarget::Typed {
                ty,
                link_props: body.link_props,
                constraints: body.constraints,
                default: body.default,
            }
        };

        Ok(PointerDecl {
            span: join(start, self.prev_span()),
            kind: kind.unwrap_or(PointerDeclKind::Property),
            name,
            required,
            cardinality,
            target,
        })
    }

    fn parse_sdl_pointer_body(&mut self) -> Result<PointerBody, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut body = PointerBody::default();
        while !self.at(TokenKind::RBrace) {
            if self.eat(TokenKind::Semi).is_some() {
                continue;
            }
            if self.at_constraint() {
                body.constraints.push(self.parse_constraint()?);
            } else if self.at_word("default") && matches!(self.peek_kind_n(1), TokenKind::Assign) {
                self.bump();
                self.bump();
                body.default = Some(self.parse_expr()?);
            } else if self.at_word("annotation") || self.at_word("readonly") {
                self.skip_statement();
            } else {
                body.link_props.push(self.parse_sdl_pointer()?);
            }
            self.eat(TokenKind::Semi);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    fn parse_ddl_stmt(&mut self) -> Result<SchemaDecl, ParseError> {
        let start = self.peek_span();
        self.expect_word("create")?;

        if self.eat_word("module") {
            let name = self.parse_module_path()?;
            if self.eat_kw(Keyword::If) {
                self.expect_kw(Keyword::Not)?;
                self.expect_kw(Keyword::Exists)?;
            }
            return Ok(SchemaDecl::Module(ModuleDecl {
                span: join(start, self.prev_span()),
                name,
                decls: Vec::new(),
            }));
        }

        let is_abstract = self.eat_word("abstract");
        if self.eat_word("scalar") {
            self.expect_word("type")?;
            return self.parse_scalar_decl(start, is_abstract);
        }
        if self.eat_word("type") {
            let mut decl = self.parse_type_head(start, is_abstract)?;
            if self.eat(TokenKind::LBrace).is_some() {
                while !self.at(TokenKind::RBrace) {
                    if self.eat(TokenKind::Semi).is_some() {
                        continue;
                    }
                    self.parse_ddl_type_item(&mut decl)?;
                }
                self.expect(TokenKind::RBrace)?;
            }
            decl.span = join(start, self.prev_span());
            return Ok(SchemaDecl::Type(decl));
        }
        if self.eat_word("function") {
            return self.parse_function_decl(start);
        }

        for fixity in ["infix", "prefix", "postfix", "ternary"] {
            if self.eat_word(fixity) {
                break;
            }
        }
        if self.eat_word("operator") {
            return self.parse_function_decl(start);
        }
        if self.eat_word("cast") {
            return self.parse_cast_decl(start);
        }

        Err(ParseError {
            message: "unsupported CREATE statement".to_string(),
            span: self.peek_span(),
        })
    }

    fn parse_ddl_type_item(&mut self, decl: &mut TypeDecl) -> Result<(), ParseError> {
        self.expect_word("create")?;
        if self.at_constraint() {
            decl.constraints.push(self.parse_constraint()?);
        } else if self.at_word("index") {
            decl.indexes.push(self.parse_index()?);
        } else {
            decl.pointers.push(self.parse_ddl_pointer()?);
        }
        self.eat(TokenKind::Semi);
        Ok(())
    }

    fn parse_ddl_pointer(&mut self) -> Result<PointerDecl, ParseError> {
        let start = self.peek_span();
        let (required, cardinality, kind) = self.parse_pointer_qualifiers();
        let Some(kind) = kind else {
            return Err(ParseError {
                message: "expected PROPERTY or LINK".to_string(),
                span: self.peek_span(),
            });
        };
        let name = self.expect_ident()?;

        let target = if self.eat(TokenKind::Assign).is_some() {
            PointerTarget::Computed(self.parse_expr()?)
        } else {
            self.expect(TokenKind::Arrow)?;
            let ty = self.parse_type_expr()?;
            let body = if self.at(TokenKind::LBrace) {
                self.parse_ddl_pointer_body()?
            } else {
                PointerBody::default()
            };
            PointerTarget::Typed {
                ty,
                link_props: body.link_props,
                constraints: body.constraints,
                default: body.default,
            }
        };

        Ok(PointerDecl {
            span: join(start, self.prev_span()),
            kind,
            name,
            required,
            cardinality,
            target,
        })
    }

    fn parse_ddl_pointer_body(&mut self) -> Result<PointerBody, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut body = PointerBody::default();
        while !self.at(TokenKind::RBrace) {
            if self.eat(TokenKind::Semi).is_some() {
                continue;
            }
            if self.at_kw(Keyword::Set) && self.word_at(1, "default") {
                self.bump();
                self.bump();
                self.expect(TokenKind::Assign)?;
                body.default = Some(self.parse_expr()?);
            } else if self.at_word("create") {
                self.bump();
                if self.at_constraint() {
                    body.constraints.push(self.parse_constraint()?);
                } else {
                    body.link_props.push(self.parse_ddl_pointer()?);
                }
            } else {
                self.skip_statement();
            }
            self.eat(TokenKind::Semi);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    fn parse_pointer_qualifiers(
        &mut self,
    ) -> (bool, Option<PointerCardinality>, Option<PointerDeclKind>) {
        self.eat_word("overloaded");
        let required = if self.eat_word("required") {
            true
        } else {
            self.eat_word("optional");
            false
        };
        let cardinality = if self.eat_word("single") {
            Some(PointerCardinality::Single)
        } else if self.eat_word("multi") {
            Some(PointerCardinality::Multi)
        } else {
            None
        };
        let kind = if self.eat_word("link") {
            Some(PointerDeclKind::Link)
        } else if self.eat_word("property") {
            Some(PointerDeclKind::Property)
        } else {
            None
        };
        (required, cardinality, kind)
    }

    fn parse_type_head(&mut self, start: Span, is_abstract: bool) -> Result<TypeDecl, ParseError> {
        let name = self.parse_qual_name()?;
        let extending = self.parse_extending()?;
        Ok(TypeDecl {
            span: start,
            name,
            is_abstract,
            extending,
            pointers: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        })
    }

    fn parse_scalar_decl(&mut self, start: Span, is_abstract: bool) -> Result<SchemaDecl, ParseError> {
        let name = self.parse_qual_name()?;
        let extending = self.parse_extending()?;
        if self.at(TokenKind::LBrace) {
            self.skip_block();
        }
        Ok(SchemaDecl::ScalarType(ScalarTypeDecl {
            span: join(start, self.prev_span()),
            name,
            is_abstract,
            extending,
        }))
    }

    fn parse_extending(&mut self) -> Result<Vec<eql_ast::QualName>, ParseError> {
        let mut bases = Vec::new();
        if self.eat_word("extending") {
            loop {
                bases.push(self.parse_qual_name()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        Ok(bases)
    }

    fn at_constraint(&self) -> bool {
        self.at_word("constraint") || (self.at_word("delegated") && self.word_at(1, "constraint"))
    }

    fn parse_constraint(&mut self) -> Result<ConstraintDecl, ParseError> {
        let start = self.peek_span();
        let delegated = self.eat_word("delegated");
        self.expect_word("constraint")?;
        let name = self.parse_qual_name()?;
        if self.at(TokenKind::LParen) {
            // constraint arguments only matter for value checks we don't perform
            self.skip_block();
        }
        let on = if self.eat_word("on") {
            self.expect(TokenKind::LParen)?;
            let expr = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            Some(expr)
        } else {
            None
        };
        if self.at(TokenKind::LBrace) {
            self.skip_block();
        }
        Ok(ConstraintDecl {
            span: join(start, self.prev_span()),
            name,
            on,
            delegated,
        })
    }

    fn parse_index(&mut self) -> Result<Vec<Ident>, ParseError> {
        self.expect_word("index")?;
        self.expect_word("on")?;
        self.expect(TokenKind::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        if self.at(TokenKind::LBrace) {
            self.skip_block();
        }
        Ok(index_fields(&expr))
    }

    fn parse_function_decl(&mut self, start: Span) -> Result<SchemaDecl, ParseError> {
        let name = self.parse_qual_name()?;
        let params = self.parse_params()?;
        self.expect(TokenKind::Arrow)?;
        let ret_kind = self.parse_type_qualifier();
        let ret = self.parse_type_expr()?;

        let body = if self.at(TokenKind::LBrace) {
            self.bump();
            let mut body = None;
            while !self.at(TokenKind::RBrace) {
                if self.eat(TokenKind::Semi).is_some() {
                    continue;
                }
                if self.eat_word("using") {
                    body = Some(self.parse_using()?);
                } else {
                    self.skip_statement();
                }
                self.eat(TokenKind::Semi);
            }
            self.expect(TokenKind::RBrace)?;
            body.ok_or_else(|| ParseError {
                message: format!("function `{}` has no USING clause", name.name),
                span: name.span,
            })?
        } else {
            self.expect_word("using")?;
            self.parse_using()?
        };

        Ok(SchemaDecl::Function(FunctionDecl {
            span: join(start, self.prev_span()),
            name,
            params,
            ret_kind,
            ret,
            body,
        }))
    }

    fn parse_using(&mut self) -> Result<FunctionBody, ParseError> {
        if self.eat_word("builtin") {
            return Ok(FunctionBody::Builtin);
        }
        self.expect(TokenKind::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        Ok(FunctionBody::Expr(expr))
    }

    fn parse_params(&mut self) -> Result<Vec<FuncParam>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) {
            let start = self.peek_span();
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let kind = self.parse_type_qualifier();
            let ty = self.parse_type_expr()?;
            let default = if self.eat(TokenKind::Eq).is_some() {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(FuncParam {
                span: join(start, self.prev_span()),
                name,
                kind,
                ty,
                default,
            });
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_type_qualifier(&mut self) -> ParamKind {
        if self.at_kw(Keyword::Set) && self.word_at(1, "of") {
            self.bump();
            self.bump();
            ParamKind::SetOf
        } else if self.eat_word("optional") {
            ParamKind::Optional
        } else {
            ParamKind::Singleton
        }
    }

    fn parse_cast_decl(&mut self, start: Span) -> Result<SchemaDecl, ParseError> {
        self.expect_word("from")?;
        let from = self.parse_type_expr()?;
        self.expect_word("to")?;
        let to = self.parse_type_expr()?;
        let mut kind = CastKind::Explicit;
        if self.eat(TokenKind::LBrace).is_some() {
            while !self.at(TokenKind::RBrace) {
                if self.eat(TokenKind::Semi).is_some() {
                    continue;
                }
                if self.eat_word("allow") {
                    if self.eat_word("implicit") {
                        kind = CastKind::Implicit;
                    } else {
                        self.expect_word("assignment")?;
                        kind = CastKind::Assignment;
                    }
                } else {
                    self.skip_statement();
                }
                self.eat(TokenKind::Semi);
            }
            self.expect(TokenKind::RBrace)?;
        }
        Ok(SchemaDecl::Cast(CastDecl {
            span: join(start, self.prev_span()),
            from,
            to,
            kind,
        }))
    }

    /// Skips to the next `;` or closing `}` at the current nesting level.
    fn skip_statement(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Semi | TokenKind::RBrace if depth == 0 => return,
                TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }
            self.bump();
        }
    }

    /// Skips a balanced `{...}` or `(...)` group.
    fn skip_block(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.bump();
                        return;
                    }
                }
                _ => {}
            }
            self.bump();
        }
    }
}

fn index_fields(expr: &Expr) -> Vec<Ident> {
    match &expr.kind {
        ExprKind::Path { root: None, steps } => match steps.as_slice() {
            [PathStep::Prop(id)] => vec![id.clone()],
            _ => Vec::new(),
        },
        ExprKind::Tuple(elems) => elems.iter().flat_map(index_fields).collect(),
        _ => Vec::new(),
    }
}
