#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use eql_ast::{Span, span_between};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{Keyword, Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(eql::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
enum RawToken {
    #[token("::")]
    ColonColon,
    #[token(":=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("->")]
    Arrow,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".<")]
    DotLt,
    #[token(".")]
    Dot,
    #[token("@")]
    At,
    #[token("$")]
    Dollar,

    #[token("?!=")]
    OptNeq,
    #[token("?=")]
    OptEq,
    #[token("??")]
    Coalesce,
    #[token("!=")]
    Neq,
    #[token("=")]
    Eq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[token("++")]
    Concat,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("//")]
    SlashSlash,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("|")]
    Pipe,
    #[token("&")]
    Amp,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[regex(r"[0-9][0-9_]*", |lex| parse_int(lex.slice()))]
    Int(Option<i64>),

    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", |lex| parse_float(lex.slice()))]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", |lex| parse_float(lex.slice()))]
    Float(Option<f64>),

    // "..." and '...' with \n, \t, \r, \\, \", \' and \u{HEX}
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    #[regex(r#"'([^'\\]|\\.)*'"#, parse_string)]
    String(Option<String>),

    #[regex(r"`[^`]+`", |lex| { let s = lex.slice(); s[1..s.len() - 1].to_string() })]
    QuotedIdent(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn strip_underscores(s: &str) -> Option<String> {
    if s.ends_with('_') || s.contains("__") {
        return None;
    }
    Some(s.replace('_', ""))
}

fn parse_int(s: &str) -> Option<i64> {
    strip_underscores(s)?.parse::<i64>().ok()
}

fn parse_float(s: &str) -> Option<f64> {
    strip_underscores(s)?.parse::<f64>().ok()
}

fn parse_string(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let esc = chars.next()?;
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            'u' => {
                if chars.next() != Some('{') {
                    return None;
                }
                let mut hex = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        break;
                    }
                    hex.push(ch);
                    chars.next();
                    if hex.len() > 6 {
                        return None;
                    }
                }
                if chars.next() != Some('}') || hex.is_empty() {
                    return None;
                }
                let cp = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(cp)?);
            }
            _ => return None,
        }
    }

    Some(out)
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut lex = RawToken::lexer(self.src);

        while let Some(raw) = lex.next() {
            let range = lex.span();
            let span = span_between(range.start, range.end);

            let kind = match raw {
                Ok(RawToken::ColonColon) => TokenKind::ColonColon,
                Ok(RawToken::Assign) => TokenKind::Assign,
                Ok(RawToken::PlusAssign) => TokenKind::PlusAssign,
                Ok(RawToken::MinusAssign) => TokenKind::MinusAssign,
                Ok(RawToken::Arrow) => TokenKind::Arrow,
                Ok(RawToken::Colon) => TokenKind::Colon,
                Ok(RawToken::Semi) => TokenKind::Semi,
                Ok(RawToken::Comma) => TokenKind::Comma,
                Ok(RawToken::DotLt) => TokenKind::DotLt,
                Ok(RawToken::Dot) => TokenKind::Dot,
                Ok(RawToken::At) => TokenKind::At,
                Ok(RawToken::Dollar) => TokenKind::Dollar,

                Ok(RawToken::OptNeq) => TokenKind::OptNeq,
                Ok(RawToken::OptEq) => TokenKind::OptEq,
                Ok(RawToken::Coalesce) => TokenKind::Coalesce,
                Ok(RawToken::Neq) => TokenKind::Neq,
                Ok(RawToken::Eq) => TokenKind::Eq,
                Ok(RawToken::Le) => TokenKind::Le,
                Ok(RawToken::Ge) => TokenKind::Ge,
                Ok(RawToken::Lt) => TokenKind::Lt,
                Ok(RawToken::Gt) => TokenKind::Gt,

                Ok(RawToken::Concat) => TokenKind::Concat,
                Ok(RawToken::Plus) => TokenKind::Plus,
                Ok(RawToken::Minus) => TokenKind::Minus,
                Ok(RawToken::Star) => TokenKind::Star,
                Ok(RawToken::SlashSlash) => TokenKind::SlashSlash,
                Ok(RawToken::Slash) => TokenKind::Slash,
                Ok(RawToken::Percent) => TokenKind::Percent,
                Ok(RawToken::Caret) => TokenKind::Caret,
                Ok(RawToken::Pipe) => TokenKind::Pipe,
                Ok(RawToken::Amp) => TokenKind::Amp,

                Ok(RawToken::LParen) => TokenKind::LParen,
                Ok(RawToken::RParen) => TokenKind::RParen,
                Ok(RawToken::LBrace) => TokenKind::LBrace,
                Ok(RawToken::RBrace) => TokenKind::RBrace,
                Ok(RawToken::LBracket) => TokenKind::LBracket,
                Ok(RawToken::RBracket) => TokenKind::RBracket,

                Ok(RawToken::Ident(s)) => match Keyword::from_word(&s) {
                    Some(kw) => TokenKind::Kw(kw),
                    None => TokenKind::Ident(s),
                },
                Ok(RawToken::QuotedIdent(s)) => TokenKind::QuotedIdent(s),
                Ok(RawToken::Int(Some(n))) => TokenKind::Int(n),
                Ok(RawToken::Int(None)) => {
                    return Err(LexError {
                        message: "invalid integer literal".to_string(),
                        span,
                    });
                }
                Ok(RawToken::Float(Some(x))) => TokenKind::Float(x),
                Ok(RawToken::Float(None)) => {
                    return Err(LexError {
                        message: "invalid float literal".to_string(),
                        span,
                    });
                }
                Ok(RawToken::String(Some(s))) => TokenKind::String(s),
                Ok(RawToken::String(None)) => {
                    return Err(LexError {
                        message: "invalid string literal".to_string(),
                        span,
                    });
                }
                Err(_) => {
                    return Err(LexError {
                        message: format!("unexpected character sequence `{}`", lex.slice()),
                        span,
                    });
                }
            };

            tokens.push(Token { kind, span });
        }

        let end = self.src.len();
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(end, end),
        });
        Ok(tokens)
    }
}
