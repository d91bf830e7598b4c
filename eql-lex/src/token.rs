#![forbid(unsafe_code)]

use eql_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Reserved words. Matched case-insensitively; every other word is an
/// `Ident`, so schema vocabulary such as `type` or `property` stays usable
/// as a field name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Select,
    Insert,
    Update,
    Delete,
    Filter,
    Order,
    By,
    Offset,
    Limit,
    With,
    For,
    In,
    Union,
    Set,
    Detached,
    Exists,
    Distinct,
    If,
    Else,
    And,
    Or,
    Not,
    Like,
    ILike,
    Is,
    True,
    False,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Keyword> {
        let kw = match word.to_ascii_lowercase().as_str() {
            "select" => Keyword::Select,
            "insert" => Keyword::Insert,
            "update" => Keyword::Update,
            "delete" => Keyword::Delete,
            "filter" => Keyword::Filter,
            "order" => Keyword::Order,
            "by" => Keyword::By,
            "offset" => Keyword::Offset,
            "limit" => Keyword::Limit,
            "with" => Keyword::With,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "union" => Keyword::Union,
            "set" => Keyword::Set,
            "detached" => Keyword::Detached,
            "exists" => Keyword::Exists,
            "distinct" => Keyword::Distinct,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "like" => Keyword::Like,
            "ilike" => Keyword::ILike,
            "is" => Keyword::Is,
            "true" => Keyword::True,
            "false" => Keyword::False,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Kw(Keyword),

    // Operators / punctuation
    ColonColon,
    Assign,
    PlusAssign,
    MinusAssign,
    Arrow,
    Colon,
    Semi,
    Comma,
    Dot,
    DotLt,
    At,
    Dollar,
    Eq,
    Neq,
    OptEq,
    OptNeq,
    Coalesce,
    Lt,
    Gt,
    Le,
    Ge,
    Concat,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Caret,
    Pipe,
    Amp,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Eof,

    // Literals / identifiers
    Ident(String),
    /// `` `name` ``; never a keyword.
    QuotedIdent(String),
    Int(i64),
    Float(f64),
    String(String),
}
