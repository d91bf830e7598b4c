#![forbid(unsafe_code)]

mod lexer;
mod token;

pub use lexer::{LexError, Lexer};
pub use token::{Keyword, Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            kinds("SELECT select SeLeCt"),
            vec![
                TokenKind::Kw(Keyword::Select),
                TokenKind::Kw(Keyword::Select),
                TokenKind::Kw(Keyword::Select),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn schema_words_stay_identifiers() {
        assert_eq!(
            kinds("type property"),
            vec![
                TokenKind::Ident("type".into()),
                TokenKind::Ident("property".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn quoted_identifiers_are_never_keywords() {
        assert_eq!(
            kinds("`select` std::`=`"),
            vec![
                TokenKind::QuotedIdent("select".into()),
                TokenKind::Ident("std".into()),
                TokenKind::ColonColon,
                TokenKind::QuotedIdent("=".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 # one\n+ 2.5"),
            vec![
                TokenKind::Int(1),
                TokenKind::Plus,
                TokenKind::Float(2.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn multi_char_operators_win() {
        assert_eq!(
            kinds("?!= ?= ?? := += ++ // .< ->"),
            vec![
                TokenKind::OptNeq,
                TokenKind::OptEq,
                TokenKind::Coalesce,
                TokenKind::Assign,
                TokenKind::PlusAssign,
                TokenKind::Concat,
                TokenKind::SlashSlash,
                TokenKind::DotLt,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_literals_take_both_quotes() {
        assert_eq!(
            kinds(r#""a\n" 'b\'c'"#),
            vec![
                TokenKind::String("a\n".into()),
                TokenKind::String("b'c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_unknown_string_escape() {
        let err = Lexer::new("\"\\q\"").lex().unwrap_err();
        assert!(err.message.contains("invalid string literal"));
    }
}
