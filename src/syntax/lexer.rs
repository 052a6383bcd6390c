//! Tokenizer for module source text.
//!
//! Keywords are not separate token kinds: VBA allows most of them as member
//! names after a `.`, so the parser matches them contextually on
//! [`TokenKind::Ident`] with [`Token::is_keyword`].

use logos::Logos;

use crate::base::{TextRange, TextSize};

/// Token kinds produced by the lexer.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"[ \t]+_[ \t]*\r?\n")]
pub enum TokenKind {
    #[regex(r"\r?\n")]
    Newline,

    #[regex(r"'[^\r\n]*")]
    Comment,

    #[regex(r"[A-Za-z][A-Za-z0-9_]*[%&!#@$]?")]
    Ident,

    #[regex(r"\[[^\]\r\n]+\]")]
    BracketIdent,

    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?[%&!#@]?")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?")]
    #[regex(r"&[Hh][0-9A-Fa-f]+&?")]
    #[regex(r"&[Oo][0-7]+&?")]
    Number,

    #[regex(r#""([^"\r\n]|"")*""#)]
    String,

    #[regex(r"#[0-9]+[/-][0-9]+[/-][0-9]+[^#\r\n]*#")]
    Date,

    #[token(":=")]
    ColonEq,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("!")]
    Bang,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    #[token("=")]
    Eq,
    #[token("<>")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("\\")]
    Backslash,
    #[token("^")]
    Caret,
    #[token("&")]
    Amp,
    #[token("#")]
    Hash,

    /// A character sequence the lexer could not classify.
    Unknown,
    /// End of input, appended once by [`lex`].
    Eof,
}

/// A token with its source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: TextRange,
}

impl Token {
    /// Source text of the token.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.range]
    }

    /// Case-insensitive keyword check on an identifier token.
    pub fn is_keyword(&self, source: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(source).eq_ignore_ascii_case(keyword)
    }

    /// Whether this token ends a statement.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Newline | TokenKind::Colon | TokenKind::Comment | TokenKind::Eof
        )
    }
}

/// Tokenize source text.
///
/// Lexing never fails: unrecognized input becomes [`TokenKind::Unknown`]
/// and the parser reports it if it lands somewhere that matters. The token
/// stream always ends with a single [`TokenKind::Eof`].
pub fn lex(source: &str) -> Vec<Token> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let range = TextRange::new(
            TextSize::from(span.start as u32),
            TextSize::from(span.end as u32),
        );
        let kind = result.unwrap_or(TokenKind::Unknown);
        tokens.push(Token { kind, range });
    }

    let end = TextSize::from(source.len() as u32);
    tokens.push(Token {
        kind: TokenKind::Eof,
        range: TextRange::empty(end),
    });
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_declaration_line() {
        assert_eq!(
            kinds("Dim x As Long"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_lex_line_continuation_is_skipped() {
        let tokens = kinds("Foo a, _\n    b");
        assert!(!tokens.contains(&TokenKind::Newline));
        assert_eq!(tokens.len(), 5);
    }

    #[test]
    fn test_lex_string_with_doubled_quotes() {
        let source = r#"x = "say ""hi""""#;
        let tokens = lex(source);
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].text(source), r#""say ""hi""""#);
    }

    #[test]
    fn test_lex_comment_and_named_argument() {
        assert_eq!(
            kinds("Foo Item:=1 ' note"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::ColonEq,
                TokenKind::Number,
                TokenKind::Comment,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_lex_type_hint_suffix_stays_on_identifier() {
        let source = "s$ = Left$(t, 1)";
        let tokens = lex(source);
        assert_eq!(tokens[0].text(source), "s$");
        assert_eq!(tokens[2].text(source), "Left$");
    }

    #[test]
    fn test_lex_keyword_check_is_case_insensitive() {
        let source = "end SUB";
        let tokens = lex(source);
        assert!(tokens[0].is_keyword(source, "End"));
        assert!(tokens[1].is_keyword(source, "sub"));
    }

    #[test]
    fn test_lex_file_number_and_date_literal() {
        assert_eq!(
            kinds("Print #1, #1/2/2000#"),
            vec![
                TokenKind::Ident,
                TokenKind::Hash,
                TokenKind::Number,
                TokenKind::Comma,
                TokenKind::Date,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_lex_unknown_character() {
        assert!(kinds("x = ~1").contains(&TokenKind::Unknown));
    }
}
