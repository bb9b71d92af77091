// Lexer for `.kc` circuit description files.
//
// Uses the `logos` crate for DFA-based lexing. Newlines are significant
// (statement terminators); `#` starts a comment running to end of line.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Circuit file tokens.
///
/// Identifiers carry no value; use the span to retrieve the text from the
/// source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("circuit")]
    Circuit,
    #[token("set")]
    Set,
    #[token("field")]
    Field,
    #[token("image")]
    Image,
    #[token("kernel")]
    Kernel,
    #[token("host")]
    Host,
    #[token("recurrence")]
    Recurrence,
    #[token("output")]
    Output,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ── Symbols ──
    #[token("->")]
    Arrow,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,

    // ── Literals ──
    /// Numeric literal (int, float, exponent, negative).
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    // ── Identifier ──
    //
    // Placed after keywords: logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `field` matches Field, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (statement terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Circuit => write!(f, "circuit"),
            Token::Set => write!(f, "set"),
            Token::Field => write!(f, "field"),
            Token::Image => write!(f, "image"),
            Token::Kernel => write!(f, "kernel"),
            Token::Host => write!(f, "host"),
            Token::Recurrence => write!(f, "recurrence"),
            Token::Output => write!(f, "output"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Arrow => write!(f, "->"),
            Token::Colon => write!(f, ":"),
            Token::Question => write!(f, "?"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Number(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a circuit source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens =
            lex_ok("circuit set field image kernel host recurrence output true false");
        assert_eq!(
            tokens,
            vec![
                Token::Circuit,
                Token::Set,
                Token::Field,
                Token::Image,
                Token::Kernel,
                Token::Host,
                Token::Recurrence,
                Token::Output,
                Token::True,
                Token::False,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `fields` and `outputs` are identifiers.
        assert_eq!(lex_ok("field fields"), vec![Token::Field, Token::Ident]);
        assert_eq!(lex_ok("outputs"), vec![Token::Ident]);
    }

    #[test]
    fn symbols() {
        assert_eq!(
            lex_ok("-> : ? ( ) [ ] , ="),
            vec![
                Token::Arrow,
                Token::Colon,
                Token::Question,
                Token::LParen,
                Token::RParen,
                Token::LBracket,
                Token::RBracket,
                Token::Comma,
                Token::Equals,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(lex_ok("42"), vec![Token::Number(42.0)]);
        assert_eq!(lex_ok("0.25"), vec![Token::Number(0.25)]);
        assert_eq!(lex_ok("-3"), vec![Token::Number(-3.0)]);
        assert_eq!(lex_ok("1e3"), vec![Token::Number(1000.0)]);
    }

    #[test]
    fn element_names_are_identifiers() {
        assert_eq!(lex_ok("f32 u8 c64"), vec![Token::Ident, Token::Ident, Token::Ident]);
    }

    #[test]
    fn newlines_collapse_and_comments_skip() {
        let tokens = lex_ok("output a # trailing\n\n\n# whole line\noutput b\r\n");
        assert_eq!(
            tokens,
            vec![
                Token::Output,
                Token::Ident,
                Token::Newline,
                Token::Output,
                Token::Ident,
                Token::Newline,
            ]
        );
    }

    #[test]
    fn spans_correct() {
        let result = lex("kernel src");
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 6 });
        assert_eq!(result.tokens[1].1, Span { start: 7, end: 10 });
    }

    #[test]
    fn kernel_declaration() {
        let tokens = lex_ok("kernel mix(b, c) -> (?d: vec)");
        assert_eq!(
            tokens,
            vec![
                Token::Kernel,
                Token::Ident,
                Token::LParen,
                Token::Ident,
                Token::Comma,
                Token::Ident,
                Token::RParen,
                Token::Arrow,
                Token::LParen,
                Token::Question,
                Token::Ident,
                Token::Colon,
                Token::Ident,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn error_recovery() {
        let result = lex("kernel a $ b");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 9, end: 10 });
        assert_eq!(result.tokens.len(), 3);
    }
}
