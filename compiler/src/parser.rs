// Parser for `.kc` circuit description files.
//
// Parses a token stream (from the lexer) into a `Document`. Uses chumsky
// combinators; one statement per line.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub document: Option<Document>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a circuit source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = document_parser(source);
    let (document, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        document,
        errors: all_errors,
    }
}

// ── Grammar ──
//
// All rules live inside `document_parser` so the `source` reference is
// captured once for identifier text.

fn document_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Document, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let number = select! { Token::Number(n) = e => (n, e.span()) };

    // ── circuit NAME ──

    let circuit_stmt = just(Token::Circuit)
        .ignore_then(ident.clone())
        .map(StatementKind::Circuit);

    // ── set NAME = value ──

    let set_value = number
        .clone()
        .map(|(n, span)| SetValue::Number(n, span))
        .or(select! {
            Token::True = e => SetValue::Bool(true, e.span()),
            Token::False = e => SetValue::Bool(false, e.span()),
        })
        .or(ident.clone().map(SetValue::Ident));

    let set_stmt = just(Token::Set)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(set_value)
        .map(|(name, value)| StatementKind::Set(SetStmt { name, value }));

    // ── field NAME = [image] ELEM [dims] ──

    let dims = number
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let type_expr = just(Token::Image)
        .or_not()
        .then(ident.clone())
        .then(dims.or_not())
        .map_with(|((image, element), dims), e| TypeExpr {
            image: image.is_some(),
            element,
            dims: dims.unwrap_or_default(),
            span: e.span(),
        });

    let field_stmt = just(Token::Field)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(type_expr)
        .map(|(name, ty)| StatementKind::Field(FieldDecl { name, ty }));

    // ── [host|recurrence] kernel NAME(args) -> (outs) ──

    let kind = choice((
        just(Token::Host)
            .ignore_then(just(Token::Kernel).or_not())
            .to(KernelKind::Host),
        just(Token::Recurrence)
            .ignore_then(just(Token::Kernel).or_not())
            .to(KernelKind::Recurrence),
        just(Token::Kernel).to(KernelKind::Device),
    ));

    let args = ident
        .clone()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let out_decl = just(Token::Question)
        .or_not()
        .then(ident.clone())
        .then_ignore(just(Token::Colon))
        .then(ident.clone())
        .map_with(|((probed, name), ty), e| OutputDecl {
            probed: probed.is_some(),
            name,
            ty,
            span: e.span(),
        });

    let outs = out_decl
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let kernel_stmt = kind
        .then(ident.clone())
        .then(args)
        .then_ignore(just(Token::Arrow))
        .then(outs)
        .map(|(((kind, name), inputs), outputs)| {
            StatementKind::Kernel(KernelDecl {
                kind,
                name,
                inputs,
                outputs,
            })
        });

    // ── output a, b ──

    let output_stmt = just(Token::Output)
        .ignore_then(
            ident
                .clone()
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(StatementKind::Output);

    let statement = choice((
        circuit_stmt,
        set_stmt,
        field_stmt,
        kernel_stmt,
        output_stmt,
    ))
    .map_with(|kind, e| Statement {
        kind,
        span: e.span(),
    });

    nl.clone()
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(|statements, e| Document {
            statements,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Document {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected parse errors: {:?}",
            result.errors
        );
        result.document.expect("document should be Some")
    }

    fn parse_one_stmt(source: &str) -> Statement {
        let doc = parse_ok(source);
        assert_eq!(doc.statements.len(), 1, "expected 1 statement");
        doc.statements.into_iter().next().unwrap()
    }

    #[test]
    fn circuit_name() {
        let s = parse_one_stmt("circuit blur");
        let StatementKind::Circuit(name) = &s.kind else {
            panic!("expected Circuit, got {:?}", s.kind);
        };
        assert_eq!(name.name, "blur");
    }

    #[test]
    fn set_values() {
        let doc = parse_ok("set catalog = utilization\nset min_utilization = 0.5\nset legacy_check = true\n");
        let values: Vec<_> = doc
            .statements
            .iter()
            .map(|s| match &s.kind {
                StatementKind::Set(set) => set.value.clone(),
                other => panic!("expected Set, got {:?}", other),
            })
            .collect();
        assert!(matches!(&values[0], SetValue::Ident(id) if id.name == "utilization"));
        assert!(matches!(values[1], SetValue::Number(n, _) if n == 0.5));
        assert!(matches!(values[2], SetValue::Bool(true, _)));
    }

    #[test]
    fn field_buffer() {
        let s = parse_one_stmt("field vec = f32[16]");
        let StatementKind::Field(field) = &s.kind else {
            panic!("expected Field");
        };
        assert_eq!(field.name.name, "vec");
        assert!(!field.ty.image);
        assert_eq!(field.ty.element.name, "f32");
        assert_eq!(field.ty.dims.iter().map(|d| d.0).collect::<Vec<_>>(), vec![16.0]);
    }

    #[test]
    fn field_image_2d() {
        let s = parse_one_stmt("field pic = image u8[64, 32]");
        let StatementKind::Field(field) = &s.kind else {
            panic!("expected Field");
        };
        assert!(field.ty.image);
        assert_eq!(field.ty.dims.len(), 2);
    }

    #[test]
    fn field_scalar_without_dims() {
        let s = parse_one_stmt("field gain = f64");
        let StatementKind::Field(field) = &s.kind else {
            panic!("expected Field");
        };
        assert!(field.ty.dims.is_empty());
    }

    #[test]
    fn kernel_with_inputs_and_outputs() {
        let s = parse_one_stmt("kernel mix(b, c) -> (?d: vec, e: vec)");
        let StatementKind::Kernel(k) = &s.kind else {
            panic!("expected Kernel");
        };
        assert_eq!(k.kind, KernelKind::Device);
        assert_eq!(k.name.name, "mix");
        let inputs: Vec<_> = k.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(inputs, vec!["b", "c"]);
        assert_eq!(k.outputs.len(), 2);
        assert!(k.outputs[0].probed);
        assert!(!k.outputs[1].probed);
        assert_eq!(k.outputs[1].ty.name, "vec");
    }

    #[test]
    fn kernel_kinds() {
        let doc = parse_ok(
            "kernel src() -> (a: vec)\nhost kernel dump(a) -> (b: vec)\nrecurrence state(b) -> (s: vec)\n",
        );
        let kinds: Vec<_> = doc
            .statements
            .iter()
            .map(|s| match &s.kind {
                StatementKind::Kernel(k) => k.kind,
                other => panic!("expected Kernel, got {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![KernelKind::Device, KernelKind::Host, KernelKind::Recurrence]
        );
    }

    #[test]
    fn output_list() {
        let s = parse_one_stmt("output d, e");
        let StatementKind::Output(names) = &s.kind else {
            panic!("expected Output");
        };
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn comments_and_blank_lines() {
        let doc = parse_ok("\n# header\ncircuit c\n\n\nfield v = f32[4] # trailing\n\n");
        assert_eq!(doc.statements.len(), 2);
    }

    #[test]
    fn statement_span_covers_line() {
        let s = parse_one_stmt("output d");
        assert_eq!((s.span.start, s.span.end), (0, 8));
    }

    #[test]
    fn missing_arrow_is_error() {
        let result = parse("kernel a() (b: vec)");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn lex_error_is_reported() {
        let result = parse("circuit $c");
        assert!(!result.errors.is_empty());
    }
}
