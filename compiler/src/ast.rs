// AST node types for `.kc` circuit description files.
//
// Every node carries a `SimpleSpan` for error reporting in the lowering.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Span for nodes built programmatically rather than parsed.
pub fn synthetic_span() -> Span {
    use chumsky::span::Span as _;
    Span::new((), 0..0)
}

// ── Root ──

/// A complete circuit file: a sequence of statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub statements: Vec<Statement>,
    pub span: Span,
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `circuit NAME`
    Circuit(Ident),
    Set(SetStmt),
    Field(FieldDecl),
    Kernel(KernelDecl),
    /// `output a, b`
    Output(Vec<Ident>),
}

// ── set_stmt: 'set' IDENT '=' set_value ──

#[derive(Debug, Clone, PartialEq)]
pub struct SetStmt {
    pub name: Ident,
    pub value: SetValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Number(f64, Span),
    Bool(bool, Span),
    Ident(Ident),
}

impl SetValue {
    pub fn span(&self) -> Span {
        match self {
            SetValue::Number(_, s) | SetValue::Bool(_, s) => *s,
            SetValue::Ident(id) => id.span,
        }
    }
}

// ── field_decl: 'field' IDENT '=' type_expr ──

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Ident,
    pub ty: TypeExpr,
}

/// `['image'] ELEM ['[' dim (',' dim)* ']']`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub image: bool,
    pub element: Ident,
    pub dims: Vec<(f64, Span)>,
    pub span: Span,
}

// ── kernel_decl: [host|recurrence] 'kernel' IDENT '(' args ')' '->' '(' outs ')' ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    Device,
    Host,
    Recurrence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelDecl {
    pub kind: KernelKind,
    pub name: Ident,
    pub inputs: Vec<Ident>,
    pub outputs: Vec<OutputDecl>,
}

/// `['?'] IDENT ':' IDENT`: a produced register and its field type name.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDecl {
    pub probed: bool,
    pub name: Ident,
    pub ty: Ident,
    pub span: Span,
}

// ── Identifiers ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
