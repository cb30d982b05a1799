use crate::error::Position;

/// An unresolved expression, as produced by the parser. Immutable after
/// construction; the evaluator never rewrites a tree in place.
#[derive(Debug, Clone)]
pub struct Expr {
    pub pos: Position,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal chunks interleaved with interpolated sub-expressions.
    /// `chunks.len() == interps.len()`; `interps[i]` follows `chunks[i]`
    /// and the final slot is always `None`.
    Str {
        chunks: Vec<String>,
        interps: Vec<Option<Expr>>,
    },
    Number(f64),
    Boolean(bool),
    /// Absolute path, resolved against the source file's directory at
    /// parse time.
    Path(String),
    Array(Vec<Expr>),
    /// Key/value entry pairs plus `with` clauses. Keys are expressions and
    /// must reduce to strings; `with` clauses supply defaults left to right
    /// without overwriting explicit entries.
    Map {
        entries: Vec<(Expr, Expr)>,
        extends: Vec<Expr>,
    },
    /// Bare name reference.
    Var { name: String },
    /// Name reference with a parenthesized argument list. Only this form
    /// applies a lambda binding; a bare `Var` yields the lambda itself.
    Call { name: String, args: Vec<Expr> },
    Attr {
        base: Box<Expr>,
        name: String,
    },
    Include {
        path: Box<Expr>,
    },
    Define {
        bindings: Vec<Binding>,
        body: Box<Expr>,
    },
    Lambda {
        formals: Vec<String>,
        body: Box<Expr>,
    },
    Condition {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Output {
        attrs: Box<Expr>,
    },
}

/// One `let` binding. A binding declared with formal parameters stores a
/// `Lambda` expression.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub expr: Expr,
}

impl Expr {
    /// A plain string literal without interpolation, e.g. a `name=value`
    /// binding from the command line.
    pub fn string_constant(content: impl Into<String>, origin: impl Into<String>) -> Expr {
        Expr {
            pos: Position::new(origin, 0, 0),
            kind: ExprKind::Str {
                chunks: vec![content.into()],
                interps: vec![None],
            },
        }
    }

    /// The string content of an interpolation-free literal, if this is one.
    pub fn literal_str(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Str { chunks, interps } if chunks.len() == 1 && interps[0].is_none() => {
                Some(&chunks[0])
            }
            _ => None,
        }
    }
}
