use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Source location of an expression or value, used by every diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Position {
    pub filename: String,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(filename: impl Into<String>, line: usize, column: usize) -> Self {
        Position {
            filename: filename.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filename.is_empty() {
            return write!(f, "<unknown>");
        }
        let base = Path::new(&self.filename)
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| self.filename.as_str().into());
        write!(f, "{}:{}:{}", base, self.line, self.column)
    }
}

/// Everything that can go wrong while reducing an expression.
///
/// Variants are `Clone` so the single-flight build map can hand the same
/// outcome to every requester of a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("{pos}: not in scope: {name}")]
    NotInScope { pos: Position, name: String },

    #[error("{pos}: {name} expects {expected} arguments, got {got}")]
    ArityMismatch {
        pos: Position,
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("{pos}: expected string key, got {got}")]
    ExpectedStringKey { pos: Position, got: &'static str },

    #[error("{pos}: map has no attribute {name}")]
    NoSuchAttribute { pos: Position, name: String },

    #[error("{pos}: expected {expected}, got {got}")]
    TypeMismatch {
        pos: Position,
        expected: &'static str,
        got: &'static str,
    },

    #[error("{pos}: unable to interpolate {got}")]
    NonStringInterpolation { pos: Position, got: &'static str },

    #[error("{pos}: unable to encode nested {got}")]
    UnencodableNesting { pos: Position, got: &'static str },

    #[error("{pos}: missing output or builder")]
    MissingBuildSpec { pos: Position },

    #[error("{pos}: building {fingerprint} failed ({status}), for logs look in {log}")]
    BuildFailed {
        pos: Position,
        fingerprint: String,
        log: String,
        status: String,
    },

    #[error("{pos}: unable to include {path}: {message}")]
    IncludeFailed {
        pos: Position,
        path: String,
        message: String,
    },

    #[error("{pos}: unable to symlink {got}")]
    Unprojectable { pos: Position, got: &'static str },

    #[error("refusing to overwrite {path}: not a symlink")]
    RefusingToClobber { path: String },

    #[error("{pos}: {message}")]
    Io { pos: Position, message: String },

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<EvalError>),
}

impl EvalError {
    pub fn io(pos: &Position, err: impl fmt::Display) -> Self {
        EvalError::Io {
            pos: pos.clone(),
            message: err.to_string(),
        }
    }

    /// Fold a batch of peer failures into one error, flattening nested
    /// composites. `None` when the batch is empty.
    pub fn join(errors: impl IntoIterator<Item = EvalError>) -> Option<EvalError> {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                EvalError::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(EvalError::Multiple(flat)),
        }
    }
}
