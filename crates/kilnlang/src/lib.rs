//! Surface syntax of kiln expressions: a mode-stack lexer (strings nest
//! interpolated expressions) and a recursive-descent parser producing
//! `kilncore` expression trees.

use kilncore::Position;
use thiserror::Error;

pub mod lex;
pub mod parse;

pub use parse::{parse_file, parse_str};

/// Parse failures keep I/O apart from syntax so an evaluator can classify
/// include failures.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("{pos}: {message}")]
    Io { pos: Position, message: String },

    #[error("{pos}: {message}")]
    Syntax { pos: Position, message: String },
}
