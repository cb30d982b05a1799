//! Evaluation core of the kiln build tool: the expression and value model,
//! immutable scopes, the content fingerprint engine, the parallel evaluator
//! and the output materializer. The surface syntax lives elsewhere; the
//! core only consumes a `parse_file` callback.

pub mod error;
pub mod expr;
pub mod fingerprint;
pub mod scope;
pub mod value;

mod eval;
mod output;

pub use error::{EvalError, Position};
pub use eval::{Config, Evaluator, ParseFile};
pub use expr::{Binding, Expr, ExprKind};
pub use scope::{Scope, Variable};
pub use value::{PathValue, Value, ValueKind};
