use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::{EvalError, Position};
use crate::expr::Expr;
use crate::scope::Scope;

/// A fully reduced value. Closed under evaluation: resolving any expression
/// yields one of these, and resolving a value-backed expression again is a
/// no-op.
#[derive(Debug, Clone)]
pub struct Value {
    pub pos: Position,
    pub kind: ValueKind,
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    Str(String),
    Number(f64),
    Boolean(bool),
    Path(PathValue),
    Array(Vec<Value>),
    /// Keys in declared order.
    Map(IndexMap<String, Value>),
    Lambda {
        formals: Vec<String>,
        body: Expr,
        scope: Scope,
    },
}

/// A filesystem path plus the store paths it transitively depends on.
/// Two paths compare on name alone; `depends` only feeds diagnostics and
/// fingerprints.
#[derive(Debug, Clone)]
pub struct PathValue {
    pub pos: Position,
    pub name: String,
    pub depends: Vec<PathValue>,
}

impl ValueKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueKind::Str(_) => "string",
            ValueKind::Number(_) => "number",
            ValueKind::Boolean(_) => "boolean",
            ValueKind::Path(_) => "path",
            ValueKind::Array(_) => "array",
            ValueKind::Map(_) => "map",
            ValueKind::Lambda { .. } => "function",
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Truthiness for `if`: strings are true iff non-empty, numbers iff
    /// non-zero, paths always, arrays and maps iff non-empty. Functions
    /// have no truth value.
    pub fn truthy(&self) -> Result<bool, EvalError> {
        match &self.kind {
            ValueKind::Str(s) => Ok(!s.is_empty()),
            ValueKind::Number(n) => Ok(*n != 0.0),
            ValueKind::Boolean(b) => Ok(*b),
            ValueKind::Path(_) => Ok(true),
            ValueKind::Array(elems) => Ok(!elems.is_empty()),
            ValueKind::Map(map) => Ok(!map.is_empty()),
            ValueKind::Lambda { .. } => Err(EvalError::TypeMismatch {
                pos: self.pos.clone(),
                expected: "boolean",
                got: self.type_name(),
            }),
        }
    }

    /// Encode for a child process environment. Arrays become space-joined
    /// elements and maps space-joined `k=v` pairs, one nesting level only.
    pub fn encode_env(&self, root: bool) -> Result<String, EvalError> {
        match &self.kind {
            ValueKind::Str(s) => Ok(s.clone()),
            ValueKind::Number(n) => Ok(n.to_string()),
            ValueKind::Boolean(true) => Ok("1".to_string()),
            ValueKind::Boolean(false) => Ok("0".to_string()),
            ValueKind::Path(p) => Ok(p.name.clone()),
            ValueKind::Array(elems) => {
                if !root {
                    return Err(EvalError::UnencodableNesting {
                        pos: self.pos.clone(),
                        got: self.type_name(),
                    });
                }
                let parts = elems
                    .iter()
                    .map(|e| e.encode_env(false))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(" "))
            }
            ValueKind::Map(map) => {
                if !root {
                    return Err(EvalError::UnencodableNesting {
                        pos: self.pos.clone(),
                        got: self.type_name(),
                    });
                }
                let mut parts = Vec::with_capacity(map.len());
                for (key, elem) in map {
                    parts.push(format!("{}={}", key, elem.encode_env(false)?));
                }
                Ok(parts.join(" "))
            }
            ValueKind::Lambda { .. } => Err(EvalError::TypeMismatch {
                pos: self.pos.clone(),
                expected: "encodable value",
                got: self.type_name(),
            }),
        }
    }

    /// JSON projection. Functions serialize as `null`.
    pub fn json(&self) -> serde_json::Value {
        match &self.kind {
            ValueKind::Str(s) => serde_json::Value::String(s.clone()),
            ValueKind::Number(n) => json_number(*n),
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::Path(p) => serde_json::Value::String(p.name.clone()),
            ValueKind::Array(elems) => {
                serde_json::Value::Array(elems.iter().map(Value::json).collect())
            }
            ValueKind::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.json())).collect(),
            ),
            ValueKind::Lambda { .. } => serde_json::Value::Null,
        }
    }

    /// Project this value to result symlinks. A path becomes one symlink
    /// named `resname`, an array becomes `resname-0`, `resname-1`, …
    /// recursively. An empty `resname` skips creation.
    pub fn link(&self, resname: &str) -> Result<(), EvalError> {
        match &self.kind {
            ValueKind::Path(p) => p.link(resname),
            ValueKind::Array(elems) => {
                if resname.is_empty() {
                    return Ok(());
                }
                let errs = elems
                    .iter()
                    .enumerate()
                    .filter_map(|(i, elem)| elem.link(&format!("{resname}-{i}")).err());
                match EvalError::join(errs) {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            _ => Err(EvalError::Unprojectable {
                pos: self.pos.clone(),
                got: self.type_name(),
            }),
        }
    }
}

/// Integral numbers project as JSON integers, everything else as floats.
fn json_number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() <= i64::MAX as f64 {
        serde_json::Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl PathValue {
    pub fn link(&self, resname: &str) -> Result<(), EvalError> {
        if resname.is_empty() {
            return Ok(());
        }
        if let Ok(meta) = fs::symlink_metadata(resname) {
            if !meta.file_type().is_symlink() {
                return Err(EvalError::RefusingToClobber {
                    path: resname.to_string(),
                });
            }
            fs::remove_file(resname).map_err(|e| EvalError::io(&self.pos, e))?;
        }
        symlink(&self.name, resname).map_err(|e| EvalError::io(&self.pos, e))
    }
}

#[cfg(unix)]
fn symlink(original: impl AsRef<Path>, link: impl AsRef<Path>) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(original: impl AsRef<Path>, link: impl AsRef<Path>) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(original, link)
}
