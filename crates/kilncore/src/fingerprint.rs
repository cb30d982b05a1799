use std::fmt;
use std::fs;
use std::time::UNIX_EPOCH;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::expr::{Binding, Expr, ExprKind};

pub const FINGERPRINT_LEN: usize = 16;

/// Content address of a store entry: a canonical byte stream over an
/// expression subtree, digested and truncated to 128 bits. Formats as
/// lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Fingerprint of a pure expression. Byte-identical across runs as long as
/// the tree and the stat of any referenced paths are unchanged.
pub fn of_expr(expr: &Expr) -> Fingerprint {
    let mut stream = Vec::new();
    write_expr(&mut stream, expr);
    let digest = Sha256::digest(&stream);
    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(&digest[..FINGERPRINT_LEN]);
    Fingerprint(out)
}

/// Fresh random fingerprint for an impure output. Deliberately defeats the
/// cache; the only source of nondeterminism in the core.
pub fn random() -> Fingerprint {
    let mut out = [0u8; FINGERPRINT_LEN];
    rand::rng().fill_bytes(&mut out);
    Fingerprint(out)
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
}

fn write_expr(out: &mut Vec<u8>, expr: &Expr) {
    match &expr.kind {
        ExprKind::Str { chunks, interps } => {
            write_str(out, "string");
            for (chunk, interp) in chunks.iter().zip(interps) {
                write_str(out, chunk);
                if let Some(sub) = interp {
                    write_expr(out, sub);
                }
            }
        }
        ExprKind::Number(n) => {
            write_str(out, "number");
            write_str(out, &n.to_string());
        }
        ExprKind::Boolean(b) => {
            write_str(out, "boolean");
            write_str(out, if *b { "true" } else { "false" });
        }
        ExprKind::Path(name) => {
            write_str(out, "path");
            write_str(out, name);
            write_path_stat(out, name);
        }
        ExprKind::Array(elems) => {
            write_str(out, "list");
            write_str(out, &elems.len().to_string());
            for elem in elems {
                write_expr(out, elem);
            }
        }
        ExprKind::Map { entries, extends } => {
            write_str(out, "map");
            // Source order of entries is irrelevant to the address.
            let mut streams: Vec<Vec<u8>> = entries
                .iter()
                .map(|(key, value)| {
                    let mut entry = Vec::new();
                    write_expr(&mut entry, key);
                    write_expr(&mut entry, value);
                    entry
                })
                .collect();
            streams.sort();
            for entry in streams {
                out.extend_from_slice(&entry);
            }
            // `with` clauses apply left to right, so their order is kept.
            for ext in extends {
                write_str(out, "with");
                write_expr(out, ext);
            }
        }
        ExprKind::Var { name } => {
            write_str(out, "var");
            write_str(out, name);
        }
        ExprKind::Call { name, args } => {
            write_str(out, "call");
            write_str(out, name);
            write_str(out, &args.len().to_string());
            for arg in args {
                write_expr(out, arg);
            }
        }
        ExprKind::Attr { base, name } => {
            write_str(out, "attr");
            write_expr(out, base);
            write_str(out, name);
        }
        ExprKind::Include { path } => {
            write_str(out, "include");
            write_expr(out, path);
        }
        ExprKind::Define { bindings, body } => {
            write_str(out, "define");
            let mut sorted: Vec<&Binding> = bindings.iter().collect();
            sorted.sort_by(|a, b| a.name.cmp(&b.name));
            for binding in sorted {
                write_str(out, &binding.name);
                write_expr(out, &binding.expr);
            }
            write_expr(out, body);
        }
        ExprKind::Lambda { formals, body } => {
            write_str(out, "fn(");
            write_str(out, &formals.join(","));
            write_str(out, ")");
            write_expr(out, body);
        }
        ExprKind::Condition {
            cond,
            then,
            otherwise,
        } => {
            write_str(out, "if");
            write_expr(out, cond);
            write_expr(out, then);
            write_expr(out, otherwise);
        }
        ExprKind::Output { attrs } => {
            write_str(out, "output");
            write_expr(out, attrs);
        }
    }
}

/// Fold in mtime and mode of the on-disk file, the one fingerprint input
/// living outside the expression tree. A failed stat is only a warning.
fn write_path_stat(out: &mut Vec<u8>, name: &str) {
    match fs::metadata(name) {
        Ok(meta) => {
            if let Ok(modified) = meta.modified() {
                if let Ok(elapsed) = modified.duration_since(UNIX_EPOCH) {
                    write_str(out, &elapsed.as_nanos().to_string());
                }
            }
            write_str(out, &mode_bits(&meta).to_string());
        }
        Err(err) => {
            warn!("unable to stat {name}: {err}");
        }
    }
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    meta.permissions().readonly() as u32
}
