use std::collections::BTreeMap;
use std::sync::Arc;

use crate::expr::Expr;

/// Immutable mapping from name to bound expression. Extension allocates a
/// new frame pointing at the old chain, so scopes are cheap to clone and
/// safe to share across worker threads.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    frame: Option<Arc<Frame>>,
}

#[derive(Debug)]
struct Frame {
    vars: BTreeMap<String, Variable>,
    parent: Scope,
}

/// A bound expression together with the scope it was bound in. Resolving
/// the variable resolves the expression under that captured scope, not the
/// scope of the reference site.
#[derive(Debug, Clone)]
pub struct Variable {
    pub expr: Expr,
    pub scope: Scope,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        let mut current = self;
        while let Some(frame) = &current.frame {
            if let Some(var) = frame.vars.get(name) {
                return Some(var);
            }
            current = &frame.parent;
        }
        None
    }

    /// A new scope with `bindings` shadowing this one. The receiver is
    /// unchanged.
    pub fn extend(&self, bindings: impl IntoIterator<Item = (String, Variable)>) -> Scope {
        let vars: BTreeMap<String, Variable> = bindings.into_iter().collect();
        if vars.is_empty() {
            return self.clone();
        }
        Scope {
            frame: Some(Arc::new(Frame {
                vars,
                parent: self.clone(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    fn constant(s: &str) -> Variable {
        Variable {
            expr: Expr::string_constant(s, "<test>"),
            scope: Scope::new(),
        }
    }

    #[test]
    fn extend_shadows_without_mutating() {
        let outer = Scope::new().extend([("x".to_string(), constant("outer"))]);
        let inner = outer.extend([("x".to_string(), constant("inner"))]);

        let seen = inner.lookup("x").unwrap().expr.literal_str().unwrap();
        assert_eq!(seen, "inner");
        let kept = outer.lookup("x").unwrap().expr.literal_str().unwrap();
        assert_eq!(kept, "outer");
    }

    #[test]
    fn lookup_walks_parent_frames() {
        let outer = Scope::new().extend([("a".to_string(), constant("1"))]);
        let inner = outer.extend([("b".to_string(), constant("2"))]);
        assert!(inner.lookup("a").is_some());
        assert!(inner.lookup("b").is_some());
        assert!(inner.lookup("c").is_none());
        assert!(outer.lookup("b").is_none());
    }

    #[test]
    fn empty_extension_is_identity() {
        let scope = Scope::new().extend([("a".to_string(), constant("1"))]);
        let same = scope.extend([]);
        assert!(same.lookup("a").is_some());
    }
}
