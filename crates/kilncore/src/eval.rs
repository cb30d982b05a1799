use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{EvalError, Position};
use crate::expr::{Expr, ExprKind};
use crate::output::{self, BuildSlot};
use crate::scope::{Scope, Variable};
use crate::value::{PathValue, Value, ValueKind};

/// Evaluation settings, fixed for the lifetime of an [`Evaluator`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Rebuild every output, ignoring cache hits.
    pub force: bool,
    /// Report would-be store paths without running anything.
    pub dry_run: bool,
    /// Store root; entries are fingerprint-named directories.
    pub cache_dir: PathBuf,
    /// Per-build combined stdout+stderr logs.
    pub log_dir: PathBuf,
    /// Resolve sub-expressions inline instead of on the worker pool.
    pub serial: bool,
    /// Default interpreter for `output` scripts.
    pub interpreter: String,
    /// Return output attribute sets instead of materializing them.
    pub no_eval_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            force: false,
            dry_run: false,
            cache_dir: PathBuf::from("cache/store"),
            log_dir: PathBuf::from("cache/log"),
            serial: false,
            interpreter: "sh".to_string(),
            no_eval_output: false,
        }
    }
}

/// Callback turning a path into a parsed expression; installed by the
/// driver so the core stays ignorant of the surface syntax.
pub type ParseFile = dyn Fn(&PathValue) -> Result<Expr, EvalError> + Send + Sync;

/// Reduces expressions to values, materializing `output` forms into the
/// content-addressed store on the way. One evaluator spans one run; it
/// carries the session registry of produced store entries, the dependency
/// edges, and the single-flight build table.
pub struct Evaluator {
    pub config: Config,
    parse_file: Box<ParseFile>,
    pub(crate) outputs: Mutex<Vec<String>>,
    pub(crate) edges: Mutex<Vec<(String, String)>>,
    pub(crate) builds: Mutex<HashMap<String, Arc<BuildSlot>>>,
}

impl Evaluator {
    pub fn new(config: Config) -> Self {
        Evaluator {
            config,
            parse_file: Box::new(|path| {
                Err(EvalError::IncludeFailed {
                    pos: path.pos.clone(),
                    path: path.name.clone(),
                    message: "no parser installed".to_string(),
                })
            }),
            outputs: Mutex::new(Vec::new()),
            edges: Mutex::new(Vec::new()),
            builds: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_parse_file<F>(mut self, parse_file: F) -> Self
    where
        F: Fn(&PathValue) -> Result<Expr, EvalError> + Send + Sync + 'static,
    {
        self.parse_file = Box::new(parse_file);
        self
    }

    /// Store names produced by this run, in materialization order.
    pub fn outputs(&self) -> Vec<String> {
        self.outputs.lock().unwrap().clone()
    }

    /// Dependency edges `(ancestor output name, nested output name)`.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.edges.lock().unwrap().clone()
    }

    /// Reduce `expr` under `scope`. Returns the value together with every
    /// store path that contributed to producing it.
    pub fn resolve(
        &self,
        expr: &Expr,
        scope: &Scope,
    ) -> Result<(Value, Vec<PathValue>), EvalError> {
        self.resolve_in(expr, scope, None)
    }

    /// Sibling sub-reductions run concurrently unless `serial` is set; in
    /// both modes every sibling is driven to completion and all failures
    /// are joined, so one error never hides another. Result order follows
    /// the declared order of `exprs`.
    fn resolve_many(
        &self,
        exprs: Vec<&Expr>,
        scope: &Scope,
        enclosing: Option<&str>,
    ) -> Result<Vec<(Value, Vec<PathValue>)>, EvalError> {
        let results: Vec<Result<(Value, Vec<PathValue>), EvalError>> =
            if self.config.serial || exprs.len() <= 1 {
                exprs
                    .into_iter()
                    .map(|expr| self.resolve_in(expr, scope, enclosing))
                    .collect()
            } else {
                exprs
                    .into_par_iter()
                    .map(|expr| self.resolve_in(expr, scope, enclosing))
                    .collect()
            };

        let mut values = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err(err) => errors.push(err),
            }
        }
        match EvalError::join(errors) {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }

    fn resolve_in(
        &self,
        expr: &Expr,
        scope: &Scope,
        enclosing: Option<&str>,
    ) -> Result<(Value, Vec<PathValue>), EvalError> {
        let pos = &expr.pos;
        match &expr.kind {
            ExprKind::Str { chunks, interps } => {
                let subs: Vec<&Expr> = interps.iter().flatten().collect();
                let mut resolved = self.resolve_many(subs, scope, enclosing)?.into_iter();

                let mut content = String::new();
                let mut deps = Vec::new();
                for (chunk, interp) in chunks.iter().zip(interps) {
                    content.push_str(chunk);
                    if interp.is_none() {
                        continue;
                    }
                    if let Some((value, sub_deps)) = resolved.next() {
                        match &value.kind {
                            ValueKind::Str(s) => content.push_str(s),
                            ValueKind::Path(p) => content.push_str(&p.name),
                            _ => {
                                return Err(EvalError::NonStringInterpolation {
                                    pos: value.pos.clone(),
                                    got: value.type_name(),
                                })
                            }
                        }
                        deps.extend(sub_deps);
                    }
                }
                Ok((
                    Value {
                        pos: pos.clone(),
                        kind: ValueKind::Str(content),
                    },
                    deps,
                ))
            }

            ExprKind::Number(n) => Ok((
                Value {
                    pos: pos.clone(),
                    kind: ValueKind::Number(*n),
                },
                Vec::new(),
            )),

            ExprKind::Boolean(b) => Ok((
                Value {
                    pos: pos.clone(),
                    kind: ValueKind::Boolean(*b),
                },
                Vec::new(),
            )),

            ExprKind::Path(name) => Ok((
                Value {
                    pos: pos.clone(),
                    kind: ValueKind::Path(PathValue {
                        pos: pos.clone(),
                        name: name.clone(),
                        depends: Vec::new(),
                    }),
                },
                Vec::new(),
            )),

            ExprKind::Array(elems) => {
                let resolved = self.resolve_many(elems.iter().collect(), scope, enclosing)?;
                let mut values = Vec::with_capacity(resolved.len());
                let mut deps = Vec::new();
                for (value, sub_deps) in resolved {
                    values.push(value);
                    deps.extend(sub_deps);
                }
                Ok((
                    Value {
                        pos: pos.clone(),
                        kind: ValueKind::Array(values),
                    },
                    deps,
                ))
            }

            ExprKind::Map { entries, extends } => {
                // The resolved name of this map, if any, becomes the
                // enclosing output for everything nested below it.
                let own_name = self.resolved_map_name(entries, scope, enclosing);
                let child_enclosing = own_name.as_deref().or(enclosing);

                let mut flat = Vec::with_capacity(entries.len() * 2);
                for (key, value) in entries {
                    flat.push(key);
                    flat.push(value);
                }
                let mut resolved = self
                    .resolve_many(flat, scope, child_enclosing)?
                    .into_iter();

                let mut map = IndexMap::with_capacity(entries.len());
                let mut deps = Vec::new();
                while let (Some((key, key_deps)), Some((value, value_deps))) =
                    (resolved.next(), resolved.next())
                {
                    let key_str = match key.kind {
                        ValueKind::Str(s) => s,
                        other => {
                            return Err(EvalError::ExpectedStringKey {
                                pos: key.pos,
                                got: other.type_name(),
                            })
                        }
                    };
                    deps.extend(key_deps);
                    deps.extend(value_deps);
                    map.insert(key_str, value);
                }

                // `with` clauses left to right; keys already present win.
                for ext in extends {
                    let (value, ext_deps) = self.resolve_in(ext, scope, child_enclosing)?;
                    let other = match value.kind {
                        ValueKind::Map(m) => m,
                        other => {
                            return Err(EvalError::TypeMismatch {
                                pos: value.pos,
                                expected: "map",
                                got: other.type_name(),
                            })
                        }
                    };
                    deps.extend(ext_deps);
                    for (key, elem) in other {
                        map.entry(key).or_insert(elem);
                    }
                }

                if map.len() == 1 {
                    if let Some(inner) = map.swap_remove("@") {
                        return Ok((inner, deps));
                    }
                }

                Ok((
                    Value {
                        pos: pos.clone(),
                        kind: ValueKind::Map(map),
                    },
                    deps,
                ))
            }

            ExprKind::Var { name } => {
                let var = scope.lookup(name).ok_or_else(|| EvalError::NotInScope {
                    pos: pos.clone(),
                    name: name.clone(),
                })?;
                // A bare reference to a lambda binding yields the lambda
                // itself; application happens at call sites only.
                if let ExprKind::Lambda { formals, body } = &var.expr.kind {
                    return Ok((
                        Value {
                            pos: pos.clone(),
                            kind: ValueKind::Lambda {
                                formals: formals.clone(),
                                body: (**body).clone(),
                                scope: var.scope.clone(),
                            },
                        },
                        Vec::new(),
                    ));
                }
                self.resolve_in(&var.expr, &var.scope, enclosing)
            }

            ExprKind::Call { name, args } => {
                let var = scope.lookup(name).ok_or_else(|| EvalError::NotInScope {
                    pos: pos.clone(),
                    name: name.clone(),
                })?;
                let ExprKind::Lambda { formals, body } = &var.expr.kind else {
                    return self.resolve_in(&var.expr, &var.scope, enclosing);
                };
                if formals.len() != args.len() {
                    return Err(EvalError::ArityMismatch {
                        pos: pos.clone(),
                        name: name.clone(),
                        expected: formals.len(),
                        got: args.len(),
                    });
                }
                // Arguments carry the caller's scope and are re-resolved
                // at each use.
                let bindings = formals.iter().zip(args).map(|(formal, arg)| {
                    (
                        formal.clone(),
                        Variable {
                            expr: arg.clone(),
                            scope: scope.clone(),
                        },
                    )
                });
                let inner = var.scope.extend(bindings);
                self.resolve_in(body, &inner, enclosing)
            }

            ExprKind::Attr { base, name } => {
                let (value, deps) = self.resolve_in(base, scope, enclosing)?;
                match value.kind {
                    ValueKind::Map(mut map) => match map.swap_remove(name.as_str()) {
                        Some(inner) => Ok((inner, deps)),
                        None => Err(EvalError::NoSuchAttribute {
                            pos: value.pos,
                            name: name.clone(),
                        }),
                    },
                    other => Err(EvalError::TypeMismatch {
                        pos: value.pos,
                        expected: "map",
                        got: other.type_name(),
                    }),
                }
            }

            ExprKind::Include { path } => {
                let (value, mut deps) = self.resolve_in(path, scope, enclosing)?;
                let target = match value.kind {
                    ValueKind::Path(p) => p,
                    other => {
                        return Err(EvalError::TypeMismatch {
                            pos: value.pos,
                            expected: "path",
                            got: other.type_name(),
                        })
                    }
                };
                let parsed = (self.parse_file)(&target)?;
                let (result, sub_deps) = self.resolve_in(&parsed, scope, enclosing)?;
                deps.extend(sub_deps);
                Ok((result, deps))
            }

            ExprKind::Define { bindings, body } => {
                // Each binding captures the pre-extension scope; mutual
                // recursion is deliberately unsupported.
                let vars = bindings.iter().map(|binding| {
                    (
                        binding.name.clone(),
                        Variable {
                            expr: binding.expr.clone(),
                            scope: scope.clone(),
                        },
                    )
                });
                let inner = scope.extend(vars);
                self.resolve_in(body, &inner, enclosing)
            }

            ExprKind::Lambda { formals, body } => Ok((
                Value {
                    pos: pos.clone(),
                    kind: ValueKind::Lambda {
                        formals: formals.clone(),
                        body: (**body).clone(),
                        scope: scope.clone(),
                    },
                },
                Vec::new(),
            )),

            ExprKind::Condition {
                cond,
                then,
                otherwise,
            } => {
                let (value, mut deps) = self.resolve_in(cond, scope, enclosing)?;
                let chosen = if value.truthy()? { then } else { otherwise };
                let (result, sub_deps) = self.resolve_in(chosen, scope, enclosing)?;
                deps.extend(sub_deps);
                Ok((result, deps))
            }

            ExprKind::Output { attrs } => {
                let (value, deps) = self.resolve_in(attrs, scope, enclosing)?;
                let map = match value.kind {
                    ValueKind::Map(m) => m,
                    other => {
                        return Err(EvalError::TypeMismatch {
                            pos: value.pos,
                            expected: "map",
                            got: other.type_name(),
                        })
                    }
                };
                if self.config.no_eval_output {
                    return Ok((
                        Value {
                            pos: pos.clone(),
                            kind: ValueKind::Map(map),
                        },
                        deps,
                    ));
                }
                output::materialize(self, pos, attrs, map, deps, enclosing)
            }
        }
    }

    /// The resolved `name` entry of a map under construction. Nested
    /// outputs see the name before the map itself finishes resolving, so
    /// the entry is resolved ahead of the fan-out; errors are left for
    /// the fan-out to report.
    fn resolved_map_name(
        &self,
        entries: &[(Expr, Expr)],
        scope: &Scope,
        enclosing: Option<&str>,
    ) -> Option<String> {
        for (key, value) in entries {
            let key_is_name = match key.literal_str() {
                Some(text) => text == "name",
                None => match self.resolve_in(key, scope, enclosing) {
                    Ok((resolved, _deps)) => {
                        matches!(&resolved.kind, ValueKind::Str(s) if s == "name")
                    }
                    Err(_) => false,
                },
            };
            if !key_is_name {
                continue;
            }
            let (resolved, _deps) = self.resolve_in(value, scope, enclosing).ok()?;
            return match resolved.kind {
                ValueKind::Str(name) => Some(name),
                _ => None,
            };
        }
        None
    }

    /// Remove every store entry not produced by this run. Returns the
    /// removed names.
    pub fn sweep_orphans(&self) -> Result<Vec<String>, EvalError> {
        let produced = self.outputs.lock().unwrap();
        let entries = match fs::read_dir(&self.config.cache_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EvalError::io(&Position::default(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if produced.contains(&name) {
                continue;
            }
            debug!("sweeping orphan {name}");
            fs::remove_dir_all(entry.path())
                .map_err(|e| EvalError::io(&Position::default(), e))?;
            removed.push(name);
        }
        removed.sort();
        Ok(removed)
    }
}
