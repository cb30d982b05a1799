use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::error::{EvalError, Position};
use crate::eval::Evaluator;
use crate::expr::Expr;
use crate::fingerprint;
use crate::value::{PathValue, Value, ValueKind};

/// Single-flight coordination for one fingerprint: the first requester runs
/// the build, later requesters block until the outcome is published and
/// receive a clone of it. Lives as long as the evaluator.
pub(crate) struct BuildSlot {
    state: Mutex<SlotState>,
    done: Condvar,
}

enum SlotState {
    Idle,
    Running,
    Done(Result<PathValue, EvalError>),
}

impl BuildSlot {
    pub(crate) fn new() -> Self {
        BuildSlot {
            state: Mutex::new(SlotState::Idle),
            done: Condvar::new(),
        }
    }

    fn run<F>(&self, build: F) -> Result<PathValue, EvalError>
    where
        F: FnOnce() -> Result<PathValue, EvalError>,
    {
        {
            let mut state = self.state.lock().unwrap();
            loop {
                match &*state {
                    SlotState::Idle => {
                        *state = SlotState::Running;
                        break;
                    }
                    SlotState::Running => state = self.done.wait(state).unwrap(),
                    SlotState::Done(result) => return result.clone(),
                }
            }
        }

        let result = build();

        let mut state = self.state.lock().unwrap();
        *state = SlotState::Done(result.clone());
        self.done.notify_all();
        result
    }
}

/// Turn a resolved output attribute set into a sealed store entry.
///
/// The fingerprint is computed over the *unresolved* attribute expression;
/// a `name` attribute is appended for store readability. Within one run the
/// underlying script executes at most once per fingerprint.
pub(crate) fn materialize(
    ev: &Evaluator,
    pos: &Position,
    attrs_expr: &Expr,
    attrs: IndexMap<String, Value>,
    deps: Vec<PathValue>,
    enclosing: Option<&str>,
) -> Result<(Value, Vec<PathValue>), EvalError> {
    let impure = matches!(
        attrs.get("impure").map(|v| &v.kind),
        Some(ValueKind::Boolean(true))
    );
    let fp = if impure {
        fingerprint::random()
    } else {
        fingerprint::of_expr(attrs_expr)
    };

    let name = attrs.get("name").and_then(|v| match &v.kind {
        ValueKind::Str(s) => Some(s.as_str()),
        _ => None,
    });
    let store_name = match name {
        Some(name) => format!("{fp}-{name}"),
        None => fp.to_string(),
    };

    if let (Some(parent), Some(name)) = (enclosing, name) {
        if parent != name {
            ev.edges
                .lock()
                .unwrap()
                .push((parent.to_string(), name.to_string()));
        }
    }
    ev.outputs.lock().unwrap().push(store_name.clone());

    let slot = ev
        .builds
        .lock()
        .unwrap()
        .entry(store_name.clone())
        .or_insert_with(|| Arc::new(BuildSlot::new()))
        .clone();

    let path = slot.run(|| build(ev, pos, &attrs, &store_name, deps.clone()))?;
    Ok((
        Value {
            pos: pos.clone(),
            kind: ValueKind::Path(path.clone()),
        },
        vec![path],
    ))
}

fn build(
    ev: &Evaluator,
    pos: &Position,
    attrs: &IndexMap<String, Value>,
    store_name: &str,
    deps: Vec<PathValue>,
) -> Result<PathValue, EvalError> {
    let cwd = std::env::current_dir().map_err(|e| EvalError::io(pos, e))?;
    let outdir = cwd.join(&ev.config.cache_dir).join(store_name);
    let exists = outdir.is_dir();

    if (ev.config.dry_run || exists) && !ev.config.force {
        debug!("cache hit for {store_name}");
        return Ok(PathValue {
            pos: pos.clone(),
            name: outdir.display().to_string(),
            depends: deps,
        });
    }

    let start = Instant::now();

    if exists {
        fs::remove_dir_all(&outdir).map_err(|e| EvalError::io(pos, e))?;
    }
    fs::create_dir_all(&outdir).map_err(|e| EvalError::io(pos, e))?;
    // Never leave a half-built entry behind, not even on panic.
    let guard = CleanupGuard::new(outdir.clone());

    let (cmdline, script_pos) = command_line(ev, pos, attrs)?;

    // `source` builds in place; anything else gets a throwaway directory.
    let mut scratch = None;
    let workdir = match attrs.get("source") {
        Some(value) => match &value.kind {
            ValueKind::Path(p) => PathBuf::from(&p.name),
            other => {
                return Err(EvalError::TypeMismatch {
                    pos: value.pos.clone(),
                    expected: "path",
                    got: other.type_name(),
                })
            }
        },
        None => {
            let dir = tempfile::Builder::new()
                .prefix("kiln-")
                .tempdir()
                .map_err(|e| EvalError::io(pos, e))?;
            let path = dir.path().to_path_buf();
            scratch = Some(dir);
            path
        }
    };

    let mut environ = vec![("out".to_string(), outdir.display().to_string())];
    for (key, value) in attrs {
        environ.push((key.clone(), value.encode_env(true)?));
    }

    fs::create_dir_all(&ev.config.log_dir).map_err(|e| EvalError::io(pos, e))?;
    let logpath = ev.config.log_dir.join(format!("{store_name}.log"));
    let logfile = File::create(&logpath).map_err(|e| EvalError::io(pos, e))?;
    let logfile_err = logfile.try_clone().map_err(|e| EvalError::io(pos, e))?;

    let status = Command::new(&cmdline[0])
        .args(&cmdline[1..])
        .envs(environ)
        .current_dir(&workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(logfile))
        .stderr(Stdio::from(logfile_err))
        .status()
        .map_err(|e| EvalError::Io {
            pos: script_pos.clone(),
            message: format!("unable to run {}: {e}", cmdline[0]),
        })?;
    drop(scratch);

    if !status.success() {
        return Err(EvalError::BuildFailed {
            pos: script_pos,
            fingerprint: store_name.to_string(),
            log: logpath.display().to_string(),
            status: status.to_string(),
        });
    }

    guard.disarm();
    info!("{store_name} ({:.0?})", start.elapsed());
    Ok(PathValue {
        pos: pos.clone(),
        name: outdir.display().to_string(),
        depends: deps,
    })
}

/// Assemble the child command line. Exactly one of `output` (a script for
/// the interpreter) or `builder` (a direct executable) must be present;
/// `args` entries are appended, skipping the first element, which is the
/// conventional program-name slot.
fn command_line(
    ev: &Evaluator,
    pos: &Position,
    attrs: &IndexMap<String, Value>,
) -> Result<(Vec<String>, Position), EvalError> {
    let mut cmdline;
    let script_pos;

    if let Some(value) = attrs.get("output") {
        let ValueKind::Str(script) = &value.kind else {
            return Err(EvalError::TypeMismatch {
                pos: value.pos.clone(),
                expected: "string",
                got: value.type_name(),
            });
        };
        let mut interpreter = ev.config.interpreter.clone();
        if let Some(choice) = attrs.get("interpreter") {
            match &choice.kind {
                ValueKind::Str(s) => interpreter = s.clone(),
                other => {
                    return Err(EvalError::TypeMismatch {
                        pos: choice.pos.clone(),
                        expected: "string",
                        got: other.type_name(),
                    })
                }
            }
        }
        cmdline = vec![
            interpreter,
            "-e".to_string(),
            "-c".to_string(),
            script.clone(),
            "builder".to_string(),
        ];
        script_pos = value.pos.clone();
    } else if let Some(value) = attrs.get("builder") {
        let program = match &value.kind {
            ValueKind::Str(s) => s.clone(),
            ValueKind::Path(p) => p.name.clone(),
            other => {
                return Err(EvalError::TypeMismatch {
                    pos: value.pos.clone(),
                    expected: "string or path",
                    got: other.type_name(),
                })
            }
        };
        cmdline = vec![program];
        script_pos = value.pos.clone();
    } else {
        return Err(EvalError::MissingBuildSpec { pos: pos.clone() });
    }

    if let Some(value) = attrs.get("args") {
        let ValueKind::Array(items) = &value.kind else {
            return Err(EvalError::TypeMismatch {
                pos: value.pos.clone(),
                expected: "array",
                got: value.type_name(),
            });
        };
        for item in items.iter().skip(1) {
            match &item.kind {
                ValueKind::Str(s) => cmdline.push(s.clone()),
                other => {
                    return Err(EvalError::TypeMismatch {
                        pos: item.pos.clone(),
                        expected: "string",
                        got: other.type_name(),
                    })
                }
            }
        }
    }

    Ok((cmdline, script_pos))
}

struct CleanupGuard {
    path: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    fn new(path: PathBuf) -> Self {
        CleanupGuard { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}
