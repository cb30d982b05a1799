use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln::cli::Cli;
use kiln::graph;
use kilncore::{Config, EvalError, Evaluator, Expr, PathValue, Scope, Variable};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut cli = Cli::parse();
    if cli.json {
        cli.no_result = true;
    }
    if cli.dry && cli.force {
        cli.force = false;
    }

    let mut filename = None;
    let mut bindings = Vec::new();
    for arg in &cli.args {
        if let Some((name, value)) = arg.split_once('=') {
            bindings.push((
                name.to_string(),
                Variable {
                    expr: Expr::string_constant(value, "<commandline>"),
                    scope: Scope::new(),
                },
            ));
        } else if filename.is_none() {
            filename = Some(arg.clone());
        } else {
            bail!("obsolete argument: `{arg}`");
        }
    }
    let filename = filename.context("no file provided")?;
    let scope = Scope::new().extend(bindings);

    let ast = kilnlang::parse_file(Path::new(&filename))?;

    if !cli.dry {
        fs::create_dir_all(&cli.cache)
            .with_context(|| format!("create cache dir {}", cli.cache.display()))?;
        fs::create_dir_all(&cli.log)
            .with_context(|| format!("create log dir {}", cli.log.display()))?;
    }

    let evaluator = Evaluator::new(Config {
        force: cli.force,
        dry_run: cli.dry,
        cache_dir: cli.cache.clone(),
        log_dir: cli.log.clone(),
        serial: cli.serial,
        interpreter: cli.interpreter.clone(),
        no_eval_output: cli.no_eval_output,
    })
    .with_parse_file(|path: &PathValue| {
        kilnlang::parse_file(Path::new(&path.name)).map_err(|err| EvalError::IncludeFailed {
            pos: path.pos.clone(),
            path: path.name.clone(),
            message: err.to_string(),
        })
    });

    let (value, _deps) = evaluator.resolve(&ast, &scope)?;

    if cli.clean {
        for name in evaluator.sweep_orphans()? {
            tracing::info!("clean {name}");
        }
    }

    if let Some(file) = &cli.graph {
        graph::write_dot(file, &evaluator.edges())
            .with_context(|| format!("write graph {}", file.display()))?;
    }

    if cli.json {
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &value.json())?;
        writeln!(stdout)?;
    } else if !cli.no_result {
        value.link(&cli.output)?;
    }

    Ok(())
}
