use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Declarative, hermetic build evaluator")]
pub struct Cli {
    /// Force building all outputs, ignoring cache hits
    #[arg(short, long)]
    pub force: bool,

    /// Report would-be store paths without building anything
    #[arg(short, long)]
    pub dry: bool,

    /// Destination of outputs
    #[arg(short, long, default_value = "cache/store")]
    pub cache: PathBuf,

    /// Destination of build logs
    #[arg(short, long, default_value = "cache/log")]
    pub log: PathBuf,

    /// Name of the result symlink
    #[arg(short, long, default_value = "result")]
    pub output: String,

    /// Disable creation of the result symlink
    #[arg(long)]
    pub no_result: bool,

    /// Do not evaluate asynchronously
    #[arg(short, long)]
    pub serial: bool,

    /// Default interpreter for outputs
    #[arg(long, default_value = "sh")]
    pub interpreter: String,

    /// Skip materialization of outputs
    #[arg(long)]
    pub no_eval_output: bool,

    /// Print the result as JSON, implies --no-result
    #[arg(long)]
    pub json: bool,

    /// Clean orphaned store entries not produced by this run
    #[arg(short = 'g', long)]
    pub clean: bool,

    /// Write the dependency graph as DOT to this file
    #[arg(long, value_name = "FILE")]
    pub graph: Option<PathBuf>,

    /// Expression file followed by name=value scope bindings
    #[arg(value_name = "FILE|NAME=VALUE")]
    pub args: Vec<String>,
}
