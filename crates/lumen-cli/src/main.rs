use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info};

use lumen_lang::{Environment, RuntimeError, Statement, load_script};

/// Checks and evaluates lumen scripts
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log evaluation details
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Report statements that fail to parse
    Check {
        file: PathBuf,
    },

    /// Print the values of variables (every variable when none are named)
    Eval {
        file: PathBuf,
        names: Vec<String>,

        /// Value of the `time` constant
        #[arg(short, long)]
        time: Option<f32>,
    },

    /// Print `length × dimension` without computing values
    Shape {
        file: PathBuf,
        name: String,
    },

    /// Evaluate only the listed elements of a variable
    Sample {
        file: PathBuf,
        name: String,

        /// Comma-separated element indices
        #[arg(short, long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
        indices: Vec<i64>,

        /// Value of the `time` constant
        #[arg(short, long)]
        time: Option<f32>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Check { file } => check(&file),
        Command::Eval { file, names, time } => eval(&file, &names, time),
        Command::Shape { file, name } => {
            let (mut env, _) = load(&file)?;
            let shape = env.evaluate_shape(&name).map_err(|e| report(&env, e))?;
            println!("{name}: {shape}");
            Ok(())
        }
        Command::Sample { file, name, indices, time } => {
            let (mut env, _) = load(&file)?;
            if let Some(t) = time {
                env.set_time(t);
            }
            let values = env
                .evaluate_indexed(&name, Some(&indices))
                .map_err(|e| report(&env, e))?;
            println!("{name}{indices:?} = {values}");
            Ok(())
        }
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

fn load(file: &Path) -> Result<(Environment, Vec<Statement>)> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let loaded = load_script(&source);
    info!("loaded {}", file.display());
    Ok(loaded)
}

fn check(file: &Path) -> Result<()> {
    let (env, failed) = load(file)?;
    for statement in &failed {
        let Some(err) = statement.error() else { continue };
        let (line, column) = statement.location(err.span).unwrap_or((0, 0));
        println!("[{}] {line}:{column} — {}: `{}`", err.kind.code(), err.kind, statement.snippet(err.span));
    }
    debug!("{} declarations, {} renders", env.names().count(), env.renders().len());

    if !failed.is_empty() {
        bail!("{} statement(s) failed to parse", failed.len());
    }
    println!("ok");
    Ok(())
}

fn eval(file: &Path, names: &[String], time: Option<f32>) -> Result<()> {
    let (mut env, failed) = load(file)?;
    if !failed.is_empty() {
        log::warn!("{} statement(s) failed to parse; run `lumen check`", failed.len());
    }
    if let Some(t) = time {
        env.set_time(t);
    }

    let names: Vec<String> = if names.is_empty() {
        env.names()
            .filter(|n| env.statement(n).is_some_and(Statement::is_variable))
            .map(str::to_string)
            .collect()
    } else {
        names.to_vec()
    };

    for name in &names {
        let values = env.evaluate(name).map_err(|e| report(&env, e))?;
        println!("{name} = {values}");
    }
    Ok(())
}

/// Attaches the failing statement's location and source text to a runtime error.
fn report(env: &Environment, err: RuntimeError) -> anyhow::Error {
    let located = err.statement.as_deref().and_then(|name| {
        let statement = env.statement(name)?;
        let (line, column) = statement.location(err.span)?;
        Some(format!("{line}:{column} `{}`", statement.snippet(err.span)))
    });
    match located {
        Some(at) => anyhow::anyhow!("{err} at {at}"),
        None => err.into(),
    }
}
