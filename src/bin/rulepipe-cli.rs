//! Rulepipe CLI - Command-line interface for rule authoring
//!
//! Provides subcommands for checking, formatting, and simulating rule and
//! pipeline sources.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rulepipe::functions::FunctionCatalog;
use rulepipe::lang::{Value, parse_with_diagnostics};
use rulepipe::runtime::{
    InterpreterConfig, Message, PipelineError, PipelineInterpreter, PipelineSet, Simulator,
    SourceDiagnostics, SourceUnit,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rulepipe")]
#[command(about = "Rule language and pipeline interpreter for log messages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse sources and report every diagnostic
    Check {
        /// Rule or pipeline source files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the canonical rendering of a source file
    Fmt {
        /// Source file
        file: PathBuf,
    },

    /// Run a message through pipelines and print the trace
    Simulate {
        /// Rule source files
        #[arg(long = "rules", num_args = 1..)]
        rules: Vec<PathBuf>,

        /// Pipeline source files
        #[arg(long = "pipeline", num_args = 1..)]
        pipelines: Vec<PathBuf>,

        /// Message fields as a JSON object
        #[arg(long)]
        message: String,

        /// Stream the message arrived on (repeatable)
        #[arg(long = "stream")]
        streams: Vec<String>,

        /// Pipelines to run (default: all, by name)
        #[arg(long = "run")]
        run: Vec<String>,

        /// Interpreter configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { files } => {
            let registry = FunctionCatalog::global().snapshot();
            let mut failures = 0;
            for file in &files {
                let outcome = parse_with_diagnostics(&read_source(file)?, &registry);
                for error in &outcome.errors {
                    println!("{}:{}", file.display(), error);
                }
                failures += outcome.errors.len();
            }
            if failures > 0 {
                bail!("{} diagnostic(s)", failures);
            }
            println!("{} file(s) ok", files.len());
        }

        Commands::Fmt { file } => {
            let registry = FunctionCatalog::global().snapshot();
            let outcome = parse_with_diagnostics(&read_source(&file)?, &registry);
            if !outcome.is_ok() {
                for error in &outcome.errors {
                    println!("{}:{}", file.display(), error);
                }
                bail!("{} has diagnostics, not formatting", file.display());
            }
            let rendered: Vec<String> = outcome
                .declarations
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("{}", rendered.join("\n\n"));
        }

        Commands::Simulate {
            rules,
            pipelines,
            message,
            streams,
            run,
            config,
        } => {
            let config = match config {
                Some(path) => InterpreterConfig::load(&path)?,
                None => InterpreterConfig::default(),
            };
            let registry = FunctionCatalog::global().snapshot();
            let set = match PipelineSet::build(
                &load_units(&rules)?,
                &load_units(&pipelines)?,
                &registry,
            ) {
                Ok(set) => set,
                Err(PipelineError::Invalid(sources)) => {
                    print_diagnostics(&sources);
                    bail!("{} source(s) failed to parse", sources.len());
                }
            };

            let names: Vec<String> = if run.is_empty() {
                set.pipelines().map(|p| p.name.clone()).collect()
            } else {
                run
            };
            let fields: BTreeMap<String, Value> =
                serde_json::from_str(&message).context("Failed to parse --message JSON")?;
            let mut input = Message::from_fields(fields);
            for stream in &streams {
                input.add_stream(stream.clone());
            }

            let interpreter = PipelineInterpreter::with_pipelines(config, set);
            let selected: Vec<&str> = names.iter().map(String::as_str).collect();
            let result = Simulator::new(&interpreter).simulate(&input, &streams, &selected);

            for line in &result.trace {
                println!("{}", line);
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&result.message)
                    .context("Failed to serialize message")?
            );
        }
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read source: {:?}", path))
}

fn load_units(paths: &[PathBuf]) -> Result<Vec<SourceUnit>> {
    paths
        .iter()
        .map(|path| Ok(SourceUnit::new(path.display().to_string(), read_source(path)?)))
        .collect()
}

fn print_diagnostics(sources: &[SourceDiagnostics]) {
    for source in sources {
        for error in source.diagnostics.iter() {
            println!("{}:{}", source.source, error);
        }
    }
}
