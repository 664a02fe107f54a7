//! AP-013: CLI subcommands: init, validate, inject, run, chain.

use crate::core::builder::{build, BuildOptions};
use crate::core::error::{Error, Result};
use crate::core::executor;
use crate::core::parser::{self, ValidationError};
use crate::core::registry::Registry;
use crate::core::resolver::{apply, resolve};
use crate::core::types::{AppareilFile, ChainFile, InjectionFile};
use crate::core::value::Value;
use clap::{Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Which schema a file follows.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Injection file (target + flat factories)
    Inject,
    /// Appareil file (named parts)
    Run,
    /// Chain file (steps fed into each other)
    Chain,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter injection file
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a file without running anything
    Validate {
        /// Path to the file
        #[arg(short, long, default_value = "aprl.yaml")]
        file: PathBuf,

        /// Schema to validate against
        #[arg(short, long, value_enum, default_value_t = FileKind::Inject)]
        kind: FileKind,
    },

    /// Build, resolve and apply an injection file
    Inject {
        /// Path to the injection file
        #[arg(short, long, default_value = "aprl.yaml")]
        file: PathBuf,

        /// Print the factory tree before and after resolution
        #[arg(long)]
        tree: bool,

        /// Overrides as dotted.key=value
        overrides: Vec<String>,
    },

    /// Run the parts of an appareil file
    Run {
        /// Path to the appareil file
        #[arg(short, long, default_value = "aprl.yaml")]
        file: PathBuf,

        /// Parts to run, comma separated (default: the file's to_run, else all)
        #[arg(long, value_delimiter = ',')]
        to_run: Option<Vec<String>>,

        /// Log the parts without running them
        #[arg(long)]
        dry: bool,

        /// Overrides as dotted.key=value
        overrides: Vec<String>,
    },

    /// Run a chain file and print its output
    Chain {
        /// Path to the chain file
        #[arg(short, long, default_value = "aprl.yaml")]
        file: PathBuf,

        /// Overrides as dotted.key=value
        overrides: Vec<String>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file, kind } => cmd_validate(&file, kind),
        Commands::Inject {
            file,
            tree,
            overrides,
        } => cmd_inject(&file, tree, &overrides).map(|value| print_yaml(&value)),
        Commands::Run {
            file,
            to_run,
            dry,
            overrides,
        } => cmd_run(&file, to_run, dry, &overrides),
        Commands::Chain { file, overrides } => {
            cmd_chain(&file, &overrides).map(|value| print_yaml(&value))
        }
    }
}

const STARTER: &str = r#"name: my-injection
description: "Starter injection for aprl"

# Callable receiving the injected arguments
target: aprl.collect

# Subtrees turned into lists ordered by key
convert_to_list: [kwargs.items]

params:
  greeting: hello

factories:
  args.0: {_target_: aprl.const, value: "{{params.greeting}}"}
  kwargs.items.a: {_target_: aprl.const, value: 1}
  kwargs.items.b: {_target_: aprl.const, value: 2}
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let file = path.join("aprl.yaml");
    if file.exists() {
        return Err(Error::Io {
            path: file.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "already exists"),
        });
    }
    crate::core::stdlib::mkp(path, Some(true))?;
    std::fs::write(&file, STARTER).map_err(|source| Error::Io {
        path: file.display().to_string(),
        source,
    })?;
    println!("Initialized aprl project at {}", path.display());
    println!("  Created: {}", file.display());
    Ok(())
}

fn print_yaml(value: &Value) {
    match serde_yaml_ng::to_string(value) {
        Ok(yaml) => print!("{}", yaml),
        Err(_) => println!("{}", value),
    }
}

/// Print validation errors; fail when there are any.
fn report(errors: &[ValidationError]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    for e in errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(Error::Validation(errors.len()))
}

fn cmd_validate(file: &Path, kind: FileKind) -> Result<()> {
    let registry = Registry::with_builtins();
    match kind {
        FileKind::Inject => {
            let f: InjectionFile = parser::load_file(file, &[])?;
            for w in parser::injection_warnings(&f) {
                eprintln!("  WARNING: {}", w);
            }
            report(&parser::validate_injection(&f, &registry))?;
            println!("OK: {} ({} factories)", f.name, f.factories.len());
        }
        FileKind::Run => {
            let f: AppareilFile = parser::load_file(file, &[])?;
            report(&parser::validate_appareil(&f, &registry))?;
            println!("OK: {} ({} parts)", f.name, f.parts.len());
        }
        FileKind::Chain => {
            let f: ChainFile = parser::load_file(file, &[])?;
            report(&parser::validate_chain(&f, &registry))?;
            println!("OK: {} ({} steps)", f.name, f.steps.len());
        }
    }
    Ok(())
}

fn cmd_inject(file: &Path, show_tree: bool, overrides: &[String]) -> Result<Value> {
    let registry = Registry::with_builtins();
    let f: InjectionFile = parser::load_file(file, overrides)?;
    report(&parser::validate_injection(&f, &registry))?;
    tracing::info!("injecting {}", f.name);

    let target = parser::injection_target(&f, &registry)?;
    let factories = parser::injection_factories(&f)?;
    let built = build(&factories, &registry, BuildOptions { strict: f.strict })?;
    if show_tree {
        eprint!("built:\n{}", built.tree());
    }
    let resolved = resolve(built, &f.convert_to_list, &registry)?;
    if show_tree {
        eprint!("resolved:\n{}", resolved.tree());
    }
    let applied = apply(resolved, &target)?;
    Ok(applied.raw)
}

fn cmd_run(
    file: &Path,
    to_run: Option<Vec<String>>,
    dry: bool,
    overrides: &[String],
) -> Result<()> {
    let registry = Registry::with_builtins();
    let f: AppareilFile = parser::load_file(file, overrides)?;
    report(&parser::validate_appareil(&f, &registry))?;

    let parts = parser::appareil_parts(&f, &registry)?;
    let selection = to_run
        .or_else(|| f.to_run.clone())
        .unwrap_or_else(|| executor::all_parts(&parts));
    let summary = executor::run_parts("part", &selection, &parts, dry || f.dry)?;

    for name in &summary.skipped {
        println!("  [dry] {}", name);
    }
    println!(
        "{}: {} part(s) run, {} skipped ({:.2}s)",
        f.name,
        summary.outputs.len(),
        summary.skipped.len(),
        summary.total_duration.as_secs_f64()
    );
    Ok(())
}

fn cmd_chain(file: &Path, overrides: &[String]) -> Result<Value> {
    let registry = Registry::with_builtins();
    let f: ChainFile = parser::load_file(file, overrides)?;
    report(&parser::validate_chain(&f, &registry))?;
    let steps = parser::chain_steps(&f, &registry)?;
    executor::run_chain(parser::chain_input(&f)?, &steps)
}
