//! `converge`: converge a project directory toward the features enabled in
//! its `converge.toml`.
//!
//! The apply summary goes to stdout. Diagnostics go to stderr through
//! `tracing` (see `RUST_LOG`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use converge::apply::{ApplyOptions, ApplyOutcome, Config, apply};
use converge::core::error::ApplyError;
use converge::exit_codes;
use converge::io::config::{CONFIG_FILE, Settings, load_config, write_config};
use converge::io::registry::{NpmRegistry, PinnedRegistry};
use converge::status::status;

#[derive(Parser)]
#[command(
    name = "converge",
    version,
    about = "Converge a project toward its declared configuration"
)]
struct Cli {
    /// Project root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `converge.toml`.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Reconcile the project with the enabled features.
    Apply {
        /// Fail without writing when a manual edit needs review.
        #[arg(long)]
        check: bool,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the files converge wrote and whether each is still in sync.
    Status,
}

fn main() {
    converge::logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Apply { check, json } => cmd_apply(&cli.root, check, json),
        Command::Status => cmd_status(&cli.root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let path = root.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &Settings::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_apply(root: &Path, check: bool, json: bool) -> Result<i32> {
    let settings = load_config(&root.join(CONFIG_FILE))?;
    let features = features::resolve_features(&settings.features)?;
    let config = Config::new(features)
        .with_options(settings.feature_options())
        .with_cache_path(&settings.cache_path);
    let npm = NpmRegistry::new(Duration::from_secs(settings.registry_timeout_secs));
    let registry = PinnedRegistry::new(settings.registry.pinned.clone(), &npm);
    let options = ApplyOptions {
        throw_on_manual_changes: settings.throw_on_manual_changes || check,
    };

    match apply(root, &config, &registry, &options) {
        Ok(outcome) => {
            if json {
                let payload =
                    serde_json::to_string_pretty(&outcome.summary).context("serialize summary")?;
                println!("{payload}");
            } else {
                print_outcome(&outcome);
            }
            Ok(outcome_code(&outcome, check))
        }
        Err(err) => {
            if let ApplyError::ManualChanges { items } = &err {
                for item in items {
                    println!("review  {} ({})", item.path, item.features.join(", "));
                }
            }
            eprintln!("{err}");
            Ok(error_code(&err))
        }
    }
}

fn cmd_status(root: &Path) -> Result<i32> {
    let settings = load_config(&root.join(CONFIG_FILE))?;
    let report = status(root, Path::new(&settings.cache_path))?;
    if let Some(warning) = &report.warning {
        eprintln!("warning: {warning}");
    }
    for file in &report.files {
        println!("{:<10} {:<14} {}", file.state.to_string(), file.kind.to_string(), file.path);
    }
    Ok(exit_codes::OK)
}

fn print_outcome(outcome: &ApplyOutcome) {
    let summary = &outcome.summary;
    for warning in &summary.warnings {
        println!("warning {warning}");
    }
    for item in &summary.manual_review_items {
        println!(
            "review  {} ({}): {}",
            item.path,
            item.features.join(", "),
            item.reason
        );
    }
    for failure in &summary.failures {
        println!(
            "failed  {} [{}]: {}",
            failure.path, failure.operation, failure.message
        );
    }
    println!(
        "files: {} created, {} updated, {} unchanged, {} deleted, {} skipped, {} need review",
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.deleted,
        summary.skipped,
        summary.needs_review
    );
    println!(
        "dependencies: {} added, {} changed, {} removed",
        summary.dependencies_added, summary.dependencies_changed, summary.dependencies_removed
    );
    if !outcome.tasks.is_empty() {
        let names: Vec<&str> = outcome.tasks.iter().map(|task| task.name.as_str()).collect();
        println!("tasks: {}", names.join(", "));
    }
}

fn outcome_code(outcome: &ApplyOutcome, check: bool) -> i32 {
    if outcome.summary.failed {
        exit_codes::FAILED
    } else if check && outcome.summary.needs_review > 0 {
        exit_codes::REVIEW
    } else {
        exit_codes::OK
    }
}

fn error_code(err: &ApplyError) -> i32 {
    match err {
        ApplyError::Config { .. } | ApplyError::Scheduling { .. } | ApplyError::Recipe { .. } => {
            exit_codes::INVALID
        }
        ApplyError::ManualChanges { .. } => exit_codes::REVIEW,
        ApplyError::DependencyResolution { .. } | ApplyError::Io(_) => exit_codes::FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["converge", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_apply_check_with_root() {
        let cli = Cli::parse_from(["converge", "apply", "--check", "--root", "/tmp/p"]);
        assert!(matches!(
            cli.command,
            Command::Apply {
                check: true,
                json: false
            }
        ));
        assert_eq!(cli.root, PathBuf::from("/tmp/p"));
    }

    #[test]
    fn errors_map_to_exit_codes() {
        assert_eq!(
            error_code(&ApplyError::Scheduling {
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            }),
            exit_codes::INVALID
        );
        assert_eq!(
            error_code(&ApplyError::ManualChanges { items: Vec::new() }),
            exit_codes::REVIEW
        );
        assert_eq!(
            error_code(&ApplyError::DependencyResolution {
                package: "demo".to_string(),
                dependency: "prettier".to_string(),
                feature: "prettier".to_string(),
                message: "offline".to_string(),
            }),
            exit_codes::FAILED
        );
    }
}
