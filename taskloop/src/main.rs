//! Autonomous task loop runner.
//!
//! Drives a task document (`PRD-*.md`) through rounds of an external worker
//! until its criteria checklist passes, it is marked blocked, or the
//! iteration budget runs out.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use taskloop::control;
use taskloop::core::partition::WorkerCount;
use taskloop::core::report::progress_bar;
use taskloop::exit_codes;
use taskloop::interactive::Session;
use taskloop::io::config::{DEFAULT_CONFIG_PATH, LoopConfig, load_config};
use taskloop::io::discovery::resolve_document_ref;
use taskloop::io::executor::CommandExecutor;
use taskloop::io::iteration_log::{RoundMode, RoundOutcome};
use taskloop::io::notify;
use taskloop::io::prompt::PromptEngine;
use taskloop::io::scaffold::{create_document, ensure_default_config};
use taskloop::io::snapshot::FileSnapshotStore;
use taskloop::logging;
use taskloop::looping::{Controller, RoundSummary, RunMode, RunOptions};

#[derive(Debug, Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Drive a task document to completion with an external worker"
)]
struct Cli {
    /// Config file (default: `.taskloop/config.toml` in the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the loop until the document completes, blocks, or exhausts its budget.
    Run {
        /// Document path, or a unique part of its file name.
        doc: String,
        /// Parallel workers per round (1-16).
        #[arg(short = 'a', long, default_value = "1")]
        workers: WorkerCount,
        /// Override the document's `max_iterations`.
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
        max_iterations: Option<u32>,
        /// Take over a document left `running` by a crashed run.
        #[arg(long)]
        force: bool,
    },
    /// Open one worker session on the document, attached to this terminal.
    Interactive { doc: String },
    /// Ask a running loop to pause after its current round.
    Pause { doc: String },
    /// Resume a paused loop.
    Resume {
        doc: String,
        #[arg(short = 'a', long, default_value = "1")]
        workers: WorkerCount,
    },
    /// Ask a loop to stop after its current round.
    Stop { doc: String },
    /// Show one document, or every document under the search roots.
    Status { doc: Option<String> },
    /// Create an empty task document.
    New {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "Standard")]
        effort: String,
        /// Target directory (default: working directory).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cwd = std::env::current_dir().context("resolve working directory")?;
    let config = resolve_config(cli.config.as_deref(), &cwd)?;
    let explicit_config = cli.config.is_some();

    match cli.command {
        Command::Run {
            doc,
            workers,
            max_iterations,
            force,
        } => {
            let options = RunOptions {
                workers,
                max_iterations,
                mode: RunMode::Fresh,
                force,
            };
            cmd_run(&config, &cwd, &doc, &options)
        }
        Command::Resume { doc, workers } => {
            let options = RunOptions {
                workers,
                mode: RunMode::Resume,
                ..RunOptions::default()
            };
            cmd_run(&config, &cwd, &doc, &options)
        }
        Command::Pause { doc } => {
            let path = resolve_document_ref(&doc, &cwd, &search_roots(&config, &cwd))?;
            let notifier = notify::from_config(&config.notify)?;
            let updated = control::pause(&path, notifier.as_ref())?;
            println!("⏸ Paused loop on {}", updated.frontmatter.id);
            println!("  Resume with: taskloop resume {}", path.display());
            Ok(exit_codes::OK)
        }
        Command::Stop { doc } => {
            let path = resolve_document_ref(&doc, &cwd, &search_roots(&config, &cwd))?;
            let notifier = notify::from_config(&config.notify)?;
            let updated = control::stop(&path, notifier.as_ref())?;
            println!("■ Stopped loop on {}", updated.frontmatter.id);
            Ok(exit_codes::OK)
        }
        Command::Interactive { doc } => cmd_interactive(&config, &cwd, &doc),
        Command::Status { doc } => cmd_status(&config, &cwd, doc.as_deref()),
        Command::New { title, effort, dir } => {
            let dir = dir.map_or_else(|| cwd.clone(), |d| cwd.join(d));
            let today = chrono::Local::now().date_naive();
            let path = create_document(&dir, &title, &effort, today)?;
            if !explicit_config {
                ensure_default_config(&cwd)?;
            }
            println!("{}", path.display());
            Ok(exit_codes::OK)
        }
    }
}

fn resolve_config(explicit: Option<&Path>, cwd: &Path) -> Result<LoopConfig> {
    let path = match explicit {
        Some(path) => {
            let path = cwd.join(path);
            if !path.is_file() {
                bail!("config file not found: {}", path.display());
            }
            path
        }
        None => cwd.join(DEFAULT_CONFIG_PATH),
    };
    Ok(load_config(&path)?.rooted_at(cwd))
}

/// Configured search roots, or the working directory when none are set.
fn search_roots(config: &LoopConfig, cwd: &Path) -> Vec<PathBuf> {
    if config.search_roots.is_empty() {
        vec![cwd.to_path_buf()]
    } else {
        config.search_roots.clone()
    }
}

fn cmd_run(config: &LoopConfig, cwd: &Path, doc: &str, options: &RunOptions) -> Result<i32> {
    let path = resolve_document_ref(doc, cwd, &search_roots(config, cwd))?;
    let executor = CommandExecutor::new(config.executor.clone());
    let store = FileSnapshotStore::new(config.state_dir.clone());
    let notifier = notify::from_config(&config.notify)?;
    let controller = Controller::new(config, &executor, &store, notifier.as_ref())?;

    println!("▶ Loop on {}", path.display());
    let outcome = controller.run(&path, options, |round| println!("{}", round_line(round)))?;

    println!(
        "{} {} {} after {} round(s), iteration {}/{}",
        outcome.outcome.label(),
        progress_bar(&outcome.summary),
        outcome.summary.ratio(),
        outcome.rounds,
        outcome.iteration,
        outcome.max_iterations,
    );
    println!("{}", outcome.message);
    Ok(exit_codes::for_outcome(outcome.outcome))
}

fn cmd_interactive(config: &LoopConfig, cwd: &Path, doc: &str) -> Result<i32> {
    let path = resolve_document_ref(doc, cwd, &search_roots(config, cwd))?;
    let executor = CommandExecutor::new(config.executor.clone());
    let notifier = notify::from_config(&config.notify)?;
    let session = Session::prepare(&path, &PromptEngine::new()?)?;

    println!("○ Interactive session on {}", session.title);
    println!("  Document: {}", session.path.display());
    println!("  Progress: {}", session.summary.ratio());
    println!("  Launching {}...", config.executor.program);
    let outcome = session.launch(&executor, notifier.as_ref())?;

    if let Some(summary) = &outcome.summary {
        println!("\n○ Session ended, {} criteria passing", summary.ratio());
    }
    Ok(match outcome.exit_code {
        Some(code) => code,
        None => exit_codes::INVALID,
    })
}

fn round_line(round: &RoundSummary) -> String {
    let mode = match round.mode {
        RoundMode::Sequential => "sequential".to_string(),
        RoundMode::Parallel => format!("parallel, {} workers", round.workers),
    };
    let note = match round.outcome {
        RoundOutcome::Ok => "",
        RoundOutcome::ExecutorFailed => ", executor failed",
        RoundOutcome::Degraded => ", degraded",
    };
    format!(
        "  iter {}/{} {} {} +{} ({mode}{note})",
        round.iteration,
        round.max_iterations,
        progress_bar(&round.summary),
        round.summary.ratio(),
        round.gained,
    )
}

fn cmd_status(config: &LoopConfig, cwd: &Path, doc: Option<&str>) -> Result<i32> {
    let roots = search_roots(config, cwd);
    match doc {
        Some(reference) => {
            let path = resolve_document_ref(reference, cwd, &roots)?;
            print!("{}", control::status(&path)?);
        }
        None => {
            let blocks = control::status_all(&roots);
            if blocks.is_empty() {
                println!("No task documents found under the search roots.");
            }
            for block in blocks {
                println!("{block}");
            }
        }
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use taskloop::core::types::CriteriaSummary;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_workers_budget_and_force() {
        let cli = Cli::try_parse_from(["taskloop", "run", "PRD-x.md", "-a", "4", "-n", "20", "--force"])
            .expect("parse");
        match cli.command {
            Command::Run {
                doc,
                workers,
                max_iterations,
                force,
            } => {
                assert_eq!(doc, "PRD-x.md");
                assert_eq!(workers.get(), 4);
                assert_eq!(max_iterations, Some(20));
                assert!(force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn worker_count_and_budget_are_bounded() {
        assert!(Cli::try_parse_from(["taskloop", "run", "x", "-a", "17"]).is_err());
        assert!(Cli::try_parse_from(["taskloop", "run", "x", "-a", "0"]).is_err());
        assert!(Cli::try_parse_from(["taskloop", "run", "x", "-n", "0"]).is_err());
    }

    #[test]
    fn interactive_takes_a_document() {
        let cli = Cli::try_parse_from(["taskloop", "interactive", "auth"]).expect("parse");
        assert!(matches!(cli.command, Command::Interactive { doc } if doc == "auth"));
        assert!(Cli::try_parse_from(["taskloop", "interactive"]).is_err());
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["taskloop", "status", "--config", "alt.toml"]).expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(cli.command, Command::Status { doc: None }));
    }

    #[test]
    fn round_line_shows_mode_and_gain() {
        let round = RoundSummary {
            iteration: 2,
            max_iterations: 10,
            mode: RoundMode::Parallel,
            workers: 3,
            summary: CriteriaSummary {
                total: 4,
                passing: 2,
                failing_ids: Vec::new(),
            },
            gained: 1,
            outcome: RoundOutcome::Degraded,
        };
        assert_eq!(
            round_line(&round),
            "  iter 2/10 [█████░░░░░] 2/4 +1 (parallel, 3 workers, degraded)"
        );
    }
}
