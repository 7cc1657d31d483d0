//! Generator/executor agent loop with human feedback between rounds.
//!
//! `pairloop run` asks a chat model for code, runs it in an interpreter, and
//! feeds the result back until the task is complete or the human stops.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use pairloop::controller::{SessionEvent, build_runtime, run_session};
use pairloop::core::types::{AgentId, Envelope};
use pairloop::exit_codes;
use pairloop::io::completion::{CompletionClient, OpenAiChatClient};
use pairloop::io::config::{PairloopConfig, config_path, load_config, write_config};
use pairloop::io::feedback::StdinFeedback;
use pairloop::io::runner::build_code_runner;
use pairloop::logging;

#[derive(Parser)]
#[command(
    name = "pairloop",
    version,
    about = "Generator/executor agent loop with human feedback"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session: solve TASK, then keep going with feedback from stdin.
    Run {
        /// Initial task; falls back to `agents.task` from the config.
        task: Option<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the first fenced code block read from stdin.
    Extract {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { task, config } => cmd_run(task, config.as_deref()).await,
        Command::Init { force, config } => cmd_init(force, config.as_deref()),
        Command::Extract { config } => cmd_extract(config.as_deref()),
    }
}

async fn cmd_run(task: Option<String>, config: Option<&Path>) -> Result<i32> {
    let config = load_config(&config_path(config))?;
    let task = task
        .or_else(|| config.agents.task.clone())
        .filter(|task| !task.trim().is_empty())
        .context("no task given (pass TASK or set agents.task in the config)")?;

    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiChatClient::from_config(&config.model)?);
    let runner = build_code_runner(&config.interpreter);
    let mut runtime = build_runtime(&config, client, runner)?;
    runtime.set_observer(print_envelope);

    let mut feedback = StdinFeedback::new();
    let detector = config.termination.condition();
    let outcome = run_session(
        &mut runtime,
        &mut feedback,
        &detector,
        &config.controller,
        &task,
        print_event,
    )
    .await?;

    println!(
        "Session ended after {} round(s) and {} message(s){}.",
        outcome.rounds,
        outcome.messages,
        if outcome.completed { ", task complete" } else { "" }
    );
    Ok(exit_codes::OK)
}

fn cmd_init(force: bool, config: Option<&Path>) -> Result<i32> {
    let path = config_path(config);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &PairloopConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_extract(config: Option<&Path>) -> Result<i32> {
    let config = load_config(&config_path(config))?;
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("read stdin")?;
    match config.agents.fence().extract(&text) {
        Some(code) => {
            println!("{code}");
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("no fenced code block found");
            Ok(exit_codes::NO_CODE)
        }
    }
}

fn print_envelope(envelope: &Envelope) {
    let sender = envelope.sender.as_ref().map_or("user", AgentId::as_str);
    println!("---------- {sender} ----------");
    println!("{}", envelope.message.content);
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Terminated { reason, .. } => println!("Terminated: {reason}"),
        SessionEvent::RoundFailed { round, error } => {
            eprintln!("round {round} failed: {error}");
        }
        SessionEvent::RoundFinished { .. } | SessionEvent::Exiting { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_task() {
        let cli = Cli::parse_from(["pairloop", "run", "compute the mean"]);
        assert!(matches!(
            cli.command,
            Command::Run { task: Some(ref task), config: None } if task == "compute the mean"
        ));
    }

    #[test]
    fn parse_init_force_with_config() {
        let cli = Cli::parse_from(["pairloop", "init", "--force", "--config", "x.toml"]);
        assert!(matches!(
            cli.command,
            Command::Init { force: true, config: Some(ref path) } if path == Path::new("x.toml")
        ));
    }

    #[test]
    fn parse_extract() {
        let cli = Cli::parse_from(["pairloop", "extract"]);
        assert!(matches!(cli.command, Command::Extract { config: None }));
    }
}
