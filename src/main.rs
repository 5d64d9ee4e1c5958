use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

mod logging;
mod scenario;

use scenario::Scenario;

/// Stepchain - declarative async step chains with shared forks
#[derive(Parser)]
#[command(name = "stepchain")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a scenario, reading the actionable item as JSON from stdin
  Run {
    /// Path to the scenario file (JSON)
    scenario_file: PathBuf,

    /// Print the report on a single line
    #[arg(long)]
    compact: bool,
  },
}

fn main() -> Result<()> {
  logging::init();
  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run {
      scenario_file,
      compact,
    }) => run_scenario(scenario_file, compact),
    None => {
      println!("stepchain - use --help to see available commands");
      Ok(())
    }
  }
}

fn run_scenario(scenario_file: PathBuf, compact: bool) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_scenario_async(scenario_file, compact).await })
}

async fn run_scenario_async(scenario_file: PathBuf, compact: bool) -> Result<()> {
  let def = scenario::load(&scenario_file).await?;
  eprintln!("Loaded scenario: {} ({} steps)", def.name, def.step_count());

  let payload = read_payload_from_stdin()?;
  eprintln!("Payload: {}", payload);

  let report = Scenario::build(&def).run(payload).await;

  let output = if compact {
    serde_json::to_string(&report)?
  } else {
    serde_json::to_string_pretty(&report)?
  };
  println!("{}", output);

  if report.root_failed() {
    bail!(
      "scenario '{}' failed: {}",
      report.scenario,
      report.error.as_deref().unwrap_or("unknown error")
    );
  }

  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
