//! 🚀 rflow-cli: the front door, the bouncer, the maitre d' of rflow.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Parses the subcommand, loads the request, runs one pass, writes the response
//! file no matter what, and exits 0 or 1. The real work lives in the library. 🦆

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Error;
use clap::{Args, Parser, Subcommand};
use rflow::app_config::{PipelineRequest, PublishRequest, load_request};
use rflow::response::write_response;
use rflow::{PipelineOutcome, PipelineState};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rflow", about = "🚰 build results in, analytics rows out")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📣 Publish one build id to a topic.
    Publish(Io),
    /// 🗺️ One pass of the plan pipeline.
    PlanPipe(Io),
    /// 🏃 One pass of the runner pipeline.
    RunnerPipe(Io),
}

#[derive(Debug, Args)]
struct Io {
    /// 📥 Request file (JSON).
    #[arg(long = "input-json", alias = "input_json")]
    input_json: PathBuf,
    /// 📝 Where the `{"state": ...}` response goes.
    #[arg(long = "output-json", alias = "output_json")]
    output_json: PathBuf,
}

impl Command {
    fn io(&self) -> &Io {
        match self {
            Command::Publish(io) | Command::PlanPipe(io) | Command::RunnerPipe(io) => io,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Publish(_) => "publish",
            Command::PlanPipe(_) => "plan-pipe",
            Command::RunnerPipe(_) => "runner-pipe",
        }
    }
}

/// 🔤 `-input_json` and `-output_json` are how the callers have always spelled it.
/// Clap wants two dashes, so rewrite those two before parsing. `-flag=value` too.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            for flag in ["input_json", "output_json"] {
                let single = format!("-{flag}");
                if text == single || text.starts_with(&format!("{single}=")) {
                    return OsString::from(format!("-{text}"));
                }
            }
            arg
        })
        .collect()
}

/// 🔎 Where the response goes, dug out of arguments clap already rejected.
fn output_path(args: &[OsString]) -> Option<PathBuf> {
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str() else {
            continue;
        };
        for flag in ["--output-json", "--output_json"] {
            if text == flag {
                return args.next().map(PathBuf::from);
            }
            if let Some(value) = text.strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
                return Some(PathBuf::from(value));
            }
        }
    }
    None
}

/// 🚪 Bad arguments still leave a FAILED response behind, when we can tell where it goes.
async fn refuse(args: &[OsString]) -> anyhow::Result<Option<PathBuf>> {
    let Some(output) = output_path(args) else {
        return Ok(None);
    };
    write_response(&output, PipelineState::Failed).await?;
    Ok(Some(output))
}

fn load<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PipelineOutcome> {
    load_request(path).map_err(PipelineOutcome::from_error)
}

async fn run(command: &Command) -> PipelineOutcome {
    let io = command.io();
    match command {
        Command::Publish(_) => match load::<PublishRequest>(&io.input_json) {
            Ok(request) => rflow::run_publish(request).await,
            Err(outcome) => outcome,
        },
        Command::PlanPipe(_) => match load::<PipelineRequest>(&io.input_json) {
            Ok(request) => rflow::run_plan_pipe(request).await,
            Err(outcome) => outcome,
        },
        Command::RunnerPipe(_) => match load::<PipelineRequest>(&io.input_json) {
            Ok(request) => rflow::run_runner_pipe(request).await,
            Err(outcome) => outcome,
        },
    }
}

/// 📝 Write the response, then fold a write failure into the outcome's error.
async fn finish(command: &Command, outcome: PipelineOutcome) -> Option<Error> {
    let written = write_response(&command.io().output_json, outcome.state).await;
    match (outcome.error, written) {
        (Some(err), _) => Some(err),
        (None, Err(err)) => Some(err),
        (None, Ok(())) => None,
    }
}

#[tokio::main]
async fn main() {
    // 📡 logs to stderr, so stdout stays clean for whoever is piping us
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = normalize_args(std::env::args_os());
    let cli = match Cli::try_parse_from(args.clone()) {
        Ok(cli) => cli,
        // -- 📖 --help and --version are not failures
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            if let Err(write_err) = refuse(&args).await {
                debug!("⚠️  couldn't write the response either: {write_err:#}");
            }
            let rendered = err.to_string();
            let reason = rendered.lines().next().unwrap_or_default();
            eprintln!("rflow FAILED: {}", reason.trim_start_matches("error: "));
            std::process::exit(1);
        }
    };
    let outcome = run(&cli.command).await;
    let state = outcome.state;

    if let Some(err) = finish(&cli.command, outcome).await {
        // -- 🧅 peel the onion for whoever turned the logs up
        for cause in err.chain().skip(1) {
            debug!("⚠️  cause: {cause}");
        }
        let state = match state {
            PipelineState::Succeeded => "SUCCEEDED",
            PipelineState::Failed => "FAILED",
            PipelineState::TimedOut => "TIMED_OUT",
        };
        eprintln!("rflow {} {state}: {err:#}", cli.command.name());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn the_one_where_go_style_flags_get_a_second_dash() {
        let normalized = normalize_args(os(&[
            "rflow",
            "plan-pipe",
            "-input_json",
            "in.json",
            "-output_json=out.json",
        ]));
        assert_eq!(
            normalized,
            os(&["rflow", "plan-pipe", "--input_json", "in.json", "--output_json=out.json"])
        );
    }

    #[test]
    fn the_one_where_both_spellings_parse() -> anyhow::Result<()> {
        for args in [
            os(&["rflow", "runner-pipe", "-input_json", "a", "-output_json", "b"]),
            os(&["rflow", "runner-pipe", "--input-json", "a", "--output-json", "b"]),
        ] {
            let cli = Cli::try_parse_from(normalize_args(args))?;
            assert!(matches!(cli.command, Command::RunnerPipe(_)));
            assert_eq!(cli.command.io().input_json, PathBuf::from("a"));
            assert_eq!(cli.command.io().output_json, PathBuf::from("b"));
        }
        Ok(())
    }

    #[test]
    fn the_one_where_the_output_path_survives_a_bad_command_line() {
        assert_eq!(
            output_path(&os(&["rflow", "plan-pipe", "--output_json", "out.json", "--bogus"])),
            Some(PathBuf::from("out.json"))
        );
        assert_eq!(
            output_path(&os(&["rflow", "--output-json=o.json"])),
            Some(PathBuf::from("o.json"))
        );
        assert_eq!(output_path(&os(&["rflow", "plan-pipe", "--output_json"])), None);
        assert_eq!(output_path(&os(&["rflow", "plan-pipe"])), None);
    }

    #[tokio::test]
    async fn the_one_where_bad_arguments_still_leave_a_failed_response() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.json");
        let output_arg = output.to_string_lossy().into_owned();
        // 🙅 no -input_json at all
        let args = normalize_args(os(&["rflow", "plan-pipe", "-output_json", &output_arg]));
        let err = Cli::try_parse_from(args.clone()).unwrap_err();
        assert!(err.use_stderr());

        assert_eq!(refuse(&args).await?, Some(output.clone()));
        let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&output)?)?;
        assert_eq!(written["state"], "FAILED");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_missing_request_still_writes_a_response() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.json");
        let command = Command::Publish(Io {
            input_json: dir.path().join("nope.json"),
            output_json: output.clone(),
        });

        let outcome = run(&command).await;
        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(finish(&command, outcome).await.is_some());

        let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&output)?)?;
        assert_eq!(written["state"], "FAILED");
        Ok(())
    }
}
