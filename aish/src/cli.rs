//! Command-line entry point shared by the `ai` and `ask` binaries.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use tracing::{debug, warn};

use crate::exit_codes;
use crate::io::backend::connect_backend;
use crate::io::config::{AppPaths, load_app_config};
use crate::io::history::{HistoryLog, TailWindow};
use crate::io::inventory::list_files;
use crate::io::process::ShellRunner;
use crate::logging;
use crate::session::{Mode, SessionSettings, SessionStop, Terminal, run_session};

const AI_PROGRAM: &str = "ai";
/// Program name that selects suggestion-only mode.
const ASK_PROGRAM: &str = "ask";

#[derive(Parser, Debug)]
#[command(
    name = "ai",
    version,
    about = "Turn a plain-language request into shell commands and run them"
)]
pub struct Cli {
    /// What you want done, e.g. `ai find all large log files`.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub query: Vec<String>,
}

/// Parse `args`, run one session, and return the process exit code.
///
/// `default_mode` applies unless the program was invoked as `ask`.
pub fn run<I>(args: I, default_mode: Mode) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let mode = args
        .first()
        .map_or(default_mode, |argv0| mode_for_program(Path::new(argv0), default_mode));

    let cli = match parse_args(&args, mode) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
        }
    };

    logging::init();
    let query = cli.query.join(" ");
    match run_query(&query, mode) {
        Ok(stop) => exit_code_for(&stop),
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}

/// Parse `args`, naming the program after `mode` in help and usage output.
pub fn parse_args(args: &[OsString], mode: Mode) -> Result<Cli, clap::Error> {
    let name = match mode {
        Mode::Execute => AI_PROGRAM,
        Mode::SuggestOnly => ASK_PROGRAM,
    };
    let matches = Cli::command()
        .name(name)
        .bin_name(name)
        .try_get_matches_from(args)?;
    Cli::from_arg_matches(&matches)
}

/// `ask` (or any path ending in it) means suggestion-only.
pub fn mode_for_program(argv0: &Path, default_mode: Mode) -> Mode {
    match argv0.file_stem().and_then(|stem| stem.to_str()) {
        Some(ASK_PROGRAM) => Mode::SuggestOnly,
        _ => default_mode,
    }
}

pub fn exit_code_for(stop: &SessionStop) -> i32 {
    match stop {
        SessionStop::Completed | SessionStop::Cancelled { .. } | SessionStop::Suggested(_) => {
            exit_codes::OK
        }
        SessionStop::TurnLimit { .. } => exit_codes::TURN_LIMIT,
    }
}

fn run_query(query: &str, mode: Mode) -> Result<SessionStop> {
    let paths = AppPaths::discover()?;
    let log = HistoryLog::open(&paths.log_path).context("failed to open log file")?;

    let result = run_with_log(query, mode, &paths, &log);
    if let Err(err) = log.close() {
        warn!(err = %format!("{err:#}"), "failed to close history log");
    }
    result
}

fn run_with_log(query: &str, mode: Mode, paths: &AppPaths, log: &HistoryLog) -> Result<SessionStop> {
    let cfg = load_app_config(&paths.config_path)?;
    let working_directory = std::env::current_dir().context("get current directory")?;
    let files = list_files(&working_directory, cfg.max_files);
    debug!(files = files.len(), dir = %working_directory.display(), "collected file inventory");

    let (kind, source) = connect_backend(paths, &cfg, log)?;
    debug!(backend = kind.as_str(), "backend ready");

    let settings = SessionSettings {
        mode,
        working_directory,
        files,
        history_window: TailWindow {
            max_bytes: cfg.history.max_bytes,
            max_lines: cfg.history.max_lines,
        },
        max_turns: cfg.max_turns,
    };

    let runner = ShellRunner::default();
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    let outcome = run_session(
        query,
        source.as_ref(),
        &runner,
        log,
        &settings,
        Terminal {
            output: &mut output,
            input: &mut input,
        },
    )?;
    Ok(outcome.stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::suggestion::CommandSuggestion;

    #[test]
    fn joins_trailing_words_into_one_query() {
        let cli = Cli::parse_from(["ai", "list", "files", "--sorted", "by", "size"]);
        assert_eq!(cli.query.join(" "), "list files --sorted by size");
    }

    #[test]
    fn missing_query_is_a_usage_error() {
        let err = Cli::try_parse_from(["ai"]).unwrap_err();
        assert!(err.use_stderr());
        assert_eq!(run(["ai".into()], Mode::Execute), exit_codes::INVALID);
    }

    #[test]
    fn usage_names_the_invoked_program() {
        let ask = parse_args(&["/usr/bin/ask".into()], Mode::SuggestOnly).unwrap_err();
        let rendered = ask.render().to_string();
        assert!(rendered.contains("Usage: ask"), "unexpected usage: {rendered}");

        let ai = parse_args(&["ai".into()], Mode::Execute).unwrap_err();
        assert!(ai.render().to_string().contains("Usage: ai"));
    }

    #[test]
    fn ask_program_name_selects_suggest_only() {
        assert_eq!(
            mode_for_program(Path::new("/usr/local/bin/ask"), Mode::Execute),
            Mode::SuggestOnly
        );
        assert_eq!(
            mode_for_program(Path::new("ask.exe"), Mode::Execute),
            Mode::SuggestOnly
        );
        assert_eq!(
            mode_for_program(Path::new("ai"), Mode::Execute),
            Mode::Execute
        );
        assert_eq!(
            mode_for_program(Path::new("asking"), Mode::Execute),
            Mode::Execute
        );
    }

    #[test]
    fn only_turn_limit_maps_to_nonzero_exit() {
        let suggestion = CommandSuggestion {
            command_text: "ls".to_string(),
            rationale: "list".to_string(),
            is_final: true,
            needs_output_for_next_step: false,
            safe_to_auto_run: true,
        };
        assert_eq!(exit_code_for(&SessionStop::Completed), exit_codes::OK);
        assert_eq!(
            exit_code_for(&SessionStop::Cancelled {
                command: "rm x".to_string()
            }),
            exit_codes::OK
        );
        assert_eq!(
            exit_code_for(&SessionStop::Suggested(suggestion)),
            exit_codes::OK
        );
        assert_eq!(
            exit_code_for(&SessionStop::TurnLimit { max_turns: 3 }),
            exit_codes::TURN_LIMIT
        );
    }
}
