//! The multi-turn interaction loop.
//!
//! A session alternates between asking the model for the next command and
//! running it:
//!
//! ```text
//! AwaitingSuggestion -> [Gating] -> Executing -> Deciding -> AwaitingSuggestion
//!                                                        \-> Terminated
//! ```
//!
//! Gating only happens for suggestions not marked safe. Suggestion-only mode
//! ends right after the first suggestion is shown. Every action is recorded in
//! the history log, whose tail is sent back to the model on the next turn.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::decision::{Decision, decide, fold_query};
use crate::core::suggestion::CommandSuggestion;
use crate::io::history::{HistoryEntry, HistoryLog, TailWindow};
use crate::io::model::{Fetched, SuggestRequest, SuggestionSource, fetch_suggestion};
use crate::io::process::{CommandRunner, ExecutionResult};

const SEPARATOR: &str =
    "-------------------------------------------------------------------------";

/// Whether suggestions are executed or only shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Execute,
    SuggestOnly,
}

/// Fixed inputs for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub mode: Mode,
    pub working_directory: PathBuf,
    pub files: Vec<String>,
    pub history_window: TailWindow,
    /// Stop before starting turn `max_turns + 1`. Unbounded when `None`.
    pub max_turns: Option<u32>,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStop {
    /// A final command ran.
    Completed,
    /// The user declined a command that needed confirmation.
    Cancelled { command: String },
    /// Suggestion-only mode showed its suggestion.
    Suggested(CommandSuggestion),
    /// `max_turns` turns ran without a final command.
    TurnLimit { max_turns: u32 },
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub turns: u32,
    pub stop: SessionStop,
}

/// Terminal streams the session talks to.
pub struct Terminal<'a> {
    pub output: &'a mut dyn Write,
    pub input: &'a mut dyn BufRead,
}

/// Working state of the loop. The session is running until the step
/// machine reaches `Terminated`.
#[derive(Debug, Clone)]
struct InteractionState {
    original_query: String,
    current_query: String,
    turn_count: u32,
}

enum Step {
    AwaitingSuggestion,
    Gating(CommandSuggestion),
    Executing(CommandSuggestion),
    Deciding(CommandSuggestion, ExecutionResult),
    Terminated(SessionStop),
}

/// Drive a session for `query` until it terminates.
///
/// Returns an error when a suggestion cannot be obtained or decoded, or when a
/// command cannot be started. A command that runs and fails is not an error.
#[instrument(skip_all, fields(mode = ?settings.mode))]
pub fn run_session<S, R>(
    query: &str,
    source: &S,
    runner: &R,
    log: &HistoryLog,
    settings: &SessionSettings,
    terminal: Terminal<'_>,
) -> Result<SessionOutcome>
where
    S: SuggestionSource + ?Sized,
    R: CommandRunner + ?Sized,
{
    let Terminal { output, input } = terminal;
    let mut state = InteractionState {
        original_query: query.to_string(),
        current_query: query.to_string(),
        turn_count: 0,
    };

    match settings.mode {
        Mode::Execute => log.record(HistoryEntry::info(format!("User Query: {query}"))),
        Mode::SuggestOnly => log.record(HistoryEntry::info(format!("Ask Mode: {query}"))),
    }

    let mut step = Step::AwaitingSuggestion;
    let stop = loop {
        step = match step {
            Step::AwaitingSuggestion => {
                if let Some(max_turns) = settings.max_turns
                    && state.turn_count >= max_turns
                {
                    warn!(max_turns, "turn limit reached");
                    log.record(HistoryEntry::info(format!(
                        "Stopping after {max_turns} turns without a final command"
                    )));
                    writeln!(
                        output,
                        "\nStopped after {max_turns} turns without a final command."
                    )?;
                    Step::Terminated(SessionStop::TurnLimit { max_turns })
                } else {
                    state.turn_count += 1;
                    let suggestion = await_suggestion(&state, source, log, settings, output)?;
                    match settings.mode {
                        Mode::SuggestOnly => {
                            present_suggestion(output, &suggestion)?;
                            Step::Terminated(SessionStop::Suggested(suggestion))
                        }
                        Mode::Execute => {
                            write_step_notice(output, &suggestion, "needs", "will")?;
                            if suggestion.safe_to_auto_run {
                                Step::Executing(suggestion)
                            } else {
                                Step::Gating(suggestion)
                            }
                        }
                    }
                }
            }
            Step::Gating(suggestion) => {
                if confirm(output, input, &suggestion)? {
                    Step::Executing(suggestion)
                } else {
                    writeln!(output, "Command execution cancelled by user.")?;
                    log.record(HistoryEntry::info("Command execution cancelled by user"));
                    Step::Terminated(SessionStop::Cancelled {
                        command: suggestion.command_text,
                    })
                }
            }
            Step::Executing(suggestion) => {
                let result = execute(&suggestion, runner, log, output)?;
                Step::Deciding(suggestion, result)
            }
            Step::Deciding(suggestion, result) => match decide(&suggestion) {
                Decision::Terminate => {
                    writeln!(output, "Task completed successfully!")?;
                    log.record(HistoryEntry::info("Task completed"));
                    Step::Terminated(SessionStop::Completed)
                }
                Decision::Continue(fold) => {
                    debug!(?fold, turn = state.turn_count, "continuing session");
                    state.current_query = fold_query(
                        fold,
                        &suggestion.command_text,
                        &result.combined_output,
                        &state.original_query,
                    );
                    writeln!(output, "\n--- Asking for next command... ---\n")?;
                    Step::AwaitingSuggestion
                }
            },
            Step::Terminated(stop) => break stop,
        };
    };

    info!(turns = state.turn_count, ?stop, "session finished");
    Ok(SessionOutcome {
        turns: state.turn_count,
        stop,
    })
}

/// Gather context, ask the model, and decode its answer.
fn await_suggestion<S: SuggestionSource + ?Sized>(
    state: &InteractionState,
    source: &S,
    log: &HistoryLog,
    settings: &SessionSettings,
    output: &mut dyn Write,
) -> Result<CommandSuggestion> {
    log.record(HistoryEntry::info("Asking for command suggestion..."));

    let history = match log.tail(settings.history_window) {
        Ok(history) => history,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "history unavailable");
            log.record(HistoryEntry::error(format!(
                "failed to get command history: {err:#}"
            )));
            String::new()
        }
    };

    let request = SuggestRequest {
        user_query: state.current_query.clone(),
        working_directory: settings.working_directory.clone(),
        files: settings.files.clone(),
        history,
    };

    let fetched = match fetch_suggestion(source, &request) {
        Ok(fetched) => fetched,
        Err(err) => {
            log.record(HistoryEntry::error(format!("{err:#}")));
            return Err(err);
        }
    };

    let suggestion = match fetched {
        Fetched::Suggestion(suggestion) => suggestion,
        Fetched::Malformed { raw, error } => {
            log.record(HistoryEntry::error(format!(
                "failed to parse model response: {raw}\nError: {error}"
            )));
            writeln!(output, "Raw model response: {raw}")?;
            return Err(error).context("failed to parse model response");
        }
    };

    log.record(HistoryEntry::info(format!(
        "Suggested Command: {}",
        suggestion.command_text
    )));
    log.record(HistoryEntry::info(format!("Reason: {}", suggestion.rationale)));
    log.record(HistoryEntry::info(format!(
        "Safe: {}",
        suggestion.safe_to_auto_run
    )));
    log.record(HistoryEntry::info(format!("Is Final: {}", suggestion.is_final)));
    log.record(HistoryEntry::info(format!(
        "Needs Output: {}",
        suggestion.needs_output_for_next_step
    )));
    Ok(suggestion)
}

fn present_suggestion(output: &mut dyn Write, suggestion: &CommandSuggestion) -> Result<()> {
    writeln!(output, "\nSuggested Command:")?;
    writeln!(output, "{}\n", suggestion.command_text)?;
    writeln!(output, "Reason: {}", suggestion.rationale)?;
    let safety = if suggestion.safe_to_auto_run {
        "Safe to run automatically"
    } else {
        "Requires approval (potentially unsafe)"
    };
    writeln!(output, "Safety: {safety}")?;
    write_step_notice(output, suggestion, "would need", "would")
}

fn write_step_notice(
    output: &mut dyn Write,
    suggestion: &CommandSuggestion,
    needs: &str,
    will: &str,
) -> Result<()> {
    if suggestion.is_final {
        writeln!(output, "\nThis is the final command to complete your request.")?;
    } else if suggestion.needs_output_for_next_step {
        writeln!(
            output,
            "\nThis is an intermediate command. The assistant {needs} to see its output to determine next steps."
        )?;
    } else {
        writeln!(
            output,
            "\nThis is part of a multi-step process. More commands {will} follow."
        )?;
    }
    Ok(())
}

/// Ask before running an unsafe command. Only `y`/`yes` confirm; EOF declines.
fn confirm(
    output: &mut dyn Write,
    input: &mut dyn BufRead,
    suggestion: &CommandSuggestion,
) -> Result<bool> {
    writeln!(output, "Caution: The command is marked as not safe.")?;
    writeln!(output, "Command: {}", suggestion.command_text)?;
    writeln!(output, "Reason: {}", suggestion.rationale)?;
    write!(output, "Do you want to run this command anyway? (y/n): ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer).context("read confirmation")?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Log the command, run it while mirroring lines to the terminal and the log,
/// and report a nonzero exit.
fn execute<R: CommandRunner + ?Sized>(
    suggestion: &CommandSuggestion,
    runner: &R,
    log: &HistoryLog,
    output: &mut dyn Write,
) -> Result<ExecutionResult> {
    writeln!(output, "\nExecuting command: {}", suggestion.command_text)?;
    writeln!(output, "{SEPARATOR}")?;
    output.flush()?;

    log.record(HistoryEntry::command(&suggestion.command_text));
    let result = runner.run(&suggestion.command_text, &mut |line| {
        let _ = writeln!(output, "{line}");
        log.record(HistoryEntry::output(line));
    });
    writeln!(output, "{SEPARATOR}")?;

    let result = match result {
        Ok(result) => result,
        Err(err) => {
            log.record(HistoryEntry::error(format!(
                "command execution failed: {err:#}"
            )));
            return Err(err).context("execute command");
        }
    };

    if let Some(detail) = &result.failure_detail {
        log.record(HistoryEntry::error(format!(
            "command execution failed: {detail}"
        )));
        writeln!(output, "Command execution error: {detail}")?;
    }
    Ok(result)
}
