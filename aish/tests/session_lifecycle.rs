//! Session-level tests that run real shell commands.
//!
//! The model is scripted; commands go through `ShellRunner` so output
//! streaming, history logging and query folding are exercised end to end.

#![cfg(unix)]

use std::io::Cursor;

use aish::io::history::{HistoryLog, TailWindow};
use aish::io::process::ShellRunner;
use aish::session::{Mode, SessionSettings, SessionStop, Terminal, run_session};
use aish::test_support::{ScriptedSource, suggestion_json};

struct Workspace {
    temp: tempfile::TempDir,
    log: HistoryLog,
}

impl Workspace {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = HistoryLog::open(temp.path().join("home").join("action.log")).expect("open log");
        std::fs::create_dir(temp.path().join("work")).expect("workdir");
        Self { temp, log }
    }

    fn workdir(&self) -> std::path::PathBuf {
        self.temp.path().join("work")
    }

    fn settings(&self, mode: Mode) -> SessionSettings {
        SessionSettings {
            mode,
            working_directory: self.workdir(),
            files: Vec::new(),
            history_window: TailWindow {
                max_bytes: 5 * 1024,
                max_lines: 50,
            },
            max_turns: None,
        }
    }

    fn runner(&self) -> ShellRunner {
        ShellRunner::new("sh").with_workdir(self.workdir())
    }

    fn log_text(&self) -> String {
        std::fs::read_to_string(self.log.path()).expect("read log")
    }
}

#[test]
fn single_final_command_streams_output_and_logs_it() {
    let ws = Workspace::new();
    let source = ScriptedSource::new(vec![suggestion_json("echo hi", true, false, true)]);
    let mut out = Vec::new();
    let mut input = Cursor::new(Vec::new());

    let outcome = run_session(
        "say hi",
        &source,
        &ws.runner(),
        &ws.log,
        &ws.settings(Mode::Execute),
        Terminal {
            output: &mut out,
            input: &mut input,
        },
    )
    .expect("session");

    assert_eq!(outcome.stop, SessionStop::Completed);
    assert_eq!(outcome.turns, 1);

    let console = String::from_utf8(out).expect("utf8");
    assert!(console.contains("Executing command: echo hi"));
    assert!(console.contains("\nhi\n"));

    let log = ws.log_text();
    assert!(log.contains("Info: User Query: say hi"));
    assert!(log.contains("] Command: echo hi\nhi\n"));
}

#[test]
fn listing_output_is_fed_into_the_second_turn() {
    let ws = Workspace::new();
    std::fs::write(ws.workdir().join("a.tmp"), "").expect("a.tmp");
    std::fs::write(ws.workdir().join("b.txt"), "").expect("b.txt");

    let source = ScriptedSource::new(vec![
        suggestion_json("ls", false, true, true),
        suggestion_json("rm a.tmp", true, false, true),
    ]);
    let mut out = Vec::new();
    let mut input = Cursor::new(Vec::new());

    let outcome = run_session(
        "delete the temp files",
        &source,
        &ws.runner(),
        &ws.log,
        &ws.settings(Mode::Execute),
        Terminal {
            output: &mut out,
            input: &mut input,
        },
    )
    .expect("session");

    assert_eq!(outcome.turns, 2);
    assert!(!ws.workdir().join("a.tmp").exists());
    assert!(ws.workdir().join("b.txt").exists());

    let requests = source.requests();
    let second = &requests[1].user_query;
    assert!(second.starts_with("I ran the command 'ls' and got the output:\na.tmp\nb.txt\n"));
    assert!(second.ends_with("original request: delete the temp files"));
    assert!(requests[1].history.contains("Command: ls\na.tmp\nb.txt\n"));
}

#[test]
fn declined_command_leaves_no_trace_of_execution() {
    let ws = Workspace::new();
    let marker = ws.workdir().join("marker");
    std::fs::write(&marker, "keep").expect("marker");

    let source = ScriptedSource::new(vec![suggestion_json("rm marker", true, false, false)]);
    let mut out = Vec::new();
    let mut input = Cursor::new(b"n\n".to_vec());

    let outcome = run_session(
        "remove the marker",
        &source,
        &ws.runner(),
        &ws.log,
        &ws.settings(Mode::Execute),
        Terminal {
            output: &mut out,
            input: &mut input,
        },
    )
    .expect("session");

    assert!(matches!(outcome.stop, SessionStop::Cancelled { .. }));
    assert!(marker.exists());
    let log = ws.log_text();
    assert!(!log.contains("] Command: "));
    assert!(log.contains("Command execution cancelled by user"));
}

#[test]
fn failing_command_output_and_status_reach_the_next_turn() {
    let ws = Workspace::new();
    let source = ScriptedSource::new(vec![
        suggestion_json("echo partial; echo oops >&2; exit 3", false, true, true),
        suggestion_json("true", true, false, true),
    ]);
    let mut out = Vec::new();
    let mut input = Cursor::new(Vec::new());

    let outcome = run_session(
        "try something",
        &source,
        &ws.runner(),
        &ws.log,
        &ws.settings(Mode::Execute),
        Terminal {
            output: &mut out,
            input: &mut input,
        },
    )
    .expect("session");

    assert_eq!(outcome.stop, SessionStop::Completed);
    let second = &source.requests()[1].user_query;
    assert!(second.contains("partial"));
    assert!(second.contains("oops"));
    assert!(ws.log_text().contains("Error: command execution failed"));
}

#[test]
fn malformed_response_stops_before_anything_runs() {
    let ws = Workspace::new();
    let source = ScriptedSource::new(vec!["```json\n{\"command\": \"ls\"\n```".to_string()]);
    let mut out = Vec::new();
    let mut input = Cursor::new(Vec::new());

    let err = run_session(
        "list",
        &source,
        &ws.runner(),
        &ws.log,
        &ws.settings(Mode::Execute),
        Terminal {
            output: &mut out,
            input: &mut input,
        },
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains("failed to parse model response"));
    let log = ws.log_text();
    assert!(!log.contains("] Command: "));
    assert!(log.contains("Error: failed to parse model response"));
}
