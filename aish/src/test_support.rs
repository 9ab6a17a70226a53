//! Test-only doubles for the suggestion source, the command runner, and the
//! Anthropic HTTP endpoint.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::Mutex;
use std::thread;

use anyhow::{Result, anyhow};

use crate::io::model::{SuggestRequest, SuggestionSource};
use crate::io::process::{CommandRunner, ExecutionResult};

/// Render a suggestion the way the model is asked to.
pub fn suggestion_json(command: &str, is_final: bool, needs_output: bool, safe: bool) -> String {
    serde_json::json!({
        "safe": safe,
        "command": command,
        "reason": format!("run {command}"),
        "is_final": is_final,
        "needs_output": needs_output,
    })
    .to_string()
}

/// Suggestion source that replays queued responses and records every request.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<SuggestRequest>>,
}

impl ScriptedSource {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A source whose next call fails like a transport error.
    pub fn failing(message: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(anyhow!(message.to_string()))])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SuggestRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl SuggestionSource for ScriptedSource {
    fn suggest(&self, request: &SuggestRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted source exhausted")))
    }
}

/// One scripted command execution.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub lines: Vec<String>,
    pub succeeded: bool,
}

impl ScriptedRun {
    pub fn ok(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            succeeded: true,
        }
    }

    pub fn failed(lines: &[&str]) -> Self {
        Self {
            succeeded: false,
            ..Self::ok(lines)
        }
    }
}

/// Command runner that replays queued executions and records the commands it
/// was asked to run.
#[derive(Default)]
pub struct ScriptedRunner {
    runs: Mutex<VecDeque<ScriptedRun>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command_text: &str, on_line: &mut dyn FnMut(&str)) -> Result<ExecutionResult> {
        self.commands
            .lock()
            .expect("commands lock")
            .push(command_text.to_string());
        let run = self
            .runs
            .lock()
            .expect("runs lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted runner exhausted"))?;

        let mut combined_output = String::new();
        for line in &run.lines {
            on_line(line);
            combined_output.push_str(line);
            combined_output.push('\n');
        }
        Ok(ExecutionResult {
            combined_output,
            succeeded: run.succeeded,
            failure_detail: (!run.succeeded).then(|| "command failed: exit status: 1".to_string()),
        })
    }
}

/// Minimal HTTP server standing in for the Anthropic Messages endpoint.
///
/// Answers one connection per queued reply, in order, then stops.
pub struct MockMessagesServer {
    pub url: String,
    handle: thread::JoinHandle<Vec<String>>,
}

/// A canned HTTP reply.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status_line: String,
    pub body: String,
    pub delay: std::time::Duration,
}

impl MockReply {
    /// `200 OK` whose single text block is `text`.
    pub fn text(text: &str) -> Self {
        let body = serde_json::json!({
            "content": [{"type": "text", "text": text}],
            "model": "mock",
            "stop_reason": "end_turn",
        });
        Self {
            status_line: "HTTP/1.1 200 OK".to_string(),
            body: body.to_string(),
            delay: std::time::Duration::ZERO,
        }
    }

    pub fn status(status_line: &str, body: &str) -> Self {
        Self {
            status_line: status_line.to_string(),
            body: body.to_string(),
            delay: std::time::Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl MockMessagesServer {
    pub fn start(replies: Vec<MockReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let url = format!(
            "http://{}/v1/messages",
            listener.local_addr().expect("mock server addr")
        );
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for reply in replies {
                let Ok((stream, _)) = listener.accept() else {
                    break;
                };
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
                let mut raw = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        break;
                    }
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:")
                    {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    raw.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }
                let mut body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut body);
                raw.push_str(&String::from_utf8_lossy(&body));
                seen.push(raw);

                thread::sleep(reply.delay);
                let response = format!(
                    "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    reply.status_line,
                    reply.body.len(),
                    reply.body
                );
                let mut stream = stream;
                let _ = stream.write_all(response.as_bytes());
            }
            seen
        });
        Self { url, handle }
    }

    /// Wait for the server to finish and return every raw request it received.
    pub fn finish(self) -> Vec<String> {
        self.handle.join().expect("mock server thread")
    }
}
