//! Child process helpers: the streaming shell executor and a deadline-bound
//! runner for helper CLIs such as `aws`.

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Outcome of one streamed command.
///
/// `combined_output` holds every stdout and stderr line in arrival order within
/// each stream; the interleaving between the two streams is whatever the
/// scheduler produced. Partial output is kept when the command fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub combined_output: String,
    pub succeeded: bool,
    /// Exit condition when `succeeded` is false (e.g. `exit status: 2`).
    pub failure_detail: Option<String>,
}

impl ExecutionResult {
    fn from_status(combined_output: String, status: ExitStatus) -> Self {
        if status.success() {
            Self {
                combined_output,
                succeeded: true,
                failure_detail: None,
            }
        } else {
            Self {
                combined_output,
                succeeded: false,
                failure_detail: Some(format!("command failed: {status}")),
            }
        }
    }
}

/// Abstraction over shell command execution.
///
/// Implementations call `on_line` once per output line, without the line
/// terminator, as lines become available. An `Err` means the command could not
/// be started or its pipes failed; a command that ran and exited nonzero is an
/// `Ok` with `succeeded == false`.
pub trait CommandRunner {
    fn run(&self, command_text: &str, on_line: &mut dyn FnMut(&str)) -> Result<ExecutionResult>;
}

/// Runs command text through a system shell (`<shell> -c <text>`).
///
/// The text is passed through verbatim; callers must not hand it untrusted input.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: PathBuf,
    workdir: Option<PathBuf>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("bash")
    }
}

impl ShellRunner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command_text: &str, on_line: &mut dyn FnMut(&str)) -> Result<ExecutionResult> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command_text);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        run_streaming(cmd, on_line)
    }
}

/// Run `cmd`, forwarding each stdout/stderr line to `on_line` while it runs.
///
/// One reader thread drains each pipe and sends lines over a channel; the
/// calling thread forwards and captures them. The channel only closes after
/// both readers hit EOF, and the exit status is consulted after that, so no
/// buffered output is lost. The child is always reaped before returning.
#[instrument(skip_all)]
pub fn run_streaming(mut cmd: Command, on_line: &mut dyn FnMut(&str)) -> Result<ExecutionResult> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<io::Result<String>>();
    let stdout_tx = tx.clone();
    let stdout_handle = thread::spawn(move || drain_lines(stdout, stdout_tx));
    let stderr_handle = thread::spawn(move || drain_lines(stderr, tx));

    let mut combined_output = String::new();
    let mut read_error = None;
    for message in rx {
        match message {
            Ok(line) => {
                on_line(&line);
                combined_output.push_str(&line);
                combined_output.push('\n');
            }
            Err(err) => {
                // A pipe nobody reads can block the child forever; stop it.
                warn!(err = %err, "reading command output failed, killing command");
                if let Err(kill_err) = child.kill() {
                    warn!(err = %kill_err, "failed to kill command");
                }
                read_error.get_or_insert(err);
            }
        }
    }

    let stdout_lines = join_reader(stdout_handle);
    let stderr_lines = join_reader(stderr_handle);
    let status = child.wait().context("wait for command")?;
    let stdout_lines = stdout_lines.context("drain stdout")?;
    let stderr_lines = stderr_lines.context("drain stderr")?;
    if let Some(err) = read_error {
        return Err(err).context("read command output");
    }

    debug!(
        exit_code = ?status.code(),
        stdout_lines,
        stderr_lines,
        "command finished"
    );
    Ok(ExecutionResult::from_status(combined_output, status))
}

/// Read `reader` line by line until EOF, sending each line without its
/// terminator. A read error is sent as the last message.
fn drain_lines<R: Read>(reader: R, tx: Sender<io::Result<String>>) -> usize {
    let mut reader = BufReader::new(reader);
    let mut count = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = match reader.read_until(b'\n', &mut buf) {
            Ok(n) => n,
            Err(err) => {
                let _ = tx.send(Err(err));
                return count;
            }
        };
        if n == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        count += 1;
        if tx.send(Ok(String::from_utf8_lossy(&buf).into_owned())).is_err() {
            // Receiver gone: keep draining so the child never blocks on a full pipe.
            warn!("line receiver dropped");
        }
    }

    count
}

fn join_reader<T>(handle: thread::JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))
}

/// Bytes of each stream kept from a helper CLI; the rest is read and dropped.
pub const HELPER_OUTPUT_LIMIT_BYTES: u64 = 64 * 1024;

/// Captured result of a helper CLI run under a deadline.
#[derive(Debug)]
pub struct HelperOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Run a non-interactive helper CLI (stdin closed) until it exits or `timeout`
/// passes, in which case it is killed and reaped and `timed_out` is set.
///
/// Both pipes are drained on their own threads while the child runs, keeping
/// at most [`HELPER_OUTPUT_LIMIT_BYTES`] of each.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
pub fn run_with_deadline(mut cmd: Command, timeout: Duration) -> Result<HelperOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn helper");
            return Err(e).context("spawn command");
        }
    };
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || capture_bounded(stdout));
    let stderr_handle = thread::spawn(move || capture_bounded(stderr));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "helper timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let stdout = join_reader(stdout_handle)?.context("capture stdout")?;
    let stderr = join_reader(stderr_handle)?.context("capture stderr")?;
    debug!(exit_code = ?status.code(), timed_out, "helper finished");
    Ok(HelperOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn capture_bounded<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(reader);
    let mut kept = Vec::new();
    (&mut reader)
        .take(HELPER_OUTPUT_LIMIT_BYTES)
        .read_to_end(&mut kept)?;
    io::copy(&mut reader, &mut io::sink())?;
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn run_shell(script: &str) -> (ExecutionResult, Vec<String>) {
        let mut lines = Vec::new();
        let result = ShellRunner::new("sh")
            .run(script, &mut |line| lines.push(line.to_string()))
            .expect("run");
        (result, lines)
    }

    #[test]
    fn forwards_every_line_in_per_stream_order() {
        let (result, lines) = run_shell(
            "for i in 1 2 3 4 5; do echo out-$i; echo err-$i >&2; done",
        );

        assert!(result.succeeded);
        assert_eq!(result.failure_detail, None);
        assert_eq!(lines.len(), 10);

        let stdout: Vec<&str> = lines
            .iter()
            .map(String::as_str)
            .filter(|l| l.starts_with("out-"))
            .collect();
        let stderr: Vec<&str> = lines
            .iter()
            .map(String::as_str)
            .filter(|l| l.starts_with("err-"))
            .collect();
        assert_eq!(stdout, vec!["out-1", "out-2", "out-3", "out-4", "out-5"]);
        assert_eq!(stderr, vec!["err-1", "err-2", "err-3", "err-4", "err-5"]);

        let captured: Vec<&str> = result.combined_output.lines().collect();
        assert_eq!(captured, lines);
    }

    #[test]
    fn nonzero_exit_keeps_partial_output() {
        let (result, lines) = run_shell("echo partial; echo oops >&2; exit 3");

        assert!(!result.succeeded);
        let detail = result.failure_detail.expect("failure detail");
        assert!(detail.contains('3'), "unexpected detail: {detail}");
        assert_eq!(lines.len(), 2);
        assert_eq!(result.combined_output.len(), "partial\noops\n".len());
        assert!(result.combined_output.contains("partial\n"));
        assert!(result.combined_output.contains("oops\n"));
    }

    #[test]
    fn unterminated_last_line_is_still_a_line() {
        let (result, lines) = run_shell("printf 'a\\r\\nb'");
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(result.combined_output, "a\nb\n");
    }

    #[test]
    fn silent_command_returns_empty_output() {
        let (result, lines) = run_shell("true");
        assert!(result.succeeded);
        assert!(lines.is_empty());
        assert!(result.combined_output.is_empty());
    }

    #[test]
    fn lines_are_forwarded_before_the_process_exits() {
        let start = Instant::now();
        let mut first_line_at = None;
        let result = ShellRunner::new("sh")
            .run("echo first; sleep 1; echo second", &mut |_| {
                first_line_at.get_or_insert_with(|| start.elapsed());
            })
            .expect("run");
        let finished_at = start.elapsed();

        assert!(result.succeeded);
        let first_line_at = first_line_at.expect("saw a line");
        assert!(
            first_line_at + Duration::from_millis(500) < finished_at,
            "first line at {first_line_at:?}, finished at {finished_at:?}"
        );
    }

    #[test]
    fn missing_interpreter_is_an_error() {
        let err = ShellRunner::new("/nonexistent/shell")
            .run("echo hi", &mut |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }

    #[test]
    fn runs_in_configured_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "").expect("write");
        let mut lines = Vec::new();
        ShellRunner::new("sh")
            .with_workdir(temp.path())
            .run("ls", &mut |line| lines.push(line.to_string()))
            .expect("run");
        assert_eq!(lines, vec!["marker.txt"]);
    }

    #[test]
    fn timeout_kills_slow_helper() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exec sleep 5");
        let started = Instant::now();
        let output = run_with_deadline(cmd, Duration::from_millis(200)).expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn helper_output_is_capped_but_fully_drained() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("head -c 200000 /dev/zero; echo done >&2");
        let output = run_with_deadline(cmd, Duration::from_secs(10)).expect("run");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(output.stdout.len() as u64, HELPER_OUTPUT_LIMIT_BYTES);
        assert_eq!(output.stderr, b"done\n");
    }

    /// Yields one line, then fails.
    struct BrokenPipe {
        served: bool,
    }

    impl Read for BrokenPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("pipe broke"));
            }
            self.served = true;
            buf[..6].copy_from_slice(b"first\n");
            Ok(6)
        }
    }

    #[test]
    fn read_error_is_reported_after_earlier_lines() {
        let (tx, rx) = mpsc::channel();
        let count = drain_lines(BrokenPipe { served: false }, tx);
        let messages: Vec<io::Result<String>> = rx.into_iter().collect();

        assert_eq!(count, 1);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].as_ref().expect("line"), "first");
        let err = messages[1].as_ref().unwrap_err();
        assert_eq!(err.to_string(), "pipe broke");
    }
}
