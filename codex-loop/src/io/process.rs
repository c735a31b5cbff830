//! Child process plumbing: prompt on stdin, concurrent line readers, heartbeat wait.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Run `cmd`, feed it `input`, and hand every stdout/stderr line to the callbacks.
///
/// Both streams are drained by their own scoped thread, so the callbacks may
/// borrow caller state. The prompt is written only once both readers are
/// running. While waiting, `on_heartbeat` fires every `heartbeat` with the
/// elapsed time. Lines are decoded lossily and passed without the line ending.
#[instrument(skip_all, fields(heartbeat_secs = heartbeat.map(|d| d.as_secs())))]
pub fn run_streaming<O, E, H>(
    mut cmd: Command,
    input: &[u8],
    mut on_stdout: O,
    mut on_stderr: E,
    heartbeat: Option<Duration>,
    on_heartbeat: H,
) -> Result<ExitStatus>
where
    O: FnMut(&str) + Send,
    E: FnMut(&str) + Send,
    H: FnMut(Duration),
{
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = spawn(&mut cmd)?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    thread::scope(|scope| {
        let stdout_handle = scope.spawn(move || read_lines(stdout, &mut on_stdout));
        let stderr_handle = scope.spawn(move || read_lines(stderr, &mut on_stderr));

        if let Err(err) = write_input(stdin, input) {
            error!(err = %err, "failed to write prompt, killing child");
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }

        let status = wait_with_heartbeat(&mut child, heartbeat, on_heartbeat)?;
        join_reader(stdout_handle).context("read stdout")?;
        join_reader(stderr_handle).context("read stderr")?;
        debug!(exit_code = ?status.code(), "command finished");
        Ok(status)
    })
}

/// Run `cmd` with its output discarded, still honoring the heartbeat.
#[instrument(skip_all)]
pub fn run_silent<H>(
    mut cmd: Command,
    input: &[u8],
    heartbeat: Option<Duration>,
    on_heartbeat: H,
) -> Result<ExitStatus>
where
    H: FnMut(Duration),
{
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let mut child = spawn(&mut cmd)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    if let Err(err) = write_input(stdin, input) {
        let _ = child.kill();
        let _ = child.wait();
        return Err(err);
    }
    let status = wait_with_heartbeat(&mut child, heartbeat, on_heartbeat)?;
    debug!(exit_code = ?status.code(), "command finished");
    Ok(status)
}

/// Block until `child` exits, calling `on_heartbeat(elapsed)` once per interval.
///
/// A missing or zero interval waits without heartbeats.
pub fn wait_with_heartbeat<H>(
    child: &mut Child,
    heartbeat: Option<Duration>,
    mut on_heartbeat: H,
) -> Result<ExitStatus>
where
    H: FnMut(Duration),
{
    let Some(interval) = heartbeat.filter(|d| !d.is_zero()) else {
        return child.wait().context("wait for command");
    };
    let started = Instant::now();
    loop {
        if let Some(status) = child.wait_timeout(interval).context("wait for command")? {
            return Ok(status);
        }
        on_heartbeat(started.elapsed());
    }
}

/// Captured output of a short helper command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

/// Run a short helper command (no stdin) and capture its stdout, killing it after `timeout`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(mut cmd: Command, timeout: Duration) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    let mut child = spawn(&mut cmd)?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;

    let reader = thread::spawn(move || -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf)?;
        Ok(buf)
    });

    let Some(status) = child.wait_timeout(timeout).context("wait for command")? else {
        warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
        child.kill().context("kill command")?;
        child.wait().context("wait command after kill")?;
        // A grandchild may still hold stdout open; leave the reader detached.
        drop(reader);
        return Ok(CommandOutput {
            status: None,
            stdout: String::new(),
            timed_out: true,
        });
    };

    let bytes = match reader.join() {
        Ok(result) => result.context("read output")?,
        Err(_) => return Err(anyhow!("output reader thread panicked")),
    };
    Ok(CommandOutput {
        status: Some(status),
        stdout: String::from_utf8_lossy(&bytes).into_owned(),
        timed_out: false,
    })
}

fn spawn(cmd: &mut Command) -> Result<Child> {
    debug!(program = ?cmd.get_program(), "spawning child process");
    match cmd.spawn() {
        Ok(child) => Ok(child),
        Err(err) => {
            error!(err = %err, program = ?cmd.get_program(), "failed to spawn command");
            Err(err).with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()))
        }
    }
}

/// Write the whole prompt and close stdin. A child that exits without
/// reading its input is not an error here; its exit status tells the story.
fn write_input(mut stdin: ChildStdin, input: &[u8]) -> Result<()> {
    match stdin.write_all(input).and_then(|()| stdin.flush()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            warn!("child closed stdin before reading the full prompt");
            Ok(())
        }
        Err(err) => Err(err).context("write stdin"),
    }
}

fn read_lines<R: Read>(reader: R, on_line: &mut dyn FnMut(&str)) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches(['\r', '\n']));
    }
}

fn join_reader(handle: ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    /// Verifies both streams are delivered line by line and the prompt reaches stdin.
    #[test]
    fn streams_lines_from_both_pipes() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = run_streaming(
            sh("while read -r line; do echo \"got $line\"; done; echo oops >&2; exit 3"),
            b"first\nsecond\n",
            |line| out.push(line.to_string()),
            |line| err.push(line.to_string()),
            None,
            |_| {},
        )
        .expect("run");
        assert_eq!(status.code(), Some(3));
        assert_eq!(out, vec!["got first", "got second"]);
        assert_eq!(err, vec!["oops"]);
    }

    #[test]
    fn heartbeat_fires_while_waiting() {
        let mut beats = 0;
        let status = run_silent(
            sh("sleep 0.3"),
            b"",
            Some(Duration::from_millis(50)),
            |_| beats += 1,
        )
        .expect("run");
        assert!(status.success());
        assert!(beats >= 2, "expected heartbeats, got {beats}");
    }

    #[test]
    fn child_ignoring_stdin_is_not_an_error() {
        let big = vec![b'x'; 1 << 20];
        let status = run_streaming(sh("exit 0"), &big, |_| {}, |_| {}, None, |_| {}).expect("run");
        assert!(status.success());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = run_silent(Command::new("/nonexistent/agent-binary"), b"", None, |_| {})
            .expect_err("spawn");
        assert!(format!("{err:#}").contains("spawn"));
    }

    #[test]
    fn helper_command_times_out() {
        let output = run_command_with_timeout(sh("echo hi; sleep 2"), Duration::from_millis(200))
            .expect("run");
        assert!(output.timed_out);
        assert!(!output.success());

        let output = run_command_with_timeout(sh("echo hi"), Duration::from_secs(5)).expect("run");
        assert!(output.success());
        assert_eq!(output.stdout, "hi\n");
    }

    /// Verifies a timed-out helper returns promptly even when a background
    /// grandchild keeps its stdout open.
    #[test]
    fn timeout_does_not_wait_for_inherited_stdout() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 3 & echo hi; sleep 2"),
            Duration::from_millis(200),
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(output.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_millis(1500), "{:?}", started.elapsed());
    }
}
