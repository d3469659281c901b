//! Subprocess executor: launches the agent, tails its output, enforces idle
//! and hard timeouts, detects the result sentinel, and terminates with grace.
//!
//! The [`Executor`] trait decouples the runner loop from the actual agent
//! backend (`codex exec` by default). Tests use scripted executors that
//! return predetermined outcomes without spawning processes.
//!
//! Stream handling: two reader threads forward raw chunks over a channel to
//! a single pump loop, so per-chunk side effects (parent tee, log append,
//! buffer push, sentinel parse, idle reset) happen in one critical section
//! and observations are totally ordered per stream.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::core::sentinel::{self, ParsedResult};
use crate::core::types::{ExecOutcome, ReasoningEffort, StreamKind, TimeoutKind};

/// Default idle timeout: 20 minutes without output on either stream.
pub const DEFAULT_IDLE_TIMEOUT_MS: i64 = 20 * 60 * 1000;
/// Rolling in-memory output buffer cap, in characters.
const OUTPUT_BUFFER_CAP: usize = 200_000;
/// Delay between sentinel detection and termination, letting the agent flush.
const RESULT_GRACE_MS: u64 = 1_500;
/// Window between the soft stop and the forced kill.
const FORCE_KILL_GRACE_MS: u64 = 5_000;
/// Timer values below this are clamped up to it.
const MIN_TIMER_MS: u64 = 1_000;

/// Stable knobs for how agent processes are launched and bounded.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Agent executable; `codex` unless overridden.
    pub executable: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub full_auto: bool,
    pub skip_git_repo_check: bool,
    /// Idle timeout in milliseconds; disabled when <= 0.
    pub idle_timeout_ms: i64,
    /// Absolute cap from spawn, in milliseconds; disabled when absent or <= 0.
    pub hard_timeout_ms: Option<i64>,
    /// Terminate shortly after the sentinel is first parsed.
    pub terminate_on_result: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            executable: "codex".to_string(),
            model: None,
            reasoning_effort: None,
            full_auto: true,
            skip_git_repo_check: true,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            hard_timeout_ms: None,
            terminate_on_result: true,
        }
    }
}

/// Per-attempt inputs for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process (the project root).
    pub workdir: PathBuf,
    /// Fully assembled prompt, passed as the final argument.
    pub prompt: String,
    /// Per-attempt log file the output is teed into.
    pub log_path: PathBuf,
}

/// Receiver for raw output chunks, in arrival order per stream.
pub trait OutputSink {
    fn chunk(&self, stream: StreamKind, text: &str);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn chunk(&self, _stream: StreamKind, _text: &str) {}
}

/// Abstraction over agent execution backends.
pub trait Executor {
    fn execute(&self, request: &ExecRequest, sink: &dyn OutputSink) -> Result<ExecOutcome>;
}

/// Executor that spawns the agent executable (`codex exec ...`).
#[derive(Debug, Clone, Default)]
pub struct CodexExecutor {
    pub config: ExecConfig,
}

impl CodexExecutor {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }
}

impl Executor for CodexExecutor {
    fn execute(&self, request: &ExecRequest, sink: &dyn OutputSink) -> Result<ExecOutcome> {
        let started = Instant::now();

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
        let mut log = File::create(&request.log_path)
            .with_context(|| format!("create attempt log {}", request.log_path.display()))?;

        let args = assemble_args(&self.config, &request.prompt);
        info!(executable = %self.config.executable, workdir = %request.workdir.display(), "spawning agent");
        let mut child = Command::new(&self.config.executable)
            .args(&args)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn agent executable '{}'", self.config.executable))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        // Reader threads are detached on purpose: a grandchild can hold the
        // pipe open past the child's exit, and the attempt must not wait on it.
        let (tx, rx) = mpsc::channel();
        spawn_reader(stdout, StreamKind::Stdout, tx.clone());
        spawn_reader(stderr, StreamKind::Stderr, tx);

        let mut state = AttemptState::new(&self.config, started);

        loop {
            match rx.recv_timeout(state.wait_duration()) {
                Ok((stream, text)) => {
                    state.on_chunk(&mut log, sink, stream, &text)?;
                    // A steady chunk stream must not starve the timers.
                    if state.deadline_due() && state.handle_due_timers(&mut child, &mut log)? {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if state.handle_due_timers(&mut child, &mut log)? {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = state.reap(&mut child, &mut log)?;
        debug!(exit_code = ?status.code(), timed_out = state.timed_out, "agent process closed");

        Ok(ExecOutcome {
            exit_code: status.code(),
            signal: signal_name(&status),
            duration_ms: started.elapsed().as_millis() as u64,
            log_path: request.log_path.clone(),
            timed_out: state.timed_out,
            timeout_kind: state.timeout_kind,
            timeout_limit_ms: state.timeout_limit_ms,
            parsed: state.parsed,
        })
    }
}

/// Argument order is part of the agent contract: `exec`, flags, model,
/// reasoning effort, then the prompt as the single final argument.
fn assemble_args(config: &ExecConfig, prompt: &str) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if config.full_auto {
        args.push("--full-auto".to_string());
    }
    if config.skip_git_repo_check {
        args.push("--skip-git-repo-check".to_string());
    }
    if let Some(model) = &config.model {
        args.push("-m".to_string());
        args.push(model.clone());
    }
    if let Some(effort) = config.reasoning_effort {
        args.push("--config".to_string());
        args.push(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
    }
    args.push(prompt.to_string());
    args
}

/// Clamp a millisecond knob: disabled when <= 0, floored at one second.
fn normalize_timer(ms: i64) -> Option<u64> {
    if ms <= 0 {
        return None;
    }
    Some((ms as u64).max(MIN_TIMER_MS))
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    stream: StreamKind,
    tx: mpsc::Sender<(StreamKind, String)>,
) {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    if tx.send((stream, text)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Mutable attempt state driven by the pump loop: rolling buffer, sentinel
/// detection, and the four timers (idle, hard, result grace, force kill).
struct AttemptState {
    buffer: String,
    parsed: Option<ParsedResult>,
    timed_out: bool,
    timeout_kind: Option<TimeoutKind>,
    timeout_limit_ms: Option<u64>,
    idle_limit_ms: Option<u64>,
    hard_limit_ms: Option<u64>,
    idle_deadline: Option<Instant>,
    hard_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
    kill_deadline: Option<Instant>,
    terminate_on_result: bool,
    soft_stopped: bool,
    force_killed: bool,
}

impl AttemptState {
    fn new(config: &ExecConfig, started: Instant) -> Self {
        let idle_limit_ms = normalize_timer(config.idle_timeout_ms);
        let hard_limit_ms = config.hard_timeout_ms.and_then(normalize_timer);
        Self {
            buffer: String::new(),
            parsed: None,
            timed_out: false,
            timeout_kind: None,
            timeout_limit_ms: None,
            idle_deadline: idle_limit_ms.map(|ms| started + Duration::from_millis(ms)),
            hard_deadline: hard_limit_ms.map(|ms| started + Duration::from_millis(ms)),
            grace_deadline: None,
            kill_deadline: None,
            idle_limit_ms,
            hard_limit_ms,
            terminate_on_result: config.terminate_on_result,
            soft_stopped: false,
            force_killed: false,
        }
    }

    /// Handle one chunk: tee to the parent stream, append the log, feed the
    /// rolling buffer and (until the first hit) the sentinel parser, notify
    /// the sink, and reset the idle timer.
    fn on_chunk(
        &mut self,
        log: &mut File,
        sink: &dyn OutputSink,
        stream: StreamKind,
        text: &str,
    ) -> Result<()> {
        tee_parent(stream, text);
        log.write_all(text.as_bytes())
            .context("append attempt log")?;

        self.buffer.push_str(text);
        trim_front(&mut self.buffer, OUTPUT_BUFFER_CAP);

        if self.parsed.is_none() {
            if let Some(result) = sentinel::extract(&self.buffer) {
                info!(status = result.status.as_str(), "result sentinel parsed");
                if self.terminate_on_result && !self.soft_stopped {
                    self.grace_deadline =
                        Some(Instant::now() + Duration::from_millis(RESULT_GRACE_MS));
                }
                self.parsed = Some(result);
            }
        }

        sink.chunk(stream, text);

        if !self.soft_stopped {
            if let Some(ms) = self.idle_limit_ms {
                self.idle_deadline = Some(Instant::now() + Duration::from_millis(ms));
            }
        }
        Ok(())
    }

    /// Fire whichever timer is due. Returns `true` once the child has been
    /// force-killed and the pump should stop draining.
    fn handle_due_timers(&mut self, child: &mut Child, log: &mut File) -> Result<bool> {
        let now = Instant::now();

        if self.soft_stopped {
            if !self.force_killed && self.kill_deadline.is_some_and(|d| now >= d) {
                self.force_kill(child, log);
                return Ok(true);
            }
            return Ok(false);
        }

        if self.hard_deadline.is_some_and(|d| now >= d) {
            let limit = self.hard_limit_ms.unwrap_or(0);
            self.timed_out = true;
            self.timeout_kind = Some(TimeoutKind::Hard);
            self.timeout_limit_ms = Some(limit);
            self.soft_stop(child, log, &format!("hard timeout after {limit}ms"));
        } else if self.idle_deadline.is_some_and(|d| now >= d) {
            let limit = self.idle_limit_ms.unwrap_or(0);
            self.timed_out = true;
            self.timeout_kind = Some(TimeoutKind::Idle);
            self.timeout_limit_ms = Some(limit);
            self.soft_stop(child, log, &format!("idle timeout after {limit}ms"));
        } else if self.grace_deadline.is_some_and(|d| now >= d) {
            self.soft_stop(child, log, "result received");
        }
        Ok(false)
    }

    /// Soft stop: marker line, stop signal, and a force-kill deadline.
    /// Idempotent; a second call is a no-op.
    fn soft_stop(&mut self, child: &mut Child, log: &mut File, reason: &str) {
        if self.soft_stopped {
            return;
        }
        self.soft_stopped = true;
        warn!(reason, "terminating agent");
        write_marker(log, &format!("soft stop: {reason}"));
        send_soft_stop(child);
        self.idle_deadline = None;
        self.hard_deadline = None;
        self.grace_deadline = None;
        self.kill_deadline = Some(Instant::now() + Duration::from_millis(FORCE_KILL_GRACE_MS));
    }

    /// Forced kill after the grace window. Idempotent.
    fn force_kill(&mut self, child: &mut Child, log: &mut File) {
        if self.force_killed {
            return;
        }
        self.force_killed = true;
        self.kill_deadline = None;
        warn!("force killing agent after grace window");
        write_marker(log, &format!("force kill after {FORCE_KILL_GRACE_MS}ms grace"));
        let _ = child.kill();
    }

    /// Reap the child after the streams closed, still honoring any timers
    /// for a child that shut its stdio but kept running.
    fn reap(&mut self, child: &mut Child, log: &mut File) -> Result<ExitStatus> {
        loop {
            if self.force_killed {
                return child.wait().context("wait for agent after force kill");
            }
            let Some(deadline) = self.next_deadline() else {
                return child.wait().context("wait for agent");
            };
            let wait = deadline.saturating_duration_since(Instant::now());
            match child
                .wait_timeout(wait)
                .context("wait for agent with timeout")?
            {
                Some(status) => return Ok(status),
                None => {
                    self.handle_due_timers(child, log)?;
                }
            }
        }
    }

    fn deadline_due(&self) -> bool {
        self.next_deadline()
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn wait_duration(&self) -> Duration {
        match self.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(3600),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.idle_deadline,
            self.hard_deadline,
            self.grace_deadline,
            self.kill_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

fn tee_parent(stream: StreamKind, text: &str) {
    match stream {
        StreamKind::Stdout => {
            let mut out = io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
        StreamKind::Stderr => {
            let mut err = io::stderr().lock();
            let _ = err.write_all(text.as_bytes());
            let _ = err.flush();
        }
    }
}

fn write_marker(log: &mut File, message: &str) {
    let _ = writeln!(log, "[tm-longrun] {message}");
    let _ = log.flush();
}

/// Drop characters from the front so the buffer stays under `cap` bytes,
/// never splitting a UTF-8 sequence.
fn trim_front(buffer: &mut String, cap: usize) {
    if buffer.len() <= cap {
        return;
    }
    let mut cut = buffer.len() - cap;
    while !buffer.is_char_boundary(cut) {
        cut += 1;
    }
    buffer.drain(..cut);
}

#[cfg(unix)]
fn send_soft_stop(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_soft_stop(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| match sig {
        2 => "SIGINT".to_string(),
        9 => "SIGKILL".to_string(),
        15 => "SIGTERM".to_string(),
        other => format!("signal {other}"),
    })
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}
