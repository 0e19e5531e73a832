//! Non-interactive command execution with concurrent output capture and a
//! hard deadline.
//!
//! The child runs with stdin closed. Two drain threads read stdout and stderr
//! independently and hand chunks to the polling thread over one channel each,
//! so a child writing only to one stream never stalls the other. The polling
//! thread is the only one that looks at the clock and the only one that kills.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exit code reported for a command killed at its deadline (same as `timeout(1)`).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const TIMEOUT_MARKER: &str = "timeout";
const READ_CHUNK: usize = 8 * 1024;
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(1);
const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const SPINNER_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_silence_notice_secs")]
    pub silence_notice_secs: u64,
    #[serde(default = "default_stderr_excerpt_chars")]
    pub stderr_excerpt_chars: usize,
    #[serde(default = "default_spinner")]
    pub spinner: bool,
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_silence_notice_secs() -> u64 {
    8
}

fn default_stderr_excerpt_chars() -> usize {
    800
}

fn default_spinner() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            silence_notice_secs: default_silence_notice_secs(),
            stderr_excerpt_chars: default_stderr_excerpt_chars(),
            spinner: default_spinner(),
        }
    }
}

impl RunnerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn silence_notice(&self) -> Duration {
        Duration::from_secs(self.silence_notice_secs)
    }
}

/// One external command invocation.
#[derive(Clone)]
pub struct CommandSpec {
    pub command_line: String,
    pub description: String,
    pub timeout: Duration,
    /// Variables set on top of the inherited process environment.
    pub environment: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(
        command_line: impl Into<String>,
        description: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            command_line: command_line.into(),
            description: description.into(),
            timeout,
            environment: BTreeMap::new(),
            current_dir: None,
        }
    }

    pub fn with_env(mut self, environment: &BTreeMap<String, String>) -> Self {
        self.environment
            .extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

// Command lines and env values can carry tokens; only names are printed.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .field("current_dir", &self.current_dir)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Error text for diagnostics: stderr, falling back to stdout.
    pub fn error_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }

    /// Both streams, for message classification.
    pub fn combined_text(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Seam between orchestration and process execution.
pub trait CommandExecutor: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult>;
}

pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn execute(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let mut silence = SilenceWatch::new(self.config.silence_notice());
        self.execute_watched(spec, &mut silence)
    }

    fn execute_watched(
        &self,
        spec: &CommandSpec,
        silence: &mut SilenceWatch,
    ) -> Result<CommandResult> {
        let mut command = shell_command(&spec.command_line);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&spec.environment);

        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        // Own process group, so the deadline kill reaches grandchildren too.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| {
            log_error!("Could not start: {} ({})", spec.description, e);
            Error::command_spawn_failed(&spec.description, e.to_string())
        })?;

        let started = Instant::now();
        let activity = Arc::new(ActivityClock::new(started));
        let mut stdout = StreamCapture::new(
            child
                .stdout
                .take()
                .map(|pipe| spawn_drain(pipe, Arc::clone(&activity))),
        );
        let mut stderr = StreamCapture::new(
            child
                .stderr
                .take()
                .map(|pipe| spawn_drain(pipe, Arc::clone(&activity))),
        );

        let poll_interval = self.config.poll_interval();
        let mut spinner = Spinner::new(
            self.config.spinner && io::stderr().is_terminal(),
            &spec.description,
        );

        let status = loop {
            stdout.pull();
            stderr.pull();

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    spinner.clear();
                    return Err(Error::internal_io(
                        e.to_string(),
                        Some(format!("wait for {}", spec.description)),
                    ));
                }
            }

            let elapsed = started.elapsed();
            if elapsed > spec.timeout {
                terminate(&mut child);
                spinner.clear();
                let drain_until = Instant::now() + poll_interval;
                stdout.finish(drain_until);
                stderr.finish(drain_until);
                log_error!(
                    "Timeout ({}s). Aborting: {}",
                    spec.timeout.as_secs(),
                    spec.description
                );

                let mut stderr_text = stderr.into_string();
                if stderr_text.is_empty() {
                    stderr_text = TIMEOUT_MARKER.to_string();
                }
                return Ok(CommandResult {
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: stdout.into_string(),
                    stderr: stderr_text,
                    timed_out: true,
                });
            }

            if silence.check(activity.silent_for()) {
                spinner.clear();
                log_info!("Still running… (no recent output)");
            }

            spinner.tick();
            thread::sleep(poll_interval);
        };

        spinner.clear();
        let drain_until = Instant::now() + EXIT_DRAIN_GRACE;
        stdout.finish(drain_until);
        stderr.finish(drain_until);

        Ok(CommandResult {
            exit_code: exit_code_of(status),
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            timed_out: false,
        })
    }

    fn report(&self, spec: &CommandSpec, result: &CommandResult) {
        if result.timed_out {
            return;
        }

        if result.success() {
            log_success!("OK: {}", spec.description);
            return;
        }

        log_error!("Failed (code {}): {}", result.exit_code, spec.description);
        let excerpt = excerpt(&result.stderr, self.config.stderr_excerpt_chars);
        if !excerpt.is_empty() {
            log_warn!("{}", excerpt);
        }
    }
}

impl CommandExecutor for CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        log_wait!("{}", spec.description);
        let result = self.execute(spec)?;
        self.report(spec, &result);
        Ok(result)
    }
}

/// First `max_chars` characters of the trimmed text.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    let cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command_line]);
        cmd
    };

    #[cfg(not(windows))]
    let cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command_line]);
        cmd
    };

    cmd
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
            let _ = child.kill();
            let _ = child.wait();
            return;
        };
        log_status!("runner", "Killing process group {}", pgid);
        // SAFETY: kill(2) has no memory-safety preconditions. The group was
        // created by `process_group(0)` at spawn, so pgid == child pid.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc != 0 {
            let _ = child.kill();
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }

    let _ = child.wait();
}

/// Time of the most recent output on either stream, as millis since spawn.
struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    fn new(origin: Instant) -> Self {
        Self {
            origin,
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn silent_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// One "still running" notice per command, once output has been quiet for
/// longer than the threshold.
struct SilenceWatch {
    threshold: Duration,
    notices: u32,
}

impl SilenceWatch {
    fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            notices: 0,
        }
    }

    /// True exactly when the notice should be logged now.
    fn check(&mut self, silent_for: Duration) -> bool {
        if self.notices > 0 || silent_for <= self.threshold {
            return false;
        }
        self.notices += 1;
        true
    }
}

fn spawn_drain<R>(mut pipe: R, activity: Arc<ActivityClock>) -> Receiver<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    activity.touch();
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}

/// Append-only byte buffer for one stream, owned by the polling thread.
struct StreamCapture {
    rx: Option<Receiver<Vec<u8>>>,
    bytes: Vec<u8>,
}

impl StreamCapture {
    fn new(rx: Option<Receiver<Vec<u8>>>) -> Self {
        Self {
            rx,
            bytes: Vec::new(),
        }
    }

    fn pull(&mut self) {
        let Some(rx) = &self.rx else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(chunk) => self.bytes.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.rx = None;
                    return;
                }
            }
        }
    }

    /// Collect what is left, waiting until `deadline` at the latest for the
    /// drain thread to hit end of stream.
    fn finish(&mut self, deadline: Instant) {
        while let Some(rx) = &self.rx {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(chunk) => self.bytes.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return,
                Err(RecvTimeoutError::Disconnected) => self.rx = None,
            }
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

struct Spinner {
    enabled: bool,
    label: String,
    frame: usize,
    last_draw: Option<Instant>,
}

impl Spinner {
    fn new(enabled: bool, label: &str) -> Self {
        Self {
            enabled,
            label: label.to_string(),
            frame: 0,
            last_draw: None,
        }
    }

    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        if self
            .last_draw
            .is_some_and(|drawn| drawn.elapsed() < SPINNER_PERIOD)
        {
            return;
        }
        let glyph = SPINNER_FRAMES[self.frame % SPINNER_FRAMES.len()];
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "\r{} {}…", glyph, self.label);
        let _ = stderr.flush();
        self.frame += 1;
        self.last_draw = Some(Instant::now());
    }

    fn clear(&mut self) {
        if !self.enabled || self.last_draw.is_none() {
            return;
        }
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "\r{}\r", " ".repeat(80));
        let _ = stderr.flush();
        self.last_draw = None;
    }
}
