//! systemd journal watcher
//!
//! Follows `journalctl` for one unit and classifies each line into at most one
//! event. Anything written to stderr, or the process ending, is reported as an
//! error and ends the watch; restarting is up to the registry.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ObservationSender;
use crate::domain::{ObservedError, ObservedEvent, Trigger};
use crate::error::SupervisorError;

pub const DEFAULT_JOURNALCTL: &str = "/bin/journalctl";

/// Known log phrases and the trigger each one maps to
const LOG_PATTERNS: &[(&str, Trigger)] = &[
    ("finished full compaction", Trigger::ElectrsFullySynced),
    ("full compaction done", Trigger::ElectrsFullySynced),
    (
        "reconnecting to bitcoind: no reply from daemon",
        Trigger::ElectrsNoBitcoindConnectivity,
    ),
    (
        "GetBlockChainInfo rpc call failed",
        Trigger::MiddlewareNoBitcoindConnectivity,
    ),
];

/// Classify one log line. Unknown lines yield nothing.
pub fn parse_line(line: &str, unit: &str) -> Option<ObservedEvent> {
    LOG_PATTERNS
        .iter()
        .find(|(phrase, _)| line.contains(phrase))
        .map(|(phrase, trigger)| ObservedEvent::from_log(unit, *trigger, phrase))
}

/// Watches the journal of one systemd unit
#[derive(Debug, Clone)]
pub struct LogWatcher {
    unit: String,
    program: PathBuf,
    args: Option<Vec<String>>,
}

impl LogWatcher {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            program: PathBuf::from(DEFAULT_JOURNALCTL),
            args: None,
        }
    }

    /// Use a different journalctl binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Replace the follow command entirely (program and arguments)
    pub fn with_command(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = Some(args);
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn source(&self) -> String {
        format!("log:{}", self.unit)
    }

    /// Arguments passed to the follow command; only lines written after attach
    pub fn follow_args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => vec![
                "--since=now".to_string(),
                "--quiet".to_string(),
                "--follow".to_string(),
                "--unit".to_string(),
                self.unit.clone(),
            ],
        }
    }

    fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in self.follow_args() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }

    /// Follow the unit's log until the stream fails, the process exits, or shutdown.
    pub async fn watch(&self, sink: &ObservationSender, shutdown: &CancellationToken) {
        let command_line = self.command_line();
        info!(unit = %self.unit, "Watching journal ({})", command_line);

        let mut child = match Command::new(&self.program)
            .args(self.follow_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let err = SupervisorError::log_stream(
                    &self.unit,
                    format!("failed to start {}: {}", command_line, e),
                );
                sink.error(ObservedError::from_error(self.source(), &err));
                return;
            }
        };

        let failure = self.follow(&mut child, sink, shutdown).await;

        if let Err(e) = child.kill().await {
            debug!(unit = %self.unit, "Follow process already gone: {}", e);
        }

        if let Some(reason) = failure {
            let err = SupervisorError::log_stream(&self.unit, reason);
            sink.error(ObservedError::from_error(self.source(), &err));
        }
    }

    /// Pump stdout/stderr. Returns the failure reason, or `None` on shutdown.
    async fn follow(
        &self,
        child: &mut Child,
        sink: &ObservationSender,
        shutdown: &CancellationToken,
    ) -> Option<String> {
        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => return Some("follow process has no output pipes".to_string()),
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut errors = BufReader::new(stderr).lines();
        let mut stderr_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(unit = %self.unit, "Journal watcher shutting down");
                    return None;
                }
                line = lines.next_line() => match line {
                    // one line per read, even when journalctl flushes several at once
                    Ok(Some(line)) => {
                        if let Some(event) = parse_line(&line, &self.unit) {
                            debug!(unit = %self.unit, trigger = %event.trigger, "Matched log line");
                            if !sink.event(event) {
                                return None;
                            }
                        }
                    }
                    Ok(None) => {
                        let status = match child.wait().await {
                            Ok(status) => status.to_string(),
                            Err(e) => e.to_string(),
                        };
                        return Some(format!(
                            "command {} unexpectedly exited ({})",
                            self.command_line(),
                            status
                        ));
                    }
                    Err(e) => return Some(format!("failed to read journal output: {}", e)),
                },
                line = errors.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        warn!(unit = %self.unit, "journalctl wrote to stderr: {}", line);
                        return Some(format!("stderr: {}", line));
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => return Some(format!("failed to read journal stderr: {}", e)),
                },
            }
        }
    }
}
