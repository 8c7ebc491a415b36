//! Actions the decision engine asks for, and the executor that carries them out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ActionCommandConfig;
use crate::domain::{ObservedEvent, Regime, Trigger};
use crate::error::{Result, SupervisorError};

/// What kind of decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// A cooled-down trigger fired
    Fire,
    /// bitcoind switched into initial block download
    EnteredIbd,
    /// bitcoind left initial block download
    ExitedIbd,
}

impl ActionKind {
    /// Edge-detection action for entering `regime`
    pub fn for_regime(regime: Regime) -> Option<Self> {
        match regime {
            Regime::InitialBlockDownload => Some(ActionKind::EnteredIbd),
            Regime::Synced => Some(ActionKind::ExitedIbd),
            Regime::Unknown => None,
        }
    }
}

/// One decision to act
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub trigger: Trigger,
    pub kind: ActionKind,
    pub event: ObservedEvent,
}

impl Action {
    pub fn fire(event: ObservedEvent) -> Self {
        Self {
            trigger: event.trigger,
            kind: ActionKind::Fire,
            event,
        }
    }

    pub fn regime(kind: ActionKind, event: ObservedEvent) -> Self {
        Self {
            trigger: event.trigger,
            kind,
            event,
        }
    }

    /// Key used to look the action up in the `actions` configuration table
    pub fn key(&self) -> &'static str {
        match self.kind {
            ActionKind::Fire => self.trigger.key(),
            ActionKind::EnteredIbd => "ibd_entered",
            ActionKind::ExitedIbd => "ibd_exited",
        }
    }
}

/// Performs the out-of-band work for an action
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> Result<()>;
}

/// A command to run for an action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl From<&ActionCommandConfig> for ActionCommand {
    fn from(config: &ActionCommandConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Runs configured commands (usually the base's shell scripts) per action key.
///
/// Actions without a command are logged and count as done.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    commands: HashMap<String, ActionCommand>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(actions: &HashMap<String, ActionCommandConfig>) -> Self {
        Self {
            commands: actions
                .iter()
                .map(|(key, cmd)| (key.clone(), ActionCommand::from(cmd)))
                .collect(),
        }
    }

    pub fn with_command(mut self, key: &str, command: ActionCommand) -> Self {
        self.commands.insert(key.to_string(), command);
        self
    }

    pub fn command_for(&self, action: &Action) -> Option<&ActionCommand> {
        self.commands.get(action.key())
    }
}

#[async_trait]
impl ActionExecutor for CommandExecutor {
    async fn execute(&self, action: &Action) -> Result<()> {
        let Some(command) = self.command_for(action) else {
            info!(
                action = action.key(),
                unit = %action.event.unit,
                "No command configured for action, nothing to run"
            );
            return Ok(());
        };

        let failed = |reason: String| SupervisorError::ActionFailed {
            action: action.key().to_string(),
            reason,
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env("SUPERVISOR_ACTION", action.key())
            .env("SUPERVISOR_UNIT", &action.event.unit)
            .env("SUPERVISOR_TRIGGER", action.trigger.as_str())
            .env("SUPERVISOR_MEASURE", &action.event.measure)
            .env("SUPERVISOR_VALUE", action.event.value.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(action = action.key(), "Running {} {:?}", command.program, command.args);
        let child = cmd
            .spawn()
            .map_err(|e| failed(format!("failed to spawn {}: {}", command.program, e)))?;

        let output = timeout(command.timeout, child.wait_with_output())
            .await
            .map_err(|_| failed(format!("timed out after {:?}", command.timeout)))?
            .map_err(|e| failed(format!("failed to wait for {}: {}", command.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(action = action.key(), "Action command failed: {}", stderr.trim());
            return Err(failed(format!("{} ({})", output.status, stderr.trim())));
        }

        info!(action = action.key(), unit = %action.event.unit, "Action command succeeded");
        Ok(())
    }
}
