use crate::config::ShutdownConfig;
use crate::decision::ShutdownCommand;
use crate::line::{CommLine, Level, LineError, PinRole};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;

// Sequencing delays the power controller counts on. The controller samples
// the line after the host goes quiet; shortening either delay makes it see
// a host that is still alive.

/// Pause between the kill script and driving the line low.
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Mandatory pause between releasing the line and the OS action.
pub const PRE_SHUTDOWN_DELAY: Duration = Duration::from_secs(2);

/// Errors from the shutdown sequence. Kill-script failures are not errors;
/// they are swallowed so a broken script can never block the shutdown path.
#[derive(Debug)]
pub enum DispatchError {
    Line(LineError),
    OsCommand {
        command: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Line(e) => write!(f, "line error during shutdown sequence: {}", e),
            DispatchError::OsCommand { command, source } => {
                write!(f, "failed to invoke {}: {}", command, source)
            }
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Line(e) => Some(e),
            DispatchError::OsCommand { source, .. } => Some(source),
        }
    }
}

impl From<LineError> for DispatchError {
    fn from(e: LineError) -> Self {
        DispatchError::Line(e)
    }
}

/// Executes the shutdown half of the protocol once the engine has classified
/// a request. The order of operations is part of the contract with the
/// power controller and must not be rearranged.
#[derive(Debug)]
pub struct Dispatcher {
    kill_script: Option<PathBuf>,
    halt_command: String,
    reboot_command: String,
    dry_run: bool,
}

impl Dispatcher {
    pub fn new(config: &ShutdownConfig, dry_run: bool) -> Self {
        Self {
            kill_script: config.kill_script.clone(),
            halt_command: config.halt_command.clone(),
            reboot_command: config.reboot_command.clone(),
            dry_run,
        }
    }

    /// Run the full sequence: quiesce the line, kill script (best effort),
    /// settle, line low and released, pre-shutdown wait, OS action.
    ///
    /// After a successful real (non-dry-run) invocation the OS takes the
    /// system down; the caller should not expect to keep running long.
    pub async fn dispatch<L: CommLine>(
        &self,
        command: ShutdownCommand,
        edges: u32,
        line: &mut L,
    ) -> Result<(), DispatchError> {
        tracing::info!(
            command = %command,
            edges,
            dry_run = self.dry_run,
            "running shutdown sequence"
        );

        line.disarm().await;
        line.configure(PinRole::Output)?;

        self.run_kill_script().await;
        sleep(SETTLE_DELAY).await;

        line.write(Level::Low)?;
        line.release().await;

        sleep(PRE_SHUTDOWN_DELAY).await;

        if self.dry_run {
            tracing::info!(command = %command, "dry run, OS action skipped");
            return Ok(());
        }

        let os_command = match command {
            ShutdownCommand::Halt => &self.halt_command,
            ShutdownCommand::Reboot => &self.reboot_command,
        };
        let status = Command::new(os_command)
            .status()
            .await
            .map_err(|e| DispatchError::OsCommand {
                command: os_command.clone(),
                source: e,
            })?;
        if !status.success() {
            tracing::warn!(command = %os_command, ?status, "OS command exited nonzero");
        }
        Ok(())
    }

    async fn run_kill_script(&self) {
        if self.dry_run {
            tracing::info!("dry run, kill script skipped");
            return;
        }
        let Some(script) = &self.kill_script else {
            tracing::debug!("no kill script configured");
            return;
        };
        match Command::new(script).status().await {
            Ok(status) if status.success() => {
                tracing::debug!(script = %script.display(), "kill script finished");
            }
            Ok(status) => {
                tracing::warn!(script = %script.display(), ?status, "kill script exited nonzero");
            }
            Err(e) => {
                tracing::warn!(script = %script.display(), error = %e, "kill script failed to run");
            }
        }
    }
}
