use super::{CommandOutput, FIRMWARE_TIMEOUT, SystemCommander};
use crate::error::WipeError;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Real command runner for the Linux host.
pub struct LinuxCommander;

#[async_trait]
impl SystemCommander for LinuxCommander {
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, WipeError> {
        debug!(program, ?args, "Running probe command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| WipeError::ExternalTool {
                tool: program.to_string(),
                output: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_idle(
        &self,
        program: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<(), WipeError> {
        debug!(program, ?args, "Running sanitize command");

        // Idle I/O scheduling class keeps the host responsive while the
        // firmware command churns.
        let mut cmd = Command::new("ionice");
        cmd.arg("-c").arg("3").arg(program).args(args);
        cmd.kill_on_drop(true);

        tokio::select! {
            _ = cancel.cancelled() => Err(WipeError::Aborted),
            result = tokio::time::timeout(FIRMWARE_TIMEOUT, cmd.output()) => {
                let output = match result {
                    Err(_) => {
                        return Err(WipeError::Timeout {
                            tool: program.to_string(),
                            seconds: FIRMWARE_TIMEOUT.as_secs(),
                        });
                    }
                    Ok(spawned) => spawned.map_err(|e| WipeError::ExternalTool {
                        tool: program.to_string(),
                        output: e.to_string(),
                    })?,
                };

                if output.status.success() {
                    Ok(())
                } else {
                    let captured = CommandOutput {
                        success: false,
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    };
                    Err(WipeError::ExternalTool {
                        tool: program.to_string(),
                        output: captured.combined(),
                    })
                }
            }
        }
    }
}
