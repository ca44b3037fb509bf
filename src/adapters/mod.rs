//! System command seam.
//!
//! Every external utility the daemon touches (lsblk, hdparm, smartctl,
//! nvme, adb, umount) goes through the [`SystemCommander`] trait so
//! tests can replay scripted fixtures instead of touching real
//! hardware.

use crate::error::WipeError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod linux;
mod simulated;

pub use linux::LinuxCommander;
pub use simulated::SimulatedCommander;

/// Upper bound for firmware-level sanitize commands; beyond this the
/// subprocess is killed and the job fails with a timeout.
pub const FIRMWARE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Captured result of an invoked utility.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Combined stdout/stderr, the way the erase methods report tool
    /// failures.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.stderr.trim_end());
        }
        out
    }
}

#[async_trait]
pub trait SystemCommander: Send + Sync {
    /// Run a short-lived probe and capture its output. A non-zero exit
    /// is not an error at this level; callers inspect `success`.
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, WipeError>;

    /// Run a destructive sanitize command under best-effort idle I/O
    /// scheduling, a hard timeout, and the job's cancellation token.
    async fn run_idle(
        &self,
        program: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<(), WipeError>;
}

pub fn get_commander(simulation: bool) -> Arc<dyn SystemCommander> {
    if simulation {
        Arc::new(SimulatedCommander::with_demo_fixtures())
    } else {
        Arc::new(LinuxCommander)
    }
}
