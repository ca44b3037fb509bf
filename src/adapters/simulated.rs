use super::{CommandOutput, SystemCommander};
use crate::error::WipeError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scripted command runner.
///
/// Fixtures are keyed by the full command line (`program` followed by
/// its arguments, space-joined). Unscripted commands behave like a
/// missing binary. Every invocation is recorded so tests can assert on
/// what was (or was not) executed.
#[derive(Clone, Default)]
pub struct SimulatedCommander {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    fixtures: Mutex<HashMap<String, CommandOutput>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

impl SimulatedCommander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixtures for `--simulation` runs on machines without root or
    /// spare hardware: one detached HDD and no mobile devices.
    pub fn with_demo_fixtures() -> Self {
        let sim = Self::new();
        sim.script(
            "lsblk -J -b -o NAME,MODEL,SIZE,ROTA,TYPE,MOUNTPOINTS,FSTYPE,TRAN",
            CommandOutput::ok(
                r#"{"blockdevices":[{"name":"sdz","model":"SIM DISK 1000","size":1073741824,"rota":true,"type":"disk","mountpoints":[null],"fstype":null,"tran":"sata"}]}"#,
            ),
        );
        sim.script("adb devices", CommandOutput::failed("adb: not found"));
        sim
    }

    /// Register the output for a command line.
    pub fn script(&self, line: &str, output: CommandOutput) {
        self.inner
            .fixtures
            .lock()
            .unwrap()
            .insert(line.to_string(), output);
    }

    /// Delay resolution of a command line, so tests can abort a job
    /// while its subprocess is still "running".
    pub fn script_delay(&self, line: &str, delay: Duration) {
        self.inner
            .delays
            .lock()
            .unwrap()
            .insert(line.to_string(), delay);
    }

    /// Every command line invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    fn record(&self, line: &str) {
        self.inner.calls.lock().unwrap().push(line.to_string());
    }

    fn lookup(&self, line: &str) -> Option<CommandOutput> {
        self.inner.fixtures.lock().unwrap().get(line).cloned()
    }

    fn delay_for(&self, line: &str) -> Option<Duration> {
        self.inner.delays.lock().unwrap().get(line).copied()
    }
}

#[async_trait]
impl SystemCommander for SimulatedCommander {
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, WipeError> {
        let line = command_line(program, args);
        self.record(&line);

        self.lookup(&line).ok_or_else(|| WipeError::ExternalTool {
            tool: program.to_string(),
            output: format!("no fixture for `{line}`"),
        })
    }

    async fn run_idle(
        &self,
        program: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<(), WipeError> {
        let line = command_line(program, args);
        self.record(&line);

        if let Some(delay) = self.delay_for(&line) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(WipeError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match self.lookup(&line) {
            Some(output) if output.success => Ok(()),
            Some(output) => Err(WipeError::ExternalTool {
                tool: program.to_string(),
                output: output.combined(),
            }),
            None => Err(WipeError::ExternalTool {
                tool: program.to_string(),
                output: format!("no fixture for `{line}`"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_invocations_in_order() {
        let sim = SimulatedCommander::new();
        sim.script("adb devices", CommandOutput::ok("List of devices attached\n"));

        sim.output("adb", &["devices"]).await.unwrap();
        let err = sim.output("lsblk", &["-J"]).await;

        assert!(err.is_err());
        assert_eq!(sim.calls(), vec!["adb devices", "lsblk -J"]);
    }

    #[tokio::test]
    async fn run_idle_reports_combined_output_on_failure() {
        let sim = SimulatedCommander::new();
        sim.script(
            "nvme format /dev/nvme9n1 -s 1",
            CommandOutput::failed("NVMe status: INVALID_OPCODE"),
        );

        let cancel = CancellationToken::new();
        let err = sim
            .run_idle("nvme", &["format", "/dev/nvme9n1", "-s", "1"], &cancel)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("INVALID_OPCODE"));
    }
}
