//! Sanitization engine: safety gates, method dispatch, and the
//! overwrite data path.
//!
//! The engine owns the open device handle for the life of a job and
//! releases it on every exit path. Firmware-level methods delegate to
//! the system commander; overwrite methods drive the device node
//! directly with suspension points at every write so pause and abort
//! are observable within one buffer.

use crate::adapters::SystemCommander;
use crate::core::inventory::{DeviceClass, Inventory};
use crate::core::progress::{ProgressEvent, ProgressSink};
use crate::core::registry;
use crate::core::supervisor::{JobControls, JobState, JobSupervisor};
use crate::error::WipeError;
use crate::logging::EmitThrottle;
use serde::Deserialize;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{Instrument, info, info_span, warn};

/// One reusable write buffer per job.
const WRITE_BUFFER_SIZE: usize = 128 * 1024;

/// Nominal progress sampling period.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Pattern schedule for 1- and 3-pass overwrites, repeating beyond the
/// table length.
const OVERWRITE_PATTERNS: [u8; 3] = [0x00, 0xFF, 0x55];

/// Pattern and complement for removable media.
const TWO_PASS_PATTERNS: [u8; 2] = [0x55, 0xAA];

/// Transient ATA user password; the erase itself clears it.
const ATA_PASSWORD: &str = "dzap";

/// Immutable description of one wipe request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeConfig {
    #[serde(default)]
    pub device_path: String,
    pub method: String,
    #[serde(default)]
    pub device_serial: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub device_model: Option<String>,
}

impl WipeConfig {
    pub fn is_android(&self) -> bool {
        self.device_type.as_deref() == Some("Android")
    }

    /// The identity jobs are keyed by: block-device path, or serial for
    /// mobile devices.
    pub fn identity(&self) -> &str {
        if self.is_android() {
            self.device_serial.as_deref().unwrap_or(&self.device_path)
        } else {
            &self.device_path
        }
    }
}

pub struct SanitizeEngine {
    commander: Arc<dyn SystemCommander>,
    inventory: Arc<Inventory>,
    supervisor: Arc<JobSupervisor>,
}

impl SanitizeEngine {
    pub fn new(
        commander: Arc<dyn SystemCommander>,
        inventory: Arc<Inventory>,
        supervisor: Arc<JobSupervisor>,
    ) -> Self {
        Self {
            commander,
            inventory,
            supervisor,
        }
    }

    /// Execute a wipe request to its terminal event.
    ///
    /// Gates run before any job state exists or any device handle is
    /// opened. Exactly one terminal event (`done`, `aborted`, `error`)
    /// is emitted, after which the job is unregistered.
    pub async fn run(&self, config: WipeConfig, sink: ProgressSink) -> Result<(), WipeError> {
        let device_id = config.identity().to_string();
        let method_id = config.method.clone();

        let span = info_span!("wipe", device = %device_id, method = %method_id);

        async {
            if let Err(e) = self.validate(&config).await {
                warn!(error = %e, "Wipe request refused");
                sink.emit(ProgressEvent::failed(&device_id, &method_id, &e.to_string()))
                    .await;
                return Err(e);
            }

            let mut controls = match self.supervisor.register(&device_id, &method_id) {
                Ok(controls) => controls,
                Err(e) => {
                    warn!(error = %e, "Wipe request refused");
                    sink.emit(ProgressEvent::failed(&device_id, &method_id, &e.to_string()))
                        .await;
                    return Err(e);
                }
            };

            self.supervisor.set_state(&device_id, JobState::Running);
            let outcome = self.dispatch(&config, &mut controls, &sink).await;

            let (state, terminal) = match &outcome {
                Ok(()) => {
                    info!("Wipe complete");
                    (JobState::Completed, ProgressEvent::done(&device_id, &method_id))
                }
                Err(WipeError::Aborted) => {
                    info!("Wipe aborted");
                    (JobState::Aborting, ProgressEvent::aborted(&device_id, &method_id))
                }
                Err(e) => {
                    warn!(error = %e, "Wipe failed");
                    (
                        JobState::Failed,
                        ProgressEvent::failed(&device_id, &method_id, &e.to_string()),
                    )
                }
            };

            self.supervisor.set_state(&device_id, state);
            sink.emit(terminal).await;
            self.supervisor.unregister(&device_id);

            outcome
        }
        .instrument(span)
        .await
    }

    /// Safety gates, in order: device exists, not the OS disk, not
    /// mounted, not frozen (SATA SSD), method known and permitted for
    /// the class. Any failure aborts before the device is opened.
    async fn validate(&self, config: &WipeConfig) -> Result<(), WipeError> {
        if registry::display_name(&config.method).is_none() {
            return Err(WipeError::NotFound(format!("wipe method {}", config.method)));
        }

        if config.is_android() {
            let serial = config
                .device_serial
                .as_deref()
                .ok_or_else(|| WipeError::NotFound("mobile device serial".to_string()))?;
            self.inventory.find_mobile(serial).await?;

            if !registry::is_permitted(DeviceClass::MobileAndroid, &config.method) {
                return Err(WipeError::SafetyRefusal(format!(
                    "method {} is not permitted for Android devices",
                    config.method
                )));
            }
            return Ok(());
        }

        let device = self.inventory.find_device(&config.device_path).await?;

        if device.is_os_disk {
            return Err(WipeError::SafetyRefusal(format!(
                "{} holds the running operating system",
                device.path
            )));
        }
        if device.is_mounted {
            return Err(WipeError::SafetyRefusal(format!(
                "{} is mounted; unmount it first",
                device.path
            )));
        }
        if device.class == DeviceClass::SataSsd && device.is_frozen {
            return Err(WipeError::SafetyRefusal(format!(
                "{} is in a frozen security state; power-cycle the drive",
                device.path
            )));
        }
        if !registry::is_permitted(device.class, &config.method) {
            return Err(WipeError::SafetyRefusal(format!(
                "method {} is not permitted for this device class",
                config.method
            )));
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        config: &WipeConfig,
        controls: &mut JobControls,
        sink: &ProgressSink,
    ) -> Result<(), WipeError> {
        match config.method.as_str() {
            registry::NVME_FORMAT => self.nvme_format(config, controls, sink).await,
            registry::SATA_SECURE_ERASE => self.sata_secure_erase(config, controls, sink).await,
            registry::OVERWRITE_1_PASS => {
                self.overwrite(config, controls, sink, 1, &OVERWRITE_PATTERNS)
                    .await
            }
            registry::OVERWRITE_3_PASS => {
                self.overwrite(config, controls, sink, 3, &OVERWRITE_PATTERNS)
                    .await
            }
            registry::OVERWRITE_2_PASS => {
                self.overwrite(config, controls, sink, 2, &TWO_PASS_PATTERNS)
                    .await
            }
            registry::ANDROID_FACTORY_RESET => self.android_factory_reset(config, sink).await,
            other => Err(WipeError::NotFound(format!("wipe method {other}"))),
        }
    }

    /// Atomic from the engine's view: one status message on start,
    /// success or failure on command exit.
    async fn nvme_format(
        &self,
        config: &WipeConfig,
        controls: &mut JobControls,
        sink: &ProgressSink,
    ) -> Result<(), WipeError> {
        sink.emit(self.status_event(config, "Executing NVMe Format..."))
            .await;

        self.commander
            .run_idle(
                "nvme",
                &["format", &config.device_path, "-s", "1"],
                &controls.cancel,
            )
            .await
    }

    /// Two-step ATA purge: set a transient user password, then issue
    /// the erase. A failure to set the password aborts before the
    /// erase is attempted.
    async fn sata_secure_erase(
        &self,
        config: &WipeConfig,
        controls: &mut JobControls,
        sink: &ProgressSink,
    ) -> Result<(), WipeError> {
        sink.emit(self.status_event(config, "Executing ATA Secure Erase..."))
            .await;

        self.commander
            .run_idle(
                "hdparm",
                &[
                    "--user-master",
                    "user",
                    "--security-set-pass",
                    ATA_PASSWORD,
                    &config.device_path,
                ],
                &controls.cancel,
            )
            .await?;

        sink.emit(self.status_event(config, "Security password set. Issuing erase..."))
            .await;

        self.commander
            .run_idle(
                "hdparm",
                &[
                    "--user-master",
                    "user",
                    "--security-erase",
                    ATA_PASSWORD,
                    &config.device_path,
                ],
                &controls.cancel,
            )
            .await
    }

    /// Device-side completion is out of band; the engine reports
    /// success once the reboot command is delivered.
    async fn android_factory_reset(
        &self,
        config: &WipeConfig,
        sink: &ProgressSink,
    ) -> Result<(), WipeError> {
        let serial = config.identity().to_string();

        sink.emit(self.status_event(
            config,
            &format!("Executing Android Factory Reset (NIST Clear) on device {serial}..."),
        ))
        .await;

        let output = self
            .commander
            .output("adb", &["-s", &serial, "reboot", "recovery"])
            .await?;
        if !output.success {
            return Err(WipeError::ExternalTool {
                tool: "adb".to_string(),
                output: output.combined(),
            });
        }

        sink.emit(self.status_event(
            config,
            "Reboot to recovery command sent. The device will now perform a factory reset.",
        ))
        .await;

        Ok(())
    }

    async fn overwrite(
        &self,
        config: &WipeConfig,
        controls: &mut JobControls,
        sink: &ProgressSink,
        passes: u32,
        patterns: &[u8],
    ) -> Result<(), WipeError> {
        for pass in 1..=passes {
            let pattern = patterns[((pass - 1) as usize) % patterns.len()];
            let mut event = self.status_event(
                config,
                &format!("Executing Pass {pass}/{passes} (Pattern: 0x{pattern:02X})..."),
            );
            event.percent = (pass - 1) as f64 * 100.0 / passes as f64;
            event.current_pass = pass;
            event.total_passes = passes;
            sink.emit(event).await;

            self.overwrite_pass(config, controls, sink, pattern, pass, passes)
                .await?;
        }
        Ok(())
    }

    /// One full-device sequential write of a single pattern.
    async fn overwrite_pass(
        &self,
        config: &WipeConfig,
        controls: &mut JobControls,
        sink: &ProgressSink,
        pattern: u8,
        pass: u32,
        total_passes: u32,
    ) -> Result<(), WipeError> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&config.device_path)
            .await?;

        let size = file.seek(SeekFrom::End(0)).await?;
        file.seek(SeekFrom::Start(0)).await?;
        info!(pass, size, pattern, "Starting overwrite pass");

        let buffer = vec![pattern; WRITE_BUFFER_SIZE];
        let mut written: u64 = 0;
        let started = Instant::now();
        let throttle = EmitThrottle::new(SAMPLE_INTERVAL);

        while written < size {
            if controls.cancel.is_cancelled() {
                return Err(WipeError::Aborted);
            }

            controls.wait_if_paused().await;
            // An abort may have arrived while paused
            if controls.cancel.is_cancelled() {
                return Err(WipeError::Aborted);
            }

            match file.write(&buffer).await {
                // The write rounded past the last block: the natural
                // end of the device.
                Ok(0) => break,
                Ok(n) => written += n as u64,
                Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => break,
                Err(e) => return Err(WipeError::Io(e)),
            }

            if throttle.should_emit() {
                self.sample_progress(config, sink, pass, total_passes, written, size, &started);
            }
        }

        file.flush().await?;

        let mut event =
            self.status_event(config, &format!("Pass {pass}/{total_passes} complete"));
        event.percent = pass as f64 * 100.0 / total_passes as f64;
        event.current_pass = pass;
        event.total_passes = total_passes;
        event.bytes_written = written;
        sink.emit(event).await;

        Ok(())
    }

    fn sample_progress(
        &self,
        config: &WipeConfig,
        sink: &ProgressSink,
        pass: u32,
        total_passes: u32,
        written: u64,
        size: u64,
        started: &Instant,
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 || size == 0 {
            return;
        }

        let bytes_per_sec = written as f64 / elapsed;
        let remaining = size.saturating_sub(written);
        let eta_seconds = if bytes_per_sec > 0.0 {
            (remaining as f64 / bytes_per_sec) as u64
        } else {
            0
        };

        let pass_fraction = (written as f64 / size as f64).min(1.0);
        let percent = ((pass - 1) as f64 + pass_fraction) * 100.0 / total_passes as f64;

        let mut event = self.status_event(config, &format!("Pass {pass}/{total_passes}"));
        event.percent = percent;
        event.current_pass = pass;
        event.total_passes = total_passes;
        event.speed_mbps = Some(bytes_per_sec / (1024.0 * 1024.0));
        event.eta_seconds = Some(eta_seconds);
        event.bytes_written = written;
        sink.sample(event);
    }

    fn status_event(&self, config: &WipeConfig, status: &str) -> ProgressEvent {
        let mut event = ProgressEvent::new(
            config.identity(),
            &config.method,
            registry::display_name(&config.method),
        );
        event.device_model = config.device_model.clone();
        event.status = status.to_string();
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_schedule_cycles() {
        let schedule: Vec<u8> = (1..=5u32)
            .map(|pass| OVERWRITE_PATTERNS[((pass - 1) as usize) % OVERWRITE_PATTERNS.len()])
            .collect();
        assert_eq!(schedule, vec![0x00, 0xFF, 0x55, 0x00, 0xFF]);
    }

    #[test]
    fn two_pass_schedule_is_pattern_and_complement() {
        assert_eq!(TWO_PASS_PATTERNS, [0x55, 0xAA]);
    }

    #[test]
    fn identity_prefers_serial_for_android() {
        let config = WipeConfig {
            device_path: String::new(),
            method: registry::ANDROID_FACTORY_RESET.to_string(),
            device_serial: Some("R58M123ABC".to_string()),
            device_type: Some("Android".to_string()),
            device_model: None,
        };
        assert_eq!(config.identity(), "R58M123ABC");

        let config = WipeConfig {
            device_path: "/dev/sdb".to_string(),
            method: registry::OVERWRITE_1_PASS.to_string(),
            device_serial: None,
            device_type: None,
            device_model: None,
        };
        assert_eq!(config.identity(), "/dev/sdb");
    }
}
