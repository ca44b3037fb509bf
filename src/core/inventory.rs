//! Device inventory: block and mobile device enumeration.
//!
//! Publishes a consistent snapshot of attached, sanitizable devices.
//! Block devices come from `lsblk -J`; mobile devices from `adb`.
//! Failure of one sub-source never fails the other.

use crate::adapters::SystemCommander;
use crate::error::WipeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const LSBLK_COLUMNS: &str = "NAME,MODEL,SIZE,ROTA,TYPE,MOUNTPOINTS,FSTYPE,TRAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    #[serde(rename = "HDD")]
    Hdd,
    #[serde(rename = "SATA SSD")]
    SataSsd,
    #[serde(rename = "NVMe SSD")]
    Nvme,
    #[serde(rename = "USB Drive")]
    Usb,
    #[serde(rename = "Android")]
    MobileAndroid,
    #[serde(rename = "Unknown")]
    Other,
}

/// A sanitizable block device and its safety-relevant state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Canonical device node, e.g. `/dev/sdb`
    pub path: String,
    pub model: String,
    /// Size in bytes
    pub size: u64,
    #[serde(rename = "type")]
    pub class: DeviceClass,
    pub is_mounted: bool,
    pub is_frozen: bool,
    pub is_os_disk: bool,
    /// Every non-empty mountpoint on the device or its partitions
    pub mountpoints: Vec<String>,
    pub partitions: Vec<Partition>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub name: String,
    pub size: u64,
    pub fstype: Option<String>,
    pub mountpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileDevice {
    pub serial: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Snapshot returned by `GET /api/drives`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInventory {
    pub storage: Vec<Device>,
    pub mobile: Vec<MobileDevice>,
}

// lsblk emits SIZE as a number with -b on current versions, as a
// string on older ones, and null for a few virtual devices.
fn u64_or_string<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(de)? {
        None => Ok(0),
        Some(Raw::Num(n)) => Ok(n),
        Some(Raw::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct LsblkDocument {
    #[serde(default)]
    blockdevices: Vec<LsblkEntry>,
}

#[derive(Debug, Deserialize)]
struct LsblkEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, deserialize_with = "u64_or_string")]
    size: u64,
    #[serde(default)]
    rota: bool,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    children: Vec<LsblkEntry>,
}

impl LsblkEntry {
    fn classify(&self) -> DeviceClass {
        if self.tran.as_deref() == Some("usb") {
            DeviceClass::Usb
        } else if self.name.starts_with("nvme") {
            DeviceClass::Nvme
        } else if self.rota {
            DeviceClass::Hdd
        } else {
            DeviceClass::SataSsd
        }
    }

    fn own_mountpoints(&self) -> Vec<String> {
        self.mountpoints
            .iter()
            .flatten()
            .filter(|mp| !mp.is_empty())
            .cloned()
            .collect()
    }
}

/// Node path for an lsblk entry. Absolute names are used verbatim so
/// file-backed fixtures can stand in for real devices.
fn node_path(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/dev/{name}")
    }
}

fn device_from_entry(entry: &LsblkEntry) -> Device {
    let mut mountpoints = entry.own_mountpoints();
    let mut partitions = Vec::new();

    for child in &entry.children {
        let child_mounts = child.own_mountpoints();
        mountpoints.extend(child_mounts.iter().cloned());
        partitions.push(Partition {
            name: node_path(&child.name),
            size: child.size,
            fstype: child.fstype.clone(),
            mountpoints: child_mounts,
        });
    }

    let is_os_disk = mountpoints.iter().any(|mp| mp == "/");

    Device {
        path: node_path(&entry.name),
        model: entry.model.as_deref().unwrap_or_default().trim().to_string(),
        size: entry.size,
        class: entry.classify(),
        is_mounted: !mountpoints.is_empty(),
        is_frozen: false,
        is_os_disk,
        mountpoints,
        partitions,
    }
}

/// Scan hdparm -I output for the frozen security state.
fn security_frozen(hdparm_output: &str) -> bool {
    hdparm_output.lines().any(|line| {
        let trimmed = line.trim();
        trimmed.starts_with("Security:") && trimmed.contains("frozen")
    })
}

/// Serials reported by `adb devices` in the `device` state.
fn parse_adb_serials(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

pub struct Inventory {
    commander: Arc<dyn SystemCommander>,
}

impl Inventory {
    pub fn new(commander: Arc<dyn SystemCommander>) -> Self {
        Self { commander }
    }

    /// Full snapshot. A sub-source failure degrades to a warning and an
    /// empty list for that sub-source only.
    pub async fn detect_all(&self) -> DeviceInventory {
        let storage = match self.detect_storage().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Block device enumeration failed");
                Vec::new()
            }
        };

        let mobile = match self.detect_mobile().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Mobile device enumeration failed");
                Vec::new()
            }
        };

        DeviceInventory { storage, mobile }
    }

    pub async fn detect_storage(&self) -> Result<Vec<Device>, WipeError> {
        let output = self
            .commander
            .output("lsblk", &["-J", "-b", "-o", LSBLK_COLUMNS])
            .await
            .map_err(|e| WipeError::Discovery(e.to_string()))?;

        if !output.success {
            return Err(WipeError::Discovery(format!(
                "lsblk failed: {}",
                output.combined()
            )));
        }

        let doc: LsblkDocument = serde_json::from_str(&output.stdout)
            .map_err(|e| WipeError::Discovery(format!("could not parse lsblk output: {e}")))?;

        let mut devices = Vec::new();
        for entry in &doc.blockdevices {
            if entry.kind != "disk" && entry.kind != "rom" {
                continue;
            }

            let mut device = device_from_entry(entry);
            if device.class == DeviceClass::SataSsd {
                device.is_frozen = self.probe_frozen(&device.path).await;
            }
            devices.push(device);
        }

        Ok(devices)
    }

    /// Best-effort frozen probe; failures leave the flag unset.
    async fn probe_frozen(&self, path: &str) -> bool {
        match self.commander.output("hdparm", &["-I", path]).await {
            Ok(output) if output.success => security_frozen(&output.stdout),
            Ok(output) => {
                debug!(path, output = %output.combined(), "hdparm probe failed");
                false
            }
            Err(e) => {
                debug!(path, error = %e, "hdparm probe failed");
                false
            }
        }
    }

    pub async fn detect_mobile(&self) -> Result<Vec<MobileDevice>, WipeError> {
        // A host without adb simply has no mobile devices.
        let output = match self.commander.output("adb", &["devices"]).await {
            Ok(output) if output.success => output,
            Ok(output) => {
                debug!(output = %output.combined(), "adb unavailable");
                return Ok(Vec::new());
            }
            Err(e) => {
                debug!(error = %e, "adb unavailable");
                return Ok(Vec::new());
            }
        };

        let mut devices = Vec::new();
        for serial in parse_adb_serials(&output.stdout) {
            let model = match self
                .commander
                .output(
                    "adb",
                    &["-s", &serial, "shell", "getprop", "ro.product.model"],
                )
                .await
            {
                Ok(output) if output.success => output.stdout.trim().to_string(),
                _ => {
                    warn!(serial, "Could not read device model");
                    "Unknown".to_string()
                }
            };

            devices.push(MobileDevice {
                serial,
                model,
                kind: "Android".to_string(),
            });
        }

        Ok(devices)
    }

    pub async fn find_device(&self, path: &str) -> Result<Device, WipeError> {
        self.detect_storage()
            .await?
            .into_iter()
            .find(|d| d.path == path)
            .ok_or_else(|| WipeError::NotFound(format!("device {path}")))
    }

    pub async fn find_mobile(&self, serial: &str) -> Result<MobileDevice, WipeError> {
        self.detect_mobile()
            .await?
            .into_iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| WipeError::NotFound(format!("mobile device {serial}")))
    }

    /// Unmount every non-empty mountpoint on the device and its
    /// partitions. Failures are collected into one composite error;
    /// successful unmounts are not rolled back.
    pub async fn unmount_device(&self, path: &str) -> Result<(), WipeError> {
        let device = self.find_device(path).await?;

        let mut failures = Vec::new();
        for mountpoint in &device.mountpoints {
            match self.commander.output("umount", &[mountpoint]).await {
                Ok(output) if output.success => {
                    debug!(path, mountpoint, "Unmounted");
                }
                Ok(output) => failures.push(format!("{mountpoint}: {}", output.combined())),
                Err(e) => failures.push(format!("{mountpoint}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WipeError::ExternalTool {
                tool: "umount".to_string(),
                output: failures.join("; "),
            })
        }
    }
}
