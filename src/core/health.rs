//! Drive health prediction from S.M.A.R.T. telemetry.
//!
//! Telemetry comes from `smartctl -a -j`. SATA drives can additionally
//! be scored by a pretrained failure classifier; the artifact is
//! optional and every failure in the inference pipeline degrades to a
//! warning, never an error.

use crate::adapters::SystemCommander;
use crate::error::WipeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tract_onnx::prelude::*;
use tracing::{info, warn};

/// SATA attribute IDs surfaced to the UI: reallocated sectors,
/// power-on hours, wear leveling, temperature, total LBAs written.
const DISPLAY_ATTRIBUTE_IDS: [i64; 5] = [5, 9, 177, 194, 241];

/// Failure-class probability above which a drive is flagged.
const AT_RISK_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartAttribute {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub predicted_status: String,
    pub failure_probability: f32,
    pub smart_status: String,
    pub smart_attributes: HashMap<String, SmartAttribute>,
}

impl PredictionResult {
    /// Devices without a usable S.M.A.R.T. source (USB bridges, card
    /// readers) report as unavailable rather than failing the request.
    fn unavailable() -> Self {
        Self {
            predicted_status: "N/A".to_string(),
            failure_probability: 0.0,
            smart_status: "Not available".to_string(),
            smart_attributes: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SmartDocument {
    #[serde(default)]
    device: SmartDevice,
    #[serde(default)]
    smart_status: SmartStatus,
    #[serde(default)]
    ata_smart_attributes: AtaAttributes,
    #[serde(default)]
    nvme_smart_health_information_log: NvmeHealthLog,
}

#[derive(Debug, Default, Deserialize)]
struct SmartDevice {
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct SmartStatus {
    #[serde(default)]
    passed: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AtaAttributes {
    #[serde(default)]
    table: Vec<AtaAttribute>,
}

#[derive(Debug, Default, Deserialize)]
struct AtaAttribute {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: i64,
    #[serde(default)]
    raw: AtaRawValue,
}

#[derive(Debug, Default, Deserialize)]
struct AtaRawValue {
    #[serde(default)]
    value: i64,
}

#[derive(Debug, Default, Deserialize)]
struct NvmeHealthLog {
    #[serde(default)]
    temperature: i64,
    #[serde(default)]
    percentage_used: i64,
    #[serde(default)]
    data_units_written: i64,
    #[serde(default)]
    power_on_hours: i64,
}

/// Optional failure classifier; absence is expected and silent.
pub enum HealthClassifier {
    Disabled,
    Loaded(SataFailureModel),
}

impl HealthClassifier {
    pub fn load(model_path: &Path, feature_map_path: &Path) -> Self {
        match SataFailureModel::load(model_path, feature_map_path) {
            Ok(model) => {
                info!(
                    model = %model_path.display(),
                    features = model.feature_names.len(),
                    "Health classifier loaded"
                );
                HealthClassifier::Loaded(model)
            }
            Err(e) => {
                warn!(error = %e, "Health classifier unavailable");
                HealthClassifier::Disabled
            }
        }
    }
}

pub struct SataFailureModel {
    plan: TypedRunnableModel<TypedModel>,
    feature_names: Vec<String>,
}

impl SataFailureModel {
    fn load(model_path: &Path, feature_map_path: &Path) -> Result<Self, WipeError> {
        let raw = std::fs::read_to_string(feature_map_path)
            .map_err(|e| WipeError::Inference(format!("could not read feature map: {e}")))?;
        let map: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| WipeError::Inference(format!("could not parse feature map: {e}")))?;

        // The map assigns each feature name a slot "fN"; inference input
        // order is dictated by N.
        let mut feature_names = vec![String::new(); map.len()];
        for (name, slot) in map {
            let index: usize = slot
                .trim_start_matches('f')
                .parse()
                .map_err(|_| WipeError::Inference(format!("bad feature slot {slot}")))?;
            if index < feature_names.len() {
                feature_names[index] = name;
            }
        }

        let width = feature_names.len();
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| WipeError::Inference(e.to_string()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, width)))
            .map_err(|e| WipeError::Inference(e.to_string()))?
            .into_optimized()
            .map_err(|e| WipeError::Inference(e.to_string()))?
            .into_runnable()
            .map_err(|e| WipeError::Inference(e.to_string()))?;

        Ok(Self {
            plan,
            feature_names,
        })
    }

    /// Failure-class probability for one drive's attribute values.
    /// Missing features are zero-filled.
    fn predict(&self, values: &HashMap<String, i64>) -> Result<f32, WipeError> {
        let features: Vec<f32> = self
            .feature_names
            .iter()
            .map(|name| values.get(name).copied().unwrap_or(0) as f32)
            .collect();

        let input: Tensor = tract_ndarray::Array2::from_shape_vec((1, features.len()), features)
            .map_err(|e| WipeError::Inference(e.to_string()))?
            .into();

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| WipeError::Inference(e.to_string()))?;

        let probabilities = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| WipeError::Inference(e.to_string()))?;

        probabilities
            .iter()
            .last()
            .copied()
            .ok_or_else(|| WipeError::Inference("empty model output".to_string()))
    }
}

pub struct HealthMonitor {
    commander: Arc<dyn SystemCommander>,
    classifier: HealthClassifier,
}

impl HealthMonitor {
    pub fn new(commander: Arc<dyn SystemCommander>, classifier: HealthClassifier) -> Self {
        Self {
            commander,
            classifier,
        }
    }

    pub async fn predict(&self, device_path: &str) -> Result<PredictionResult, WipeError> {
        let output = match self
            .commander
            .output("smartctl", &["-a", "-j", device_path])
            .await
        {
            Ok(output) if output.success => output,
            _ => return Ok(PredictionResult::unavailable()),
        };

        let doc: SmartDocument = serde_json::from_str(&output.stdout)
            .map_err(|e| WipeError::Discovery(format!("could not parse S.M.A.R.T. data: {e}")))?;

        let mut result = PredictionResult {
            predicted_status: "Healthy".to_string(),
            failure_probability: 0.0,
            smart_status: "Passed".to_string(),
            smart_attributes: HashMap::new(),
        };

        if !doc.smart_status.passed {
            result.smart_status = "Failing".to_string();
            result.predicted_status = "At Risk".to_string();
        }

        match doc.device.kind.as_str() {
            "nvme" => {
                let log = &doc.nvme_smart_health_information_log;
                for (key, value) in [
                    ("Temperature", log.temperature),
                    ("Percentage Used", log.percentage_used),
                    ("Data Units Written", log.data_units_written),
                    ("Power On Hours", log.power_on_hours),
                ] {
                    result.smart_attributes.insert(
                        key.to_string(),
                        SmartAttribute {
                            name: key.to_string(),
                            value,
                        },
                    );
                }
            }
            "sat" => {
                for attr in &doc.ata_smart_attributes.table {
                    if DISPLAY_ATTRIBUTE_IDS.contains(&attr.id) {
                        result.smart_attributes.insert(
                            attr.name.clone(),
                            SmartAttribute {
                                name: attr.name.clone(),
                                value: attr.raw.value,
                            },
                        );
                    }
                }
                self.score_sata(&doc, &mut result);
            }
            _ => return Ok(PredictionResult::unavailable()),
        }

        Ok(result)
    }

    /// Run the classifier if it is loaded. Inference failure is logged
    /// and the S.M.A.R.T.-derived result stands.
    fn score_sata(&self, doc: &SmartDocument, result: &mut PredictionResult) {
        let HealthClassifier::Loaded(model) = &self.classifier else {
            return;
        };

        let mut values = HashMap::new();
        for attr in &doc.ata_smart_attributes.table {
            values.insert(format!("smart_{}_raw", attr.id), attr.raw.value);
            values.insert(format!("smart_{}_normalized", attr.id), attr.value);
        }

        match model.predict(&values) {
            Ok(probability) => {
                result.failure_probability = probability;
                result.predicted_status = if probability > AT_RISK_THRESHOLD {
                    "At Risk".to_string()
                } else {
                    "Healthy".to_string()
                };
            }
            Err(e) => {
                warn!(error = %e, "Health prediction failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CommandOutput, SimulatedCommander};

    const SAT_FIXTURE: &str = r#"{
        "device": {"type": "sat", "protocol": "ATA"},
        "smart_status": {"passed": true},
        "ata_smart_attributes": {"table": [
            {"id": 5, "name": "Reallocated_Sector_Ct", "value": 100, "raw": {"value": 0}},
            {"id": 9, "name": "Power_On_Hours", "value": 97, "raw": {"value": 14200}},
            {"id": 194, "name": "Temperature_Celsius", "value": 64, "raw": {"value": 36}},
            {"id": 12, "name": "Power_Cycle_Count", "value": 99, "raw": {"value": 512}}
        ]}
    }"#;

    fn monitor_with(fixture_line: &str, output: CommandOutput) -> HealthMonitor {
        let sim = SimulatedCommander::new();
        sim.script(fixture_line, output);
        HealthMonitor::new(Arc::new(sim), HealthClassifier::Disabled)
    }

    #[tokio::test]
    async fn sata_attributes_are_filtered_to_display_ids() {
        let monitor = monitor_with("smartctl -a -j /dev/sda", CommandOutput::ok(SAT_FIXTURE));

        let result = monitor.predict("/dev/sda").await.unwrap();

        assert_eq!(result.predicted_status, "Healthy");
        assert_eq!(result.smart_status, "Passed");
        assert_eq!(result.failure_probability, 0.0);
        assert_eq!(result.smart_attributes.len(), 3);
        assert_eq!(result.smart_attributes["Power_On_Hours"].value, 14200);
        assert!(!result.smart_attributes.contains_key("Power_Cycle_Count"));
    }

    #[tokio::test]
    async fn failing_smart_status_flags_the_drive() {
        let fixture = SAT_FIXTURE.replace(r#""passed": true"#, r#""passed": false"#);
        let monitor = monitor_with("smartctl -a -j /dev/sda", CommandOutput::ok(fixture));

        let result = monitor.predict("/dev/sda").await.unwrap();

        assert_eq!(result.predicted_status, "At Risk");
        assert_eq!(result.smart_status, "Failing");
    }

    #[tokio::test]
    async fn nvme_health_log_is_reported_directly() {
        let fixture = r#"{
            "device": {"type": "nvme"},
            "smart_status": {"passed": true},
            "nvme_smart_health_information_log": {
                "temperature": 41, "percentage_used": 3,
                "data_units_written": 1048576, "power_on_hours": 900
            }
        }"#;
        let monitor = monitor_with("smartctl -a -j /dev/nvme0n1", CommandOutput::ok(fixture));

        let result = monitor.predict("/dev/nvme0n1").await.unwrap();

        assert_eq!(result.predicted_status, "Healthy");
        assert_eq!(result.smart_attributes["Temperature"].value, 41);
        assert_eq!(result.smart_attributes["Percentage Used"].value, 3);
    }

    #[tokio::test]
    async fn smartctl_failure_degrades_to_unavailable() {
        let monitor = monitor_with(
            "smartctl -a -j /dev/sdq",
            CommandOutput::failed("Unable to detect device type"),
        );

        let result = monitor.predict("/dev/sdq").await.unwrap();

        assert_eq!(result.predicted_status, "N/A");
        assert_eq!(result.smart_status, "Not available");
        assert!(result.smart_attributes.is_empty());
    }

    #[tokio::test]
    async fn unknown_device_type_is_unavailable() {
        let fixture = r#"{"device": {"type": "scsi"}, "smart_status": {"passed": true}}"#;
        let monitor = monitor_with("smartctl -a -j /dev/sdr", CommandOutput::ok(fixture));

        let result = monitor.predict("/dev/sdr").await.unwrap();

        assert_eq!(result.predicted_status, "N/A");
    }

    #[test]
    fn missing_artifact_disables_the_classifier() {
        let classifier = HealthClassifier::load(
            Path::new("/nonexistent/model.onnx"),
            Path::new("/nonexistent/feature_map.json"),
        );
        assert!(matches!(classifier, HealthClassifier::Disabled));
    }
}
