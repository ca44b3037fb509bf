//! HTTP handlers. Thin translation between JSON bodies and the core
//! components; all policy lives below this layer.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::context::AppContext;
use crate::core::certificate::SignedCertificate;
use crate::core::inventory::{DeviceClass, DeviceInventory};
use crate::core::progress::ProgressSink;
use crate::core::registry::{self, WipeMethod};
use crate::core::WipeConfig;
use crate::error::WipeError;

/// Capacity of a per-job progress sink; samples beyond it are dropped.
const PROGRESS_SINK_CAPACITY: usize = 64;

pub(super) struct ApiError(WipeError);

impl From<WipeError> for ApiError {
    fn from(e: WipeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WipeError::NotFound(_) => StatusCode::NOT_FOUND,
            WipeError::SafetyRefusal(_) | WipeError::JobActive(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub(super) async fn get_drives(State(ctx): State<AppContext>) -> Json<DeviceInventory> {
    Json(ctx.inventory.detect_all().await)
}

pub(super) async fn get_drive_health(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let device_path = format!("/dev/{name}");
    let result = ctx.health.predict(&device_path).await?;
    Ok(Json(result).into_response())
}

pub(super) async fn get_wipe_methods(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WipeMethod>>, ApiError> {
    // Storage devices are keyed by path; a miss falls through to the
    // mobile list keyed by serial.
    if let Ok(device) = ctx.inventory.find_device(&format!("/dev/{id}")).await {
        return Ok(Json(registry::methods_for_class(device.class)));
    }

    ctx.inventory.find_mobile(&id).await?;
    Ok(Json(registry::methods_for_class(DeviceClass::MobileAndroid)))
}

pub(super) async fn start_wipe(
    State(ctx): State<AppContext>,
    Json(config): Json<WipeConfig>,
) -> impl IntoResponse {
    info!(device = %config.identity(), method = %config.method, "Wipe requested");

    let (sink, mut events) = ProgressSink::new(PROGRESS_SINK_CAPACITY);

    // Bridge the per-job sink onto the broadcast hub as JSON frames.
    let hub = ctx.hub.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(frame) => {
                    let _ = hub.send(frame);
                }
                Err(e) => error!(error = %e, "Could not serialize progress event"),
            }
        }
    });

    let engine = ctx.engine.clone();
    tokio::spawn(async move {
        // Failures already surfaced as a terminal event on the sink.
        let _ = engine.run(config, sink).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "Wipe process started" })),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeviceRequest {
    device_path: String,
}

pub(super) async fn pause_wipe(
    State(ctx): State<AppContext>,
    Json(req): Json<DeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let paused = ctx.supervisor.pause(&req.device_path)?;
    let status = if paused { "paused" } else { "resumed" };
    Ok(Json(json!({ "status": status })))
}

pub(super) async fn abort_wipe(
    State(ctx): State<AppContext>,
    Json(req): Json<DeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.supervisor.abort(&req.device_path)?;
    Ok(Json(json!({ "status": "abort signalled" })))
}

pub(super) async fn unmount_device(
    State(ctx): State<AppContext>,
    Json(req): Json<DeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.inventory.unmount_device(&req.device_path).await?;
    info!(device = %req.device_path, "Unmounted");
    Ok(Json(json!({ "status": "Device unmounted successfully" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CertificateRequest {
    model: String,
    serial: String,
    method: String,
    #[serde(default)]
    log_hash: Option<String>,
}

pub(super) async fn generate_certificate(
    State(ctx): State<AppContext>,
    Json(req): Json<CertificateRequest>,
) -> Result<Response, ApiError> {
    let log_hash = req.log_hash.as_deref().unwrap_or("placeholder_hash");

    let certificate = ctx
        .certificates
        .generate(&req.model, &req.serial, &req.method, log_hash)?;
    let path = ctx.certificates.persist(&certificate)?;
    info!(path = %path.display(), "Certificate persisted");

    Ok((StatusCode::CREATED, Json(certificate)).into_response())
}

pub(super) async fn list_certificates(
    State(ctx): State<AppContext>,
) -> Json<Vec<SignedCertificate>> {
    Json(ctx.certificates.list())
}
