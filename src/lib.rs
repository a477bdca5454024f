pub mod analysis_api;
mod backend_paths;
mod camera_settings;
mod image_folder;
pub mod supervisor;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tauri::{AppHandle, Emitter, Manager, State};
use uuid::Uuid;

use analysis_api::{
    AnalysisClient, AnalysisResponse, ApiStatus, HealthResponse, ListImagesRequest,
    ListImagesResponse, NodularityAnalysisRequest, PhaseAnalysisRequest, PorosityAnalysisRequest,
    SavedImageResponse, SnapshotRequest, StartCameraRequest,
};
use camera_settings::CameraSettings;
use image_folder::ImageFileRow;
use supervisor::{BackendState, BackendSupervisor, DialogNotifier};

const BACKEND_READY_TIMEOUT: Duration = Duration::from_secs(30);

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendStatusResponse {
    request_id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<BackendState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendControlResponse {
    request_id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<BackendState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FolderPickResponse {
    request_id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder: Option<String>,
    images: Vec<ImageFileRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CameraSettingsResponse {
    request_id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<CameraSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Envelope for the commands that proxy the analysis HTTP API: `ok` reports
/// whether the server answered; the decoded body (including its own
/// `status`/`message`) rides in `result`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    request_id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiEnvelope<T> {
    fn from_result(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Self {
                request_id: request_id(),
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(error) => Self {
                request_id: request_id(),
                ok: false,
                result: None,
                error: Some(format!("{error:#}")),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraSettingsPayload {
    camera: String,
    resolution: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetResolutionPayload {
    resolution: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageDeletePayload {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagePathPayload {
    image_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageTransformPayload {
    transform: analysis_api::ImageTransform,
    image_path: String,
}

#[tauri::command]
fn backend_status(supervisor: State<'_, Arc<BackendSupervisor>>) -> BackendStatusResponse {
    let request_id = request_id();
    match supervisor.state() {
        Ok(state) => BackendStatusResponse {
            request_id,
            ok: true,
            state: Some(state),
            error: None,
        },
        Err(error) => BackendStatusResponse {
            request_id,
            ok: false,
            state: None,
            error: Some(error),
        },
    }
}

#[tauri::command]
fn backend_restart(
    app: AppHandle,
    supervisor: State<'_, Arc<BackendSupervisor>>,
) -> BackendControlResponse {
    let request_id = request_id();
    let descriptor = match backend_paths::resolve_backend(&app) {
        Ok(descriptor) => descriptor,
        Err(error) => {
            supervisor.mark_failed(&error);
            return BackendControlResponse {
                request_id,
                ok: false,
                state: supervisor.state().ok(),
                error: Some(error),
            };
        }
    };

    match supervisor.restart(&descriptor) {
        Ok(_) => BackendControlResponse {
            request_id,
            ok: true,
            state: supervisor.state().ok(),
            error: None,
        },
        Err(error) => BackendControlResponse {
            request_id,
            ok: false,
            state: supervisor.state().ok(),
            error: Some(error),
        },
    }
}

#[tauri::command]
fn pick_image_folder() -> FolderPickResponse {
    let request_id = request_id();
    let Some(selected) = rfd::FileDialog::new().pick_folder() else {
        return FolderPickResponse {
            request_id,
            ok: false,
            folder: None,
            images: Vec::new(),
            cancelled: Some(true),
            error: None,
        };
    };

    match image_folder::scan_image_folder(&selected) {
        Ok(images) => FolderPickResponse {
            request_id,
            ok: true,
            folder: Some(selected.display().to_string()),
            images,
            cancelled: None,
            error: None,
        },
        Err(error) => FolderPickResponse {
            request_id,
            ok: false,
            folder: Some(selected.display().to_string()),
            images: Vec::new(),
            cancelled: None,
            error: Some(error),
        },
    }
}

#[tauri::command]
fn camera_settings_get(app: AppHandle) -> CameraSettingsResponse {
    let request_id = request_id();
    match camera_settings::load(&app) {
        Ok(settings) => CameraSettingsResponse {
            request_id,
            ok: true,
            settings,
            error: None,
        },
        Err(error) => CameraSettingsResponse {
            request_id,
            ok: false,
            settings: None,
            error: Some(error),
        },
    }
}

#[tauri::command]
fn camera_settings_save(app: AppHandle, payload: CameraSettingsPayload) -> CameraSettingsResponse {
    let request_id = request_id();
    let camera = payload.camera.trim();
    let resolution = payload.resolution.trim();

    if camera.is_empty() {
        return CameraSettingsResponse {
            request_id,
            ok: false,
            settings: None,
            error: Some("camera must be a non-empty string.".to_string()),
        };
    }
    if resolution.is_empty() || !resolution.contains('x') {
        return CameraSettingsResponse {
            request_id,
            ok: false,
            settings: None,
            error: Some("resolution must be a string like \"1920x1080\".".to_string()),
        };
    }

    match camera_settings::save(&app, camera, resolution) {
        Ok(settings) => CameraSettingsResponse {
            request_id,
            ok: true,
            settings: Some(settings),
            error: None,
        },
        Err(error) => CameraSettingsResponse {
            request_id,
            ok: false,
            settings: None,
            error: Some(error),
        },
    }
}

#[tauri::command]
async fn analysis_health() -> ApiEnvelope<HealthResponse> {
    ApiEnvelope::from_result(async { AnalysisClient::local()?.health().await }.await)
}

#[tauri::command]
async fn camera_start(payload: StartCameraRequest) -> ApiEnvelope<ApiStatus> {
    ApiEnvelope::from_result(
        async {
            AnalysisClient::local()?
                .start_camera(&payload.camera_type)
                .await
        }
        .await,
    )
}

#[tauri::command]
async fn camera_stop() -> ApiEnvelope<ApiStatus> {
    ApiEnvelope::from_result(async { AnalysisClient::local()?.stop_camera().await }.await)
}

#[tauri::command]
async fn camera_set_resolution(payload: SetResolutionPayload) -> ApiEnvelope<ApiStatus> {
    ApiEnvelope::from_result(
        async {
            AnalysisClient::local()?
                .set_camera_resolution(&payload.resolution)
                .await
        }
        .await,
    )
}

#[tauri::command]
async fn snapshot_capture(payload: SnapshotRequest) -> ApiEnvelope<SavedImageResponse> {
    ApiEnvelope::from_result(async { AnalysisClient::local()?.take_snapshot(&payload).await }.await)
}

#[tauri::command]
async fn images_list(payload: ListImagesRequest) -> ApiEnvelope<ListImagesResponse> {
    ApiEnvelope::from_result(async { AnalysisClient::local()?.list_images(&payload).await }.await)
}

#[tauri::command]
async fn image_delete(payload: ImageDeletePayload) -> ApiEnvelope<ApiStatus> {
    ApiEnvelope::from_result(
        async { AnalysisClient::local()?.delete_image(&payload.path).await }.await,
    )
}

#[tauri::command]
async fn image_transform(payload: ImageTransformPayload) -> ApiEnvelope<SavedImageResponse> {
    ApiEnvelope::from_result(
        async {
            AnalysisClient::local()?
                .apply_transform(payload.transform, &payload.image_path)
                .await
        }
        .await,
    )
}

#[tauri::command]
async fn porosity_analyze(payload: PorosityAnalysisRequest) -> ApiEnvelope<AnalysisResponse> {
    ApiEnvelope::from_result(
        async { AnalysisClient::local()?.analyze_porosity(&payload).await }.await,
    )
}

#[tauri::command]
async fn phase_analyze(payload: PhaseAnalysisRequest) -> ApiEnvelope<AnalysisResponse> {
    ApiEnvelope::from_result(async { AnalysisClient::local()?.analyze_phase(&payload).await }.await)
}

#[tauri::command]
async fn inclusion_analyze(payload: ImagePathPayload) -> ApiEnvelope<AnalysisResponse> {
    ApiEnvelope::from_result(
        async {
            AnalysisClient::local()?
                .analyze_inclusions(&payload.image_path)
                .await
        }
        .await,
    )
}

#[tauri::command]
async fn nodularity_analyze(payload: NodularityAnalysisRequest) -> ApiEnvelope<AnalysisResponse> {
    ApiEnvelope::from_result(
        async { AnalysisClient::local()?.analyze_nodularity(&payload).await }.await,
    )
}

fn start_backend_and_probe(app_handle: AppHandle) {
    let supervisor = app_handle.state::<Arc<BackendSupervisor>>().inner().clone();
    let descriptor = match backend_paths::resolve_backend(&app_handle) {
        Ok(descriptor) => descriptor,
        Err(error) => {
            eprintln!("[backend] {error}");
            supervisor.mark_failed(&error);
            return;
        }
    };

    // start() logs and raises the dialog itself on failure.
    if supervisor.start(&descriptor).is_err() {
        return;
    }

    tauri::async_runtime::spawn(async move {
        let probe = async {
            let client = AnalysisClient::local()?;
            analysis_api::wait_for_health(&client, BACKEND_READY_TIMEOUT).await
        };
        match probe.await {
            Ok(_) => {
                println!("[backend] Analysis server is ready.");
                let _ = app_handle.emit("backend-ready", ());
            }
            Err(error) => {
                eprintln!("[backend] {error:#}");
                let _ = app_handle.emit("backend-error", format!("{error:#}"));
            }
        }
    });
}

pub fn run() {
    let supervisor: Arc<BackendSupervisor> = BackendSupervisor::new(Box::new(DialogNotifier));

    tauri::Builder::default()
        .manage(supervisor)
        .setup(|app| {
            let app_handle = app.handle().clone();
            thread::spawn(move || start_backend_and_probe(app_handle));
            Ok(())
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::CloseRequested { .. } = event {
                // macOS keeps the app (and its server) alive past window close.
                if cfg!(target_os = "macos") {
                    return;
                }
                let supervisor: State<'_, Arc<BackendSupervisor>> = window.state();
                match supervisor.stop() {
                    Ok(_) => println!("[backend] Analysis server stopped with the window."),
                    Err(error) => {
                        eprintln!("[backend] Failed to stop analysis server on close: {error}")
                    }
                }
            }
        })
        .invoke_handler(tauri::generate_handler![
            backend_status,
            backend_restart,
            pick_image_folder,
            camera_settings_get,
            camera_settings_save,
            analysis_health,
            camera_start,
            camera_stop,
            camera_set_resolution,
            snapshot_capture,
            images_list,
            image_delete,
            image_transform,
            porosity_analyze,
            phase_analyze,
            inclusion_analyze,
            nodularity_analyze
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
