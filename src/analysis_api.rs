use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const ANALYSIS_SERVER_PORT: u16 = 5000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub const STATUS_SUCCESS: &str = "success";

/// Minimal `{status, message}` envelope every analysis-server response
/// carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiStatus {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Responses that hand back a path to a file the server wrote (snapshots and
/// image transforms).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedImageResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCameraRequest {
    pub camera_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    pub magnification: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageListFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListImagesRequest {
    pub path: String,
    #[serde(default)]
    pub filters: ImageListFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListImagesResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
}

/// Analysis endpoints return their metric tables alongside the status
/// envelope; the table shapes differ per analysis, so they are kept as
/// structured JSON for the view layer to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub results: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PorosityAnalysisRequest {
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threshold: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseAnalysisRequest {
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_intensity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_intensity: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodularityAnalysisRequest {
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<f64>,
}

/// The single-image transform endpoints, all of the shape
/// `POST {imagePath} -> {status, filepath}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageTransform {
    LowpassFilter,
    MedianFilter,
    EdgeDetect,
    EdgeEmphasis,
    Threshold,
    Grayscale,
    Invert,
    Thin,
    ImageSharpen,
}

impl ImageTransform {
    pub fn endpoint_path(self) -> &'static str {
        match self {
            ImageTransform::LowpassFilter => "api/lowpass-filter",
            ImageTransform::MedianFilter => "api/median-filter",
            ImageTransform::EdgeDetect => "api/edge-detect",
            ImageTransform::EdgeEmphasis => "api/edge-emphasis",
            ImageTransform::Threshold => "api/threshold",
            ImageTransform::Grayscale => "api/grayscale",
            ImageTransform::Invert => "api/invert",
            ImageTransform::Thin => "api/thin",
            ImageTransform::ImageSharpen => "api/image-sharpen",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagePathBody<'a> {
    image_path: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct PathBody<'a> {
    path: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ResolutionBody<'a> {
    resolution: &'a str,
}

/// One method per consumed analysis-server endpoint. Error bodies still carry
/// the `{status, message}` envelope, so responses are decoded regardless of
/// the HTTP status code.
pub struct AnalysisClient {
    base: Url,
    http: reqwest::Client,
}

impl AnalysisClient {
    pub fn new(base: Url) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build analysis server HTTP client")?;
        Ok(Self { base, http })
    }

    pub fn local() -> anyhow::Result<Self> {
        let base = Url::parse(&format!("http://127.0.0.1:{ANALYSIS_SERVER_PORT}"))
            .context("Failed to build analysis server base URL")?;
        Self::new(base)
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Failed to build analysis server URL for {path}"))
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> anyhow::Result<R> {
        let url = self.endpoint(path)?;
        let response = self.http.get(url.clone()).send().await?;
        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to decode response from {url}"))
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> anyhow::Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self.http.post(url.clone()).json(body).send().await?;
        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to decode response from {url}"))
    }

    pub async fn health(&self) -> anyhow::Result<HealthResponse> {
        self.get_json("api/health").await
    }

    pub async fn start_camera(&self, camera_type: &str) -> anyhow::Result<ApiStatus> {
        self.post_json(
            "api/start-camera",
            &StartCameraRequest {
                camera_type: camera_type.to_string(),
            },
        )
        .await
    }

    pub async fn stop_camera(&self) -> anyhow::Result<ApiStatus> {
        self.post_json("api/stop-camera", &serde_json::json!({})).await
    }

    pub async fn set_camera_resolution(&self, resolution: &str) -> anyhow::Result<ApiStatus> {
        self.post_json("api/set-camera-resolution", &ResolutionBody { resolution })
            .await
    }

    pub async fn take_snapshot(&self, request: &SnapshotRequest) -> anyhow::Result<SavedImageResponse> {
        self.post_json("api/snapshot", request).await
    }

    pub async fn list_images(&self, request: &ListImagesRequest) -> anyhow::Result<ListImagesResponse> {
        self.post_json("api/list-images", request).await
    }

    pub async fn delete_image(&self, path: &str) -> anyhow::Result<ApiStatus> {
        self.post_json("api/delete-image", &PathBody { path }).await
    }

    pub async fn apply_transform(
        &self,
        transform: ImageTransform,
        image_path: &str,
    ) -> anyhow::Result<SavedImageResponse> {
        self.post_json(transform.endpoint_path(), &ImagePathBody { image_path })
            .await
    }

    pub async fn analyze_porosity(
        &self,
        request: &PorosityAnalysisRequest,
    ) -> anyhow::Result<AnalysisResponse> {
        self.post_json("api/porosity/analyze", request).await
    }

    pub async fn analyze_phase(
        &self,
        request: &PhaseAnalysisRequest,
    ) -> anyhow::Result<AnalysisResponse> {
        self.post_json("api/phase/analyze", request).await
    }

    pub async fn analyze_inclusions(&self, image_path: &str) -> anyhow::Result<AnalysisResponse> {
        self.post_json("api/analyze-inclusion", &ImagePathBody { image_path })
            .await
    }

    pub async fn analyze_nodularity(
        &self,
        request: &NodularityAnalysisRequest,
    ) -> anyhow::Result<AnalysisResponse> {
        self.post_json("api/nodularity/analyze", request).await
    }
}

/// Polls the health endpoint until the server answers or the deadline
/// passes. Used only to signal readiness to the window; it never restarts
/// anything.
pub async fn wait_for_health(
    client: &AnalysisClient,
    timeout: Duration,
) -> anyhow::Result<HealthResponse> {
    let deadline = std::time::Instant::now() + timeout;

    while std::time::Instant::now() < deadline {
        match client.health().await {
            Ok(health) if health.status == STATUS_SUCCESS => return Ok(health),
            Ok(health) => {
                println!(
                    "[backend] Analysis server health returned status \"{}\".",
                    health.status
                );
            }
            Err(error) => {
                println!("[backend] Analysis server not reachable yet: {error}");
            }
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }

    anyhow::bail!(
        "Analysis server health check timed out after {} seconds.",
        timeout.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_endpoint_paths_onto_the_base_url() {
        let client = AnalysisClient::local().unwrap();
        let url = client.endpoint("api/health").unwrap();
        assert_eq!(
            url.as_str(),
            format!("http://127.0.0.1:{ANALYSIS_SERVER_PORT}/api/health")
        );
    }

    #[test]
    fn transform_variants_map_to_their_endpoints() {
        let cases = [
            (ImageTransform::LowpassFilter, "api/lowpass-filter"),
            (ImageTransform::MedianFilter, "api/median-filter"),
            (ImageTransform::EdgeDetect, "api/edge-detect"),
            (ImageTransform::EdgeEmphasis, "api/edge-emphasis"),
            (ImageTransform::Threshold, "api/threshold"),
            (ImageTransform::Grayscale, "api/grayscale"),
            (ImageTransform::Invert, "api/invert"),
            (ImageTransform::Thin, "api/thin"),
            (ImageTransform::ImageSharpen, "api/image-sharpen"),
        ];
        for (transform, path) in cases {
            assert_eq!(transform.endpoint_path(), path);
        }
    }

    #[test]
    fn transform_names_deserialize_from_kebab_case() {
        let transform: ImageTransform = serde_json::from_str("\"lowpass-filter\"").unwrap();
        assert_eq!(transform, ImageTransform::LowpassFilter);
        let transform: ImageTransform = serde_json::from_str("\"image-sharpen\"").unwrap();
        assert_eq!(transform, ImageTransform::ImageSharpen);
    }

    #[test]
    fn snapshot_request_serializes_with_camel_case_keys() {
        let request = SnapshotRequest {
            save_path: Some("/images".to_string()),
            magnification: "100x".to_string(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"savePath": "/images", "magnification": "100x"})
        );
    }

    #[test]
    fn decodes_list_images_payload() {
        let raw = r#"{
            "status": "success",
            "images": [
                {"name": "a.jpg", "path": "/imgs/a.jpg", "size": 1024, "date": "2025-01-02T03:04:05"}
            ]
        }"#;
        let response: ListImagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.status, STATUS_SUCCESS);
        assert_eq!(response.images.len(), 1);
        assert_eq!(response.images[0].name, "a.jpg");
        assert_eq!(response.images[0].size, 1024);
    }

    #[test]
    fn decodes_error_envelope_without_optional_fields() {
        let raw = r#"{"status": "error", "message": "Image not found"}"#;
        let response: SavedImageResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.status, "error");
        assert_eq!(response.message.as_deref(), Some("Image not found"));
        assert_eq!(response.filepath, None);

        let status: ApiStatus = serde_json::from_str(raw).unwrap();
        assert!(!status.is_success());
    }

    #[test]
    fn analysis_response_keeps_unmodelled_result_fields() {
        let raw = r#"{
            "status": "success",
            "porosityPercentage": 4.2,
            "pores": [{"area": 10.0}]
        }"#;
        let response: AnalysisResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.status, STATUS_SUCCESS);
        assert_eq!(
            response.results.get("porosityPercentage"),
            Some(&serde_json::json!(4.2))
        );
        assert!(response.results.contains_key("pores"));
    }
}
