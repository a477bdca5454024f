use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tauri::{AppHandle, Manager};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const SETTINGS_FILE_NAME: &str = "camera-settings.json";

/// Camera selection persisted across sessions. Written by the configuration
/// view, read back at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSettings {
    pub camera: String,
    pub resolution: String,
    pub timestamp: String,
}

pub(crate) fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn settings_file(app: &AppHandle) -> Result<PathBuf, String> {
    let app_data_dir = app
        .path()
        .app_data_dir()
        .map_err(|error| format!("Failed to resolve app data directory: {error}"))?;
    fs::create_dir_all(&app_data_dir)
        .map_err(|error| format!("Failed to create app data directory: {error}"))?;
    Ok(app_data_dir.join(SETTINGS_FILE_NAME))
}

pub(crate) fn read_settings_file(path: &Path) -> anyhow::Result<Option<CameraSettings>> {
    if !path.is_file() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let settings = serde_json::from_str::<CameraSettings>(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(settings))
}

pub(crate) fn write_settings_file(path: &Path, settings: &CameraSettings) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(settings)
        .context("Failed to serialize camera settings")?;
    fs::write(path, format!("{body}\n"))
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub(crate) fn load(app: &AppHandle) -> Result<Option<CameraSettings>, String> {
    let path = settings_file(app)?;
    read_settings_file(&path).map_err(|error| error.to_string())
}

/// Stamps the record with the save time so the views can tell which
/// selection is current.
pub(crate) fn save(app: &AppHandle, camera: &str, resolution: &str) -> Result<CameraSettings, String> {
    let path = settings_file(app)?;
    let settings = CameraSettings {
        camera: camera.to_string(),
        resolution: resolution.to_string(),
        timestamp: now_iso(),
    };
    write_settings_file(&path, &settings).map_err(|error| error.to_string())?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_file() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("metallograph-settings-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(SETTINGS_FILE_NAME)
    }

    #[test]
    fn round_trips_the_settings_record() {
        let path = scratch_file();
        let settings = CameraSettings {
            camera: "HIKERBOT".to_string(),
            resolution: "1920x1080".to_string(),
            timestamp: now_iso(),
        };

        write_settings_file(&path, &settings).unwrap();
        let loaded = read_settings_file(&path).unwrap();
        assert_eq!(loaded, Some(settings));

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn missing_file_reads_as_no_settings() {
        let path = scratch_file();
        assert_eq!(read_settings_file(&path).unwrap(), None);
        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn corrupt_file_reports_a_parse_error() {
        let path = scratch_file();
        fs::write(&path, "{not json").unwrap();
        assert!(read_settings_file(&path).is_err());
        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let settings = CameraSettings {
            camera: "USB".to_string(),
            resolution: "1280x720".to_string(),
            timestamp: "2025-06-01T12:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "camera": "USB",
                "resolution": "1280x720",
                "timestamp": "2025-06-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn now_iso_is_rfc3339_formatted() {
        let stamp = now_iso();
        assert!(stamp.contains('T'));
        assert!(stamp.ends_with('Z'));
    }
}
