use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tauri::{AppHandle, Manager};

use crate::supervisor::BackendDescriptor;

pub(crate) const SEARCH_PATH_VAR: &str = "PATH";
const BACKEND_BIN_ENV: &str = "METALLOGRAPH_SERVER_BIN";
const DEV_SERVER_SCRIPT: &str = "camera_server.py";

#[cfg(target_os = "windows")]
const SERVER_BINARY_NAME: &str = "camera-server.exe";
#[cfg(not(target_os = "windows"))]
const SERVER_BINARY_NAME: &str = "camera-server";

#[cfg(target_os = "windows")]
const DEV_PYTHON: &str = "python";
#[cfg(not(target_os = "windows"))]
const DEV_PYTHON: &str = "python3";

/// Copy of the host search path with `dir` prepended as the single extra
/// entry, so the spawned server resolves its native camera libraries before
/// anything else on the path.
pub(crate) fn prepend_search_path(existing: Option<OsString>, dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = &existing {
        paths.extend(std::env::split_paths(existing));
    }

    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

/// Development launch plan: the interpreter plus the source-tree server
/// script. No existence check and no search-path injection, matching how the
/// server is run straight from a checkout.
pub(crate) fn resolve_development(project_root: &Path) -> BackendDescriptor {
    let backend_dir = project_root.join("backend");
    BackendDescriptor {
        program: PathBuf::from(DEV_PYTHON),
        args: vec![backend_dir.join(DEV_SERVER_SCRIPT).display().to_string()],
        working_directory: backend_dir,
        library_search_dir: None,
    }
}

/// Packaged launch plan: the bundled server binary next to the app resources,
/// with the resource directory prepended to the search path so the bundled
/// camera-vendor library wins over any system copy.
pub(crate) fn resolve_packaged(resource_dir: &Path) -> Result<BackendDescriptor, String> {
    let executable = resource_dir.join(SERVER_BINARY_NAME);
    if !executable.is_file() {
        return Err(format!(
            "Analysis server executable not found at \"{}\". Please ensure the application is properly installed.",
            executable.display()
        ));
    }

    Ok(BackendDescriptor {
        program: executable,
        args: Vec::new(),
        working_directory: resource_dir.to_path_buf(),
        library_search_dir: Some(resource_dir.to_path_buf()),
    })
}

pub(crate) fn descriptor_for_binary(binary: PathBuf) -> BackendDescriptor {
    let containing_dir = binary
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    BackendDescriptor {
        program: binary,
        args: Vec::new(),
        library_search_dir: Some(containing_dir.clone()),
        working_directory: containing_dir,
    }
}

/// Resolves a fresh launch plan: explicit binary override first, then the
/// source tree in debug builds, then the bundled binary.
pub(crate) fn resolve_backend(app: &AppHandle) -> Result<BackendDescriptor, String> {
    if let Ok(from_env) = std::env::var(BACKEND_BIN_ENV) {
        let trimmed = from_env.trim();
        if !trimmed.is_empty() {
            return Ok(descriptor_for_binary(PathBuf::from(trimmed)));
        }
    }

    let resource_dir = app
        .path()
        .resource_dir()
        .map_err(|error| format!("Failed to resolve app resource directory: {error}"))?;

    if cfg!(debug_assertions) {
        Ok(resolve_development(&development_project_root(&resource_dir)))
    } else {
        resolve_packaged(&resource_dir)
    }
}

// In debug builds the resource dir is target/debug inside the project, so the
// checkout root is two levels up.
fn development_project_root(resource_dir: &Path) -> PathBuf {
    resource_dir
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("metallograph-paths-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn prepends_exactly_one_search_path_entry() {
        let original = std::env::join_paths([
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/usr/bin"),
        ])
        .unwrap();
        let injected = Path::new("/opt/camera/runtime");

        let combined = prepend_search_path(Some(original.clone()), injected);
        let entries = std::env::split_paths(&combined).collect::<Vec<_>>();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], injected);
        assert_eq!(
            &entries[1..],
            std::env::split_paths(&original).collect::<Vec<_>>().as_slice()
        );
    }

    #[test]
    fn prepend_handles_missing_host_search_path() {
        let injected = Path::new("/opt/camera/runtime");
        let combined = prepend_search_path(None, injected);
        let entries = std::env::split_paths(&combined).collect::<Vec<_>>();
        assert_eq!(entries, vec![injected.to_path_buf()]);
    }

    #[test]
    fn packaged_resolution_joins_the_expected_binary_path() {
        let resources = scratch_dir();
        fs::write(resources.join(SERVER_BINARY_NAME), b"").unwrap();

        let descriptor = resolve_packaged(&resources).unwrap();
        assert_eq!(descriptor.program, resources.join(SERVER_BINARY_NAME));
        assert!(descriptor.args.is_empty());
        assert_eq!(descriptor.working_directory, resources);
        assert_eq!(descriptor.library_search_dir, Some(resources.clone()));

        fs::remove_dir_all(resources).unwrap();
    }

    #[test]
    fn packaged_resolution_fails_when_binary_is_missing() {
        let resources = scratch_dir();

        let error = resolve_packaged(&resources).unwrap_err();
        assert!(error.contains(SERVER_BINARY_NAME));

        fs::remove_dir_all(resources).unwrap();
    }

    #[test]
    fn development_resolution_points_at_the_source_tree_script() {
        let root = Path::new("/work/metallograph");
        let descriptor = resolve_development(root);

        assert_eq!(descriptor.program, PathBuf::from(DEV_PYTHON));
        assert_eq!(
            descriptor.args,
            vec![root.join("backend").join(DEV_SERVER_SCRIPT).display().to_string()]
        );
        assert_eq!(descriptor.working_directory, root.join("backend"));
        assert_eq!(descriptor.library_search_dir, None);
    }

    #[test]
    fn binary_override_runs_from_its_containing_directory() {
        let descriptor = descriptor_for_binary(PathBuf::from("/opt/camera/bin/camera-server"));
        assert_eq!(descriptor.working_directory, PathBuf::from("/opt/camera/bin"));
        assert_eq!(
            descriptor.library_search_dir,
            Some(PathBuf::from("/opt/camera/bin"))
        );
    }
}
