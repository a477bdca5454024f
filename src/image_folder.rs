use serde::Serialize;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use walkdir::WalkDir;

const MAX_SCAN_DEPTH: usize = 2;
const MAX_SCAN_ENTRIES: usize = 2000;
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFileRow {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

pub(crate) fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .map(|extension| IMAGE_EXTENSIONS.contains(&extension.as_str()))
        .unwrap_or(false)
}

/// Bounded sweep of a picked folder for micrograph files, newest first. The
/// caps keep a mistaken pick of a huge directory tree from stalling the
/// picker command.
pub(crate) fn scan_image_folder(root: &Path) -> Result<Vec<ImageFileRow>, String> {
    if !root.is_dir() {
        return Err(format!(
            "\"{}\" is not an existing, accessible directory.",
            root.display()
        ));
    }

    let mut rows = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .max_depth(MAX_SCAN_DEPTH)
        .into_iter()
        .filter_map(Result::ok)
    {
        if rows.len() >= MAX_SCAN_ENTRIES {
            break;
        }

        if !entry.file_type().is_file() || !is_image_file(entry.path()) {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Some(name) = entry.path().file_name() else {
            continue;
        };

        rows.push(ImageFileRow {
            name: name.to_string_lossy().to_string(),
            path: entry.path().display().to_string(),
            size: metadata.len(),
            modified_at: metadata
                .modified()
                .ok()
                .map(OffsetDateTime::from)
                .and_then(|modified| modified.format(&Rfc3339).ok()),
        });
    }

    rows.sort_by(|left, right| {
        right
            .modified_at
            .cmp(&left.modified_at)
            .then_with(|| left.name.cmp(&right.name))
    });
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("metallograph-scan-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn recognizes_image_extensions_case_insensitively() {
        assert!(is_image_file(Path::new("sample.JPG")));
        assert!(is_image_file(Path::new("sample.tiff")));
        assert!(!is_image_file(Path::new("sample.txt")));
        assert!(!is_image_file(Path::new("no-extension")));
    }

    #[test]
    fn scans_only_image_files_within_the_depth_limit() {
        let root = scratch_dir();
        fs::write(root.join("a.png"), b"png").unwrap();
        fs::write(root.join("notes.txt"), b"text").unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("b.jpg"), b"jpg").unwrap();
        fs::create_dir_all(root.join("nested").join("deeper")).unwrap();
        fs::write(root.join("nested").join("deeper").join("c.jpg"), b"jpg").unwrap();

        let rows = scan_image_folder(&root).unwrap();
        let mut names = rows.iter().map(|row| row.name.clone()).collect::<Vec<_>>();
        names.sort();

        assert_eq!(names, vec!["a.png".to_string(), "b.jpg".to_string()]);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn rejects_a_missing_directory() {
        let root = scratch_dir().join("does-not-exist");
        assert!(scan_image_folder(&root).is_err());
    }
}
