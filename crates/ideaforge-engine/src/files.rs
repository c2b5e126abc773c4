use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ideaforge_contracts::views::{DataUrl, ModelView, ViewSet};

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn read_image_as_data_url(path: &Path) -> Result<DataUrl> {
    let mime = mime_for_path(path)
        .with_context(|| format!("unsupported image type: {}", path.display()))?;
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok(DataUrl::from_bytes(mime, &bytes))
}

/// Lowercase, with every non-alphanumeric ASCII character replaced by `_`.
pub fn sanitize_idea(idea: &str) -> String {
    idea.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn view_file_name(idea: &str, view: ModelView, image: &DataUrl) -> String {
    format!("{}_{}.{}", sanitize_idea(idea), view.as_str(), image.extension())
}

pub fn upload_file_name(position: usize, image: &DataUrl) -> String {
    format!("uploaded_angle_{}.{}", position + 1, image.extension())
}

pub fn write_image(dir: &Path, file_name: &str, image: &DataUrl) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed creating {}", dir.display()))?;
    let bytes = image
        .decode()
        .with_context(|| format!("cannot decode image for {file_name}"))?;
    let path = dir.join(file_name);
    fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

/// Writes every present view in front, left, right, back order.
pub fn download_views(dir: &Path, idea: &str, images: &ViewSet) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for view in ModelView::ALL {
        let Some(image) = images.get(view) else {
            continue;
        };
        written.push(write_image(dir, &view_file_name(idea, view, image), image)?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ideaforge_contracts::views::{DataUrl, ModelView, ViewSet};

    use super::{
        download_views, mime_for_path, read_image_as_data_url, sanitize_idea, upload_file_name,
    };

    #[test]
    fn sanitize_matches_download_naming() {
        assert_eq!(sanitize_idea("A Ghost-Lamp, v2!"), "a_ghost_lamp__v2_");
        assert_eq!(sanitize_idea("crème"), "cr_me");
    }

    #[test]
    fn mime_comes_from_extension() {
        assert_eq!(mime_for_path(Path::new("x.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("x.txt")), None);
    }

    #[test]
    fn download_skips_missing_views() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut images = ViewSet::with_front(DataUrl::from_bytes("image/png", b"front"));
        images.set(ModelView::Back, DataUrl::from_bytes("image/jpeg", b"back"));

        let written = download_views(temp.path(), "Moon Fox", &images)?;
        let names: Vec<String> = written
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["moon_fox_front.png", "moon_fox_back.jpeg"]);
        assert_eq!(std::fs::read(&written[1])?, b"back");
        Ok(())
    }

    #[test]
    fn upload_reads_back_as_data_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("shot.webp");
        std::fs::write(&path, b"webp-bytes")?;
        let image = read_image_as_data_url(&path)?;
        assert_eq!(image.mime_type(), "image/webp");
        assert_eq!(image.decode()?, b"webp-bytes");
        assert_eq!(upload_file_name(0, &image), "uploaded_angle_1.webp");
        assert!(read_image_as_data_url(&temp.path().join("notes.txt")).is_err());
        Ok(())
    }
}
