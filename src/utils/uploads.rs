use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum_extra::extract::Multipart;
use tokio::fs;
use uuid::Uuid;

use crate::error::AppError;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub data: Bytes,
}

/// A multipart body split into text fields and non-empty files.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(format!("無法讀取上傳內容: {}", e)))?
        {
            let name = match field.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            match field.file_name().map(|s| s.to_string()) {
                Some(filename) => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("無法讀取上傳檔案: {}", e)))?;
                    if !filename.is_empty() && !data.is_empty() {
                        form.files.push(UploadedFile {
                            field: name,
                            filename,
                            data,
                        });
                    }
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("無法讀取表單欄位: {}", e)))?;
                    form.fields.push((name, text));
                }
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field == field)
    }

    pub fn files_named<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a UploadedFile> + 'a {
        self.files.iter().filter(move |f| f.field == field)
    }
}

pub fn image_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())?
        .to_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Writes an image under `<media_root>/<subdir>/` with a random name and
/// returns its public `/media/...` path. Files that are not images are
/// ignored.
pub async fn save_image(
    media_root: &Path,
    subdir: &str,
    file: &UploadedFile,
) -> Result<Option<String>, AppError> {
    let extension = match image_extension(&file.filename) {
        Some(ext) => ext,
        None => {
            log::warn!("ignoring non-image upload {}", file.filename);
            return Ok(None);
        }
    };
    let dir: PathBuf = media_root.join(subdir);
    fs::create_dir_all(&dir).await?;
    let name = format!("{}.{}", Uuid::new_v4(), extension);
    fs::write(dir.join(&name), &file.data).await?;
    Ok(Some(format!("/media/{}/{}", subdir, name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_extension_whitelist() {
        assert_eq!(image_extension("photo.JPG"), Some("jpg".to_string()));
        assert_eq!(image_extension("scan.webp"), Some("webp".to_string()));
        assert_eq!(image_extension("list.xlsx"), None);
        assert_eq!(image_extension("noext"), None);
    }

    #[tokio::test]
    async fn test_save_image_writes_under_media_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadedFile {
            field: "images".into(),
            filename: "a.png".into(),
            data: Bytes::from_static(b"\x89PNG"),
        };
        let url = save_image(dir.path(), "requisition_images", &file)
            .await
            .unwrap()
            .unwrap();
        assert!(url.starts_with("/media/requisition_images/"));
        let stored = dir
            .path()
            .join(url.trim_start_matches("/media/"));
        assert_eq!(std::fs::read(stored).unwrap(), b"\x89PNG");
    }

    #[tokio::test]
    async fn test_save_image_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadedFile {
            field: "images".into(),
            filename: "notes.txt".into(),
            data: Bytes::from_static(b"hello"),
        };
        assert_eq!(save_image(dir.path(), "x", &file).await.unwrap(), None);
    }
}
