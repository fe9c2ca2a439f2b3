/**
 * Image Uploads
 * Validation, storage under uploads/<kind>/ and guarded removal
 */
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Storage folder for each image-bearing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Properties,
    Hero,
    Team,
    Blog,
    Avatars,
}

impl ImageKind {
    pub fn folder(self) -> &'static str {
        match self {
            ImageKind::Properties => "properties",
            ImageKind::Hero => "hero",
            ImageKind::Team => "team",
            ImageKind::Blog => "blog",
            ImageKind::Avatars => "avatars",
        }
    }

    /// Public URL prefix, `/uploads/<folder>/`.
    pub fn url_prefix(self) -> String {
        format!("/uploads/{}/", self.folder())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Unsupported file type. Allowed: JPEG, PNG, WebP, GIF.")]
    UnsupportedType,
    #[error("File too large. Maximum size is {max_mb}MB.")]
    TooLarge { max_mb: usize },
    #[error("Empty file")]
    Empty,
    #[error("File content does not match an allowed image type.")]
    ContentMismatch,
    #[error("Failed to save file: {0}")]
    Io(#[from] std::io::Error),
}

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// An uploaded file that passed validation and is waiting to be written.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub original_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Check extension, size and magic bytes.
    pub fn validate(
        original_name: &str,
        bytes: Vec<u8>,
        max_bytes: usize,
    ) -> Result<Self, UploadError> {
        let ext = original_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(UploadError::UnsupportedType);
        }
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > max_bytes {
            return Err(UploadError::TooLarge {
                max_mb: max_bytes / (1024 * 1024),
            });
        }
        let mime_type = validate_image_magic_bytes(&bytes).ok_or(UploadError::ContentMismatch)?;

        Ok(Self {
            original_name: original_name.to_string(),
            mime_type,
            bytes,
        })
    }

    /// Alt text derived from the original file name.
    pub fn default_alt(&self) -> String {
        Path::new(&self.original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.replace(['-', '_'], " "))
            .unwrap_or_default()
    }
}

fn validate_image_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Disk-backed image storage rooted at the upload directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write under a generated name and return its public URL.
    pub async fn save(&self, kind: ImageKind, upload: &ImageUpload) -> Result<String, UploadError> {
        let dir = self.root.join(kind.folder());
        tokio::fs::create_dir_all(&dir).await?;

        let filename = format!("{}.{}", Uuid::new_v4(), extension_for(upload.mime_type));
        tokio::fs::write(dir.join(&filename), &upload.bytes).await?;

        tracing::info!(
            kind = kind.folder(),
            size = upload.bytes.len(),
            "Image uploaded: {}",
            filename
        );
        Ok(format!("{}{}", kind.url_prefix(), filename))
    }

    /// Save every upload, or none: files written before a failure are
    /// removed again.
    pub async fn save_all<'a>(
        &self,
        kind: ImageKind,
        uploads: impl IntoIterator<Item = &'a ImageUpload>,
    ) -> Result<Vec<String>, UploadError> {
        let mut urls = Vec::new();
        for upload in uploads {
            match self.save(kind, upload).await {
                Ok(url) => urls.push(url),
                Err(e) => {
                    self.remove_all(kind, urls.iter().map(String::as_str)).await;
                    return Err(e);
                }
            }
        }
        Ok(urls)
    }

    /// Resolve a public URL to a path inside `uploads/<kind>/`. Anything
    /// else (other folders, nested paths, `..`) resolves to `None`.
    pub fn resolve(&self, kind: ImageKind, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(&kind.url_prefix())?;
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => {
                Some(self.root.join(kind.folder()).join(file))
            }
            _ => None,
        }
    }

    /// Delete the file behind `url` if it lives in this kind's folder.
    /// Returns whether a file was removed. Failures are logged, not raised.
    pub async fn remove(&self, kind: ImageKind, url: &str) -> bool {
        let Some(path) = self.resolve(kind, url) else {
            tracing::warn!(kind = kind.folder(), "Refusing to delete file outside upload dir: {}", url);
            return false;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Image deleted: {}", path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::error!("Failed to delete file {}: {}", path.display(), e);
                false
            }
        }
    }

    pub async fn remove_all<'a>(&self, kind: ImageKind, urls: impl IntoIterator<Item = &'a str>) {
        for url in urls {
            self.remove(kind, url).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_magic_bytes_detection() {
        assert_eq!(validate_image_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(validate_image_magic_bytes(PNG), Some("image/png"));
        assert_eq!(validate_image_magic_bytes(b"GIF89a"), Some("image/gif"));
        assert_eq!(validate_image_magic_bytes(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(validate_image_magic_bytes(b"<?php"), None);
        assert_eq!(validate_image_magic_bytes(&[0xFF]), None);
    }

    #[test]
    fn test_validate_rejects_bad_uploads() {
        assert!(matches!(
            ImageUpload::validate("shell.php", PNG.to_vec(), 1024),
            Err(UploadError::UnsupportedType)
        ));
        assert!(matches!(
            ImageUpload::validate("a.png", vec![], 1024),
            Err(UploadError::Empty)
        ));
        assert!(matches!(
            ImageUpload::validate("a.png", PNG.to_vec(), 4),
            Err(UploadError::TooLarge { .. })
        ));
        assert!(matches!(
            ImageUpload::validate("a.png", b"not an image".to_vec(), 1024),
            Err(UploadError::ContentMismatch)
        ));
        let ok = ImageUpload::validate("Front-Porch.PNG", PNG.to_vec(), 1024).unwrap();
        assert_eq!(ok.mime_type, "image/png");
        assert_eq!(ok.default_alt(), "Front Porch");
    }

    #[test]
    fn test_resolve_guards_against_traversal() {
        let store = ImageStore::new("/srv/uploads");
        assert_eq!(
            store.resolve(ImageKind::Hero, "/uploads/hero/a.jpg"),
            Some(PathBuf::from("/srv/uploads/hero/a.jpg"))
        );
        assert_eq!(store.resolve(ImageKind::Hero, "/uploads/hero/../../etc/passwd"), None);
        assert_eq!(store.resolve(ImageKind::Hero, "/uploads/team/a.jpg"), None);
        assert_eq!(store.resolve(ImageKind::Hero, "/uploads/hero/sub/a.jpg"), None);
        assert_eq!(store.resolve(ImageKind::Hero, "https://cdn.example.com/a.jpg"), None);
    }

    #[tokio::test]
    async fn test_save_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let upload = ImageUpload::validate("a.png", PNG.to_vec(), 1024).unwrap();

        let url = store.save(ImageKind::Properties, &upload).await.unwrap();
        assert!(url.starts_with("/uploads/properties/"));
        assert!(url.ends_with(".png"));

        let path = store.resolve(ImageKind::Properties, &url).unwrap();
        assert!(path.exists());
        assert!(store.remove(ImageKind::Properties, &url).await);
        assert!(!path.exists());
        assert!(!store.remove(ImageKind::Properties, &url).await);
    }
}
