//! Uploaded image gallery.
//!
//! Images are stored inline as base64 `data:` URIs in a single JSON array at
//! `gallery/images`. Content fields copy an image's URL rather than
//! referencing it, so deleting an image never touches the content document.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::GalleryError;
use crate::keys;
use crate::persist;
use crate::site::StoreContext;

/// Largest accepted upload.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Accepted MIME types.
pub const ACCEPTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// Which part of the page an image is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCategory {
    Doctor,
    Customer,
    News,
    Product,
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Doctor => "doctor",
            Self::Customer => "customer",
            Self::News => "news",
            Self::Product => "product",
        })
    }
}

impl FromStr for ImageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "doctor" => Ok(Self::Doctor),
            "customer" => Ok(Self::Customer),
            "news" => Ok(Self::News),
            "product" => Ok(Self::Product),
            other => Err(format!(
                "unknown category '{other}' (expected doctor, customer, news or product)"
            )),
        }
    }
}

/// An image in the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub id: String,
    pub name: String,
    /// `data:<mime>;base64,<payload>`
    pub url: String,
    #[serde(alias = "type")]
    pub mime_type: String,
    #[serde(alias = "size")]
    pub byte_size: usize,
    /// Epoch milliseconds.
    #[serde(alias = "uploadDate")]
    pub uploaded_at: i64,
    pub category: ImageCategory,
}

/// MIME type for a file extension, if it is an accepted image format.
#[must_use]
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// The image gallery of a site.
pub struct ImageGallery {
    ctx: StoreContext,
    /// Serializes read-modify-write cycles on the image list.
    write_lock: Mutex<()>,
}

impl ImageGallery {
    #[must_use]
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ctx,
            write_lock: Mutex::new(()),
        }
    }

    /// Validate and store an image.
    ///
    /// # Errors
    ///
    /// [`GalleryError::UnsupportedFormat`] or [`GalleryError::TooLarge`] for
    /// rejected input; [`GalleryError::Store`] if the list cannot be saved.
    pub async fn upload(
        &self,
        name: &str,
        mime: &str,
        bytes: &[u8],
        category: ImageCategory,
    ) -> Result<UploadedImage, GalleryError> {
        let mime = mime.trim().to_ascii_lowercase();
        if !ACCEPTED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(GalleryError::UnsupportedFormat { mime });
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(GalleryError::TooLarge {
                size: bytes.len(),
                max: MAX_IMAGE_BYTES,
            });
        }

        let now = self.ctx.clock.now_ms();
        let random = uuid::Uuid::new_v4().simple().to_string();
        let image = UploadedImage {
            id: format!("img_{now}_{}", &random[..9]),
            name: name.to_owned(),
            url: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
            mime_type: mime,
            byte_size: bytes.len(),
            uploaded_at: now,
            category,
        };

        let _guard = self.write_lock.lock().await;
        let mut images = self.load().await;
        images.push(image.clone());
        self.save(&images).await?;

        info!(id = %image.id, %category, size = image.byte_size, "image uploaded");
        Ok(image)
    }

    /// Images in upload order, optionally filtered by category.
    pub async fn list(&self, category: Option<ImageCategory>) -> Vec<UploadedImage> {
        let mut images = self.load().await;
        if let Some(category) = category {
            images.retain(|i| i.category == category);
        }
        images
    }

    pub async fn get(&self, id: &str) -> Option<UploadedImage> {
        self.load().await.into_iter().find(|i| i.id == id)
    }

    /// Remove an image. Returns `false` if no image has that id.
    ///
    /// # Errors
    ///
    /// [`GalleryError::Store`] if the list cannot be saved.
    pub async fn delete(&self, id: &str) -> Result<bool, GalleryError> {
        let _guard = self.write_lock.lock().await;
        let mut images = self.load().await;
        let before = images.len();
        images.retain(|i| i.id != id);
        if images.len() == before {
            return Ok(false);
        }
        self.save(&images).await?;
        info!(id, "image deleted");
        Ok(true)
    }

    async fn load(&self) -> Vec<UploadedImage> {
        let Some(value) = persist::load_value(&*self.ctx.storage, keys::GALLERY).await else {
            return Vec::new();
        };
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "stored gallery is malformed, treating it as empty");
            Vec::new()
        })
    }

    async fn save(&self, images: &[UploadedImage]) -> Result<(), GalleryError> {
        let bytes = persist::encode(keys::GALLERY, images)?;
        persist::put_with_recovery(&*self.ctx.storage, keys::GALLERY, bytes, || None).await?;
        Ok(())
    }
}

impl fmt::Debug for ImageGallery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageGallery")
            .field("instance", &self.ctx.instance)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use pagekeeper_storage::{MemoryBackend, QuotaBackend, StorageBackend};
    use std::sync::Arc;

    fn gallery_over(storage: Arc<dyn StorageBackend>) -> ImageGallery {
        ImageGallery::new(StoreContext::new(storage, Arc::new(ManualClock::new(42))))
    }

    fn gallery() -> ImageGallery {
        gallery_over(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn upload_stores_a_data_uri() {
        let g = gallery();
        let image = g
            .upload("logo.png", "image/PNG", b"\x89PNG", ImageCategory::Product)
            .await
            .unwrap();

        assert!(image.id.starts_with("img_42_"));
        assert_eq!(image.id.len(), "img_42_".len() + 9);
        assert_eq!(image.url, "data:image/png;base64,iVBORw==");
        assert_eq!(image.byte_size, 4);
        assert_eq!(g.get(&image.id).await, Some(image));
    }

    #[tokio::test]
    async fn rejects_unsupported_formats() {
        let err = gallery()
            .upload("doc.pdf", "application/pdf", b"%PDF", ImageCategory::News)
            .await
            .unwrap_err();
        assert!(matches!(err, GalleryError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn rejects_oversized_images() {
        let big = vec![0u8; MAX_IMAGE_BYTES + 1];
        let err = gallery()
            .upload("big.jpg", "image/jpeg", &big, ImageCategory::Doctor)
            .await
            .unwrap_err();
        assert!(matches!(err, GalleryError::TooLarge { max: MAX_IMAGE_BYTES, .. }));
    }

    #[tokio::test]
    async fn list_filters_by_category() {
        let g = gallery();
        g.upload("a.png", "image/png", b"a", ImageCategory::Doctor).await.unwrap();
        g.upload("b.png", "image/png", b"b", ImageCategory::Customer).await.unwrap();
        g.upload("c.png", "image/png", b"c", ImageCategory::Doctor).await.unwrap();

        assert_eq!(g.list(None).await.len(), 3);
        let doctors: Vec<String> = g
            .list(Some(ImageCategory::Doctor))
            .await
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(doctors, vec!["a.png", "c.png"]);
    }

    #[tokio::test]
    async fn delete_removes_only_the_target() {
        let g = gallery();
        let a = g.upload("a.png", "image/png", b"a", ImageCategory::News).await.unwrap();
        let b = g.upload("b.png", "image/png", b"b", ImageCategory::News).await.unwrap();

        assert!(g.delete(&a.id).await.unwrap());
        assert!(!g.delete(&a.id).await.unwrap());
        assert_eq!(g.list(None).await, vec![b]);
    }

    #[tokio::test]
    async fn malformed_list_reads_as_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put(keys::GALLERY, b"{\"not\": \"a list\"}").await.unwrap();
        let g = gallery_over(backend);
        assert!(g.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn legacy_field_names_are_accepted() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .put(
                keys::GALLERY,
                br#"[{"id":"img_1_abcdefghi","name":"x.png","url":"data:image/png;base64,","type":"image/png","size":0,"uploadDate":1,"category":"customer"}]"#,
            )
            .await
            .unwrap();
        let images = gallery_over(backend).list(None).await;
        assert_eq!(images[0].mime_type, "image/png");
        assert_eq!(images[0].uploaded_at, 1);
    }

    #[tokio::test]
    async fn full_storage_is_reported() {
        let quota = QuotaBackend::wrap(Arc::new(MemoryBackend::new()), 64).await.unwrap();
        let g = gallery_over(Arc::new(quota));
        let err = g
            .upload("a.png", "image/png", &[1u8; 100], ImageCategory::Product)
            .await
            .unwrap_err();
        assert!(matches!(err, GalleryError::Store(StoreError::StorageExhausted { .. })));
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(mime_for_extension("JPG"), Some("image/jpeg"));
        assert_eq!(mime_for_extension("webp"), Some("image/webp"));
        assert_eq!(mime_for_extension("bmp"), None);
        assert_eq!("Customer".parse::<ImageCategory>().unwrap(), ImageCategory::Customer);
    }
}
