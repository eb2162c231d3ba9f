use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AssistantError;

/// Hard ceiling on the approximate decoded size of one submission.
pub const MAX_UPLOAD_MB: f64 = 4.0;

/// One compression pass's output. Replaced wholesale on re-encode;
/// never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub base64_jpeg: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub passes: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedImage {
    pub id: Uuid,
    pub label: String,
    pub source_sha256: String,
    pub source_bytes: u64,
    pub encoded: EncodedImage,
}

impl CapturedImage {
    pub fn new(
        label: impl Into<String>,
        source_sha256: impl Into<String>,
        source_bytes: u64,
        encoded: EncodedImage,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            source_sha256: source_sha256.into(),
            source_bytes,
            encoded,
        }
    }
}

/// Ordered image selection, capacity-bounded by device class.
#[derive(Debug, Clone, Default)]
pub struct ImageBatch {
    images: Vec<CapturedImage>,
}

impl ImageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every image or none: an add that would push the batch past
    /// `limit` leaves it untouched.
    pub fn try_add(
        &mut self,
        images: Vec<CapturedImage>,
        limit: usize,
    ) -> Result<(), AssistantError> {
        if self.images.len() + images.len() > limit {
            return Err(AssistantError::BatchFull { limit });
        }
        self.images.extend(images);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<CapturedImage> {
        if index < self.images.len() {
            Some(self.images.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[CapturedImage] {
        self.images.as_slice()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|image| image.encoded.base64_jpeg.clone())
            .collect()
    }
}

/// Approximate decoded megabytes of a set of base64 payloads.
pub fn approx_decoded_mb(payloads: &[String]) -> f64 {
    let decoded_bytes: f64 = payloads
        .iter()
        .map(|payload| payload.len() as f64 * 3.0 / 4.0)
        .sum();
    decoded_bytes / (1024.0 * 1024.0)
}

/// Pre-flight budget gate. Must run after per-image compression and
/// before any network call; a failed check never reaches the wire.
pub fn check_budget(payloads: &[String]) -> Result<(), AssistantError> {
    let total_mb = approx_decoded_mb(payloads);
    if total_mb > MAX_UPLOAD_MB {
        return Err(AssistantError::PayloadTooLarge {
            total_mb,
            limit_mb: MAX_UPLOAD_MB,
        });
    }
    Ok(())
}
