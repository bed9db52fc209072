use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ShareError;
use crate::media::MediaStream;

/// Platform display-capture request (video only, no audio).
#[async_trait]
pub trait DisplayCapture: Send + Sync {
    /// Returns `CaptureDenied` when the user or OS refuses.
    async fn request_display(&self) -> Result<MediaStream, ShareError>;
}

/// Acquires a capture and insists it is a whole screen.
#[derive(Clone)]
pub struct CaptureSource {
    backend: Arc<dyn DisplayCapture>,
}

impl CaptureSource {
    pub fn new(backend: Arc<dyn DisplayCapture>) -> Self {
        CaptureSource { backend }
    }

    pub async fn acquire(&self) -> Result<MediaStream, ShareError> {
        let stream = self.backend.request_display().await?;
        let label = stream
            .tracks()
            .first()
            .map(|t| t.label())
            .unwrap_or_default();
        if !is_full_screen(&label) {
            stream.stop_all();
            return Err(ShareError::CaptureRejected { label });
        }
        Ok(stream)
    }
}

/// Screen captures are labelled like "screen:0:0" or "Entire screen";
/// windows and tabs are not.
fn is_full_screen(label: &str) -> bool {
    label.to_lowercase().contains("screen")
}
