//! `take-screenshot`: capture the page and optionally save it on the server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::protocol::{ContentItem, ToolCallResult};
use crate::tools::{Component, PageTool, ToolContext, ToolDescriptor};

/// Tool name.
pub const NAME: &str = "take-screenshot";

/// Server method the page calls to persist a capture.
pub const SAVE_METHOD: &str = "saveScreenshot";

/// Server half of the tool; saved files go under `screenshots_dir`.
pub fn descriptor(screenshots_dir: PathBuf) -> ToolDescriptor {
    ToolDescriptor::new(
        NAME,
        "Capture a screenshot of the shared screen via browser screen sharing",
    )
    .with_server_method(SAVE_METHOD, move |params: Value| {
        let dir = screenshots_dir.clone();
        async move { save_screenshot(&dir, params).await }
    })
}

/// What the capture component hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedScreenshot {
    /// `data:image/<ext>;base64,<data>`.
    pub data_url: String,
    /// Encoder quality the user picked.
    pub quality: f64,
    /// Whether the user asked to keep a copy on disk.
    pub save_to_disk: bool,
}

/// Page component able to grab the current screen.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Capture one frame.
    async fn capture_screenshot(&self) -> Result<CapturedScreenshot>;
}

#[derive(Debug, Deserialize)]
struct SavedScreenshot {
    path: String,
}

/// Page half of the tool.
pub struct TakeScreenshotTool {
    capture: Arc<dyn ScreenCapture>,
}

impl TakeScreenshotTool {
    /// Capture through `capture`.
    pub fn new(capture: Arc<dyn ScreenCapture>) -> Self {
        Self { capture }
    }
}

#[async_trait]
impl PageTool for TakeScreenshotTool {
    fn name(&self) -> &str {
        NAME
    }

    async fn call(&self, ctx: ToolContext, _params: Value) -> Result<Value> {
        let capture = ctx.require_component::<Arc<dyn ScreenCapture>>()?;
        let shot = capture.capture_screenshot().await?;

        let base64_data = shot
            .data_url
            .split_once(',')
            .map(|(_, data)| data.to_owned())
            .unwrap_or_default();

        let saved_path = if shot.save_to_disk {
            let saved: SavedScreenshot = ctx
                .server()
                .call_as(SAVE_METHOD, &json!({ "dataUrl": shot.data_url }))
                .await?;
            Some(saved.path)
        } else {
            None
        };

        let text = match saved_path {
            Some(path) => format!(
                "Screenshot of current browser tab captured (quality: {}, saved to: {})",
                shot.quality, path
            ),
            None => format!(
                "Screenshot of current browser tab captured (quality: {})",
                shot.quality
            ),
        };

        ToolCallResult::new(vec![
            ContentItem::text(text),
            ContentItem::image(base64_data, "image/jpeg"),
        ])
        .into_value()
    }

    fn component(&self) -> Option<Component> {
        Some(Arc::new(Arc::clone(&self.capture)) as Component)
    }
}

/// Split `data:image/<ext>;base64,<data>`.
fn parse_image_data_url(data_url: &str) -> Option<(&str, &str)> {
    let (ext, data) = data_url
        .strip_prefix("data:image/")?
        .split_once(";base64,")?;
    let ext_ok = !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    (ext_ok && !data.is_empty()).then_some((ext, data))
}

/// Decode the data URL in `params` and write it under `dir`.
pub async fn save_screenshot(dir: &Path, params: Value) -> Result<Value> {
    let data_url = params.get("dataUrl").and_then(Value::as_str).unwrap_or_default();
    let (ext, data) = parse_image_data_url(data_url)
        .ok_or_else(|| Error::HandlerFailure("Invalid image data URL format".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::HandlerFailure(format!("Invalid image data: {e}")))?;

    let dir = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(dir)
    };
    let timestamp = chrono::Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let path = dir.join(format!("screenshot-{timestamp}.{ext}"));

    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(&path, &bytes).await?;

    tracing::info!(
        "Screenshot saved: {} ({}kB)",
        path.display(),
        (bytes.len() as f64 / 1024.0).round()
    );

    Ok(json!({ "path": path.display().to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_parsing() {
        assert_eq!(
            parse_image_data_url("data:image/png;base64,AAAA"),
            Some(("png", "AAAA"))
        );
        assert_eq!(parse_image_data_url("data:text/plain;base64,AAAA"), None);
        assert_eq!(parse_image_data_url("data:image/png,AAAA"), None);
        assert_eq!(parse_image_data_url("data:image/;base64,AAAA"), None);
    }

    #[tokio::test]
    async fn saves_decoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let result = save_screenshot(
            dir.path(),
            json!({ "dataUrl": "data:image/jpeg;base64,aGVsbG8=" }),
        )
        .await
        .unwrap();

        let path = PathBuf::from(result["path"].as_str().unwrap());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpeg"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("screenshot-") && !n.contains(':')));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn rejects_bad_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_screenshot(dir.path(), json!({ "dataUrl": "nope" }))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid image data URL format");
    }
}
