//! Screenshot persistence and optimization.
//!
//! Screenshot payloads arrive base64-encoded over RPC (sometimes wrapped in
//! a `data:image/...` prefix), get decoded to PNG bytes under the
//! screenshots directory named by epoch timestamp, then pass through a
//! downscaling step so vision prompts stay within model payload limits.

use base64::Engine;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use webpilot_core::{Error, Result};

/// Vision payloads above this width are downscaled before upload.
const MAX_VISION_WIDTH: u32 = 1280;

/// Base64 image data out of an MCP tool result (`result.content[0].data`).
pub fn extract_image_data(result: &Value) -> Option<String> {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|item| item.get("data"))
        .and_then(|d| d.as_str())
        .map(|s| s.to_string())
}

/// Decode a base64 payload, tolerating a `data:image/...;base64,` prefix.
pub fn decode_payload(data: &str) -> Result<Vec<u8>> {
    let encoded = if data.starts_with("data:image") {
        data.split(',').nth(1).unwrap_or(data)
    } else {
        data
    };
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Other(format!("invalid screenshot payload: {}", e)))
}

/// Persist decoded bytes under `dir`, named by epoch milliseconds.
pub fn save_screenshot(dir: &Path, data: &str) -> Result<PathBuf> {
    let bytes = decode_payload(data)?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("screenshot_{}.png", Utc::now().timestamp_millis()));
    std::fs::write(&path, bytes)?;
    debug!(path = %path.display(), "screenshot saved");
    Ok(path)
}

/// Downscale a screenshot for vision consumption. Best-effort: anything
/// that fails to decode or re-encode leaves the original file in play, so a
/// broken optimizer can never block recovery.
pub fn optimize_for_vision(path: &Path) -> PathBuf {
    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "screenshot not optimizable, using original");
            return path.to_path_buf();
        }
    };

    if img.width() <= MAX_VISION_WIDTH {
        return path.to_path_buf();
    }

    let resized = img.resize(
        MAX_VISION_WIDTH,
        u32::MAX,
        image::imageops::FilterType::Triangle,
    );

    let optimized = optimized_path(path);
    match resized.save(&optimized) {
        Ok(()) => {
            debug!(
                path = %optimized.display(),
                width = resized.width(),
                "screenshot optimized for vision"
            );
            optimized
        }
        Err(e) => {
            warn!(error = %e, "failed to write optimized screenshot, using original");
            path.to_path_buf()
        }
    }
}

fn optimized_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("screenshot");
    path.with_file_name(format!("{}_opt.png", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ONE_PIXEL_PNG: &str =
        "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

    #[test]
    fn test_decode_plain_and_data_url_payloads() {
        let plain = decode_payload(ONE_PIXEL_PNG).unwrap();
        let wrapped =
            decode_payload(&format!("data:image/png;base64,{}", ONE_PIXEL_PNG)).unwrap();
        assert_eq!(plain, wrapped);
        assert_eq!(&plain[1..4], b"PNG");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_payload("!!! not base64 !!!").is_err());
    }

    #[test]
    fn test_save_screenshot_writes_png() {
        let dir = TempDir::new().unwrap();
        let path = save_screenshot(dir.path(), ONE_PIXEL_PNG).unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("screenshot_"));
    }

    #[test]
    fn test_optimize_small_image_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = save_screenshot(dir.path(), ONE_PIXEL_PNG).unwrap();
        assert_eq!(optimize_for_vision(&path), path);
    }

    #[test]
    fn test_optimize_tolerates_non_image_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert_eq!(optimize_for_vision(&path), path);
    }
}
