//! Frame capture for `takeVideoFrameSnapshot`.
//!
//! The frame is first written to `snapshot-raw.png` next to the requested
//! path, then processed into the requested path. Processing is a plain copy:
//! the wallpaper is used as captured.
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use image::ImageFormat;
use loopwall_shared::bus::SNAPSHOT_LOG_MARKER;
use loopwall_shared::paths;
use tokio::process::Command;
use tracing::{info, warn};

/// Still-image formats decoded in-process; everything else goes through ffmpeg.
fn still_image_format(path: &Path) -> Option<ImageFormat> {
    match ImageFormat::from_path(path) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Gif)) => {
            Some(format)
        }
        _ => None,
    }
}

/// ffmpeg arguments that extract the first frame of `video` into `output`.
pub fn ffmpeg_args(video: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.to_string_lossy().into_owned(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-update".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "3".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

async fn decode_still(source: PathBuf, raw: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let img = image::open(&source)
            .with_context(|| format!("Failed to decode {}", source.display()))?;
        img.save_with_format(&raw, ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", raw.display()))
    })
    .await
    .context("Image decode task panicked")?
}

async fn extract_with_ffmpeg(video: &Path, raw: &Path) -> Result<()> {
    let output = Command::new("ffmpeg")
        .args(ffmpeg_args(video, raw))
        .stdin(Stdio::null())
        .output()
        .await
        .context("Failed to run ffmpeg")?;
    if !output.status.success() {
        bail!(
            "ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    if !raw.exists() {
        bail!("ffmpeg produced no frame");
    }
    Ok(())
}

/// Captures a frame of `video` and writes the processed PNG to `target`.
pub async fn capture_frame(video: &Path, target: &Path) -> Result<()> {
    if !video.is_file() {
        bail!("video not found: {}", video.display());
    }
    let raw = paths::raw_snapshot_path_for(target);
    if let Some(dir) = raw.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    match still_image_format(video) {
        Some(format) => {
            info!("{SNAPSHOT_LOG_MARKER} Decoding {format:?} still {}", video.display());
            decode_still(video.to_path_buf(), raw.clone()).await?;
        }
        None => {
            info!("{SNAPSHOT_LOG_MARKER} Extracting frame from {}", video.display());
            extract_with_ffmpeg(video, &raw).await?;
        }
    }

    if raw != target {
        tokio::fs::copy(&raw, target)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    info!("{SNAPSHOT_LOG_MARKER} Snapshot written to {}", target.display());
    Ok(())
}

/// [`capture_frame`] with failures logged under the snapshot marker.
pub async fn capture_frame_logged(video: &Path, target: &Path) -> Result<()> {
    let result = capture_frame(video, target).await;
    if let Err(e) = &result {
        warn!("{SNAPSHOT_LOG_MARKER} Capture failed: {e:#}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path) {
        let img = RgbImage::from_pixel(4, 3, Rgb([200, 10, 10]));
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn still_formats_are_recognised() {
        assert_eq!(still_image_format(Path::new("a.PNG")), Some(ImageFormat::Png));
        assert_eq!(still_image_format(Path::new("a.jpg")), Some(ImageFormat::Jpeg));
        assert_eq!(still_image_format(Path::new("a.mp4")), None);
        assert_eq!(still_image_format(Path::new("noext")), None);
    }

    #[test]
    fn ffmpeg_extracts_a_single_frame() {
        let args = ffmpeg_args(Path::new("/v/a.mp4"), Path::new("/c/snapshot-raw.png"));
        let joined = args.join(" ");
        assert!(joined.contains("-i /v/a.mp4"));
        assert!(joined.contains("-frames:v 1"));
        assert!(joined.ends_with("-y /c/snapshot-raw.png"));
    }

    #[tokio::test]
    async fn still_image_is_captured_and_processed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("wallpaper.png");
        write_png(&source);
        let target = dir.path().join("cache").join("snapshot.png");

        capture_frame(&source, &target).await.unwrap();

        let raw = dir.path().join("cache").join("snapshot-raw.png");
        assert!(raw.exists());
        let img = image::open(&target).unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
        assert_eq!(std::fs::read(&raw).unwrap(), std::fs::read(&target).unwrap());
    }

    #[tokio::test]
    async fn missing_video_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = capture_frame(&dir.path().join("gone.mp4"), &dir.path().join("s.png"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn undecodable_still_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"garbage").unwrap();
        assert!(capture_frame_logged(&source, &dir.path().join("s.png")).await.is_err());
    }
}
