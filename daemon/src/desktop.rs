/// Desktop integration outside the renderer: the static background that is
/// shown while no renderer is on screen, and the preferences front-end.
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{info, warn};

pub const BACKGROUND_SCHEMA: &str = "org.gnome.desktop.background";

/// `file://` URI for an absolute path, percent-encoding everything outside
/// the unreserved set.
pub fn file_uri(path: &Path) -> String {
    let mut uri = String::from("file://");
    for &byte in path.as_os_str().as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                uri.push(byte as char)
            }
            _ => uri.push_str(&format!("%{byte:02X}")),
        }
    }
    uri
}

/// The `gsettings set` invocations that make `path` the desktop background.
pub fn background_settings(path: &Path) -> [(&'static str, String); 3] {
    let uri = file_uri(path);
    [
        ("picture-uri", uri.clone()),
        ("picture-uri-dark", uri),
        ("picture-options", "zoom".to_string()),
    ]
}

async fn gsettings_set(key: &str, value: &str) -> Result<()> {
    let status = Command::new("gsettings")
        .args(["set", BACKGROUND_SCHEMA, key, value])
        .stdin(Stdio::null())
        .status()
        .await
        .context("Failed to run gsettings")?;
    if !status.success() {
        bail!("gsettings set {key} exited with {status}");
    }
    Ok(())
}

/// Points the desktop background at `path`. Failures are logged.
pub async fn apply_background(path: &Path) -> bool {
    for (key, value) in background_settings(path) {
        if let Err(e) = gsettings_set(key, &value).await {
            warn!("[desktop] Failed to set background: {e:#}");
            return false;
        }
    }
    info!("[desktop] Background set to {}", path.display());
    true
}

/// Launches the configured preferences command without waiting for it.
/// Used when no video is configured yet.
pub fn open_preferences(command: &[String]) -> bool {
    let Some((program, args)) = command.split_first() else {
        warn!("[desktop] No video configured and no preferences_command set");
        return false;
    };
    let spawned = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(mut child) => {
            info!("[desktop] Opened preferences: {program}");
            // Reap it in the background.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            true
        }
        Err(e) => {
            warn!("[desktop] Failed to open preferences '{program}': {e}");
            false
        }
    }
}
