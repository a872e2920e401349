/// Renderer command line.
///
/// The daemon builds an argv with [`RendererArgs::to_argv`] and the renderer
/// parses it back with clap. Short flags are the stable contract:
///   `<renderer> -P <install-path> -F <video-path> [-M] [-N] [-W w:h] [-V 0..1]`
use clap::Parser;
use std::fmt;
use std::str::FromStr;

/// Window dimensions passed with `-W width:height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for WindowSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(':')
            .ok_or_else(|| format!("expected width:height, got '{s}'"))?;
        let width = w.trim().parse::<u32>().map_err(|e| format!("bad width '{w}': {e}"))?;
        let height = h.trim().parse::<u32>().map_err(|e| format!("bad height '{h}': {e}"))?;
        if width == 0 || height == 0 {
            return Err(format!("window size must be non-zero, got '{s}'"));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

fn parse_volume(s: &str) -> Result<f64, String> {
    let v = s.parse::<f64>().map_err(|e| format!("bad volume '{s}': {e}"))?;
    if v.is_nan() {
        return Err("volume must be a number".to_string());
    }
    Ok(v.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "loopwall-renderer", about = "Plays a looping video as the desktop wallpaper")]
pub struct RendererArgs {
    /// Install directory of the extension (resources are resolved from here).
    #[arg(short = 'P', long = "codepath", default_value = "")]
    pub install_path: String,

    /// Video file to play.
    #[arg(short = 'F', long = "filepath", default_value = "")]
    pub video_path: String,

    /// Start muted.
    #[arg(short = 'M', long = "mute")]
    pub mute: bool,

    /// Standalone mode: keep the window decorated and visible in window lists.
    #[arg(short = 'N', long = "nohide")]
    pub nohide: bool,

    /// Run in a plain window of the given size instead of covering monitors.
    #[arg(short = 'W', long = "windowed", value_name = "WIDTH:HEIGHT")]
    pub windowed: Option<WindowSize>,

    /// Linear volume in [0, 1]; out-of-range values are clamped.
    #[arg(short = 'V', long = "volume", value_parser = parse_volume)]
    pub volume: Option<f64>,
}

impl RendererArgs {
    pub fn new(install_path: impl Into<String>, video_path: impl Into<String>) -> Self {
        Self {
            install_path: install_path.into(),
            video_path: video_path.into(),
            mute: false,
            nohide: false,
            windowed: None,
            volume: None,
        }
    }

    /// Builds the full argv, `program` first. `-P` and `-F` are always present
    /// so the renderer never falls back to its own defaults.
    pub fn to_argv(&self, program: &str) -> Vec<String> {
        let mut argv = vec![
            program.to_string(),
            "-P".to_string(),
            self.install_path.clone(),
            "-F".to_string(),
            self.video_path.clone(),
        ];
        if self.mute {
            argv.push("-M".to_string());
        }
        if self.nohide {
            argv.push("-N".to_string());
        }
        if let Some(size) = self.windowed {
            argv.push("-W".to_string());
            argv.push(size.to_string());
        }
        if let Some(volume) = self.volume {
            argv.push("-V".to_string());
            argv.push(format!("{volume}"));
        }
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_argv_has_install_and_video_path() {
        let args = RendererArgs::new("/opt/loopwall", "/videos/sea.mp4");
        assert_eq!(
            args.to_argv("loopwall-renderer"),
            vec!["loopwall-renderer", "-P", "/opt/loopwall", "-F", "/videos/sea.mp4"]
        );
    }

    #[test]
    fn optional_flags_parse_back_to_the_same_args() {
        let mut args = RendererArgs::new("/opt/loopwall", "/videos/sea.mp4");
        args.mute = true;
        args.nohide = true;
        args.windowed = Some(WindowSize { width: 1280, height: 720 });
        args.volume = Some(0.25);

        let parsed = RendererArgs::try_parse_from(args.to_argv("loopwall-renderer")).unwrap();
        assert_eq!(parsed, args);
    }

    #[test]
    fn long_flags_are_accepted() {
        let parsed = RendererArgs::try_parse_from([
            "r", "--codepath", "/opt", "--filepath", "/v.webm", "--mute", "--windowed", "800:600",
        ])
        .unwrap();
        assert_eq!(parsed.install_path, "/opt");
        assert_eq!(parsed.video_path, "/v.webm");
        assert!(parsed.mute);
        assert_eq!(parsed.windowed, Some(WindowSize { width: 800, height: 600 }));
    }

    #[test]
    fn volume_is_clamped() {
        let loud = RendererArgs::try_parse_from(["r", "-V", "3.5"]).unwrap();
        assert_eq!(loud.volume, Some(1.0));
        let negative = RendererArgs::try_parse_from(["r", "--volume=-1"]).unwrap();
        assert_eq!(negative.volume, Some(0.0));
    }

    #[test]
    fn unknown_argument_is_rejected() {
        assert!(RendererArgs::try_parse_from(["r", "-F", "/v.mp4", "--fullscreen"]).is_err());
        assert!(RendererArgs::try_parse_from(["r", "-X"]).is_err());
    }

    #[test]
    fn malformed_window_size_is_rejected() {
        assert!("1280x720".parse::<WindowSize>().is_err());
        assert!("0:720".parse::<WindowSize>().is_err());
        assert!(RendererArgs::try_parse_from(["r", "-W", "wide:tall"]).is_err());
    }
}
