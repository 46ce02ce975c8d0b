use facedeco_core::TrackingParams;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0). Empty means synthetic blank frames.
    pub camera_device: Option<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Render ticks per second.
    pub frame_rate: u32,
    /// Ask the detector for mirrored keypoints.
    pub flip_horizontal: bool,
    /// Directory holding `<variant>.png` overlay images.
    pub asset_dir: PathBuf,
    /// Variant catalog TOML; the built-in catalog when unset.
    pub variants_path: Option<PathBuf>,
    /// Variant shown at startup; the catalog default when unset.
    pub default_variant: Option<String>,
    /// Recorded detector output (JSON Lines) fed to the tracker.
    pub landmarks_path: Option<PathBuf>,
    /// Upper bound on detection requests running at once.
    pub max_in_flight: usize,
    pub params: TrackingParams,
}

impl Config {
    /// Load configuration from `FACEDECO_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facedeco");

        let defaults = TrackingParams::default();

        Self {
            camera_device: std::env::var("FACEDECO_CAMERA_DEVICE")
                .map(|v| (!v.is_empty()).then_some(v))
                .unwrap_or_else(|_| Some("/dev/video0".to_string())),
            frame_width: env_parse("FACEDECO_FRAME_WIDTH", 960),
            frame_height: env_parse("FACEDECO_FRAME_HEIGHT", 540),
            frame_rate: env_parse("FACEDECO_FRAME_RATE", 60),
            flip_horizontal: std::env::var("FACEDECO_FLIP_HORIZONTAL")
                .map(|v| v == "1")
                .unwrap_or(false),
            asset_dir: std::env::var("FACEDECO_ASSET_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("images")),
            variants_path: env_path("FACEDECO_VARIANTS_PATH"),
            default_variant: std::env::var("FACEDECO_DEFAULT_VARIANT").ok().filter(|v| !v.is_empty()),
            landmarks_path: env_path("FACEDECO_LANDMARKS_PATH"),
            max_in_flight: env_parse("FACEDECO_MAX_IN_FLIGHT", 4),
            params: TrackingParams {
                depth_strength: env_parse("FACEDECO_DEPTH_STRENGTH", defaults.depth_strength),
                baseline_ear_distance: env_parse("FACEDECO_BASELINE_EAR_DISTANCE", defaults.baseline_ear_distance),
                nudge_step: env_parse("FACEDECO_NUDGE_STEP", defaults.nudge_step),
                ..defaults
            },
        }
        .sanitized()
    }

    /// Replace values the frame loop cannot run with, logging each one.
    pub fn sanitized(mut self) -> Self {
        let defaults = TrackingParams::default();

        if self.max_in_flight == 0 {
            tracing::warn!("FACEDECO_MAX_IN_FLIGHT must be at least 1; using 1");
            self.max_in_flight = 1;
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            tracing::warn!(
                width = self.frame_width,
                height = self.frame_height,
                "frame size must be positive; using 960x540"
            );
            self.frame_width = 960;
            self.frame_height = 540;
        }
        if self.frame_rate == 0 {
            tracing::warn!("FACEDECO_FRAME_RATE must be positive; using 60");
            self.frame_rate = 60;
        }
        if !positive(self.params.baseline_ear_distance) {
            tracing::warn!(
                value = self.params.baseline_ear_distance,
                default = defaults.baseline_ear_distance,
                "FACEDECO_BASELINE_EAR_DISTANCE must be positive; using default"
            );
            self.params.baseline_ear_distance = defaults.baseline_ear_distance;
        }
        if !positive(self.params.depth_strength) {
            tracing::warn!(
                value = self.params.depth_strength,
                default = defaults.depth_strength,
                "FACEDECO_DEPTH_STRENGTH must be positive; using default"
            );
            self.params.depth_strength = defaults.depth_strength;
        }
        if !self.params.nudge_step.is_finite() {
            tracing::warn!("FACEDECO_NUDGE_STEP must be finite; using default");
            self.params.nudge_step = defaults.nudge_step;
        }
        self
    }

    /// Time between render ticks.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}
