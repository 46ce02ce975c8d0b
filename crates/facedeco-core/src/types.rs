use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Face mesh landmark indices the tracker depends on.
///
/// These follow the 468-point MediaPipe Face Mesh topology and must match the
/// detector exactly.
pub mod landmark {
    pub const UPPER_LIP: usize = 0;
    pub const NOSE_TIP: usize = 1;
    pub const RIGHT_NOSTRIL: usize = 49;
    pub const RIGHT_EAR: usize = 127;
    pub const PHILTRUM: usize = 164;
    pub const LEFT_NOSTRIL: usize = 279;
    pub const LEFT_EAR: usize = 356;
}

/// A raw detector keypoint: x/y in frame pixels, z a relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A landmark mapped into scene space (centered, y-up, depth-scaled).
pub type NormalizedPoint = Point3<f32>;

/// One face reported by the detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectedFace {
    pub keypoints: Vec<Landmark>,
}

/// Zero or one landmark set for a frame. `None` means no face was found.
pub type DetectionResult = Option<DetectedFace>;

/// Borrowed view of a captured frame handed to the detector.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Packed RGB24 pixels (may be empty for synthetic sources).
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Tunable constants of the tracking pipeline.
///
/// The defaults were fitted by hand for a 960×540 webcam at arm's length and
/// do not carry over to other cameras without retuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingParams {
    /// Multiplier applied to the remapped detector depth.
    pub depth_strength: f32,
    /// Nose-to-ears distance sum of a frontal face at the reference distance.
    pub baseline_ear_distance: f32,
    /// Depth bias keeping the overlay in front of the face surface.
    pub forward_bias: f32,
    /// Distance of the synthetic "up" reference below the nostril midpoint.
    pub up_reference_offset: f32,
    /// Step applied by a single nudge.
    pub nudge_step: f32,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            depth_strength: 100.0,
            baseline_ear_distance: 200.0,
            forward_bias: -150.0,
            up_reference_offset: 10.0,
            nudge_step: 5.0,
        }
    }
}
