//! facedeco-core — Face-anchored overlay tracking.
//!
//! Turns face mesh landmarks from an external detector into the transform of a
//! textured overlay quad: coordinate normalization, face orientation, placement
//! and the overlay's mesh lifecycle.

pub mod assets;
pub mod detector;
pub mod normalize;
pub mod orientation;
pub mod overlay;
pub mod placement;
pub mod scene;
pub mod tracker;
pub mod types;
pub mod variants;

pub use assets::{AssetStore, DirAssets};
pub use detector::{EstimationConfig, FaceDetector, ReplayDetector};
pub use overlay::{Direction, OverlayError, OverlayState};
pub use scene::{HeadlessScene, MeshHandle, MeshTransform, PerspectiveCamera, SceneRenderer};
pub use tracker::{OverlayTracker, TrackingStatus};
pub use types::{DetectedFace, DetectionResult, FrameView, Landmark, TrackingParams};
pub use variants::{OverlayConfig, VariantCatalog};
