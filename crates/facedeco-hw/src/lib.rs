//! facedeco-hw — Camera capture for the overlay tracker.
//!
//! Provides V4L2-based camera access delivering RGB frames, plus a blank
//! frame source for running without a device.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream};
pub use frame::{BlankSource, Frame, FrameSource};
