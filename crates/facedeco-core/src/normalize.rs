//! Detector space → scene space coordinate mapping.
//!
//! The detector reports x/y in frame pixels with y pointing down and a depth
//! value of its own scale. The scene camera looks down -z with y up and the
//! frame centered on the origin.

use crate::types::{Landmark, NormalizedPoint};
use nalgebra::Point3;
use thiserror::Error;

/// Divisor bringing detector depth into the unit range before remapping.
const DETECTOR_DEPTH_SCALE: f32 = 100.0;

#[derive(Error, Debug, PartialEq)]
pub enum NormalizeError {
    #[error("frame dimensions must be positive, got {width}x{height}")]
    InvalidFrameSize { width: u32, height: u32 },
}

/// Maps landmarks for a fixed frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    half_width: f32,
    half_height: f32,
    depth_strength: f32,
}

impl Normalizer {
    pub fn new(width: u32, height: u32, depth_strength: f32) -> Result<Self, NormalizeError> {
        if width == 0 || height == 0 {
            return Err(NormalizeError::InvalidFrameSize { width, height });
        }
        Ok(Self {
            half_width: width as f32 / 2.0,
            half_height: height as f32 / 2.0,
            depth_strength,
        })
    }

    pub fn normalize(&self, landmark: &Landmark) -> NormalizedPoint {
        Point3::new(
            landmark.x - self.half_width,
            -landmark.y + self.half_height,
            ((landmark.z / DETECTOR_DEPTH_SCALE) * -1.0 + 1.0) * self.depth_strength,
        )
    }

    pub fn normalize_all(&self, landmarks: &[Landmark]) -> Vec<NormalizedPoint> {
        landmarks.iter().map(|l| self.normalize(l)).collect()
    }

    /// Inverse of [`normalize`](Self::normalize).
    pub fn denormalize(&self, point: &NormalizedPoint) -> Landmark {
        Landmark {
            x: point.x + self.half_width,
            y: self.half_height - point.y,
            z: (1.0 - point.z / self.depth_strength) * DETECTOR_DEPTH_SCALE,
        }
    }
}
