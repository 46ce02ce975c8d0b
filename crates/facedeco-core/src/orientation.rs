//! Face orientation from the nose and nostril landmarks.
//!
//! The face normal is the direction from a point just below the nostrils to the
//! nose tip. The overlay quad faces +z in its rest pose, so the orientation is
//! the shortest-arc rotation taking +z onto that normal.

use crate::types::{landmark, NormalizedPoint};
use nalgebra::{Unit, UnitQuaternion, Vector3};
use thiserror::Error;

/// Normals shorter than this are treated as coincident landmarks.
const MIN_NORMAL_LENGTH: f32 = 1e-6;

#[derive(Error, Debug, PartialEq)]
pub enum OrientationError {
    #[error("landmark {index} missing from a set of {len}")]
    MissingLandmark { index: usize, len: usize },
    #[error("degenerate geometry: face normal has length {length}")]
    DegenerateGeometry { length: f32 },
}

fn point(points: &[NormalizedPoint], index: usize) -> Result<&NormalizedPoint, OrientationError> {
    points.get(index).ok_or(OrientationError::MissingLandmark {
        index,
        len: points.len(),
    })
}

/// Unit face normal: nostril midpoint shifted down by `up_offset`, towards the nose tip.
pub fn face_normal(
    points: &[NormalizedPoint],
    up_offset: f32,
) -> Result<Unit<Vector3<f32>>, OrientationError> {
    let nose_tip = point(points, landmark::NOSE_TIP)?;
    let left = point(points, landmark::LEFT_NOSTRIL)?;
    let right = point(points, landmark::RIGHT_NOSTRIL)?;

    let midpoint = nalgebra::center(left, right);
    let up_reference = midpoint - Vector3::y() * up_offset;
    let direction = nose_tip - up_reference;

    Unit::try_new(direction, MIN_NORMAL_LENGTH).ok_or(OrientationError::DegenerateGeometry {
        length: direction.norm(),
    })
}

/// Shortest-arc rotation taking the overlay's rest axis (+z) onto `normal`.
pub fn rotation_to_normal(normal: &Unit<Vector3<f32>>) -> UnitQuaternion<f32> {
    UnitQuaternion::rotation_between(&Vector3::z(), normal.as_ref())
        // Antiparallel: every axis in the xy plane is a shortest arc.
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::PI))
}

/// Estimate the face orientation.
///
/// Returns `None` when there is nothing to estimate from (empty or truncated
/// landmark set). Coincident landmarks fall back to the identity rotation.
pub fn estimate_orientation(points: &[NormalizedPoint], up_offset: f32) -> Option<UnitQuaternion<f32>> {
    if points.is_empty() {
        return None;
    }

    match face_normal(points, up_offset) {
        Ok(normal) => Some(rotation_to_normal(&normal)),
        Err(OrientationError::DegenerateGeometry { length }) => {
            tracing::warn!(length, "degenerate face normal; using identity rotation");
            Some(UnitQuaternion::identity())
        }
        Err(err @ OrientationError::MissingLandmark { .. }) => {
            tracing::warn!(error = %err, "cannot estimate orientation");
            None
        }
    }
}
