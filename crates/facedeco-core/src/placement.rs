//! Overlay placement: position, roll and scale from normalized landmarks.
//!
//! The overlay quad is pinned by its bottom edge to a variant-specific anchor
//! landmark, sized by the apparent face width and rolled with the head.

use crate::scene::MeshTransform;
use crate::types::{landmark, NormalizedPoint, TrackingParams};
use crate::variants::OverlayConfig;
use nalgebra::{Point3, UnitQuaternion, Vector2, Vector3};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PlacementError {
    #[error("landmark {index} missing from a set of {len}")]
    MissingLandmark { index: usize, len: usize },
}

/// Solved overlay placement for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Point3<f32>,
    /// `(s, -s)`: the y flip undoes the normalizer's y flip on the texture.
    pub scale: Vector2<f32>,
    /// In-plane head tilt, radians.
    pub roll: f32,
    /// Face orientation the roll is applied on top of.
    pub orientation: UnitQuaternion<f32>,
}

impl Placement {
    /// Final mesh transform: face orientation with its z Euler angle replaced by the roll.
    pub fn to_transform(&self) -> MeshTransform {
        MeshTransform {
            position: self.position,
            rotation: with_roll(&self.orientation, self.roll),
            scale: Vector3::new(self.scale.x, self.scale.y, 1.0),
        }
    }
}

fn point(points: &[NormalizedPoint], index: usize) -> Result<&NormalizedPoint, PlacementError> {
    points.get(index).ok_or(PlacementError::MissingLandmark {
        index,
        len: points.len(),
    })
}

/// Image-plane distance; depth is ignored.
fn planar_distance(a: &NormalizedPoint, b: &NormalizedPoint) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Head roll from the ear landmarks.
pub fn roll_angle(right_ear: &NormalizedPoint, left_ear: &NormalizedPoint) -> f32 {
    (right_ear.y - left_ear.y).atan2(right_ear.x - left_ear.x)
}

/// Apparent face size relative to the reference face.
///
/// Summing both nose-to-ear levers keeps the value roughly stable under small
/// yaw: one lever foreshortens while the other lengthens.
pub fn scale_factor(
    nose_tip: &NormalizedPoint,
    right_ear: &NormalizedPoint,
    left_ear: &NormalizedPoint,
    baseline: f32,
) -> f32 {
    (planar_distance(nose_tip, right_ear) + planar_distance(nose_tip, left_ear)) / baseline
}

/// Replace the z angle of `orientation`'s XYZ Euler decomposition with `roll`.
pub fn with_roll(orientation: &UnitQuaternion<f32>, roll: f32) -> UnitQuaternion<f32> {
    let m = orientation.to_rotation_matrix();
    let m = m.matrix();
    let m13 = m[(0, 2)].clamp(-1.0, 1.0);

    let pitch = m13.asin();
    let tilt = if m13.abs() < 0.999_999_9 {
        (-m[(1, 2)]).atan2(m[(2, 2)])
    } else {
        m[(2, 1)].atan2(m[(1, 1)])
    };

    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), tilt)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), pitch)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), roll)
}

/// Solve the overlay placement for one landmark set.
///
/// `user_offset` is the accumulated manual nudge of the session.
pub fn solve_placement(
    points: &[NormalizedPoint],
    config: &OverlayConfig,
    user_offset: Vector2<f32>,
    orientation: UnitQuaternion<f32>,
    params: &TrackingParams,
) -> Result<Placement, PlacementError> {
    let anchor = point(points, config.anchor)?;
    let nose_tip = point(points, landmark::NOSE_TIP)?;
    let right_ear = point(points, landmark::RIGHT_EAR)?;
    let left_ear = point(points, landmark::LEFT_EAR)?;

    let roll = roll_angle(right_ear, left_ear);
    let scale = scale_factor(nose_tip, right_ear, left_ear, params.baseline_ear_distance);
    let size = config.base_scale * scale;

    let mut position = Point3::new(
        anchor.x + user_offset.x + config.x_offset,
        anchor.y + user_offset.y + config.y_offset,
        anchor.z + params.forward_bias,
    );

    // The quad's origin is its center; lift it so the bottom edge sits on the anchor.
    let half_height = size / 2.0;
    position.y += half_height;

    // Keep the bottom edge on the anchor once the quad rolls about its center.
    let shift = half_height * roll.sin();
    position.x += shift;
    position.y -= shift * roll.sin();

    tracing::trace!(roll, scale, x = position.x, y = position.y, z = position.z, "placement solved");

    Ok(Placement {
        position,
        scale: Vector2::new(size, -size),
        roll,
        orientation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    fn config(anchor: usize) -> OverlayConfig {
        OverlayConfig {
            base_scale: 100.0,
            anchor,
            x_offset: 5.0,
            y_offset: -20.0,
        }
    }

    /// Reference face: nose at origin, ears 100 units either side.
    fn face(roll: f32) -> Vec<NormalizedPoint> {
        let mut pts = vec![Point3::origin(); 468];
        let (s, c) = roll.sin_cos();
        pts[landmark::NOSE_TIP] = Point3::new(0.0, 0.0, 100.0);
        pts[landmark::RIGHT_EAR] = Point3::new(100.0 * c, 100.0 * s, 80.0);
        pts[landmark::LEFT_EAR] = Point3::new(-100.0 * c, -100.0 * s, 80.0);
        pts[landmark::PHILTRUM] = Point3::new(0.0, -20.0, 100.0);
        pts
    }

    /// Project a head rotated by `yaw` about the vertical axis.
    fn yawed_face(yaw: f32) -> Vec<NormalizedPoint> {
        let (s, c) = yaw.sin_cos();
        let turn = |x: f32, y: f32, z: f32| Point3::new(x * c + z * s, y, -x * s + z * c);
        let mut pts = vec![Point3::origin(); 468];
        pts[landmark::NOSE_TIP] = turn(0.0, -20.0, 60.0);
        pts[landmark::RIGHT_EAR] = turn(100.0, 0.0, 0.0);
        pts[landmark::LEFT_EAR] = turn(-100.0, 0.0, 0.0);
        pts
    }

    #[test]
    fn test_roll_level_ears() {
        let roll = roll_angle(&Point3::new(10.0, 0.0, 0.0), &Point3::new(-10.0, 0.0, 0.0));
        assert!(roll.abs() < 1e-6, "roll = {roll}");
    }

    #[test]
    fn test_roll_vertical_ears() {
        let roll = roll_angle(&Point3::new(0.0, 10.0, 0.0), &Point3::new(0.0, -10.0, 0.0));
        assert!((roll.abs() - FRAC_PI_2).abs() < 1e-6, "roll = {roll}");
    }

    #[test]
    fn test_reference_face_has_unit_scale() {
        let pts = face(0.0);
        let s = scale_factor(
            &pts[landmark::NOSE_TIP],
            &pts[landmark::RIGHT_EAR],
            &pts[landmark::LEFT_EAR],
            200.0,
        );
        assert!((s - 1.0).abs() < 1e-6, "scale = {s}");
    }

    #[test]
    fn test_scale_stable_under_small_yaw() {
        let baseline = scale_factor(
            &yawed_face(0.0)[landmark::NOSE_TIP],
            &yawed_face(0.0)[landmark::RIGHT_EAR],
            &yawed_face(0.0)[landmark::LEFT_EAR],
            200.0,
        );
        for degrees in [5.0f32, 10.0, 15.0, -15.0] {
            let pts = yawed_face(degrees.to_radians());
            let s = scale_factor(
                &pts[landmark::NOSE_TIP],
                &pts[landmark::RIGHT_EAR],
                &pts[landmark::LEFT_EAR],
                200.0,
            );
            let change = (s - baseline).abs() / baseline;
            assert!(change < 0.10, "yaw {degrees}°: {s} vs {baseline} ({:.1}%)", change * 100.0);
        }
    }

    #[test]
    fn test_upright_placement() {
        let pts = face(0.0);
        let params = TrackingParams::default();
        let p = solve_placement(
            &pts,
            &config(landmark::PHILTRUM),
            Vector2::new(15.0, -5.0),
            UnitQuaternion::identity(),
            &params,
        )
        .unwrap();

        // Anchor (0, -20, 100) + user (15, -5) + fixed (5, -20) + bias; lifted by half of 100.
        assert!((p.position.x - 20.0).abs() < 1e-4, "x = {}", p.position.x);
        assert!((p.position.y - (-20.0 - 5.0 - 20.0 + 50.0)).abs() < 1e-4, "y = {}", p.position.y);
        assert!((p.position.z - (100.0 - 150.0)).abs() < 1e-4, "z = {}", p.position.z);
        assert_eq!(p.scale, Vector2::new(100.0, -100.0));
        assert!(p.roll.abs() < 1e-6);
    }

    #[test]
    fn test_scale_signs_are_opposite() {
        let p = solve_placement(
            &face(0.3),
            &config(landmark::NOSE_TIP),
            Vector2::zeros(),
            UnitQuaternion::identity(),
            &TrackingParams::default(),
        )
        .unwrap();
        assert!(p.scale.x > 0.0 && p.scale.y < 0.0);
        assert_eq!(p.scale.x, -p.scale.y);
    }

    #[test]
    fn test_rolled_placement_recenters() {
        let roll = FRAC_PI_4;
        let pts = face(roll);
        let p = solve_placement(
            &pts,
            &config(landmark::NOSE_TIP),
            Vector2::zeros(),
            UnitQuaternion::identity(),
            &TrackingParams::default(),
        )
        .unwrap();

        let half = 50.0;
        let shift = half * roll.sin();
        assert!((p.roll - roll).abs() < 1e-5);
        assert!((p.position.x - (5.0 + shift)).abs() < 1e-3, "x = {}", p.position.x);
        assert!(
            (p.position.y - (-20.0 + half - shift * roll.sin())).abs() < 1e-3,
            "y = {}",
            p.position.y
        );
    }

    #[test]
    fn test_missing_landmark() {
        let pts = vec![Point3::origin(); 200];
        let err = solve_placement(
            &pts,
            &config(landmark::NOSE_TIP),
            Vector2::zeros(),
            UnitQuaternion::identity(),
            &TrackingParams::default(),
        )
        .unwrap_err();
        assert_eq!(err, PlacementError::MissingLandmark { index: 356, len: 200 });
    }

    #[test]
    fn test_with_roll_on_identity_is_pure_z_rotation() {
        let q = with_roll(&UnitQuaternion::identity(), 0.5);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5);
        assert!(q.angle_to(&expected) < 1e-5);
    }

    #[test]
    fn test_with_roll_keeps_tilt_and_pitch() {
        let orientation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.2)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.3)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.9);
        let q = with_roll(&orientation, 0.1);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.2)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.3)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.1);
        assert!(q.angle_to(&expected) < 1e-4, "off by {}", q.angle_to(&expected));
    }

    #[test]
    fn test_transform_uses_unit_depth_scale() {
        let p = Placement {
            position: Point3::new(1.0, 2.0, 3.0),
            scale: Vector2::new(4.0, -4.0),
            roll: 0.0,
            orientation: UnitQuaternion::identity(),
        };
        let t = p.to_transform();
        assert_eq!(t.scale, Vector3::new(4.0, -4.0, 1.0));
        assert_eq!(t.position, Point3::new(1.0, 2.0, 3.0));
    }
}
