//! Rendering backend boundary.
//!
//! The tracker only ever creates, moves and disposes a single textured quad
//! and asks for frames; any scene graph that can do that implements
//! [`SceneRenderer`]. [`HeadlessScene`] is the in-process implementation used
//! when no GPU backend is attached.
//!
//! Scene units are frame pixels at the camera's focal plane: a point on that
//! plane projects back onto the pixel it was normalized from.

use image::RgbaImage;
use nalgebra::{Matrix4, Perspective3, Point2, Point3, UnitQuaternion, Vector3};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SceneError {
    #[error("mesh {0:?} does not exist")]
    UnknownMesh(MeshHandle),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Opaque id of a mesh owned by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshHandle(pub u64);

/// Everything needed to build an overlay quad.
#[derive(Debug, Clone)]
pub struct MeshDesc {
    pub variant: String,
    /// Plane geometry is `aspect_ratio` wide and 1 high.
    pub aspect_ratio: f32,
    pub texture: Arc<RgbaImage>,
    pub initial_scale: f32,
}

/// Placement of a mesh in the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshTransform {
    pub position: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl MeshTransform {
    /// Rest pose of a freshly created quad.
    pub fn rest(scale: f32) -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(scale, scale, 1.0),
        }
    }

    /// JSON form: position, rotation as `[x, y, z, w]`, scale.
    pub fn to_json(&self) -> serde_json::Value {
        let q = self.rotation.quaternion();
        serde_json::json!({
            "position": [self.position.x, self.position.y, self.position.z],
            "rotation": [q.i, q.j, q.k, q.w],
            "scale": [self.scale.x, self.scale.y, self.scale.z],
        })
    }
}

/// Perspective camera on the +z axis looking at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    /// Vertical field of view, degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub eye: Point3<f32>,
    pub width: u32,
    pub height: u32,
}

impl PerspectiveCamera {
    pub const FOV_Y: f32 = 45.0;
    pub const NEAR: f32 = 1.0;
    pub const FAR: f32 = 1000.0;
    pub const EYE_Z: f32 = 680.0;

    /// The camera the overlay space is laid out for, sized to the frame.
    pub fn for_frame(width: u32, height: u32) -> Self {
        Self {
            fov_y: Self::FOV_Y,
            near: Self::NEAR,
            far: Self::FAR,
            eye: Point3::new(0.0, 0.0, Self::EYE_Z),
            width,
            height,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// Distance from the eye at which one scene unit spans one pixel.
    pub fn focal_distance(&self) -> f32 {
        (self.height as f32 / 2.0) / (self.fov_y.to_radians() / 2.0).tan()
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.eye, &(self.eye - Vector3::z()), &Vector3::y())
    }

    pub fn projection(&self) -> Perspective3<f32> {
        Perspective3::new(self.aspect(), self.fov_y.to_radians(), self.near, self.far)
    }

    /// Pixel position of a scene point, or `None` outside the near/far range.
    pub fn project(&self, point: &Point3<f32>) -> Option<Point2<f32>> {
        let in_view = self.view_matrix().transform_point(point);
        let depth = -in_view.z;
        if depth < self.near || depth > self.far {
            return None;
        }
        let ndc = self.projection().project_point(&in_view);
        Some(Point2::new(
            (ndc.x + 1.0) * 0.5 * self.width as f32,
            (1.0 - ndc.y) * 0.5 * self.height as f32,
        ))
    }
}

pub trait SceneRenderer {
    fn create_mesh(&mut self, desc: &MeshDesc) -> Result<MeshHandle, SceneError>;
    fn update_transform(&mut self, mesh: MeshHandle, transform: &MeshTransform) -> Result<(), SceneError>;
    /// Release geometry and material of `mesh`.
    fn dispose_mesh(&mut self, mesh: MeshHandle);
    fn render_frame(&mut self, camera: &PerspectiveCamera) -> Result<(), SceneError>;
}

/// A mesh held by [`HeadlessScene`].
#[derive(Debug, Clone)]
pub struct HeadlessMesh {
    pub variant: String,
    pub aspect_ratio: f32,
    pub texture_size: (u32, u32),
    pub transform: MeshTransform,
    /// Pixel position of the quad center at the last render.
    pub screen_position: Option<Point2<f32>>,
}

/// Scene that keeps mesh state in memory and counts rendered frames.
#[derive(Debug, Default)]
pub struct HeadlessScene {
    meshes: BTreeMap<MeshHandle, HeadlessMesh>,
    next_id: u64,
    frames_rendered: u64,
    created: u64,
    disposed: u64,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&HeadlessMesh> {
        self.meshes.get(&handle)
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Total `(created, disposed)` meshes over the scene's lifetime.
    pub fn lifetime_counts(&self) -> (u64, u64) {
        (self.created, self.disposed)
    }
}

impl SceneRenderer for HeadlessScene {
    fn create_mesh(&mut self, desc: &MeshDesc) -> Result<MeshHandle, SceneError> {
        let handle = MeshHandle(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.meshes.insert(
            handle,
            HeadlessMesh {
                variant: desc.variant.clone(),
                aspect_ratio: desc.aspect_ratio,
                texture_size: desc.texture.dimensions(),
                transform: MeshTransform::rest(desc.initial_scale),
                screen_position: None,
            },
        );
        tracing::debug!(mesh = handle.0, variant = %desc.variant, aspect = desc.aspect_ratio, "mesh created");
        Ok(handle)
    }

    fn update_transform(&mut self, mesh: MeshHandle, transform: &MeshTransform) -> Result<(), SceneError> {
        let entry = self.meshes.get_mut(&mesh).ok_or(SceneError::UnknownMesh(mesh))?;
        entry.transform = *transform;
        Ok(())
    }

    fn dispose_mesh(&mut self, mesh: MeshHandle) {
        if self.meshes.remove(&mesh).is_some() {
            self.disposed += 1;
            tracing::debug!(mesh = mesh.0, "mesh disposed");
        }
    }

    fn render_frame(&mut self, camera: &PerspectiveCamera) -> Result<(), SceneError> {
        self.frames_rendered += 1;
        for (handle, mesh) in self.meshes.iter_mut() {
            mesh.screen_position = camera.project(&mesh.transform.position);
            let p = mesh.transform.position;
            tracing::trace!(
                frame = self.frames_rendered,
                mesh = handle.0,
                x = p.x,
                y = p.y,
                z = p.z,
                screen = ?mesh.screen_position,
                "render"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(variant: &str) -> MeshDesc {
        MeshDesc {
            variant: variant.into(),
            aspect_ratio: 2.0,
            texture: Arc::new(RgbaImage::new(200, 100)),
            initial_scale: 180.0,
        }
    }

    #[test]
    fn test_create_starts_at_rest() {
        let mut scene = HeadlessScene::new();
        let h = scene.create_mesh(&desc("bear01")).unwrap();
        let mesh = scene.mesh(h).unwrap();
        assert_eq!(mesh.texture_size, (200, 100));
        assert_eq!(mesh.transform, MeshTransform::rest(180.0));
        assert_eq!(scene.live_meshes(), 1);
    }

    #[test]
    fn test_handles_are_unique() {
        let mut scene = HeadlessScene::new();
        let a = scene.create_mesh(&desc("a")).unwrap();
        scene.dispose_mesh(a);
        let b = scene.create_mesh(&desc("b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(scene.lifetime_counts(), (2, 1));
    }

    #[test]
    fn test_update_unknown_mesh() {
        let mut scene = HeadlessScene::new();
        let err = scene
            .update_transform(MeshHandle(7), &MeshTransform::rest(1.0))
            .unwrap_err();
        assert_eq!(err, SceneError::UnknownMesh(MeshHandle(7)));
    }

    #[test]
    fn test_double_dispose_is_harmless() {
        let mut scene = HeadlessScene::new();
        let h = scene.create_mesh(&desc("a")).unwrap();
        scene.dispose_mesh(h);
        scene.dispose_mesh(h);
        assert_eq!(scene.live_meshes(), 0);
        assert_eq!(scene.lifetime_counts(), (1, 1));
    }

    #[test]
    fn test_transform_json() {
        let json = MeshTransform::rest(2.0).to_json();
        assert_eq!(json["position"], serde_json::json!([0.0, 0.0, 0.0]));
        assert_eq!(json["rotation"], serde_json::json!([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(json["scale"], serde_json::json!([2.0, 2.0, 1.0]));
    }

    #[test]
    fn test_render_counts_frames() {
        let mut scene = HeadlessScene::new();
        let camera = PerspectiveCamera::for_frame(960, 540);
        scene.render_frame(&camera).unwrap();
        scene.render_frame(&camera).unwrap();
        assert_eq!(scene.frames_rendered(), 2);
    }

    #[test]
    fn test_origin_projects_to_frame_center() {
        let camera = PerspectiveCamera::for_frame(960, 540);
        let p = camera.project(&Point3::origin()).unwrap();
        assert!((p.x - 480.0).abs() < 1e-3 && (p.y - 270.0).abs() < 1e-3, "p = {p:?}");
    }

    #[test]
    fn test_focal_plane_is_pixel_exact() {
        let camera = PerspectiveCamera::for_frame(960, 540);
        assert!((camera.focal_distance() - 651.84).abs() < 0.01);

        // Pixel (700, 100) normalized onto the focal plane.
        let z = PerspectiveCamera::EYE_Z - camera.focal_distance();
        let p = camera.project(&Point3::new(220.0, 170.0, z)).unwrap();
        assert!((p.x - 700.0).abs() < 0.05, "x = {}", p.x);
        assert!((p.y - 100.0).abs() < 0.05, "y = {}", p.y);
    }

    #[test]
    fn test_point_behind_eye_is_not_projected() {
        let camera = PerspectiveCamera::for_frame(960, 540);
        assert!(camera.project(&Point3::new(0.0, 0.0, 700.0)).is_none());
        assert!(camera.project(&Point3::new(0.0, 0.0, -400.0)).is_none());
    }

    #[test]
    fn test_render_records_screen_position() {
        let mut scene = HeadlessScene::new();
        let h = scene.create_mesh(&desc("a")).unwrap();
        assert!(scene.mesh(h).unwrap().screen_position.is_none());

        scene.render_frame(&PerspectiveCamera::for_frame(960, 540)).unwrap();
        let p = scene.mesh(h).unwrap().screen_position.unwrap();
        assert!((p.x - 480.0).abs() < 1e-3 && (p.y - 270.0).abs() < 1e-3);
    }
}
