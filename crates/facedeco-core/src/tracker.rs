//! Per-frame overlay tracking.
//!
//! [`OverlayTracker`] owns the session: normalizer, catalog, artwork, scene and
//! overlay state. Each frame the caller hands it whatever detection result is
//! currently available and asks for a render. Frames without a face leave the
//! mesh exactly where it was.

use crate::assets::AssetStore;
use crate::normalize::{NormalizeError, Normalizer};
use crate::orientation::estimate_orientation;
use crate::overlay::{Direction, OverlayError, OverlayState};
use crate::placement::solve_placement;
use crate::scene::{MeshTransform, PerspectiveCamera, SceneError, SceneRenderer};
use crate::types::{DetectedFace, TrackingParams};
use crate::variants::VariantCatalog;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("normalizer: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("overlay: {0}")]
    Overlay(#[from] OverlayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    Tracking,
    NotFound,
}

impl TrackingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackingStatus::Tracking => "tracking",
            TrackingStatus::NotFound => "not_found",
        }
    }
}

pub struct OverlayTracker<S, A> {
    normalizer: Normalizer,
    camera: PerspectiveCamera,
    params: TrackingParams,
    catalog: VariantCatalog,
    assets: A,
    scene: S,
    state: OverlayState,
    status: TrackingStatus,
    last_transform: Option<MeshTransform>,
}

impl<S: SceneRenderer, A: AssetStore> OverlayTracker<S, A> {
    /// Set up a session for `width`×`height` frames showing `initial_variant`
    /// (the catalog default when `None`).
    pub fn new(
        width: u32,
        height: u32,
        params: TrackingParams,
        catalog: VariantCatalog,
        mut assets: A,
        mut scene: S,
        initial_variant: Option<&str>,
    ) -> Result<Self, TrackerError> {
        let normalizer = Normalizer::new(width, height, params.depth_strength)?;
        let variant = initial_variant.unwrap_or(catalog.default_variant()).to_string();
        let state = OverlayState::create(&variant, &catalog, &mut assets, &mut scene)?;

        Ok(Self {
            normalizer,
            camera: PerspectiveCamera::for_frame(width, height),
            params,
            catalog,
            assets,
            scene,
            state,
            status: TrackingStatus::NotFound,
            last_transform: None,
        })
    }

    pub fn select_variant(&mut self, name: &str) -> Result<(), OverlayError> {
        let result = self
            .state
            .select_variant(name, &self.catalog, &mut self.assets, &mut self.scene);
        match &result {
            Ok(()) => self.last_transform = None,
            Err(e) => tracing::warn!(variant = name, error = %e, "variant selection rejected"),
        }
        result
    }

    pub fn nudge(&mut self, direction: Direction) {
        self.state.nudge(direction, self.params.nudge_step);
    }

    /// Apply one frame's detection result to the mesh.
    ///
    /// `None`, an empty keypoint list or an unusable landmark set is NOT_FOUND
    /// and leaves the previous transform in place.
    pub fn update(&mut self, detection: Option<&DetectedFace>) -> Result<TrackingStatus, SceneError> {
        let transform = detection.and_then(|face| self.solve(face));
        let status = match transform {
            Some(t) => {
                if let Some(mesh) = self.state.mesh() {
                    self.scene.update_transform(mesh, &t)?;
                    self.last_transform = Some(t);
                }
                TrackingStatus::Tracking
            }
            None => TrackingStatus::NotFound,
        };

        if status != self.status {
            tracing::debug!(status = status.as_str(), "tracking status changed");
            self.status = status;
        }
        Ok(status)
    }

    fn solve(&self, face: &DetectedFace) -> Option<MeshTransform> {
        let points = self.normalizer.normalize_all(&face.keypoints);
        let orientation = estimate_orientation(&points, self.params.up_reference_offset)?;
        let config = self.catalog.get(self.state.active_variant())?;

        match solve_placement(&points, config, self.state.user_offset(), orientation, &self.params) {
            Ok(placement) => Some(placement.to_transform()),
            Err(e) => {
                tracing::warn!(error = %e, "cannot place overlay");
                None
            }
        }
    }

    pub fn render(&mut self) -> Result<(), SceneError> {
        self.scene.render_frame(&self.camera)
    }

    /// Update then render.
    pub fn step(&mut self, detection: Option<&DetectedFace>) -> Result<TrackingStatus, SceneError> {
        let status = self.update(detection)?;
        self.render()?;
        Ok(status)
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub fn status(&self) -> TrackingStatus {
        self.status
    }

    /// Transform most recently applied by tracking since the last variant switch.
    pub fn last_transform(&self) -> Option<&MeshTransform> {
        self.last_transform.as_ref()
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn catalog(&self) -> &VariantCatalog {
        &self.catalog
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    /// Release the mesh and hand back the scene.
    pub fn shutdown(mut self) -> S {
        self.state.release(&mut self.scene);
        self.scene
    }
}
