//! Active overlay state: selected variant, manual nudges and the owned mesh.

use crate::assets::{self, AssetError, AssetStore};
use crate::scene::{MeshDesc, MeshHandle, SceneError, SceneRenderer};
use crate::variants::VariantCatalog;
use nalgebra::Vector2;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("unknown variant: {0}")]
    UnknownVariant(String),
    #[error("asset: {0}")]
    Asset(#[from] AssetError),
    #[error("scene: {0}")]
    Scene(#[from] SceneError),
}

/// Manual nudge direction.
///
/// The preview is mirrored, so "left" moves the overlay towards +x.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn offset(self, step: f32) -> Vector2<f32> {
        match self {
            Direction::Up => Vector2::new(0.0, step),
            Direction::Down => Vector2::new(0.0, -step),
            Direction::Left => Vector2::new(step, 0.0),
            Direction::Right => Vector2::new(-step, 0.0),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown direction {0:?} (expected up, down, left or right)")]
pub struct ParseDirectionError(String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "top" => Ok(Direction::Up),
            "down" | "bottom" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        })
    }
}

/// Session overlay state. Owns the active mesh exclusively.
#[derive(Debug)]
pub struct OverlayState {
    active_variant: String,
    user_offset_x: f32,
    user_offset_y: f32,
    mesh: Option<MeshHandle>,
}

impl OverlayState {
    /// Build the session state with `variant` installed.
    pub fn create<S, A>(
        variant: &str,
        catalog: &VariantCatalog,
        assets: &mut A,
        scene: &mut S,
    ) -> Result<Self, OverlayError>
    where
        S: SceneRenderer + ?Sized,
        A: AssetStore + ?Sized,
    {
        let mut state = Self {
            active_variant: String::new(),
            user_offset_x: 0.0,
            user_offset_y: 0.0,
            mesh: None,
        };
        state.select_variant(variant, catalog, assets, scene)?;
        Ok(state)
    }

    /// Switch to `name`, replacing the mesh.
    ///
    /// Unknown names and unloadable artwork leave the current overlay untouched.
    /// Otherwise offsets are reset and the old mesh is disposed before the new
    /// one is created.
    pub fn select_variant<S, A>(
        &mut self,
        name: &str,
        catalog: &VariantCatalog,
        assets: &mut A,
        scene: &mut S,
    ) -> Result<(), OverlayError>
    where
        S: SceneRenderer + ?Sized,
        A: AssetStore + ?Sized,
    {
        let config = catalog
            .get(name)
            .ok_or_else(|| OverlayError::UnknownVariant(name.to_string()))?;
        let texture = assets.image(name)?;
        let aspect_ratio = assets::aspect_ratio(name, &texture)?;

        self.user_offset_x = 0.0;
        self.user_offset_y = 0.0;

        if let Some(old) = self.mesh.take() {
            scene.dispose_mesh(old);
        }

        let handle = scene.create_mesh(&MeshDesc {
            variant: name.to_string(),
            aspect_ratio,
            texture,
            initial_scale: config.base_scale,
        })?;
        self.mesh = Some(handle);
        self.active_variant = name.to_string();

        tracing::info!(variant = name, mesh = handle.0, aspect_ratio, "overlay variant selected");
        Ok(())
    }

    /// Shift the overlay by one `step` in `direction`. Offsets are unbounded.
    pub fn nudge(&mut self, direction: Direction, step: f32) {
        let delta = direction.offset(step);
        self.user_offset_x += delta.x;
        self.user_offset_y += delta.y;
        tracing::debug!(%direction, x = self.user_offset_x, y = self.user_offset_y, "overlay nudged");
    }

    /// Dispose the mesh, leaving the state without one.
    pub fn release<S: SceneRenderer + ?Sized>(&mut self, scene: &mut S) {
        if let Some(mesh) = self.mesh.take() {
            scene.dispose_mesh(mesh);
        }
    }

    pub fn active_variant(&self) -> &str {
        &self.active_variant
    }

    pub fn user_offset(&self) -> Vector2<f32> {
        Vector2::new(self.user_offset_x, self.user_offset_y)
    }

    pub fn mesh(&self) -> Option<MeshHandle> {
        self.mesh
    }
}
