//! Variant artwork lookup.

pub use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("asset {name} has zero height")]
    Empty { name: String },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
}

/// Name → image lookup keyed by variant name.
pub trait AssetStore {
    fn image(&mut self, name: &str) -> Result<Arc<RgbaImage>, AssetError>;
}

/// Width over height of an overlay image.
pub fn aspect_ratio(name: &str, image: &RgbaImage) -> Result<f32, AssetError> {
    let (w, h) = image.dimensions();
    if h == 0 {
        return Err(AssetError::Empty { name: name.to_string() });
    }
    Ok(w as f32 / h as f32)
}

/// Loads `<dir>/<name>.png` on first use and keeps it for the session.
pub struct DirAssets {
    dir: PathBuf,
    cache: HashMap<String, Arc<RgbaImage>>,
}

impl DirAssets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.png"))
    }
}

impl AssetStore for DirAssets {
    fn image(&mut self, name: &str) -> Result<Arc<RgbaImage>, AssetError> {
        if let Some(img) = self.cache.get(name) {
            return Ok(Arc::clone(img));
        }

        let path = self.path_for(name);
        if !path.exists() {
            return Err(AssetError::NotFound(path.display().to_string()));
        }

        let img = image::open(&path)
            .map_err(|source| AssetError::Decode {
                path: path.display().to_string(),
                source,
            })?
            .to_rgba8();
        tracing::info!(path = %path.display(), width = img.width(), height = img.height(), "loaded overlay image");

        let img = Arc::new(img);
        self.cache.insert(name.to_string(), Arc::clone(&img));
        Ok(img)
    }
}

/// In-memory store of blank images with fixed sizes.
#[cfg(test)]
pub(crate) struct MemoryAssets {
    images: HashMap<String, Arc<RgbaImage>>,
}

#[cfg(test)]
impl MemoryAssets {
    pub(crate) fn with_sizes(sizes: &[(&str, u32, u32)]) -> Self {
        let images = sizes
            .iter()
            .map(|&(name, w, h)| (name.to_string(), Arc::new(RgbaImage::new(w, h))))
            .collect();
        Self { images }
    }
}

#[cfg(test)]
impl AssetStore for MemoryAssets {
    fn image(&mut self, name: &str) -> Result<Arc<RgbaImage>, AssetError> {
        self.images
            .get(name)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(name.to_string()))
    }
}
