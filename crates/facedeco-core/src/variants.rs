//! Overlay variant catalog.
//!
//! Each variant is one decorative image with its placement constants. The
//! built-in table is embedded at compile time from `contrib/variants.toml`;
//! deployments may point at their own file with the same layout.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const BUILTIN_VARIANTS: &str = include_str!("../../../contrib/variants.toml");

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("bad catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("catalog defines no variants")]
    Empty,
    #[error("variant {0:?} defined more than once")]
    Duplicate(String),
    #[error("default variant {0:?} is not defined")]
    UnknownDefault(String),
}

/// Placement constants of one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayConfig {
    /// Overlay height in scene units for the reference face size.
    pub base_scale: f32,
    /// Landmark the overlay's bottom edge is pinned to.
    pub anchor: usize,
    pub x_offset: f32,
    pub y_offset: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub name: String,
    pub config: OverlayConfig,
}

/// One `[[variant]]` table as written in the file.
#[derive(Debug, Deserialize)]
struct VariantEntry {
    name: String,
    base_scale: f32,
    anchor: usize,
    #[serde(default)]
    x_offset: f32,
    #[serde(default)]
    y_offset: f32,
}

impl From<VariantEntry> for Variant {
    fn from(e: VariantEntry) -> Self {
        Self {
            name: e.name,
            config: OverlayConfig {
                base_scale: e.base_scale,
                anchor: e.anchor,
                x_offset: e.x_offset,
                y_offset: e.y_offset,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    default: Option<String>,
    #[serde(rename = "variant", default)]
    variants: Vec<VariantEntry>,
}

/// Fixed, ordered set of variants known to the session.
#[derive(Debug, Clone)]
pub struct VariantCatalog {
    variants: Vec<Variant>,
    default: String,
}

impl VariantCatalog {
    pub fn from_toml_str(src: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(src)?;
        let variants: Vec<Variant> = file.variants.into_iter().map(Variant::from).collect();
        let first = variants.first().ok_or(CatalogError::Empty)?.name.clone();

        for (i, v) in variants.iter().enumerate() {
            if variants[..i].iter().any(|prev| prev.name == v.name) {
                return Err(CatalogError::Duplicate(v.name.clone()));
            }
        }

        let default = file.default.unwrap_or(first);
        if !variants.iter().any(|v| v.name == default) {
            return Err(CatalogError::UnknownDefault(default));
        }

        Ok(Self { variants, default })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let src = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), count = catalog.variants.len(), "loaded variant catalog");
        Ok(catalog)
    }

    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_VARIANTS)
    }

    pub fn get(&self, name: &str) -> Option<&OverlayConfig> {
        self.variants.iter().find(|v| v.name == name).map(|v| &v.config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn default_variant(&self) -> &str {
        &self.default
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.name.as_str())
    }
}
