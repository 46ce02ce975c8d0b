use crate::engine::{EngineError, EngineHandle};
use facedeco_core::overlay::OverlayError;
use facedeco_core::{Direction, VariantCatalog};
use zbus::{fdo, interface};

/// D-Bus interface for the overlay daemon.
///
/// Bus name: org.facedeco.Overlay1
/// Object path: /org/facedeco/Overlay1
pub struct OverlayService {
    pub engine: EngineHandle,
    pub catalog: VariantCatalog,
}

fn to_fdo(e: EngineError) -> fdo::Error {
    match e {
        EngineError::Overlay(OverlayError::UnknownVariant(name)) => {
            fdo::Error::InvalidArgs(format!("unknown variant: {name}"))
        }
        other => fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.facedeco.Overlay1")]
impl OverlayService {
    /// Switch the active overlay. Unknown names leave the current one in place.
    async fn select_variant(&self, name: &str) -> fdo::Result<()> {
        tracing::info!(variant = name, "select_variant requested");
        self.engine.select_variant(name).await.map_err(to_fdo)
    }

    /// Move the overlay one step (up, down, left or right). Returns status JSON.
    async fn nudge(&self, direction: &str) -> fdo::Result<String> {
        let direction: Direction = direction
            .parse()
            .map_err(|e| fdo::Error::InvalidArgs(format!("{e}")))?;
        let status = self.engine.nudge(direction).await.map_err(to_fdo)?;
        Ok(status.to_json().to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        let mut json = status.to_json();
        json["version"] = env!("CARGO_PKG_VERSION").into();
        Ok(json.to_string())
    }

    /// List the selectable variants in catalog order.
    async fn list_variants(&self) -> fdo::Result<String> {
        let variants: Vec<_> = self
            .catalog
            .variants()
            .iter()
            .map(|v| {
                serde_json::json!({
                    "name": v.name,
                    "base_scale": v.config.base_scale,
                    "anchor": v.config.anchor,
                    "x_offset": v.config.x_offset,
                    "y_offset": v.config.y_offset,
                })
            })
            .collect();
        Ok(serde_json::json!({
            "default": self.catalog.default_variant(),
            "variants": variants,
        })
        .to_string())
    }
}
