use anyhow::{Context, Result};
use facedeco_core::VariantCatalog;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.facedeco.Overlay1";
const OBJECT_PATH: &str = "/org/facedeco/Overlay1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facedecod starting");

    let config = config::Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    let catalog = match &config.variants_path {
        Some(path) => VariantCatalog::load(path)?,
        None => VariantCatalog::builtin()?,
    };
    tracing::info!(
        variants = catalog.variants().len(),
        default = catalog.default_variant(),
        "variant catalog loaded"
    );

    let engine = engine::spawn_engine(&config, catalog.clone()).context("failed to start frame loop")?;

    let service = dbus_interface::OverlayService {
        engine: engine.handle.clone(),
        catalog,
    };
    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facedecod ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facedecod shutting down");

    let scene = engine.stop().await?;
    tracing::info!(frames = scene.frames_rendered(), "frame loop released");

    Ok(())
}
