use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facedeco_core::{Direction, VariantCatalog};
use facedeco_hw::Camera;
use std::path::PathBuf;

mod replay;

#[zbus::proxy(
    interface = "org.facedeco.Overlay1",
    default_service = "org.facedeco.Overlay1",
    default_path = "/org/facedeco/Overlay1"
)]
trait Overlay {
    fn select_variant(&self, name: &str) -> zbus::Result<()>;
    fn nudge(&self, direction: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facedeco", about = "Face-anchored overlay control")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Switch the overlay variant (e.g., "rabbit", "hige")
    Select {
        variant: String,
    },
    /// Move the overlay one step: up, down, left or right
    Nudge {
        direction: Direction,
        /// Number of steps
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },
    /// Show daemon status
    Status,
    /// List overlay variants in a catalog
    Variants {
        /// Variant catalog TOML (built-in catalog when omitted)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Track a recorded landmark file offline and print per-frame transforms
    Replay {
        /// JSON Lines recording, one array of faces per frame
        landmarks: PathBuf,
        /// Directory holding <variant>.png
        #[arg(short, long, default_value = ".")]
        assets: PathBuf,
        /// Variant catalog TOML (built-in catalog when omitted)
        #[arg(long)]
        variants: Option<PathBuf>,
        /// Variant to show (catalog default when omitted)
        #[arg(short, long)]
        variant: Option<String>,
        #[arg(long, default_value_t = 960)]
        width: u32,
        #[arg(long, default_value_t = 540)]
        height: u32,
        /// Mirror keypoints horizontally
        #[arg(long)]
        flip: bool,
    },
    /// Run camera diagnostics
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },
}

async fn proxy() -> Result<OverlayProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    OverlayProxy::new(&connection)
        .await
        .context("facedecod is not reachable")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Select { variant } => {
            proxy().await?.select_variant(&variant).await?;
            println!("Overlay switched to {variant}");
        }
        Commands::Nudge { direction, count } => {
            let proxy = proxy().await?;
            let mut status = String::new();
            for _ in 0..count.max(1) {
                status = proxy.nudge(&direction.to_string()).await?;
            }
            print_json(&status)?;
        }
        Commands::Status => {
            print_json(&proxy().await?.status().await?)?;
        }
        Commands::Variants { catalog } => {
            let catalog = match catalog {
                Some(path) => VariantCatalog::load(&path)?,
                None => VariantCatalog::builtin()?,
            };
            for v in catalog.variants() {
                let marker = if v.name == catalog.default_variant() { "*" } else { " " };
                println!(
                    "{marker} {:<8} scale {:>5}  anchor {:>3}  offset ({}, {})",
                    v.name, v.config.base_scale, v.config.anchor, v.config.x_offset, v.config.y_offset
                );
            }
        }
        Commands::Replay {
            landmarks,
            assets,
            variants,
            variant,
            width,
            height,
            flip,
        } => {
            let opts = replay::ReplayOptions {
                landmarks,
                asset_dir: assets,
                variants,
                variant,
                width,
                height,
                flip_horizontal: flip,
            };
            let summary = replay::run(&opts, &mut std::io::stdout().lock())?;
            eprintln!("{} frames, {} tracked", summary.frames, summary.tracked);
        }
        Commands::Test { device } => {
            println!("Running camera diagnostics...");
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in &devices {
                println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }

            let camera = Camera::open(&device, 960, 540)?;
            println!(
                "Opened {} at {}x{} ({:?})",
                camera.device_path, camera.width, camera.height, camera.fourcc
            );
            for _ in 0..5 {
                let frame = camera.capture_frame()?;
                println!(
                    "  frame {}: {} bytes, brightness {:.1}",
                    frame.sequence,
                    frame.data.len(),
                    frame.avg_brightness()
                );
            }
        }
    }

    Ok(())
}
