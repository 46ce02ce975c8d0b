//! Offline replay: drive the tracker from a landmark recording without a
//! daemon or camera and print one JSON line per frame.

use anyhow::{Context, Result};
use facedeco_core::{
    DirAssets, EstimationConfig, FaceDetector, FrameView, HeadlessScene, OverlayTracker, ReplayDetector,
    TrackingParams, VariantCatalog,
};
use std::io::Write;
use std::path::PathBuf;

pub struct ReplayOptions {
    pub landmarks: PathBuf,
    pub asset_dir: PathBuf,
    pub variants: Option<PathBuf>,
    pub variant: Option<String>,
    pub width: u32,
    pub height: u32,
    pub flip_horizontal: bool,
}

/// Summary printed after the last frame.
#[derive(Debug, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: u64,
    pub tracked: u64,
}

pub fn run(opts: &ReplayOptions, out: &mut impl Write) -> Result<ReplaySummary> {
    let catalog = match &opts.variants {
        Some(path) => VariantCatalog::load(path)?,
        None => VariantCatalog::builtin()?,
    };
    let detector = ReplayDetector::load(&opts.landmarks)?;
    let mut tracker = OverlayTracker::new(
        opts.width,
        opts.height,
        TrackingParams::default(),
        catalog,
        DirAssets::new(opts.asset_dir.clone()),
        HeadlessScene::new(),
        opts.variant.as_deref(),
    )
    .context("failed to set up tracker")?;

    let config = EstimationConfig {
        flip_horizontal: opts.flip_horizontal,
    };
    let view = FrameView {
        data: &[],
        width: opts.width,
        height: opts.height,
    };

    let mut summary = ReplaySummary { frames: 0, tracked: 0 };
    while !detector.is_exhausted() {
        let face = detector.estimate_faces(view, config)?.into_iter().next();
        let status = tracker.step(face.as_ref())?;
        if status == facedeco_core::TrackingStatus::Tracking {
            summary.tracked += 1;
        }

        let screen = tracker
            .state()
            .mesh()
            .and_then(|h| tracker.scene().mesh(h))
            .and_then(|m| m.screen_position);
        let line = serde_json::json!({
            "frame": summary.frames,
            "variant": tracker.state().active_variant(),
            "tracking": status.as_str(),
            "transform": tracker.last_transform().map(|t| t.to_json()),
            "screen": screen.map(|p| [p.x, p.y]),
        });
        writeln!(out, "{line}")?;
        summary.frames += 1;
    }

    tracing::info!(frames = summary.frames, tracked = summary.tracked, "replay finished");
    tracker.shutdown();
    Ok(summary)
}
