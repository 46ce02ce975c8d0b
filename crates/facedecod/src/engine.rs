use crate::config::Config;
use facedeco_core::assets::AssetStore;
use facedeco_core::detector::DetectorError;
use facedeco_core::overlay::OverlayError;
use facedeco_core::tracker::TrackerError;
use facedeco_core::{
    DetectionResult, DirAssets, Direction, EstimationConfig, FaceDetector, FrameView, HeadlessScene,
    MeshTransform, OverlayTracker, ReplayDetector, SceneRenderer, TrackingStatus, VariantCatalog,
};
use facedeco_hw::{BlankSource, Camera, CameraError, FrameSource};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),
    #[error("{0}")]
    Overlay(#[from] OverlayError),
    #[error("no landmark source configured (set FACEDECO_LANDMARKS_PATH)")]
    NoLandmarkSource,
    #[error("frame source lock poisoned")]
    SourcePoisoned,
    #[error("frame loop exited")]
    ChannelClosed,
}

/// Snapshot of the running session.
#[derive(Debug, Clone)]
pub struct OverlayStatus {
    pub variant: String,
    pub offset: (f32, f32),
    pub tracking: TrackingStatus,
    pub frames_rendered: u64,
    pub detections_in_flight: usize,
    pub last_transform: Option<MeshTransform>,
}

impl OverlayStatus {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "variant": self.variant,
            "offset": { "x": self.offset.0, "y": self.offset.1 },
            "tracking": self.tracking.as_str(),
            "frames_rendered": self.frames_rendered,
            "detections_in_flight": self.detections_in_flight,
            "transform": self.last_transform.map(|t| t.to_json()),
        })
    }
}

/// Messages sent from D-Bus handlers to the frame loop.
pub enum EngineCommand {
    SelectVariant {
        name: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Nudge {
        direction: Direction,
        reply: oneshot::Sender<OverlayStatus>,
    },
    Status {
        reply: oneshot::Sender<OverlayStatus>,
    },
}

/// Clone-safe handle to the frame loop.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn channel() -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(8);
        (Self { tx }, rx)
    }

    /// Switch the overlay to `name`. Offsets reset on success.
    pub async fn select_variant(&self, name: &str) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::SelectVariant {
                name: name.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Shift the overlay one step and return the resulting status.
    pub async fn nudge(&self, direction: Direction) -> Result<OverlayStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Nudge {
                direction,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<OverlayStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Latest completed detection, tagged with the request that produced it.
#[derive(Debug, Clone, Default)]
pub struct DetectionSlot {
    pub sequence: u64,
    pub result: DetectionResult,
}

/// Store `result` unless a newer request already completed.
///
/// Dropping late results trades a little latency for never rendering an older
/// face after a newer one.
fn publish(slot: &watch::Sender<DetectionSlot>, sequence: u64, result: DetectionResult) -> bool {
    slot.send_if_modified(|current| {
        if sequence <= current.sequence {
            return false;
        }
        *current = DetectionSlot { sequence, result };
        true
    })
}

/// Holds one in-flight slot; released on drop, including when detection panics.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Capture one frame and run the detector on it. The first face wins.
fn detect_once(
    source: &Mutex<Box<dyn FrameSource>>,
    detector: &dyn FaceDetector,
    config: EstimationConfig,
) -> Result<DetectionResult, EngineError> {
    let frame = {
        let mut source = source.lock().map_err(|_| EngineError::SourcePoisoned)?;
        source.next_frame()?
    };
    let view = FrameView {
        data: &frame.data,
        width: frame.width,
        height: frame.height,
    };
    let faces = detector.estimate_faces(view, config)?;
    Ok(faces.into_iter().next())
}

/// Render loop. Every tick asks for a new detection without waiting for it and
/// renders with whichever result completed most recently.
pub struct FrameLoop<S, A> {
    tracker: OverlayTracker<S, A>,
    detector: Arc<dyn FaceDetector>,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    estimation: EstimationConfig,
    slot_tx: Arc<watch::Sender<DetectionSlot>>,
    slot_rx: watch::Receiver<DetectionSlot>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
    next_request: u64,
    frame_period: Duration,
    frames: u64,
}

impl<S, A> FrameLoop<S, A>
where
    S: SceneRenderer + Send + 'static,
    A: AssetStore + Send + 'static,
{
    pub fn new(
        tracker: OverlayTracker<S, A>,
        detector: Arc<dyn FaceDetector>,
        source: Box<dyn FrameSource>,
        estimation: EstimationConfig,
        max_in_flight: usize,
        frame_period: Duration,
    ) -> Self {
        let (slot_tx, slot_rx) = watch::channel(DetectionSlot::default());
        Self {
            tracker,
            detector,
            source: Arc::new(Mutex::new(source)),
            estimation,
            slot_tx: Arc::new(slot_tx),
            slot_rx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight,
            next_request: 1,
            frame_period,
            frames: 0,
        }
    }

    /// Start a detection on the blocking pool unless the cap is reached.
    fn request_detection(&mut self) {
        if self.in_flight.load(Ordering::Acquire) >= self.max_in_flight {
            tracing::trace!(in_flight = self.max_in_flight, "detection skipped; pipeline saturated");
            return;
        }
        let guard = InFlight::acquire(&self.in_flight);

        let sequence = self.next_request;
        self.next_request += 1;

        let source = Arc::clone(&self.source);
        let detector = Arc::clone(&self.detector);
        let slot = Arc::clone(&self.slot_tx);
        let estimation = self.estimation;

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let result = match detect_once(&source, detector.as_ref(), estimation) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(sequence, error = %e, "detection failed; treating frame as empty");
                    None
                }
            };
            if !publish(&slot, sequence, result) {
                tracing::trace!(sequence, "stale detection dropped");
            }
        });
    }

    fn tick(&mut self) {
        self.request_detection();

        let slot = self.slot_rx.borrow().clone();
        match self.tracker.step(slot.result.as_ref()) {
            Ok(_) => self.frames += 1,
            Err(e) => tracing::warn!(error = %e, "frame render failed"),
        }
    }

    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SelectVariant { name, reply } => {
                let result = self.tracker.select_variant(&name).map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineCommand::Nudge { direction, reply } => {
                self.tracker.nudge(direction);
                let _ = reply.send(self.status());
            }
            EngineCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    pub fn status(&self) -> OverlayStatus {
        let state = self.tracker.state();
        let offset = state.user_offset();
        OverlayStatus {
            variant: state.active_variant().to_string(),
            offset: (offset.x, offset.y),
            tracking: self.tracker.status(),
            frames_rendered: self.frames,
            detections_in_flight: self.in_flight.load(Ordering::Acquire),
            last_transform: self.tracker.last_transform().copied(),
        }
    }

    /// Tick until `shutdown` resolves, then release the mesh and return the scene.
    pub async fn run<F>(mut self, mut commands: mpsc::Receiver<EngineCommand>, shutdown: F) -> S
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.frame_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(period_ms = self.frame_period.as_millis() as u64, "frame loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => self.tick(),
                Some(command) = commands.recv() => self.handle(command),
            }
        }
        tracing::info!(frames = self.frames, "frame loop stopped");
        self.tracker.shutdown()
    }
}

/// A running frame loop.
pub struct Engine {
    pub handle: EngineHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<HeadlessScene>,
}

impl Engine {
    /// Stop the loop and wait for it to release its mesh.
    pub async fn stop(self) -> Result<HeadlessScene, EngineError> {
        let _ = self.shutdown.send(());
        self.task.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the frame loop on the runtime.
///
/// Opens the frame source, loads the landmark recording and installs the
/// initial variant synchronously. Fails fast at startup if any resource is
/// unavailable.
pub fn spawn_engine(config: &Config, catalog: VariantCatalog) -> Result<Engine, EngineError> {
    let source: Box<dyn FrameSource> = match &config.camera_device {
        Some(device) => {
            let camera = Camera::open(device, config.frame_width, config.frame_height)?;
            tracing::info!(
                device = %device,
                width = camera.width,
                height = camera.height,
                fourcc = ?camera.fourcc,
                "camera opened"
            );
            Box::new(camera.into_stream()?)
        }
        None => {
            tracing::info!(
                width = config.frame_width,
                height = config.frame_height,
                "no camera configured; using blank frames"
            );
            Box::new(BlankSource::new(config.frame_width, config.frame_height))
        }
    };

    let landmarks = config
        .landmarks_path
        .as_ref()
        .ok_or(EngineError::NoLandmarkSource)?;
    let detector = ReplayDetector::load(landmarks)?;

    let tracker = OverlayTracker::new(
        source.width(),
        source.height(),
        config.params,
        catalog,
        DirAssets::new(config.asset_dir.clone()),
        HeadlessScene::new(),
        config.default_variant.as_deref(),
    )?;

    let frame_loop = FrameLoop::new(
        tracker,
        Arc::new(detector),
        source,
        EstimationConfig {
            flip_horizontal: config.flip_horizontal,
        },
        config.max_in_flight,
        config.frame_period(),
    );

    let (handle, commands) = EngineHandle::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(frame_loop.run(commands, async move {
        let _ = shutdown_rx.await;
    }));

    Ok(Engine {
        handle,
        shutdown: shutdown_tx,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facedeco_core::assets::{AssetError, RgbaImage};
    use facedeco_core::types::landmark;
    use facedeco_core::{DetectedFace, Landmark, TrackingParams};

    const W: u32 = 960;
    const H: u32 = 540;

    struct SolidAssets;

    impl AssetStore for SolidAssets {
        fn image(&mut self, _name: &str) -> Result<Arc<RgbaImage>, AssetError> {
            Ok(Arc::new(RgbaImage::new(20, 10)))
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn estimate_faces(
            &self,
            _frame: FrameView<'_>,
            _config: EstimationConfig,
        ) -> Result<Vec<DetectedFace>, DetectorError> {
            Err(DetectorError::InferenceFailed("model not loaded".into()))
        }
    }

    /// Panics on every call, counting how often it was asked.
    struct PanickingDetector(Arc<AtomicUsize>);

    impl FaceDetector for PanickingDetector {
        fn estimate_faces(
            &self,
            _frame: FrameView<'_>,
            _config: EstimationConfig,
        ) -> Result<Vec<DetectedFace>, DetectorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("model internal error");
        }
    }

    fn face() -> DetectedFace {
        let (cx, cy) = (W as f32 / 2.0, H as f32 / 2.0);
        let mut keypoints = vec![Landmark::new(cx, cy, 0.0); 468];
        keypoints[landmark::NOSE_TIP] = Landmark::new(cx, cy, -30.0);
        keypoints[landmark::LEFT_NOSTRIL] = Landmark::new(cx + 15.0, cy - 10.0, 0.0);
        keypoints[landmark::RIGHT_NOSTRIL] = Landmark::new(cx - 15.0, cy - 10.0, 0.0);
        keypoints[landmark::RIGHT_EAR] = Landmark::new(cx + 100.0, cy, 20.0);
        keypoints[landmark::LEFT_EAR] = Landmark::new(cx - 100.0, cy, 20.0);
        DetectedFace { keypoints }
    }

    fn frame_loop(
        detector: Arc<dyn FaceDetector>,
        max_in_flight: usize,
    ) -> FrameLoop<HeadlessScene, SolidAssets> {
        let tracker = OverlayTracker::new(
            W,
            H,
            TrackingParams::default(),
            VariantCatalog::builtin().unwrap(),
            SolidAssets,
            HeadlessScene::new(),
            None,
        )
        .unwrap();
        FrameLoop::new(
            tracker,
            detector,
            Box::new(BlankSource::new(W, H)),
            EstimationConfig::default(),
            max_in_flight,
            Duration::from_millis(5),
        )
    }

    fn idle_detector() -> Arc<dyn FaceDetector> {
        Arc::new(ReplayDetector::from_frames(Vec::new()))
    }

    #[test]
    fn test_stale_detection_is_dropped() {
        let (tx, rx) = watch::channel(DetectionSlot::default());
        assert!(publish(&tx, 2, Some(face())));
        assert!(!publish(&tx, 1, None));
        let slot = rx.borrow();
        assert_eq!(slot.sequence, 2);
        assert!(slot.result.is_some());
    }

    #[test]
    fn test_latest_result_reused_between_detections() {
        let mut fl = frame_loop(idle_detector(), 0);
        assert!(publish(&fl.slot_tx, 1, Some(face())));

        fl.tick();
        let first = fl.status();
        assert_eq!(first.tracking, TrackingStatus::Tracking);

        fl.tick();
        let second = fl.status();
        assert_eq!(second.frames_rendered, 2);
        assert_eq!(second.last_transform, first.last_transform);

        assert!(publish(&fl.slot_tx, 2, None));
        fl.tick();
        let third = fl.status();
        assert_eq!(third.tracking, TrackingStatus::NotFound);
        assert_eq!(third.last_transform, first.last_transform);
    }

    #[test]
    fn test_status_json() {
        let fl = frame_loop(idle_detector(), 0);
        let json = fl.status().to_json();
        assert_eq!(json["variant"], "rabbit");
        assert_eq!(json["tracking"], "not_found");
        assert_eq!(json["offset"]["x"], 0.0);
        assert!(json["transform"].is_null());
    }

    #[tokio::test]
    async fn test_handle_nudge_and_select() {
        let fl = frame_loop(idle_detector(), 0);
        let (handle, commands) = EngineHandle::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(fl.run(commands, async move {
            let _ = stop_rx.await;
        }));

        let mut status = None;
        for _ in 0..3 {
            status = Some(handle.nudge(Direction::Left).await.unwrap());
        }
        assert_eq!(status.unwrap().offset, (15.0, 0.0));

        handle.select_variant("ribbon").await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.variant, "ribbon");
        assert_eq!(status.offset, (0.0, 0.0));

        let err = handle.select_variant("unicorn").await.unwrap_err();
        assert!(matches!(err, EngineError::Overlay(OverlayError::UnknownVariant(_))));
        assert_eq!(handle.status().await.unwrap().variant, "ribbon");

        stop_tx.send(()).unwrap();
        let scene = task.await.unwrap();
        assert_eq!(scene.live_meshes(), 0);
    }

    #[tokio::test]
    async fn test_failing_detector_keeps_rendering() {
        let fl = frame_loop(Arc::new(FailingDetector), 1);
        let (handle, commands) = EngineHandle::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(fl.run(commands, async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let status = handle.status().await.unwrap();
        assert!(status.frames_rendered > 1, "frames = {}", status.frames_rendered);
        assert_eq!(status.tracking, TrackingStatus::NotFound);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_detector_panic_releases_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fl = frame_loop(Arc::new(PanickingDetector(Arc::clone(&calls))), 2);
        let (handle, commands) = EngineHandle::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(fl.run(commands, async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = handle.status().await.unwrap();
        let calls = calls.load(Ordering::SeqCst);
        assert!(calls > 4, "detector called {calls} times");
        assert_eq!(status.tracking, TrackingStatus::NotFound);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_in_flight_guard_releases_on_unwind() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = InFlight::acquire(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let result = std::panic::catch_unwind(move || {
            let _guard = guard;
            panic!("detector blew up");
        });
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_after_stop() {
        let fl = frame_loop(idle_detector(), 0);
        let (handle, commands) = EngineHandle::channel();
        let scene = fl.run(commands, async {}).await;
        assert_eq!(scene.live_meshes(), 0);
        assert!(matches!(handle.status().await, Err(EngineError::ChannelClosed)));
    }

    #[test]
    fn test_missing_landmark_source() {
        let mut config = Config::from_env();
        config.camera_device = None;
        config.landmarks_path = None;
        let result = spawn_engine(&config, VariantCatalog::builtin().unwrap());
        assert!(matches!(result, Err(EngineError::NoLandmarkSource)));
    }
}
