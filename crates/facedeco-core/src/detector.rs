//! Landmark detector boundary and a recorded-output detector.
//!
//! The landmark model itself is external; anything that turns a frame into
//! face mesh keypoints implements [`FaceDetector`]. [`ReplayDetector`] plays
//! back detector output captured earlier as JSON Lines.

use crate::types::{DetectedFace, FrameView};
use std::io::BufRead;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("recording not found: {0}")]
    RecordingNotFound(String),
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad recording line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Options passed with every detection request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EstimationConfig {
    /// Mirror keypoints horizontally (for a mirrored preview).
    pub flip_horizontal: bool,
}

pub trait FaceDetector: Send + Sync {
    /// Detect faces in `frame`. An empty list means no face was found.
    fn estimate_faces(
        &self,
        frame: FrameView<'_>,
        config: EstimationConfig,
    ) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// Plays back recorded detector output, one frame per call.
///
/// Each line of the recording is a JSON array of faces, e.g.
/// `[{"keypoints":[{"x":480.0,"y":270.0,"z":-3.1}, ...]}]`. Once the
/// recording is exhausted every call reports no faces.
#[derive(Debug)]
pub struct ReplayDetector {
    frames: Vec<Vec<DetectedFace>>,
    cursor: Mutex<usize>,
}

impl ReplayDetector {
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::RecordingNotFound(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let detector = Self::from_reader(std::io::BufReader::new(file))?;
        tracing::info!(path = %path.display(), frames = detector.len(), "loaded landmark recording");
        Ok(detector)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, DetectorError> {
        let mut frames = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let faces: Vec<DetectedFace> =
                serde_json::from_str(&line).map_err(|source| DetectorError::Parse { line: i + 1, source })?;
            frames.push(faces);
        }
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<Vec<DetectedFace>>) -> Self {
        Self {
            frames,
            cursor: Mutex::new(0),
        }
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether every recorded frame has been played back.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.lock().map(|c| *c >= self.frames.len()).unwrap_or(true)
    }
}

impl FaceDetector for ReplayDetector {
    fn estimate_faces(
        &self,
        frame: FrameView<'_>,
        config: EstimationConfig,
    ) -> Result<Vec<DetectedFace>, DetectorError> {
        let index = {
            let mut cursor = self
                .cursor
                .lock()
                .map_err(|_| DetectorError::InferenceFailed("replay cursor poisoned".into()))?;
            let index = *cursor;
            *cursor += 1;
            index
        };

        let Some(faces) = self.frames.get(index) else {
            return Ok(Vec::new());
        };

        let mut faces = faces.clone();
        if config.flip_horizontal {
            let width = frame.width as f32;
            for kp in faces.iter_mut().flat_map(|f| f.keypoints.iter_mut()) {
                kp.x = width - kp.x;
            }
        }
        Ok(faces)
    }
}
