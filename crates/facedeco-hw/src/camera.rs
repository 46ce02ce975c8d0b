//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameSource};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl CameraError {
    /// Acquisition failures need user action; capture failures are per frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CameraError::PermissionDenied(_) | CameraError::DeviceUnavailable(_))
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

fn open_error(device_path: &str, e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(device_path.to_string())
    } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
        CameraError::DeviceUnavailable(format!("{device_path}: device busy"))
    } else {
        CameraError::DeviceUnavailable(format!("{device_path}: {e}"))
    }
}

/// V4L2 camera delivering RGB frames at a fixed size.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
}

impl Camera {
    /// Open a V4L2 camera and negotiate YUYV at `width`×`height`.
    ///
    /// The driver may settle on a different size; the negotiated one is kept
    /// and reported through `width`/`height`.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceUnavailable(format!("{device_path}: not found")));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::DeviceUnavailable(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: not a video capture device"
            )));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::DeviceUnavailable(format!("failed to get format: {e}")))?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::DeviceUnavailable(format!("failed to set format: {e}")))?;

        if negotiated.fourcc != FourCC::new(b"YUYV") {
            return Err(CameraError::DeviceUnavailable(format!(
                "unsupported pixel format: {:?} (need YUYV)",
                negotiated.fourcc
            )));
        }

        if (negotiated.width, negotiated.height) != (width, height) {
            tracing::warn!(
                requested_width = width,
                requested_height = height,
                width = negotiated.width,
                height = negotiated.height,
                "camera negotiated a different frame size"
            );
        } else {
            tracing::info!(width, height, fourcc = ?negotiated.fourcc, "negotiated format");
        }

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
        })
    }

    /// Capture a single frame, converted to RGB.
    ///
    /// Starts and stops streaming around the one frame; use
    /// [`into_stream`](Self::into_stream) for continuous capture.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.mmap_stream()?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        frame_from_yuyv(buf, self.width, self.height, meta.sequence)
    }

    /// Start streaming and keep it running for the lifetime of the returned source.
    pub fn into_stream(self) -> Result<CameraStream, CameraError> {
        let stream = self.mmap_stream()?;
        tracing::debug!(device = %self.device_path, "capture stream started");
        Ok(CameraStream { camera: self, stream })
    }

    fn mmap_stream(&self) -> Result<MmapStream<'static>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn frame_from_yuyv(buf: &[u8], width: u32, height: u32, sequence: u32) -> Result<Frame, CameraError> {
    let rgb = frame::yuyv_to_rgb(buf, width, height)
        .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}")))?;

    Ok(Frame {
        data: rgb,
        width,
        height,
        timestamp: std::time::Instant::now(),
        sequence,
    })
}

/// A camera with one mmap stream kept open across frames.
pub struct CameraStream {
    camera: Camera,
    stream: MmapStream<'static>,
}

impl CameraStream {
    pub fn camera(&self) -> &Camera {
        &self.camera
    }
}

impl FrameSource for CameraStream {
    fn width(&self) -> u32 {
        self.camera.width
    }

    fn height(&self) -> u32 {
        self.camera.height
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        frame_from_yuyv(buf, self.camera.width, self.camera.height, meta.sequence)
    }
}
