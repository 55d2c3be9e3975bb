//! Native camera backend behind the `camera` feature.

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use super::source::{CameraSource, RgbFrame, VideoError};

/// Webcam source backed by nokhwa. The device is opened on `start` and
/// released on `stop` (or drop), so two calls never contend for it.
pub struct NativeCameraSource {
    index: u32,
    camera: Option<Camera>,
}

impl NativeCameraSource {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            camera: None,
        }
    }
}

impl CameraSource for NativeCameraSource {
    fn start(&mut self) -> Result<(), VideoError> {
        if self.camera.is_some() {
            return Ok(());
        }
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(self.index), requested)
            .map_err(|e| VideoError::DeviceUnavailable(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| VideoError::DeviceUnavailable(e.to_string()))?;
        tracing::info!("Camera {} opened", self.index);
        self.camera = Some(camera);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            let _ = camera.stop_stream();
            tracing::info!("Camera {} released", self.index);
        }
    }

    fn latest_frame(&mut self) -> Option<RgbFrame> {
        let camera = self.camera.as_mut()?;
        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Camera frame grab failed: {}", e);
                return None;
            }
        };
        let decoded = match frame.decode_image::<RgbFormat>() {
            Ok(img) => img,
            Err(e) => {
                tracing::debug!("Camera frame decode failed: {}", e);
                return None;
            }
        };
        Some(RgbFrame {
            width: decoded.width(),
            height: decoded.height(),
            data: decoded.into_raw(),
        })
    }
}

impl Drop for NativeCameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}
