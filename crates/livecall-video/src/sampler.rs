use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::source::{CameraSource, RgbFrame, VideoError};

/// JPEG-encoded still handed to the uplink.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub jpeg: Vec<u8>,
    pub frame_id: u64,
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            jpeg_quality: 60,
            interval: Duration::from_millis(500),
        }
    }
}

/// Periodically grabs the latest camera frame, encodes it, and forwards it.
///
/// The timer runs independently of audio block timing; no synchronization
/// between audio and video frame boundaries exists or is needed. A tick with
/// no fresh frame, or with a full uplink queue, drops the frame — video is a
/// best-effort stream.
pub struct FrameSampler {
    source: Box<dyn CameraSource>,
    out_tx: mpsc::Sender<SampledFrame>,
    preview_tx: watch::Sender<Option<RgbFrame>>,
    cfg: SamplerConfig,
}

impl FrameSampler {
    pub fn new(
        source: Box<dyn CameraSource>,
        out_tx: mpsc::Sender<SampledFrame>,
        preview_tx: watch::Sender<Option<RgbFrame>>,
        cfg: SamplerConfig,
    ) -> Self {
        Self {
            source,
            out_tx,
            preview_tx,
            cfg,
        }
    }

    /// Start the camera and the sampling timer. The camera is released when
    /// the task is aborted or the sampler stops.
    pub fn spawn(mut self) -> Result<JoinHandle<()>, VideoError> {
        self.source.start()?;

        Ok(tokio::spawn(async move {
            tracing::info!(
                "Frame sampler started: {}x{} every {:?}",
                self.cfg.width,
                self.cfg.height,
                self.cfg.interval
            );
            let mut interval = tokio::time::interval(self.cfg.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut frame_id = 0u64;

            loop {
                interval.tick().await;

                let Some(frame) = self.source.latest_frame() else {
                    continue;
                };
                let _ = self.preview_tx.send(Some(frame.clone()));

                match encode_jpeg(&frame, &self.cfg) {
                    Ok(jpeg) => {
                        frame_id += 1;
                        let sampled = SampledFrame {
                            jpeg,
                            frame_id,
                            timestamp: Instant::now(),
                        };
                        if self.out_tx.try_send(sampled).is_err() {
                            tracing::debug!("Uplink busy; dropping video frame {}", frame_id);
                        }
                    }
                    Err(e) => tracing::warn!("Video frame encode failed: {}", e),
                }
            }
        }))
    }
}

/// Scale to the configured geometry and encode as JPEG.
fn encode_jpeg(frame: &RgbFrame, cfg: &SamplerConfig) -> Result<Vec<u8>, VideoError> {
    let img: image::RgbImage =
        image::ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| VideoError::Encode("frame buffer does not match geometry".into()))?;

    let img = if frame.width != cfg.width || frame.height != cfg.height {
        image::imageops::resize(
            &img,
            cfg.width,
            cfg.height,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut out = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, cfg.jpeg_quality);
    encoder
        .encode(
            img.as_raw(),
            cfg.width,
            cfg.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| VideoError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TestPatternSource;

    #[test]
    fn encode_produces_jpeg_magic() {
        let mut source = TestPatternSource::new(320, 240);
        source.start().unwrap();
        let frame = source.latest_frame().unwrap();

        let cfg = SamplerConfig::default();
        let jpeg = encode_jpeg(&frame, &cfg).unwrap();
        assert!(jpeg.len() > 2);
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]); // SOI marker
    }

    #[test]
    fn encode_rejects_mismatched_buffer() {
        let frame = RgbFrame {
            width: 10,
            height: 10,
            data: vec![0; 5],
        };
        assert!(encode_jpeg(&frame, &SamplerConfig::default()).is_err());
    }

    #[tokio::test]
    async fn sampler_emits_frames_on_ticks() {
        let mut source = TestPatternSource::new(64, 48);
        source.start().unwrap();
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (preview_tx, preview_rx) = watch::channel(None);

        let cfg = SamplerConfig {
            width: 64,
            height: 48,
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let handle = FrameSampler::new(Box::new(source), out_tx, preview_tx, cfg)
            .spawn()
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .expect("sampler should emit within the timeout")
            .expect("channel open");
        assert_eq!(first.frame_id, 1);
        assert_eq!(&first.jpeg[..2], &[0xff, 0xd8]);
        assert!(preview_rx.borrow().is_some());

        handle.abort();
        let _ = handle.await;
    }
}
