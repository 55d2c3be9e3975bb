use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use super::frame_reader::{FrameReader, RawBlock};
use super::resampler::StreamResampler;
use livecall_telemetry::{CallMetrics, FpsTracker};

/// Fixed-size mono frame at the wire capture rate, ready for PCM encoding.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples in [-1, 1].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub timestamp: Instant,
}

pub struct ChunkerConfig {
    pub frame_size_samples: usize,
    pub sample_rate_hz: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            frame_size_samples: 4096,
            sample_rate_hz: 16_000,
        }
    }
}

/// Turns ragged device-rate blocks into fixed 4096-sample mono frames at
/// 16 kHz, updating the loudness observable along the way.
pub struct FrameChunker {
    reader: FrameReader,
    output_tx: broadcast::Sender<AudioFrame>,
    cfg: ChunkerConfig,
    metrics: Option<Arc<CallMetrics>>,
    running: Arc<AtomicBool>,
}

impl FrameChunker {
    pub fn new(
        reader: FrameReader,
        output_tx: broadcast::Sender<AudioFrame>,
        cfg: ChunkerConfig,
    ) -> Self {
        Self {
            reader,
            output_tx,
            cfg,
            metrics: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CallMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let resampler = if self.reader.sample_rate() != self.cfg.sample_rate_hz {
            tracing::info!(
                "Resampling capture: {} Hz {} ch -> {} Hz mono",
                self.reader.sample_rate(),
                self.reader.channels(),
                self.cfg.sample_rate_hz
            );
            Some(StreamResampler::new(
                self.reader.sample_rate(),
                self.cfg.sample_rate_hz,
            ))
        } else {
            None
        };

        let mut worker = ChunkerWorker {
            reader: self.reader,
            output_tx: self.output_tx,
            cfg: self.cfg,
            buffer: VecDeque::new(),
            resampler,
            metrics: self.metrics,
            fps_tracker: FpsTracker::new(),
            samples_emitted: 0,
            start_time: Instant::now(),
        };
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        tokio::spawn(async move {
            worker.run(running).await;
        })
    }
}

struct ChunkerWorker {
    reader: FrameReader,
    output_tx: broadcast::Sender<AudioFrame>,
    cfg: ChunkerConfig,
    buffer: VecDeque<f32>,
    resampler: Option<StreamResampler>,
    metrics: Option<Arc<CallMetrics>>,
    fps_tracker: FpsTracker,
    samples_emitted: u64,
    start_time: Instant,
}

impl ChunkerWorker {
    async fn run(&mut self, running: Arc<AtomicBool>) {
        tracing::info!("Frame chunker started");

        while running.load(Ordering::SeqCst) {
            if let Some(block) = self.reader.read_block(8192) {
                self.ingest(&block);
                self.flush_ready_frames();
            } else {
                // 4096 samples at 16 kHz arrive every 256 ms; polling at
                // 25 ms keeps latency well under one frame without burning
                // CPU.
                time::sleep(Duration::from_millis(25)).await;
            }
        }

        tracing::info!("Frame chunker stopped");
    }

    fn ingest(&mut self, block: &RawBlock) {
        if let Some(metrics) = &self.metrics {
            metrics.capture_blocks.fetch_add(1, Ordering::Relaxed);
        }
        let mono = downmix(&block.samples, block.channels);
        let resampled = match &mut self.resampler {
            Some(rs) => rs.process(&mono),
            None => mono,
        };
        self.buffer
            .extend(resampled.iter().map(|&s| s as f32 / 32768.0));
    }

    fn flush_ready_frames(&mut self) {
        let frame_size = self.cfg.frame_size_samples;
        while self.buffer.len() >= frame_size {
            let samples: Vec<f32> = self.buffer.drain(..frame_size).collect();

            if let Some(metrics) = &self.metrics {
                metrics.update_volume(&samples);
                metrics.frames_emitted.fetch_add(1, Ordering::Relaxed);
                if let Some(fps) = self.fps_tracker.tick() {
                    metrics.update_capture_fps(fps);
                }
            }

            let timestamp_ms =
                self.samples_emitted * 1000 / self.cfg.sample_rate_hz as u64;
            let frame = AudioFrame {
                samples,
                sample_rate: self.cfg.sample_rate_hz,
                timestamp: self.start_time + Duration::from_millis(timestamp_ms),
            };
            self.samples_emitted += frame_size as u64;

            // A broadcast send fails only when nobody is subscribed; capture
            // is best-effort, so the frame is simply dropped.
            if self.output_tx.send(frame).is_err() {
                tracing::debug!("No uplink listening; dropping capture frame");
            }
        }
    }
}

fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / ch as i32) as i16
        })
        .collect()
}
