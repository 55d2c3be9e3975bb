use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared metrics for cross-task call monitoring
#[derive(Clone)]
pub struct CallMetrics {
    /// Input loudness in [0, 1], stored as value * 1000
    pub volume_milli: Arc<AtomicU64>,

    // Capture side
    pub capture_blocks: Arc<AtomicU64>,
    pub frames_emitted: Arc<AtomicU64>,
    pub capture_fps: Arc<AtomicU64>, // frames per second * 10

    // Uplink
    pub audio_chunks_sent: Arc<AtomicU64>,
    pub video_frames_sent: Arc<AtomicU64>,

    // Downlink / playback
    pub payloads_received: Arc<AtomicU64>,
    pub interrupts: Arc<AtomicU64>,
    pub last_payload_time: Arc<RwLock<Option<Instant>>>,
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self {
            volume_milli: Arc::new(AtomicU64::new(0)),
            capture_blocks: Arc::new(AtomicU64::new(0)),
            frames_emitted: Arc::new(AtomicU64::new(0)),
            capture_fps: Arc::new(AtomicU64::new(0)),
            audio_chunks_sent: Arc::new(AtomicU64::new(0)),
            video_frames_sent: Arc::new(AtomicU64::new(0)),
            payloads_received: Arc::new(AtomicU64::new(0)),
            interrupts: Arc::new(AtomicU64::new(0)),
            last_payload_time: Arc::new(RwLock::new(None)),
        }
    }
}

impl CallMetrics {
    /// Update the loudness estimate from one capture frame.
    ///
    /// Samples every 100th absolute amplitude and maps the mean through
    /// `min(1, mean * 5)`. This is a cheap heuristic for UI animation, not a
    /// perceptual loudness measure.
    pub fn update_volume(&self, samples: &[f32]) {
        if samples.is_empty() {
            self.volume_milli.store(0, Ordering::Relaxed);
            return;
        }
        let mut sum = 0.0f32;
        let mut count = 0u32;
        let mut i = 0;
        while i < samples.len() {
            sum += samples[i].abs();
            count += 1;
            i += 100;
        }
        let level = (sum / count as f32 * 5.0).min(1.0);
        self.volume_milli
            .store((level * 1000.0).round() as u64, Ordering::Relaxed);
    }

    /// Current loudness in [0, 1].
    pub fn volume(&self) -> f32 {
        self.volume_milli.load(Ordering::Relaxed) as f32 / 1000.0
    }

    pub fn update_capture_fps(&self, fps: f64) {
        self.capture_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn mark_payload_received(&self) {
        self.payloads_received.fetch_add(1, Ordering::Relaxed);
        *self.last_payload_time.write() = Some(Instant::now());
    }

    /// Reset everything a new call should start clean with.
    pub fn reset(&self) {
        self.volume_milli.store(0, Ordering::Relaxed);
        self.capture_blocks.store(0, Ordering::Relaxed);
        self.frames_emitted.store(0, Ordering::Relaxed);
        self.capture_fps.store(0, Ordering::Relaxed);
        self.audio_chunks_sent.store(0, Ordering::Relaxed);
        self.video_frames_sent.store(0, Ordering::Relaxed);
        self.payloads_received.store(0, Ordering::Relaxed);
        self.interrupts.store(0, Ordering::Relaxed);
        *self.last_payload_time.write() = None;
    }
}

#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    frame_count: u64,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.frame_count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}
