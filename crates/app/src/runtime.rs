//! The call runtime: wires capture, session, and playback together and owns
//! every per-call resource so teardown has one ordered path.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use livecall_audio::{
    pcm, AudioFrame, AudioRingBuffer, CaptureStats, CaptureThread, ChunkerConfig, FrameChunker,
    FrameReader, Playback,
};
use livecall_foundation::{AppConfig, AppError, CallState, CallStateManager};
use livecall_session::{LiveSession, MediaChunk, SessionEvent};
use livecall_telemetry::CallMetrics;
use livecall_video::{CameraSource, FrameSampler, RgbFrame, SampledFrame, SamplerConfig};

use crate::observables::CallObservables;
use crate::teardown::Teardown;

/// Shown for every setup or transport failure; details go to the log only.
const CONNECT_FAILED_MSG: &str = "Connection failed. Please try again.";

/// Everything one call owns. Fields are optional so a partially built call
/// (a failed connect) flows through the same ordered release path.
#[derive(Default)]
struct CallSession {
    video_sampler: Option<JoinHandle<()>>,
    video_uplink: Option<JoinHandle<()>>,
    capture: Option<CaptureThread>,
    chunker: Option<JoinHandle<()>>,
    uplink: Option<JoinHandle<()>>,
    playback: Option<Playback>,
    channel: Option<LiveSession>,
    downlink: Option<JoinHandle<()>>,
}

pub struct CallRuntime {
    config: AppConfig,
    state: CallStateManager,
    metrics: Arc<CallMetrics>,
    preview_tx: watch::Sender<Option<RgbFrame>>,
    preview_rx: watch::Receiver<Option<RgbFrame>>,
    call: Option<CallSession>,
}

impl CallRuntime {
    pub fn new(config: AppConfig) -> Self {
        let (preview_tx, preview_rx) = watch::channel(None);
        Self {
            config,
            state: CallStateManager::new(),
            metrics: Arc::new(CallMetrics::default()),
            preview_tx,
            preview_rx,
            call: None,
        }
    }

    pub fn observables(&self) -> CallObservables {
        CallObservables::new(
            self.state.clone(),
            self.metrics.clone(),
            self.preview_rx.clone(),
        )
    }

    /// Start a call. Any previous call is fully released first, so device
    /// handles and audio streams are never held by two calls at once.
    pub async fn connect(&mut self, video_enabled: bool) -> Result<(), AppError> {
        if let Some(previous) = self.call.take() {
            self.release(previous).await;
        }
        self.state.begin_connect()?;
        self.metrics.reset();

        match self.build_call(video_enabled).await {
            Ok(call) => {
                self.call = Some(call);
                self.state.transition(CallState::Active)?;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Call setup failed: {}", e);
                self.state.fail(CONNECT_FAILED_MSG);
                Err(e)
            }
        }
    }

    /// User-initiated teardown. Callable from any state, any number of
    /// times; always lands in `Ended`.
    pub async fn disconnect(&mut self) {
        if let Some(call) = self.call.take() {
            self.release(call).await;
        }
        let _ = self.state.transition(CallState::Ended);
    }

    async fn build_call(&mut self, video_enabled: bool) -> Result<CallSession, AppError> {
        let cfg = self.config.clone();
        cfg.validate()?;

        let mut call = CallSession::default();

        // 1) Microphone -> ring buffer, on the dedicated capture thread.
        let (producer, consumer) = AudioRingBuffer::new(cfg.audio.ring_capacity).split();
        let capture_stats = Arc::new(CaptureStats::default());
        let (capture, device_cfg) =
            match CaptureThread::spawn(cfg.audio.device.clone(), producer, capture_stats) {
                Ok(v) => v,
                Err(e) => {
                    self.release(call).await;
                    return Err(e.into());
                }
            };
        call.capture = Some(capture);

        // 2) Ragged device blocks -> fixed 16 kHz mono frames.
        let reader = FrameReader::new(consumer, device_cfg.sample_rate, device_cfg.channels);
        let (frame_tx, _) = broadcast::channel::<AudioFrame>(64);
        let chunker = FrameChunker::new(
            reader,
            frame_tx.clone(),
            ChunkerConfig {
                frame_size_samples: cfg.audio.frame_size_samples,
                sample_rate_hz: cfg.audio.capture_rate_hz,
            },
        )
        .with_metrics(self.metrics.clone());
        call.chunker = Some(chunker.spawn());

        // 3) Output stream and scheduler.
        let playback = match Playback::start() {
            Ok(p) => p,
            Err(e) => {
                self.release(call).await;
                return Err(e.into());
            }
        };
        let controller = playback.controller();
        call.playback = Some(playback);

        // 4) The session channel.
        let (channel, events) = match LiveSession::connect(&cfg.session).await {
            Ok(v) => v,
            Err(e) => {
                self.release(call).await;
                return Err(AppError::Session(e.to_string()));
            }
        };
        let sender = channel.sender();
        call.channel = Some(channel);

        // 5) Audio uplink. Subscribing here is the ready gate: frames the
        // chunker emitted before the session opened had no subscriber and
        // were dropped, so nothing is ever queued against a closed channel.
        let mut frame_rx = frame_tx.subscribe();
        let metrics = self.metrics.clone();
        let audio_sender = sender.clone();
        call.uplink = Some(tokio::spawn(async move {
            loop {
                match frame_rx.recv().await {
                    Ok(frame) => {
                        let bytes = pcm::encode_pcm16(&frame.samples);
                        audio_sender.send(MediaChunk::audio(pcm::to_transport_text(&bytes)));
                        metrics.audio_chunks_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Audio uplink lagging; {} frames skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // 6) Video mode: camera, frame sampler, video uplink.
        if video_enabled {
            let source = match make_camera_source(&cfg) {
                Ok(s) => s,
                Err(e) => {
                    self.release(call).await;
                    return Err(e);
                }
            };
            let (video_tx, mut video_rx) = mpsc::channel::<SampledFrame>(8);
            let sampler = FrameSampler::new(
                source,
                video_tx,
                self.preview_tx.clone(),
                SamplerConfig {
                    width: cfg.video.width,
                    height: cfg.video.height,
                    jpeg_quality: cfg.video.jpeg_quality,
                    interval: Duration::from_millis(cfg.video.interval_ms),
                },
            );
            match sampler.spawn() {
                Ok(handle) => call.video_sampler = Some(handle),
                Err(e) => {
                    self.release(call).await;
                    return Err(AppError::Video(e.to_string()));
                }
            }

            let video_sender = sender.clone();
            let metrics = self.metrics.clone();
            call.video_uplink = Some(tokio::spawn(async move {
                while let Some(frame) = video_rx.recv().await {
                    video_sender.send(MediaChunk::image(pcm::to_transport_text(&frame.jpeg)));
                    metrics.video_frames_sent.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }

        // 7) Downlink: inbound events feed the playback scheduler and the
        // state machine. Devices stay owned by the runtime; the presentation
        // layer reacts to Ended/Error by calling disconnect().
        let state = self.state.clone();
        let metrics = self.metrics.clone();
        call.downlink = Some(tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Ready => tracing::info!("Agent session ready"),
                    SessionEvent::Audio(bytes) => {
                        controller.enqueue_payload(&bytes);
                        metrics.mark_payload_received();
                    }
                    SessionEvent::Interrupted => {
                        controller.interrupt();
                        metrics.interrupts.fetch_add(1, Ordering::Relaxed);
                    }
                    SessionEvent::TurnComplete => tracing::debug!("Agent turn complete"),
                    SessionEvent::Closed => {
                        controller.interrupt();
                        let _ = state.transition(CallState::Ended);
                        break;
                    }
                    SessionEvent::TransportError(message) => {
                        tracing::error!("Transport error: {}", message);
                        controller.interrupt();
                        state.fail(CONNECT_FAILED_MSG);
                        break;
                    }
                }
            }
        }));

        Ok(call)
    }

    /// Release every resource a call holds, in dependency order: the video
    /// timer, camera preview, microphone, capture tasks, playback, and
    /// finally the session channel. Steps tolerate resources that are
    /// already gone.
    async fn release(&self, mut call: CallSession) {
        let mut teardown = Teardown::new();

        if let Some(handle) = call.video_sampler.take() {
            teardown.push("video frame sampler", move || {
                Box::pin(async move {
                    handle.abort();
                    let _ = handle.await;
                    Ok(())
                })
            });
        }
        {
            let preview_tx = self.preview_tx.clone();
            teardown.push_sync("camera preview", move || {
                let _ = preview_tx.send(None);
                Ok(())
            });
        }
        if let Some(capture) = call.capture.take() {
            teardown.push_sync("microphone capture", move || {
                capture.stop();
                Ok(())
            });
        }
        if let Some(handle) = call.chunker.take() {
            teardown.push("frame chunker", move || {
                Box::pin(async move {
                    handle.abort();
                    let _ = handle.await;
                    Ok(())
                })
            });
        }
        if let Some(handle) = call.uplink.take() {
            teardown.push("audio uplink", move || {
                Box::pin(async move {
                    handle.abort();
                    let _ = handle.await;
                    Ok(())
                })
            });
        }
        if let Some(handle) = call.video_uplink.take() {
            teardown.push("video uplink", move || {
                Box::pin(async move {
                    handle.abort();
                    let _ = handle.await;
                    Ok(())
                })
            });
        }
        if let Some(mut playback) = call.playback.take() {
            teardown.push_sync("playback output", move || {
                playback.stop();
                Ok(())
            });
        }
        if let Some(channel) = call.channel.take() {
            teardown.push("session channel", move || {
                Box::pin(async move {
                    channel.close().await;
                    Ok(())
                })
            });
        }
        if let Some(handle) = call.downlink.take() {
            teardown.push("downlink dispatcher", move || {
                Box::pin(async move {
                    handle.abort();
                    let _ = handle.await;
                    Ok(())
                })
            });
        }

        teardown.run().await;
    }
}

#[cfg(feature = "camera")]
fn make_camera_source(cfg: &AppConfig) -> Result<Box<dyn CameraSource>, AppError> {
    Ok(Box::new(livecall_video::NativeCameraSource::new(
        cfg.video.camera_index,
    )))
}

#[cfg(not(feature = "camera"))]
fn make_camera_source(_cfg: &AppConfig) -> Result<Box<dyn CameraSource>, AppError> {
    Err(AppError::Config(
        "video mode requires a build with the `camera` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnect_without_a_call_is_a_noop() {
        let mut runtime = CallRuntime::new(AppConfig::default());
        assert_eq!(runtime.observables().state(), CallState::Idle);

        runtime.disconnect().await;
        assert_eq!(runtime.observables().state(), CallState::Ended);

        // Second hangup: no error, state unchanged.
        runtime.disconnect().await;
        assert_eq!(runtime.observables().state(), CallState::Ended);
    }

    #[tokio::test]
    async fn missing_credential_is_a_setup_failure() {
        // Default config has no API key; validation fails before any device
        // is touched.
        let mut runtime = CallRuntime::new(AppConfig::default());
        let result = runtime.connect(false).await;
        assert!(result.is_err());

        let obs = runtime.observables();
        assert_eq!(obs.state(), CallState::Error);
        assert_eq!(obs.error_message(), CONNECT_FAILED_MSG);

        // The machine can be re-entered; the retry clears the message
        // before failing again.
        let result = runtime.connect(false).await;
        assert!(result.is_err());
        assert_eq!(runtime.observables().state(), CallState::Error);
    }

    #[tokio::test]
    async fn disconnect_after_failed_connect_lands_in_ended() {
        let mut runtime = CallRuntime::new(AppConfig::default());
        let _ = runtime.connect(false).await;
        assert_eq!(runtime.observables().state(), CallState::Error);

        runtime.disconnect().await;
        assert_eq!(runtime.observables().state(), CallState::Ended);
    }

    #[tokio::test]
    async fn observables_start_clean() {
        let runtime = CallRuntime::new(AppConfig::default());
        let obs = runtime.observables();
        assert_eq!(obs.state(), CallState::Idle);
        assert_eq!(obs.volume(), 0.0);
        assert!(obs.error_message().is_empty());
        assert!(obs.video_frame().is_none());
    }
}
