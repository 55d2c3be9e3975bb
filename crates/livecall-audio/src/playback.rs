use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::pcm;
use super::scheduler::PlaybackScheduler;
use livecall_foundation::AudioError;

/// Cheap handle for the downlink task: decode payloads into the scheduler
/// and flush it on barge-in.
#[derive(Clone)]
pub struct PlaybackController {
    scheduler: Arc<Mutex<PlaybackScheduler>>,
}

impl PlaybackController {
    /// Decode a 24 kHz PCM16 payload and schedule it after the current tail.
    pub fn enqueue_payload(&self, bytes: &[u8]) -> u64 {
        let samples = pcm::decode_pcm16(bytes, 1);
        self.scheduler.lock().enqueue(samples)
    }

    /// Stop everything currently scheduled; the next payload starts at
    /// "now".
    pub fn interrupt(&self) {
        self.scheduler.lock().flush();
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.lock().is_idle()
    }
}

/// Owns the 24 kHz output stream on its dedicated thread (cpal streams are
/// not `Send`) and the scheduler it renders from.
pub struct Playback {
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    thread: Option<PlaybackThread>,
}

struct PlaybackThread {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl Playback {
    /// Open the default output device at the playback rate and start
    /// rendering. The stream renders silence until payloads arrive.
    pub fn start() -> Result<Self, AudioError> {
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new()));

        let running = Arc::new(AtomicBool::new(true));
        let shutdown = running.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread_scheduler = scheduler.clone();
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("livecall-playback".to_string())
            .spawn(move || {
                let stream = match open_output_stream(thread_scheduler) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while thread_running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                tracing::info!("Playback thread stopped");
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn playback thread: {}", e)))?;

        ready_rx
            .recv_timeout(Duration::from_secs(3))
            .map_err(|_| AudioError::Fatal("playback thread did not report readiness".to_string()))??;

        Ok(Self {
            scheduler,
            thread: Some(PlaybackThread { handle, shutdown }),
        })
    }

    pub fn controller(&self) -> PlaybackController {
        PlaybackController {
            scheduler: self.scheduler.clone(),
        }
    }

    /// Force-stop live units and shut the output stream down. Idempotent.
    pub fn stop(&mut self) {
        self.scheduler.lock().flush();
        if let Some(thread) = self.thread.take() {
            thread.shutdown.store(false, Ordering::SeqCst);
            let _ = thread.handle.join();
        }
    }
}

fn open_output_stream(scheduler: Arc<Mutex<PlaybackScheduler>>) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::OutputDeviceNotFound)?;
    if let Ok(name) = device.name() {
        tracing::info!("Selected output device: {}", name);
    }

    let rate = pcm::PLAYBACK_SAMPLE_RATE;
    let (config, sample_format) = negotiate_output_config(&device, rate)?;
    let channels = config.channels as usize;

    let err_fn = |err: cpal::StreamError| {
        tracing::error!("Audio output stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &_| {
                    mono.resize(data.len() / channels, 0.0);
                    scheduler.lock().render(&mut mono);
                    for (frame, &s) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(s);
                    }
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &_| {
                    mono.resize(data.len() / channels, 0.0);
                    scheduler.lock().render(&mut mono);
                    for (frame, &s) in data.chunks_mut(channels).zip(mono.iter()) {
                        let v = (s * 32767.0).round() as i16;
                        frame.fill(v);
                    }
                },
                err_fn,
                None,
            )?
        }
        other => {
            return Err(AudioError::FormatNotSupported {
                format: format!("{:?}", other),
            });
        }
    };

    Ok(stream)
}

fn negotiate_output_config(
    device: &cpal::Device,
    rate: u32,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    // Prefer the default config when it already runs at the playback rate.
    if let Ok(default_config) = device.default_output_config() {
        if default_config.sample_rate().0 == rate {
            return Ok((
                StreamConfig {
                    channels: default_config.channels(),
                    sample_rate: default_config.sample_rate(),
                    buffer_size: cpal::BufferSize::Default,
                },
                default_config.sample_format(),
            ));
        }
    }

    // Otherwise any supported range containing the rate, fewest channels
    // first.
    let mut candidates: Vec<_> = device
        .supported_output_configs()?
        .filter(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
        .collect();
    candidates.sort_by_key(|c| c.channels());

    let chosen = candidates.into_iter().next().ok_or_else(|| {
        AudioError::FormatNotSupported {
            format: format!("no output config supports {} Hz", rate),
        }
    })?;
    let chosen = chosen.with_sample_rate(cpal::SampleRate(rate));
    let sample_format = chosen.sample_format();
    Ok((
        StreamConfig {
            channels: chosen.channels(),
            sample_rate: chosen.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        },
        sample_format,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_enqueue_decodes_payloads() {
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new()));
        let controller = PlaybackController {
            scheduler: scheduler.clone(),
        };

        let payload = pcm::encode_pcm16(&vec![0.25f32; 240]);
        let start = controller.enqueue_payload(&payload);
        assert_eq!(start, 0);
        assert_eq!(scheduler.lock().live_units(), 1);
        assert_eq!(scheduler.lock().next_start(), 240);
    }

    #[test]
    fn controller_interrupt_flushes() {
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new()));
        let controller = PlaybackController {
            scheduler: scheduler.clone(),
        };
        controller.enqueue_payload(&pcm::encode_pcm16(&vec![0.25f32; 240]));
        assert!(!controller.is_idle());

        controller.interrupt();
        assert!(controller.is_idle());
        assert_eq!(scheduler.lock().next_start(), 0);
    }
}
