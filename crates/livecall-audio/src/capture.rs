use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::ring_buffer::AudioProducer;
use livecall_foundation::AudioError;

/// Negotiated input device parameters, needed by the chunker to downmix and
/// resample.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub blocks_captured: AtomicU64,
    pub blocks_dropped: AtomicU64,
}

/// Handle to the dedicated microphone thread.
///
/// cpal streams are not `Send`, so the stream lives on its own thread for
/// the whole call; `stop` flips the shutdown flag and joins.
pub struct CaptureThread {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl CaptureThread {
    /// Open the input device and start writing i16 samples into the ring
    /// buffer. Fails fast when no usable device exists (denied or missing
    /// microphone access is a connection-setup failure, not something to
    /// limp through).
    pub fn spawn(
        device_name: Option<String>,
        producer: AudioProducer,
        stats: Arc<CaptureStats>,
    ) -> Result<(Self, DeviceConfig), AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = running.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<DeviceConfig, AudioError>>();

        let thread_running = running.clone();
        let thread_stats = stats.clone();
        let handle = thread::Builder::new()
            .name("livecall-capture".to_string())
            .spawn(move || {
                let (stream, device_config) = match open_input_stream(
                    device_name.as_deref(),
                    producer,
                    thread_stats,
                    thread_running.clone(),
                ) {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(device_config));

                while thread_running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                tracing::info!("Capture thread stopped");
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn capture thread: {}", e)))?;

        let device_config = ready_rx
            .recv_timeout(Duration::from_secs(3))
            .map_err(|_| AudioError::Fatal("capture thread did not report readiness".to_string()))??;

        tracing::info!(
            "Microphone capture started: {} Hz, {} channel(s)",
            device_config.sample_rate,
            device_config.channels
        );
        Ok((
            Self {
                handle,
                shutdown,
                stats,
            },
            device_config,
        ))
    }

    /// Stop the stream and join the thread. Idempotent by construction: the
    /// handle is consumed.
    pub fn stop(self) {
        self.shutdown.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
        tracing::info!(
            "Capture finished: {} blocks written, {} dropped",
            self.stats.blocks_captured.load(Ordering::Relaxed),
            self.stats.blocks_dropped.load(Ordering::Relaxed)
        );
    }
}

fn open_input_stream(
    device_name: Option<&str>,
    mut producer: AudioProducer,
    stats: Arc<CaptureStats>,
    running: Arc<AtomicBool>,
) -> Result<(Stream, DeviceConfig), AudioError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound {
                name: Some(name.to_string()),
            })?,
        None => host
            .default_input_device()
            .ok_or(AudioError::DeviceNotFound { name: None })?,
    };
    if let Ok(name) = device.name() {
        tracing::info!("Selected input device: {}", name);
    }

    let default_config = device.default_input_config()?;
    let sample_format = default_config.sample_format();
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let device_config = DeviceConfig {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    // Shared block handler once the input is converted to i16.
    let mut handle_block = move |data: &[i16]| {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        let written = producer.write(data);
        if written == data.len() {
            stats.blocks_captured.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
        }
    };

    let err_fn = |err: cpal::StreamError| {
        tracing::error!("Audio input stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &_| handle_block(data),
            err_fn,
            None,
        )?,
        SampleFormat::F32 => {
            let mut converted: Vec<i16> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &_| {
                    converted.clear();
                    converted.reserve(data.len());
                    for &s in data {
                        converted.push((s.clamp(-1.0, 1.0) * 32767.0).round() as i16);
                    }
                    handle_block(&converted);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let mut converted: Vec<i16> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &_| {
                    converted.clear();
                    converted.reserve(data.len());
                    for &s in data {
                        // Center unsigned [0, 65535] onto signed range
                        converted.push((s as i32 - 32768) as i16);
                    }
                    handle_block(&converted);
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

    Ok((stream, device_config))
}

#[cfg(test)]
mod convert_tests {
    #[test]
    fn f32_to_i16_clamps_and_scales() {
        let src = [-2.0f32, -1.0, 0.0, 0.5, 1.0, 2.0];
        let out: Vec<i16> = src
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
            .collect();
        assert_eq!(out, [-32767, -32767, 0, 16384, 32767, 32767]);
    }

    #[test]
    fn u16_to_i16_centering() {
        let src = [0u16, 32768, 65535];
        let out: Vec<i16> = src.iter().map(|&s| (s as i32 - 32768) as i16).collect();
        assert_eq!(out, [-32768, 0, 32767]);
    }
}
