pub mod capture;
pub mod chunker;
pub mod frame_reader;
pub mod pcm;
pub mod playback;
pub mod resampler;
pub mod ring_buffer;
pub mod scheduler;

// Public API
pub use capture::{CaptureStats, CaptureThread, DeviceConfig};
pub use chunker::{AudioFrame, ChunkerConfig, FrameChunker};
pub use frame_reader::FrameReader;
pub use playback::{Playback, PlaybackController};
pub use ring_buffer::AudioRingBuffer;
pub use scheduler::PlaybackScheduler;
