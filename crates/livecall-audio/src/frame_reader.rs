use std::time::Instant;

use super::ring_buffer::AudioConsumer;

/// Interleaved device-rate samples drained from the ring buffer.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Instant,
}

/// Drains the capture ring buffer and reconstructs block timestamps from the
/// running sample count.
pub struct FrameReader {
    consumer: AudioConsumer,
    sample_rate: u32,
    channels: u16,
    samples_read: u64,
    start_time: Instant,
}

impl FrameReader {
    pub fn new(consumer: AudioConsumer, sample_rate: u32, channels: u16) -> Self {
        Self {
            consumer,
            sample_rate,
            channels,
            samples_read: 0,
            start_time: Instant::now(),
        }
    }

    /// Read whatever is available, up to `max_samples`.
    pub fn read_block(&mut self, max_samples: usize) -> Option<RawBlock> {
        let mut buffer = vec![0i16; max_samples];
        let read = self.consumer.read(&mut buffer);
        if read == 0 {
            return None;
        }
        buffer.truncate(read);

        let elapsed_ms =
            self.samples_read * 1000 / (self.sample_rate as u64 * self.channels.max(1) as u64);
        let timestamp = self.start_time + std::time::Duration::from_millis(elapsed_ms);
        self.samples_read += read as u64;

        Some(RawBlock {
            samples: buffer,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples currently waiting in the ring buffer.
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::AudioRingBuffer;

    #[test]
    fn empty_buffer_yields_none() {
        let (_producer, consumer) = AudioRingBuffer::new(64).split();
        let mut reader = FrameReader::new(consumer, 16_000, 1);
        assert!(reader.read_block(32).is_none());
    }

    #[test]
    fn reads_preserve_order_and_metadata() {
        let (mut producer, consumer) = AudioRingBuffer::new(64).split();
        producer.write(&[10, 20, 30]);

        let mut reader = FrameReader::new(consumer, 48_000, 2);
        let block = reader.read_block(32).unwrap();
        assert_eq!(block.samples, vec![10, 20, 30]);
        assert_eq!(block.sample_rate, 48_000);
        assert_eq!(block.channels, 2);
    }
}
