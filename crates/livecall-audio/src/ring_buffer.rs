use rtrb::{Consumer, Producer, RingBuffer};

/// Lock-free sample queue between the capture callback and the chunker task,
/// built on rtrb (real-time safe).
pub struct AudioRingBuffer {
    producer: Producer<i16>,
    consumer: Consumer<i16>,
}

impl AudioRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self { producer, consumer }
    }

    /// Split into the two halves, one per thread.
    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        (
            AudioProducer {
                producer: self.producer,
            },
            AudioConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Producer half, owned by the audio callback.
pub struct AudioProducer {
    producer: Producer<i16>,
}

impl AudioProducer {
    /// Write samples without blocking. Returns the number of samples
    /// accepted: all of them, or zero when the buffer cannot hold the block.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        let mut chunk = match self.producer.write_chunk(samples.len()) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };

        // The chunk may wrap around the buffer end; fill both slices.
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        if !second.is_empty() {
            second.copy_from_slice(&samples[split..]);
        }
        chunk.commit_all();
        samples.len()
    }

    /// Free space, in samples.
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half, owned by the chunker.
pub struct AudioConsumer {
    consumer: Consumer<i16>,
}

impl AudioConsumer {
    /// Read up to `buffer.len()` samples without blocking. Returns the
    /// number of samples read.
    pub fn read(&mut self, buffer: &mut [i16]) -> usize {
        let chunk = match self.consumer.read_chunk(buffer.len()) {
            Ok(chunk) => chunk,
            Err(rtrb::chunks::ChunkError::TooFewSlots(available)) => {
                if available == 0 {
                    return 0;
                }
                self.consumer.read_chunk(available).unwrap()
            }
        };

        let len = chunk.len();
        let (first, second) = chunk.as_slices();
        let split = first.len();
        buffer[..split].copy_from_slice(first);
        if !second.is_empty() {
            buffer[split..split + second.len()].copy_from_slice(second);
        }
        chunk.commit_all();
        len
    }

    /// Samples waiting to be read.
    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let rb = AudioRingBuffer::new(1024);
        let (mut producer, mut consumer) = rb.split();

        assert_eq!(producer.write(&[1, 2, 3, 4, 5]), 5);

        let mut buffer = [0i16; 10];
        assert_eq!(consumer.read(&mut buffer), 5);
        assert_eq!(&buffer[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn full_buffer_rejects_whole_block() {
        let rb = AudioRingBuffer::new(16);
        let (mut producer, _consumer) = rb.split();

        assert_eq!(producer.write(&vec![1i16; 20]), 0);
        assert_eq!(producer.write(&vec![1i16; 16]), 16);
        assert_eq!(producer.write(&[2]), 0);
    }

    #[test]
    fn read_is_bounded_by_buffer_len() {
        let rb = AudioRingBuffer::new(64);
        let (mut producer, mut consumer) = rb.split();
        producer.write(&vec![7i16; 32]);

        let mut small = [0i16; 8];
        assert_eq!(consumer.read(&mut small), 8);
        assert_eq!(consumer.slots(), 24);
    }

    #[test]
    fn wrapping_preserves_order() {
        let rb = AudioRingBuffer::new(8);
        let (mut producer, mut consumer) = rb.split();
        let mut buf = [0i16; 8];

        producer.write(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(consumer.read(&mut buf), 6);
        // Next write wraps around the end of the storage.
        producer.write(&[7, 8, 9, 10]);
        assert_eq!(consumer.read(&mut buf), 4);
        assert_eq!(&buf[..4], &[7, 8, 9, 10]);
    }
}
