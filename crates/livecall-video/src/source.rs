use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Camera device not available: {0}")]
    DeviceUnavailable(String),

    #[error("Frame encode error: {0}")]
    Encode(String),
}

/// Raw RGB8 camera frame.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB8, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

/// Where camera frames come from.
///
/// `start`/`stop` bracket device ownership; `latest_frame` must never block
/// on the device and returns the most recent frame or nothing.
pub trait CameraSource: Send {
    fn start(&mut self) -> Result<(), VideoError>;

    fn stop(&mut self);

    fn latest_frame(&mut self) -> Option<RgbFrame>;
}

/// Deterministic source for tests and camera-less builds: a gradient that
/// shifts every frame.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    tick: u64,
    running: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
            running: false,
        }
    }
}

impl CameraSource for TestPatternSource {
    fn start(&mut self) -> Result<(), VideoError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn latest_frame(&mut self) -> Option<RgbFrame> {
        if !self.running {
            return None;
        }
        self.tick += 1;
        let shift = (self.tick % 256) as u32;
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x + shift) % 256) as u8);
                data.push((y % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        Some(RgbFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_respects_lifecycle() {
        let mut source = TestPatternSource::new(8, 8);
        assert!(source.latest_frame().is_none());

        source.start().unwrap();
        let frame = source.latest_frame().unwrap();
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 8);
        assert_eq!(frame.data.len(), 8 * 8 * 3);

        source.stop();
        assert!(source.latest_frame().is_none());
    }

    #[test]
    fn test_pattern_frames_change_over_time() {
        let mut source = TestPatternSource::new(8, 8);
        source.start().unwrap();
        let a = source.latest_frame().unwrap();
        let b = source.latest_frame().unwrap();
        assert_ne!(a.data, b.data);
    }
}
