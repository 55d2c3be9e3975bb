use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Streaming mono resampler bridging the device rate to the 16 kHz wire
/// rate, using Rubato's sinc interpolation.
///
/// Accepts arbitrary-sized input chunks and buffers internally to satisfy
/// Rubato's fixed input size.
pub struct StreamResampler {
    in_rate: u32,
    out_rate: u32,
    resampler: SincFixedIn<f32>,
    input_buffer: Vec<f32>,
    output_buffer: Vec<f32>,
    chunk_size: usize,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        // 512 samples keeps latency low; speech does not need more.
        let chunk_size = 512;

        let sinc_params = SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 128,
            window: WindowFunction::Blackman2,
        };

        let resampler = SincFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            2.0,
            sinc_params,
            chunk_size,
            1, // mono
        )
        .expect("failed to create resampler");

        Self {
            in_rate,
            out_rate,
            resampler,
            input_buffer: Vec::with_capacity(chunk_size * 2),
            output_buffer: Vec::new(),
            chunk_size,
        }
    }

    /// Resample an arbitrary chunk of mono i16 samples to the output rate.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.in_rate == self.out_rate {
            return input.to_vec();
        }

        for &sample in input {
            self.input_buffer.push(sample as f32 / 32768.0);
        }

        while self.input_buffer.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..self.chunk_size).collect();
            let input_frames = vec![chunk];

            match self.resampler.process(&input_frames, None) {
                Ok(frames) => {
                    if let Some(channel) = frames.first() {
                        self.output_buffer.extend_from_slice(channel);
                    }
                }
                Err(e) => {
                    tracing::warn!("Resampler error, dropping chunk: {}", e);
                }
            }
        }

        let result = self
            .output_buffer
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
            .collect();
        self.output_buffer.clear();
        result
    }

    /// Clear buffered samples and internal filter state.
    pub fn reset(&mut self) {
        self.input_buffer.clear();
        self.output_buffer.clear();
        self.resampler.reset();
    }

    pub fn input_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.out_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_48k_to_16k_ratio() {
        let mut rs = StreamResampler::new(48_000, 16_000);
        let input: Vec<i16> = (0..4_800).map(|i| (i % 32768) as i16).collect();

        let mut all_output = Vec::new();
        for chunk in input.chunks(1000) {
            all_output.extend(rs.process(chunk));
        }

        // ~1/3 of the input, with slack for filter buffering.
        assert!(
            all_output.len() >= 1400 && all_output.len() <= 1700,
            "expected ~1600 samples, got {}",
            all_output.len()
        );
    }

    #[test]
    fn upsample_preserves_level() {
        let mut rs = StreamResampler::new(16_000, 24_000);
        let input = vec![1000i16; 1600];
        let out = rs.process(&input);

        assert!(
            out.len() >= 2100 && out.len() <= 2500,
            "expected ~2400 samples, got {}",
            out.len()
        );
        for &s in &out[50..out.len().saturating_sub(50)] {
            assert!((900..=1100).contains(&s), "sample {} drifted from 1000", s);
        }
    }

    #[test]
    fn passthrough_same_rate() {
        let mut rs = StreamResampler::new(16_000, 16_000);
        let input = vec![100i16, 200, 300, 400, 500];
        assert_eq!(rs.process(&input), input);
    }

    #[test]
    fn reset_discards_pending_input() {
        let mut rs = StreamResampler::new(48_000, 16_000);
        rs.process(&vec![500i16; 100]); // less than one chunk, stays buffered
        rs.reset();
        let out = rs.process(&vec![0i16; 100]);
        assert!(out.is_empty());
    }
}
