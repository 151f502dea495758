//! Sample-rate conversion between audio devices and the wire.
//!
//! Devices that cannot open at the session rate run at their own rate and
//! are bridged with a rubato FFT resampler. Callbacks deliver arbitrary
//! chunk sizes, so input is buffered until the resampler's next fixed-size
//! chunk is available.

use rubato::{FftFixedIn, Resampler};

use crate::error::{Result, TutorError};

/// Input frames per resampler chunk before rubato rounds it to the ratio.
const CHUNK_FRAMES: usize = 256;
const SUB_CHUNKS: usize = 2;

/// Mono streaming resampler.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    /// `None` when the rates already match.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Option<Self>> {
        if from_rate == to_rate {
            return Ok(None);
        }
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_FRAMES,
            SUB_CHUNKS,
            1,
        )
        .map_err(|e| TutorError::Config(format!("resampler {from_rate} -> {to_rate} Hz: {e}")))?;
        tracing::debug!(
            from_rate,
            to_rate,
            chunk = inner.input_frames_next(),
            "Resampler ready"
        );
        Ok(Some(Self {
            inner,
            pending: Vec::new(),
            from_rate,
            to_rate,
        }))
    }

    /// Feed samples and return every output sample now available.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(input);
        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.inner.process(&[chunk], None) {
                Ok(mut channels) => {
                    if let Some(mono) = channels.pop() {
                        out.extend(mono);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        from_rate = self.from_rate,
                        to_rate = self.to_rate,
                        error = %e,
                        "Resample failed, dropping chunk"
                    );
                }
            }
        }
        out
    }

    /// Input samples waiting for a full chunk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i % 50) as f32 / 50.0) - 0.5).collect()
    }

    #[test]
    fn matching_rates_need_no_resampler() {
        assert!(StreamResampler::new(16_000, 16_000).unwrap().is_none());
    }

    #[test]
    fn downsamples_by_exact_ratio() {
        let mut rs = StreamResampler::new(48_000, 16_000).unwrap().unwrap();
        let out = rs.process(&tone(4_800));
        assert!(!out.is_empty());
        assert_eq!(out.len() * 3, 4_800 - rs.pending());
    }

    #[test]
    fn upsamples_across_odd_sized_callbacks() {
        let mut rs = StreamResampler::new(24_000, 48_000).unwrap().unwrap();
        let mut total = 0;
        for _ in 0..30 {
            total += rs.process(&tone(97)).len();
        }
        assert!(total > 0);
        assert_eq!(total, 2 * (30 * 97 - rs.pending()));
    }

    #[test]
    fn short_input_is_buffered_until_a_chunk_fills() {
        let mut rs = StreamResampler::new(44_100, 16_000).unwrap().unwrap();
        assert!(rs.process(&tone(10)).is_empty());
        assert_eq!(rs.pending(), 10);
    }
}
