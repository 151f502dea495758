//! PCM16LE conversion and fixed-size framing.
//!
//! Everything on the wire is signed 16-bit little-endian mono PCM: 16 kHz
//! upstream, 24 kHz from the tutor. Devices hand us `f32` samples, possibly
//! interleaved across several channels.

/// Convert `f32` samples in [-1, 1] to PCM16LE bytes.
///
/// Out-of-range samples are clamped rather than wrapped.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Convert PCM16LE bytes to `f32` samples. A trailing odd byte is ignored.
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Average interleaved multi-channel samples into mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Duration of a PCM16LE mono buffer in milliseconds.
pub fn duration_ms(bytes: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (bytes as u64 / 2) * 1000 / u64::from(sample_rate)
}

/// Re-chunks an arbitrary stream of mono samples into frames of exactly
/// `frame_samples` samples, each encoded as PCM16LE.
#[derive(Debug)]
pub struct Framer {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Append samples and return every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let frame = std::mem::replace(&mut self.pending, rest);
            frames.push(f32_to_pcm16le(&frame));
        }
        frames
    }

    /// Samples buffered toward the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
