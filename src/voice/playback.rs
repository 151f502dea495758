//! Tutor audio playback.
//!
//! Incoming PCM16LE chunks are appended to a shared sample queue that the
//! output device drains from its callback. Clearing the queue is how an
//! interruption cuts the tutor off mid-sentence.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::pcm::pcm16le_to_f32;
#[cfg(feature = "audio-io")]
use super::resample::StreamResampler;
use crate::error::Result;

/// Sample queue shared with the device callback.
pub type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Sink for tutor audio.
pub trait AudioOutput: Send {
    /// Open the output device for mono audio at `sample_rate`.
    fn open(&mut self, sample_rate: u32) -> Result<PlaybackStream>;
}

/// A running playback queue. Dropping it releases the device.
pub struct PlaybackStream {
    queue: Option<SampleQueue>,
    #[cfg(feature = "audio-io")]
    resampler: Option<Mutex<StreamResampler>>,
    sample_rate: u32,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PlaybackStream {
    /// Queue drained by a device running at `sample_rate`.
    pub fn new(
        queue: SampleQueue,
        sample_rate: u32,
        release: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self {
            queue: Some(queue),
            #[cfg(feature = "audio-io")]
            resampler: None,
            sample_rate,
            release,
        }
    }

    /// Convert enqueued chunks to a device that runs at a different rate.
    #[cfg(feature = "audio-io")]
    pub fn with_resampler(mut self, resampler: StreamResampler) -> Self {
        self.resampler = Some(Mutex::new(resampler));
        self
    }

    /// A stream that discards everything.
    pub fn silent(sample_rate: u32) -> Self {
        Self {
            queue: None,
            #[cfg(feature = "audio-io")]
            resampler: None,
            sample_rate,
            release: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The queue the device drains, if any.
    pub fn handle(&self) -> Option<SampleQueue> {
        self.queue.clone()
    }

    /// Append a PCM16LE chunk behind whatever is already queued.
    pub fn enqueue(&self, pcm: &[u8]) {
        let Some(queue) = &self.queue else {
            return;
        };
        let samples = pcm16le_to_f32(pcm);
        #[cfg(feature = "audio-io")]
        let samples = match &self.resampler {
            Some(rs) => rs.lock().process(&samples),
            None => samples,
        };
        queue.lock().extend(samples);
    }

    /// Drop everything not yet played.
    pub fn clear(&self) {
        if let Some(queue) = &self.queue {
            let dropped = {
                let mut q = queue.lock();
                let n = q.len();
                q.clear();
                n
            };
            if dropped > 0 {
                tracing::debug!(samples = dropped, "Playback queue flushed");
            }
        }
    }

    pub fn queued_samples(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.lock().len())
    }

    /// Wait until the queue is empty or `max_wait` elapses.
    pub async fn drain(&self, max_wait: Duration) {
        let deadline = tokio::time::Instant::now() + max_wait;
        while self.queued_samples() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Flush and release the device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.clear();
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!("Audio playback stopped");
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PlaybackStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackStream")
            .field("sample_rate", &self.sample_rate)
            .field("queued", &self.queued_samples())
            .finish()
    }
}

/// The default output device.
#[derive(Debug, Clone, Default)]
pub struct Speaker;

impl AudioOutput for Speaker {
    #[cfg(feature = "audio-io")]
    fn open(&mut self, sample_rate: u32) -> Result<PlaybackStream> {
        device::open_output(sample_rate)
    }

    #[cfg(not(feature = "audio-io"))]
    fn open(&mut self, _sample_rate: u32) -> Result<PlaybackStream> {
        Err(crate::error::TutorError::Config(
            "audio output support not compiled in".into(),
        ))
    }
}

/// Output that plays nothing; for headless sessions.
#[derive(Debug, Clone, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn open(&mut self, sample_rate: u32) -> Result<PlaybackStream> {
        Ok(PlaybackStream::silent(sample_rate))
    }
}

#[cfg(feature = "audio-io")]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::{PlaybackStream, SampleQueue};
    use crate::error::{Result, TutorError};
    use crate::voice::resample::StreamResampler;

    fn unavailable(err: impl std::fmt::Display) -> TutorError {
        TutorError::Config(format!("audio output unavailable: {err}"))
    }

    pub(super) fn open_output(sample_rate: u32) -> Result<PlaybackStream> {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let device_queue = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name("linguist-playback".into())
            .spawn(move || {
                let (stream, device_rate) = match build_stream(sample_rate, device_queue) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(device_rate));
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(unavailable)?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(unavailable("playback thread exited during setup"));
            }
        };

        let release = move || {
            drop(stop_tx);
            let _ = handle.join();
        };
        let stream = PlaybackStream::new(queue, sample_rate, Some(Box::new(release)));
        Ok(match StreamResampler::new(sample_rate, device_rate)? {
            Some(resampler) => stream.with_resampler(resampler),
            None => stream,
        })
    }

    fn build_stream(sample_rate: u32, queue: SampleQueue) -> Result<(Stream, u32)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| unavailable("no output device available"))?;

        let wanted = SampleRate(sample_rate);
        let exact = device
            .supported_output_configs()
            .map_err(unavailable)?
            .filter(|c| c.sample_format() == SampleFormat::F32)
            .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
            .min_by_key(|c| c.channels());

        let config: StreamConfig = match exact {
            Some(range) => range.with_sample_rate(wanted).config(),
            None => device.default_output_config().map_err(unavailable)?.config(),
        };

        let channels = usize::from(config.channels).max(1);
        let device_rate = config.sample_rate.0;
        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            channels,
            "Audio playback initialized"
        );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut q = queue.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = q.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "Audio playback error");
                },
                None,
            )
            .map_err(unavailable)?;

        stream.play().map_err(unavailable)?;
        Ok((stream, device_rate))
    }
}
