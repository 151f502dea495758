//! Microphone capture.
//!
//! A capture stream yields fixed-size PCM16LE mono frames at the wire rate
//! (16 kHz, 4096 samples by default). The `cpal` device stream is `!Send`,
//! so it lives on a dedicated thread; frames cross into async code over a
//! bounded channel and the audio callback never blocks.

use tokio::sync::mpsc;

use crate::error::Result;

/// Frames buffered between the device thread and the transport.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 64;

/// Source of microphone frames.
pub trait AudioInput: Send {
    /// Acquire the device and start producing frames of `frame_samples` samples.
    ///
    /// Fails with [`TutorError::PermissionDenied`](crate::error::TutorError::PermissionDenied) when no microphone can be used.
    fn open(&mut self, frame_samples: usize) -> Result<CaptureStream>;
}

/// A running capture. Dropping it releases the device.
pub struct CaptureStream {
    frames: mpsc::Receiver<Vec<u8>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureStream {
    /// Wrap a frame receiver. `release` runs exactly once, on `stop` or drop.
    pub fn new(frames: mpsc::Receiver<Vec<u8>>, release: Option<Box<dyn FnOnce() + Send>>) -> Self {
        Self { frames, release }
    }

    /// Next captured frame, or `None` once capture has ended.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.recv().await
    }

    /// Stop capturing and release the device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.frames.close();
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!("Audio capture stopped");
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// The default input device.
#[derive(Debug, Clone)]
pub struct Microphone {
    sample_rate: u32,
}

impl Microphone {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl AudioInput for Microphone {
    #[cfg(feature = "audio-io")]
    fn open(&mut self, frame_samples: usize) -> Result<CaptureStream> {
        device::open_input(self.sample_rate, frame_samples)
    }

    #[cfg(not(feature = "audio-io"))]
    fn open(&mut self, _frame_samples: usize) -> Result<CaptureStream> {
        tracing::debug!(sample_rate = self.sample_rate, "Microphone requested without audio-io");
        Err(crate::error::TutorError::PermissionDenied(
            "audio input support not compiled in".into(),
        ))
    }
}

/// Frames supplied by the caller instead of a device, e.g. a recording
/// replayed at real-time pace.
#[derive(Debug)]
pub struct ChannelInput {
    frames: Option<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelInput {
    pub fn new(frames: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            frames: Some(frames),
        }
    }
}

impl AudioInput for ChannelInput {
    fn open(&mut self, _frame_samples: usize) -> Result<CaptureStream> {
        let frames = self.frames.take().ok_or_else(|| {
            crate::error::TutorError::PermissionDenied("input already consumed".into())
        })?;
        Ok(CaptureStream::new(frames, None))
    }
}

#[cfg(feature = "audio-io")]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
    use tokio::sync::mpsc;

    use super::{CaptureStream, CAPTURE_CHANNEL_CAPACITY};
    use crate::error::{Result, TutorError};
    use crate::voice::pcm::{downmix, Framer};
    use crate::voice::resample::StreamResampler;

    fn denied(err: impl std::fmt::Display) -> TutorError {
        TutorError::PermissionDenied(err.to_string())
    }

    pub(super) fn open_input(sample_rate: u32, frame_samples: usize) -> Result<CaptureStream> {
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(CAPTURE_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("linguist-capture".into())
            .spawn(move || {
                let stream = match build_stream(sample_rate, frame_samples, frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Parked until the guard drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(denied)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(TutorError::PermissionDenied(
                    "capture thread exited during setup".into(),
                ));
            }
        }

        let release = move || {
            drop(stop_tx);
            let _ = handle.join();
        };
        Ok(CaptureStream::new(frame_rx, Some(Box::new(release))))
    }

    fn build_stream(
        sample_rate: u32,
        frame_samples: usize,
        frame_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| denied("no input device available"))?;

        let wanted = SampleRate(sample_rate);
        let exact = device
            .supported_input_configs()
            .map_err(denied)?
            .filter(|c| c.sample_format() == SampleFormat::F32)
            .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
            .min_by_key(|c| c.channels());

        let config: StreamConfig = match exact {
            Some(range) => range.with_sample_rate(wanted).config(),
            None => device.default_input_config().map_err(denied)?.config(),
        };

        let channels = usize::from(config.channels);
        let device_rate = config.sample_rate.0;
        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            channels,
            target_rate = sample_rate,
            "Audio capture initialized"
        );

        let mut resampler = StreamResampler::new(device_rate, sample_rate)?;
        let mut framer = Framer::new(frame_samples);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let mono = match resampler.as_mut() {
                        Some(rs) => rs.process(&mono),
                        None => mono,
                    };
                    for frame in framer.push(&mono) {
                        if let Err(mpsc::error::TrySendError::Full(_)) = frame_tx.try_send(frame) {
                            tracing::warn!("Capture channel full, dropping frame");
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "Audio capture error");
                },
                None,
            )
            .map_err(denied)?;

        stream.play().map_err(denied)?;
        Ok(stream)
    }
}
