//! Live voice session plumbing.
//!
//! Captures the microphone, streams it to Gemini Live, plays the tutor's
//! audio back, and reports everything to the controller as one ordered
//! stream of [`SessionEvent`]s.
//!
//! ## Design
//! - Device seams are traits (`AudioInput`, `AudioOutput`); the `cpal`
//!   implementations and their `rubato` resampling sit behind the
//!   `audio-io` feature
//! - Gemini Live WebSocket client with server-side VAD and transcription
//! - `Transport` owns devices and connection for exactly one session at a time

pub mod capture;
pub mod events;
pub mod gemini_live;
pub mod pcm;
pub mod playback;
#[cfg(feature = "audio-io")]
pub mod resample;
pub mod transport;

// ── Shared voice event type ──────────────────────────────────────

/// Event produced by a Gemini Live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Server setup completed; ready to stream.
    SetupComplete,
    /// Tutor audio chunk (PCM16LE, 24kHz mono).
    Audio { data: Vec<u8> },
    /// Transcription fragment of the learner's speech.
    InputTranscript { text: String },
    /// Transcription fragment of the tutor's speech.
    OutputTranscript { text: String },
    /// The tutor finished a response turn.
    TurnComplete,
    /// The learner started speaking over the tutor.
    Interrupted,
    /// Non-fatal error reported by the server, or an unparseable frame.
    Error { message: String },
    /// The socket is gone. `reason` is `None` for a clean closure.
    Disconnected { reason: Option<String> },
}

#[allow(unused_imports)]
pub use capture::{AudioInput, CaptureStream, Microphone};
#[allow(unused_imports)]
pub use events::{EventSink, SessionEvent};
#[allow(unused_imports)]
pub use gemini_live::LiveConnection;
#[allow(unused_imports)]
pub use playback::{AudioOutput, NullOutput, PlaybackStream, Speaker};
#[allow(unused_imports)]
pub use transport::{LiveTransport, Transport};
