//! Session transport: microphone → Gemini Live → controller.
//!
//! `start` acquires the microphone first, then the speaker, then performs
//! the remote handshake, and backs out of everything it acquired when a
//! later step fails. Once running, a single pump task forwards captured
//! frames upstream and inbound events to the [`EventSink`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::capture::{AudioInput, CaptureStream};
use super::events::{EventSink, SessionEvent};
use super::gemini_live::LiveConnection;
use super::playback::{AudioOutput, PlaybackStream};
use super::VoiceEvent;
use crate::config::LiveConfig;
use crate::error::{Result, TutorError};

/// A live, full-duplex tutoring session.
#[async_trait]
pub trait Transport: Send {
    /// Open devices, connect, and start delivering events to `events`.
    ///
    /// `context_hint` is appended to the system instruction. Errors:
    /// `PermissionDenied` before any connection attempt, `Connection` when
    /// the handshake fails (devices already released).
    async fn start(&mut self, context_hint: &str, events: EventSink) -> Result<()>;

    /// Tear everything down. Idempotent and infallible.
    async fn stop(&mut self);
}

/// Append the per-session context to the base instruction.
pub fn session_instruction(base: &str, context_hint: &str) -> String {
    format!("{base}\n\nSESSION CONTEXT: {context_hint}")
}

struct ActiveLink {
    connection: LiveConnection,
    events: EventSink,
    pump: JoinHandle<()>,
}

/// Production transport over Gemini Live.
pub struct LiveTransport {
    live: LiveConfig,
    api_key: String,
    system_instruction: String,
    input: Box<dyn AudioInput>,
    output: Box<dyn AudioOutput>,
    active: Option<ActiveLink>,
}

impl LiveTransport {
    pub fn new(
        live: LiveConfig,
        api_key: impl Into<String>,
        system_instruction: impl Into<String>,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        Self {
            live,
            api_key: api_key.into(),
            system_instruction: system_instruction.into(),
            input,
            output,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn start(&mut self, context_hint: &str, events: EventSink) -> Result<()> {
        if self.active.is_some() {
            return Err(TutorError::InvalidState("transport already running".into()));
        }

        let mut capture = self.input.open(self.live.frame_samples)?;

        let playback = match self.output.open(self.live.output_sample_rate) {
            Ok(playback) => playback,
            Err(e) => {
                tracing::warn!(error = %e, "Tutor audio playback unavailable, continuing without sound");
                PlaybackStream::silent(self.live.output_sample_rate)
            }
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let instruction = session_instruction(&self.system_instruction, context_hint);
        let (connection, inbound) =
            match LiveConnection::connect(session_id.clone(), &self.live, &self.api_key, &instruction)
                .await
            {
                Ok(connected) => connected,
                Err(e) => {
                    capture.stop();
                    drop(playback);
                    tracing::warn!(session_id = %session_id, error = %e, "Live session handshake failed");
                    return Err(e);
                }
            };

        let pump = tokio::spawn(pump(
            capture,
            playback,
            connection.clone(),
            inbound,
            events.clone(),
        ));

        tracing::info!(session_id = %session_id, "Live session started");
        self.active = Some(ActiveLink {
            connection,
            events,
            pump,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(link) = self.active.take() else {
            return;
        };
        // Aborting drops the capture and playback streams the pump owns,
        // which releases both devices.
        link.pump.abort();
        let _ = link.pump.await;
        link.connection.close().await;
        link.events.close();
        tracing::info!(session_id = %link.connection.session_id(), "Live session stopped");
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        if let Some(link) = self.active.take() {
            link.pump.abort();
            link.events.close();
        }
    }
}

/// Shuttle frames upstream and events downstream until either side ends.
async fn pump(
    mut capture: CaptureStream,
    playback: PlaybackStream,
    connection: LiveConnection,
    mut inbound: mpsc::Receiver<VoiceEvent>,
    events: EventSink,
) {
    let mut capturing = true;
    loop {
        tokio::select! {
            frame = capture.next_frame(), if capturing => match frame {
                Some(frame) => {
                    if let Err(e) = connection.send_audio(&frame).await {
                        events.fail(e.to_string());
                        break;
                    }
                    events.emit(SessionEvent::UserAudio(frame));
                }
                None => {
                    tracing::warn!(session_id = %connection.session_id(), "Microphone stream ended");
                    capturing = false;
                }
            },
            event = inbound.recv() => match event {
                Some(VoiceEvent::Disconnected { reason: Some(reason) }) => {
                    events.fail(reason);
                    break;
                }
                Some(VoiceEvent::Disconnected { reason: None }) | None => {
                    events.close();
                    break;
                }
                Some(event) => {
                    match &event {
                        VoiceEvent::Audio { data } => playback.enqueue(data),
                        VoiceEvent::Interrupted => playback.clear(),
                        _ => {}
                    }
                    events.emit(SessionEvent::Voice(event));
                }
            },
        }
    }
    capture.stop();
}
