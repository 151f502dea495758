//! Gemini Live WebSocket client for a spoken tutoring session.
//!
//! Implements the bidirectional streaming protocol of Google's Gemini
//! Live API (BidiGenerateContent) with server-side voice activity
//! detection and transcription of both directions.
//!
//! ## Protocol Overview
//!
//! 1. **Connect**: open WebSocket to the Gemini Live endpoint
//! 2. **Setup**: send model, voice, system instruction and the
//!    `inputAudioTranscription` / `outputAudioTranscription` switches
//! 3. **Stream**: send microphone frames as `realtimeInput`, receive
//!    tutor audio and transcripts as `serverContent`
//! 4. **Close**: `audioStreamEnd`, then a WebSocket Close frame
//!
//! ## Binary frames
//!
//! Gemini Live delivers its JSON messages, `setupComplete` included, as
//! WebSocket Binary frames. Binary payloads starting with `{` are parsed
//! exactly like Text frames; anything else is logged and skipped.

use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::VoiceEvent;
use crate::config::LiveConfig;
use crate::error::{Result, TutorError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the outbound (client → server) queue.
const OUTBOUND_CAPACITY: usize = 256;

/// Capacity of the inbound (server → client) event queue.
const INBOUND_CAPACITY: usize = 256;

/// MIME type announced for microphone frames at `sample_rate`.
pub fn input_audio_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

// ── Setup message (JSON sent as first frame) ───────────────────────

/// Top-level setup message for Gemini Live session initialization.
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
pub struct SetupPayload {
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    /// Presence alone turns on transcription of the learner's speech.
    #[serde(rename = "inputAudioTranscription")]
    pub input_audio_transcription: AudioTranscriptionConfig,
    /// Presence alone turns on transcription of the tutor's speech.
    #[serde(rename = "outputAudioTranscription")]
    pub output_audio_transcription: AudioTranscriptionConfig,
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
    #[serde(rename = "speechConfig", skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`.
#[derive(Debug, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

/// Build the setup message for a tutoring session.
pub fn build_setup_message(live: &LiveConfig, system_instruction: &str) -> SetupMessage {
    SetupMessage {
        setup: SetupPayload {
            model: format!("models/{}", live.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: live.voice_name.clone(),
                        },
                    },
                }),
            },
            system_instruction: Some(SystemInstruction {
                parts: vec![TextPart {
                    text: system_instruction.to_string(),
                }],
            }),
            input_audio_transcription: AudioTranscriptionConfig::default(),
            output_audio_transcription: AudioTranscriptionConfig::default(),
        },
    }
}

// ── Audio input message ────────────────────────────────────────────

/// Audio input message sent to Gemini Live.
///
/// `mediaChunks` is what the official SDKs still put on the wire; the
/// newer `audio` field is not reliably processed by the server.
#[derive(Debug, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

/// Audio chunk with MIME type and base64-encoded data.
#[derive(Debug, Serialize)]
pub struct MediaChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String, // base64-encoded audio
}

/// Tells the server no more microphone audio will follow.
#[derive(Debug, Serialize)]
pub struct AudioStreamEndMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: AudioStreamEndPayload,
}

#[derive(Debug, Serialize)]
pub struct AudioStreamEndPayload {
    #[serde(rename = "audioStreamEnd")]
    pub audio_stream_end: bool,
}

/// Build a realtime audio input message from raw PCM bytes.
///
/// Wire format: `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}`
pub fn build_audio_message(pcm_data: &[u8], sample_rate: u32) -> RealtimeInputMessage {
    let b64 = base64::engine::general_purpose::STANDARD.encode(pcm_data);
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: input_audio_mime(sample_rate),
                data: b64,
            }],
        },
    }
}

/// Build an audioStreamEnd message to signal microphone closure.
pub fn build_audio_stream_end_message() -> AudioStreamEndMessage {
    AudioStreamEndMessage {
        realtime_input: AudioStreamEndPayload {
            audio_stream_end: true,
        },
    }
}

// ── Server response parsing ────────────────────────────────────────

fn transcription_text(value: Option<&serde_json::Value>) -> Option<String> {
    value
        .and_then(|t| t.get("text"))
        .and_then(|v| v.as_str())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Parse a JSON frame from Gemini Live into a list of events.
///
/// One server message may carry several events. Fragments (audio and
/// transcripts) are always listed before `TurnComplete` so that a turn
/// never closes ahead of its own last fragment. Text parts of
/// `modelTurn` are ignored: the tutor's words arrive as
/// `outputTranscription`.
pub fn parse_server_message(json_text: &str) -> Vec<VoiceEvent> {
    let mut events = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            events.push(VoiceEvent::Error {
                message: format!("Failed to parse server message: {e}"),
            });
            return events;
        }
    };

    if value.get("setupComplete").is_some() {
        events.push(VoiceEvent::SetupComplete);
    }

    let content = value.get("serverContent");

    if content
        .and_then(|c| c.get("interrupted"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        events.push(VoiceEvent::Interrupted);
    }

    if let Some(parts) = content
        .and_then(|c| c.pointer("/modelTurn/parts"))
        .and_then(|v| v.as_array())
    {
        for part in parts {
            let Some(data_b64) = part.pointer("/inlineData/data").and_then(|v| v.as_str()) else {
                continue;
            };
            match base64::engine::general_purpose::STANDARD.decode(data_b64) {
                Ok(data) if !data.is_empty() => events.push(VoiceEvent::Audio { data }),
                Ok(_) => {}
                Err(e) => events.push(VoiceEvent::Error {
                    message: format!("Invalid inline audio payload: {e}"),
                }),
            }
        }
    }

    // Transcriptions ride inside serverContent; older server builds put
    // them at the top level.
    let input = content
        .and_then(|c| c.get("inputTranscription"))
        .or_else(|| value.get("inputTranscription"));
    if let Some(text) = transcription_text(input) {
        events.push(VoiceEvent::InputTranscript { text });
    }

    let output = content
        .and_then(|c| c.get("outputTranscription"))
        .or_else(|| value.get("outputTranscription"));
    if let Some(text) = transcription_text(output) {
        events.push(VoiceEvent::OutputTranscript { text });
    }

    if content
        .and_then(|c| c.get("turnComplete"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        events.push(VoiceEvent::TurnComplete);
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown server error");
        events.push(VoiceEvent::Error {
            message: message.to_string(),
        });
    }

    events
}

/// Interpret a Close frame: normal closures are clean, anything else
/// carries a reason.
fn close_reason(frame: Option<&CloseFrame>) -> Option<String> {
    let frame = frame?;
    if matches!(frame.code, CloseCode::Normal | CloseCode::Away) {
        return None;
    }
    let code: u16 = frame.code.into();
    if frame.reason.is_empty() {
        Some(format!("closed by server (code {code})"))
    } else {
        Some(format!("closed by server (code {code}): {}", frame.reason))
    }
}

// ── Live connection ────────────────────────────────────────────────

/// Outbound message to send to the Gemini Live WebSocket.
#[derive(Debug)]
enum OutboundMessage {
    /// Raw PCM16LE microphone frame (wrapped in realtimeInput).
    Audio(Vec<u8>),
    /// End of microphone input.
    AudioStreamEnd,
    /// Close the connection.
    Close,
}

/// Handle to an established Gemini Live session.
///
/// Created by [`LiveConnection::connect`]. Cheap to clone; every clone
/// feeds the same outbound queue.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    session_id: String,
    input_sample_rate: u32,
}

impl LiveConnection {
    /// Connect, send the setup frame, and wait for `setupComplete`.
    ///
    /// Returns the connection handle and the receiver of inbound events.
    /// The receiver's last event is always [`VoiceEvent::Disconnected`].
    pub async fn connect(
        session_id: String,
        live: &LiveConfig,
        api_key: &str,
        system_instruction: &str,
    ) -> Result<(Self, mpsc::Receiver<VoiceEvent>)> {
        let url = format!("{}?key={api_key}", live.endpoint);

        tracing::info!(
            session_id = %session_id,
            model = %live.model,
            voice = %live.voice_name,
            "Connecting to Gemini Live"
        );

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TutorError::Connection(format!("Failed to connect to Gemini Live: {e}")))?;

        let setup = build_setup_message(live, system_instruction);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| TutorError::Connection(format!("Failed to encode setup message: {e}")))?;
        tracing::debug!(session_id = %session_id, bytes = setup_json.len(), "Sending Gemini Live setup");
        ws_stream
            .send(WsMessage::Text(setup_json.into()))
            .await
            .map_err(|e| TutorError::Connection(format!("Failed to send setup message: {e}")))?;

        let timeout_secs = live.setup_timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            wait_for_setup(&mut ws_stream, &session_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = ws_stream.close(None).await;
                return Err(e);
            }
            Err(_) => {
                let _ = ws_stream.close(None).await;
                return Err(TutorError::Connection(format!(
                    "Gemini Live setupComplete timeout ({timeout_secs}s)"
                )));
            }
        }

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<VoiceEvent>(INBOUND_CAPACITY);

        let sid_out = session_id.clone();
        let input_sample_rate = live.input_sample_rate;
        tokio::spawn(async move {
            outbound_loop(outbound_rx, ws_sender, sid_out, input_sample_rate).await;
        });

        let sid_in = session_id.clone();
        tokio::spawn(async move {
            inbound_loop(ws_receiver, event_tx, sid_in).await;
        });

        Ok((
            Self {
                outbound_tx,
                session_id,
                input_sample_rate,
            },
            event_rx,
        ))
    }

    /// Queue a PCM16LE microphone frame for transmission.
    pub async fn send_audio(&self, pcm_data: &[u8]) -> Result<()> {
        if pcm_data.is_empty() {
            return Ok(());
        }
        self.outbound_tx
            .send(OutboundMessage::Audio(pcm_data.to_vec()))
            .await
            .map_err(|_| TutorError::Connection("Gemini Live outbound channel closed".into()))
    }

    /// End the microphone stream and close the socket. Never fails and
    /// never waits: with the queue full the messages are dropped, and the
    /// outbound loop ends once every handle is gone.
    pub async fn close(&self) {
        for msg in [OutboundMessage::AudioStreamEnd, OutboundMessage::Close] {
            if let Err(e) = self.outbound_tx.try_send(msg) {
                tracing::debug!(session_id = %self.session_id, error = %e, "Close not queued");
                break;
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn input_sample_rate(&self) -> u32 {
        self.input_sample_rate
    }
}

async fn wait_for_setup(ws_stream: &mut WsStream, session_id: &str) -> Result<()> {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(WsMessage::Binary(data)) if data.first() == Some(&b'{') => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    if text.contains("setupComplete") {
                        tracing::info!(session_id = %session_id, "Gemini Live setup complete");
                        return Ok(());
                    }
                }
            }
            Ok(WsMessage::Text(text)) if text.contains("setupComplete") => {
                tracing::info!(session_id = %session_id, "Gemini Live setup complete (text frame)");
                return Ok(());
            }
            Ok(WsMessage::Close(frame)) => {
                let detail = close_reason(frame.as_ref())
                    .unwrap_or_else(|| "closed by server".to_string());
                return Err(TutorError::Connection(format!(
                    "Connection closed before setupComplete: {detail}"
                )));
            }
            Err(e) => {
                return Err(TutorError::Connection(format!(
                    "WebSocket error before setupComplete: {e}"
                )));
            }
            other => {
                tracing::debug!(
                    session_id = %session_id,
                    msg = ?other,
                    "Gemini Live setup phase: ignoring frame"
                );
            }
        }
    }
    Err(TutorError::Connection(
        "Stream ended before setupComplete".into(),
    ))
}

/// Outbound loop: encode queued messages and write them to the socket.
async fn outbound_loop(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut ws_sender: SplitSink<WsStream, WsMessage>,
    session_id: String,
    input_sample_rate: u32,
) {
    let mut audio_chunk_count: u64 = 0;
    let mut total_bytes: u64 = 0;

    while let Some(msg) = rx.recv().await {
        let json = match msg {
            OutboundMessage::Audio(pcm) => {
                audio_chunk_count += 1;
                total_bytes += pcm.len() as u64;
                if audio_chunk_count == 1 || audio_chunk_count.is_multiple_of(50) {
                    tracing::debug!(
                        session_id = %session_id,
                        chunk = audio_chunk_count,
                        pcm_bytes = pcm.len(),
                        total_bytes = total_bytes,
                        "Sending audio chunk to Gemini"
                    );
                }
                serde_json::to_string(&build_audio_message(&pcm, input_sample_rate))
            }
            OutboundMessage::AudioStreamEnd => {
                tracing::info!(session_id = %session_id, "Sending audioStreamEnd to Gemini Live");
                serde_json::to_string(&build_audio_stream_end_message())
            }
            OutboundMessage::Close => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        };

        match json {
            Ok(json) => {
                if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                    tracing::warn!(
                        session_id = %session_id,
                        "WebSocket send failed, closing outbound loop"
                    );
                    break;
                }
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Failed to serialize outbound message");
            }
        }
    }

    tracing::debug!(session_id = %session_id, chunks = audio_chunk_count, "Outbound loop terminated");
}

/// Per-connection counters for inbound logging.
struct InboundStats {
    started: Instant,
    audio_chunks: u64,
    turns: u64,
}

impl InboundStats {
    fn record(&mut self, session_id: &str, event: &VoiceEvent) {
        let t = format!("{:.1}s", self.started.elapsed().as_secs_f32());
        match event {
            VoiceEvent::Audio { data } => {
                self.audio_chunks += 1;
                tracing::trace!(session_id = %session_id, t = %t, audio_n = self.audio_chunks, bytes = data.len(), "Tutor audio");
            }
            VoiceEvent::TurnComplete => {
                self.turns += 1;
                tracing::info!(session_id = %session_id, t = %t, turn = self.turns, audio_chunks = self.audio_chunks, "Turn complete");
            }
            VoiceEvent::InputTranscript { text } => {
                tracing::debug!(session_id = %session_id, t = %t, text = %text, "Input transcript");
            }
            VoiceEvent::OutputTranscript { text } => {
                tracing::debug!(session_id = %session_id, t = %t, text = %text, "Output transcript");
            }
            VoiceEvent::Interrupted => {
                tracing::info!(session_id = %session_id, t = %t, "Interrupted");
            }
            VoiceEvent::Error { message } => {
                tracing::warn!(session_id = %session_id, t = %t, error = %message, "Gemini Live reported an error");
            }
            VoiceEvent::SetupComplete | VoiceEvent::Disconnected { .. } => {}
        }
    }
}

/// Inbound loop: parse server frames and forward events. Always ends
/// with a single `Disconnected`.
async fn inbound_loop(
    mut ws_receiver: SplitStream<WsStream>,
    event_tx: mpsc::Sender<VoiceEvent>,
    session_id: String,
) {
    let mut stats = InboundStats {
        started: Instant::now(),
        audio_chunks: 0,
        turns: 0,
    };

    let reason = loop {
        let Some(msg_result) = ws_receiver.next().await else {
            break None;
        };
        let events = match msg_result {
            Ok(WsMessage::Text(text)) => parse_server_message(&text),
            Ok(WsMessage::Binary(data)) => {
                if data.is_empty() {
                    continue;
                }
                match std::str::from_utf8(&data) {
                    Ok(text) if data.first() == Some(&b'{') => parse_server_message(text),
                    _ => {
                        tracing::warn!(
                            session_id = %session_id,
                            len = data.len(),
                            "Unexpected non-JSON binary frame from Gemini Live, skipping"
                        );
                        continue;
                    }
                }
            }
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(session_id = %session_id, close_frame = ?frame, "Gemini Live connection closed");
                break close_reason(frame.as_ref());
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => continue,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Gemini Live WebSocket error");
                break Some(format!("WebSocket error: {e}"));
            }
        };

        for event in events {
            stats.record(&session_id, &event);
            if event_tx.send(event).await.is_err() {
                tracing::debug!(session_id = %session_id, "Event receiver dropped, closing inbound loop");
                return;
            }
        }
    };

    let _ = event_tx.send(VoiceEvent::Disconnected { reason }).await;
    tracing::debug!(session_id = %session_id, turns = stats.turns, "Inbound loop terminated");
}

// ── Tests ──────────────────────────────────────────────────────────
