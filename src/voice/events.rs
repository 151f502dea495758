//! Session event channel between the transport and the controller.
//!
//! ```text
//! capture ──frames──▸ LiveTransport ──realtimeInput──▸ Gemini Live
//!                         │  ◂──────── serverContent ────────┘
//!                         ▼
//!                    EventSink ──SessionEvent──▸ SessionController
//! ```
//!
//! The sink is the only way the transport talks to its owner. It guarantees
//! at most one `Failed`, exactly one `Closed` per session, and silence after
//! `Closed`.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::VoiceEvent;

/// Everything the transport reports to the controller, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An event parsed from the remote stream.
    Voice(VoiceEvent),
    /// One captured microphone frame (PCM16LE, 16 kHz mono) that was sent upstream.
    UserAudio(Vec<u8>),
    /// Fatal mid-session failure. Always followed by `Closed`.
    Failed { message: String },
    /// The session ended. Nothing is delivered afterwards.
    Closed,
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Cloneable sending half of the session event channel.
///
/// The channel is unbounded so that neither the audio pump nor `stop()`
/// can ever wait on a controller that is not draining.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>>,
}

impl EventSink {
    /// Create a sink and the receiver the controller drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver an event. Non-terminal events are dropped silently once the
    /// sink is closed; terminal ones are routed through [`Self::fail`] and
    /// [`Self::close`].
    pub fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::Closed => self.close(),
            SessionEvent::Failed { message } => self.fail(message),
            event => {
                let mut guard = self.tx.lock();
                if let Some(tx) = guard.as_ref() {
                    if tx.send(event).is_err() {
                        tracing::debug!("Session event receiver dropped");
                        guard.take();
                    }
                }
            }
        }
    }

    /// Report a fatal failure: `Failed` then `Closed`, at most once.
    pub fn fail(&self, message: impl Into<String>) {
        let Some(tx) = self.tx.lock().take() else {
            return;
        };
        let message = message.into();
        tracing::warn!(error = %message, "Live session failed");
        let _ = tx.send(SessionEvent::Failed { message });
        let _ = tx.send(SessionEvent::Closed);
    }

    /// Report termination: `Closed`, at most once.
    pub fn close(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(SessionEvent::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn emits_in_order_until_closed() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(SessionEvent::UserAudio(vec![1, 2]));
        sink.emit(SessionEvent::Voice(VoiceEvent::TurnComplete));
        sink.close();
        sink.emit(SessionEvent::UserAudio(vec![3]));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::UserAudio(_)));
        assert!(matches!(
            events[1],
            SessionEvent::Voice(VoiceEvent::TurnComplete)
        ));
        assert!(events[2].is_terminal());
        assert!(sink.is_closed());
    }

    #[test]
    fn fail_is_followed_by_exactly_one_closed() {
        let (sink, mut rx) = EventSink::channel();
        let other = sink.clone();
        sink.fail("socket reset");
        other.fail("second failure");
        other.close();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(
            matches!(&events[0], SessionEvent::Failed { message } if message == "socket reset")
        );
        assert!(matches!(events[1], SessionEvent::Closed));
    }

    #[test]
    fn emitting_terminal_variants_routes_through_gate() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(SessionEvent::Closed);
        sink.emit(SessionEvent::Failed {
            message: "late".into(),
        });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Closed));
    }

    #[test]
    fn dropped_receiver_closes_sink() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(SessionEvent::UserAudio(vec![0]));
        assert!(sink.is_closed());
    }
}
