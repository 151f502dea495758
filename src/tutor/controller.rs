//! Session and turn orchestration.
//!
//! The controller owns the transport, the transcript, and the day's stats.
//! It starts and stops sessions, feeds transport events through the turn
//! assembler, and turns every completed turn into a pair of transcript
//! records plus a stats update, persisting both.

use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::assembler::TurnAssembler;
use super::prompt::context_hint;
use super::response::parse_tutor_reply;
use super::stats::{elapsed_minutes, rolled_over, DailyStats};
use super::transcript::{Sender, TurnAudio, TurnRecord, TUTOR_AUDIO_RATE, USER_AUDIO_RATE};
use crate::config::TutorPolicy;
use crate::error::{Result, TutorError};
use crate::store::{load_snapshot, save_snapshot, SnapshotStore, HISTORY_KEY, STATS_KEY};
use crate::voice::{EventSink, SessionEvent, Transport, VoiceEvent};

/// Source of "now".
pub trait Clock: Send + Sync {
    /// Epoch milliseconds.
    fn now_millis(&self) -> i64;
    /// Local calendar day.
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Local::now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

/// What the renderer needs to know after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerUpdate {
    /// Learner transcript of the turn so far.
    InputPartial(String),
    /// Tutor transcript of the turn so far.
    OutputPartial(String),
    /// A completed exchange, already persisted.
    Turn { user: TurnRecord, tutor: TurnRecord },
    /// The session failed; `Closed` follows.
    Failed(String),
    /// The session ended; `minutes` were credited to today's stats.
    Closed { minutes: u32 },
}

pub struct SessionController<T: Transport> {
    transport: T,
    store: Box<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    policy: TutorPolicy,
    status: SessionStatus,
    last_error: Option<TutorError>,
    transcript: Vec<TurnRecord>,
    stats: DailyStats,
    assembler: TurnAssembler,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    /// Set on entering Active; taken exactly once when the session ends.
    started_at: Option<i64>,
    last_turn_millis: i64,
    user_audio_rate: u32,
    tutor_audio_rate: u32,
}

impl<T: Transport> SessionController<T> {
    /// Restore the transcript and stats from `store`, rolling stats over to today.
    pub fn new(
        transport: T,
        store: Box<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        policy: TutorPolicy,
    ) -> Self {
        let today = clock.today();
        let transcript: Vec<TurnRecord> =
            load_snapshot(store.as_ref(), HISTORY_KEY).unwrap_or_default();
        let saved: Option<DailyStats> = load_snapshot(store.as_ref(), STATS_KEY);
        let stats = saved
            .as_ref()
            .map_or_else(|| DailyStats::new(today), |s| rolled_over(s, today));
        if saved.as_ref() != Some(&stats) {
            save_snapshot(store.as_ref(), STATS_KEY, &stats);
        }

        let last_turn_millis = transcript
            .iter()
            .map(|r| match r.sender {
                Sender::User => r.timestamp,
                Sender::Tutor => r.timestamp - 1,
            })
            .max()
            .unwrap_or(0);

        tracing::debug!(
            turns = transcript.len(),
            minutes = stats.minutes_spoken,
            "Controller restored"
        );

        Self {
            transport,
            store,
            clock,
            policy,
            status: SessionStatus::Idle,
            last_error: None,
            transcript,
            stats,
            assembler: TurnAssembler::new(),
            events: None,
            started_at: None,
            last_turn_millis,
            user_audio_rate: USER_AUDIO_RATE,
            tutor_audio_rate: TUTOR_AUDIO_RATE,
        }
    }

    /// Sample rates recorded on learner and tutor audio.
    pub fn with_audio_rates(mut self, user: u32, tutor: u32) -> Self {
        self.user_audio_rate = user;
        self.tutor_audio_rate = tutor;
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&TutorError> {
        self.last_error.as_ref()
    }

    pub fn transcript(&self) -> &[TurnRecord] {
        &self.transcript
    }

    /// Today's stats, rolled over if the day changed since they were written.
    pub fn stats(&self) -> DailyStats {
        rolled_over(&self.stats, self.clock.today())
    }

    pub fn partial_input(&self) -> &str {
        self.assembler.input_text()
    }

    pub fn partial_output(&self) -> &str {
        self.assembler.output_text()
    }

    /// Start a live session. Allowed from `Idle` and `Error`.
    ///
    /// `PermissionDenied` leaves the controller `Idle`; any other failure
    /// moves it to `Error`.
    pub async fn start_session(&mut self) -> Result<()> {
        if !matches!(self.status, SessionStatus::Idle | SessionStatus::Error) {
            return Err(TutorError::InvalidState(format!(
                "cannot start a session while {}",
                self.status.as_str()
            )));
        }

        self.refresh_day();
        self.last_error = None;
        self.status = SessionStatus::Connecting;
        self.assembler.reset();

        let hint = context_hint(&self.stats);
        let (sink, rx) = EventSink::channel();
        match self.transport.start(&hint, sink).await {
            Ok(()) => {
                self.events = Some(rx);
                self.status = SessionStatus::Active;
                self.started_at = Some(self.clock.now_millis());
                tracing::info!(hint = %hint.trim_end(), "Session active");
                Ok(())
            }
            Err(e) => {
                self.status = match e {
                    TutorError::PermissionDenied(_) => SessionStatus::Idle,
                    _ => SessionStatus::Error,
                };
                tracing::warn!(error = %e, status = self.status.as_str(), "Session start failed");
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Stop the running session, if any. Safe in every state.
    ///
    /// Returns the minutes credited, or `None` if no session was counting.
    pub async fn stop_session(&mut self) -> Option<u32> {
        self.transport.stop().await;
        self.events = None;
        let minutes = self.finish_session();
        if self.status != SessionStatus::Error {
            self.status = SessionStatus::Idle;
        }
        minutes
    }

    /// Wait for the next transport event that changes what the renderer shows.
    ///
    /// Returns `None` when no session is running.
    pub async fn next_update(&mut self) -> Option<ControllerUpdate> {
        loop {
            let rx = self.events.as_mut()?;
            let event = rx.recv().await.unwrap_or(SessionEvent::Closed);
            if let Some(update) = self.handle_event(event).await {
                return Some(update);
            }
        }
    }

    /// Apply one transport event.
    pub async fn handle_event(&mut self, event: SessionEvent) -> Option<ControllerUpdate> {
        match event {
            SessionEvent::UserAudio(pcm) => {
                self.assembler.push_user_audio(&pcm);
                None
            }
            SessionEvent::Voice(voice) => self.apply_voice(voice),
            SessionEvent::Failed { message } => {
                self.status = SessionStatus::Error;
                self.last_error = Some(TutorError::Connection(message.clone()));
                Some(ControllerUpdate::Failed(message))
            }
            SessionEvent::Closed => {
                self.transport.stop().await;
                self.events = None;
                let minutes = self.finish_session().unwrap_or(0);
                if self.status != SessionStatus::Error {
                    self.status = SessionStatus::Idle;
                }
                Some(ControllerUpdate::Closed { minutes })
            }
        }
    }

    fn apply_voice(&mut self, event: VoiceEvent) -> Option<ControllerUpdate> {
        match event {
            VoiceEvent::InputTranscript { text } => {
                self.assembler.push_input_text(&text);
                Some(ControllerUpdate::InputPartial(
                    self.assembler.input_text().to_string(),
                ))
            }
            VoiceEvent::OutputTranscript { text } => {
                self.assembler.push_output_text(&text);
                Some(ControllerUpdate::OutputPartial(
                    self.assembler.output_text().to_string(),
                ))
            }
            VoiceEvent::Audio { data } => {
                self.assembler.push_tutor_audio(&data);
                None
            }
            VoiceEvent::TurnComplete => Some(self.complete_turn()),
            VoiceEvent::Interrupted => {
                tracing::debug!("Tutor interrupted");
                None
            }
            VoiceEvent::Error { message } => {
                tracing::warn!(error = %message, "Ignoring non-fatal server error");
                None
            }
            VoiceEvent::SetupComplete | VoiceEvent::Disconnected { .. } => None,
        }
    }

    /// Remove all history and stats. Not allowed while a session runs.
    pub fn clear_history(&mut self) -> Result<()> {
        if matches!(self.status, SessionStatus::Active | SessionStatus::Connecting) {
            return Err(TutorError::InvalidState(
                "stop the session before clearing history".into(),
            ));
        }
        for key in [HISTORY_KEY, STATS_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, error = %e, "Failed to remove snapshot");
            }
        }
        self.transcript.clear();
        self.stats = DailyStats::new(self.clock.today());
        self.assembler.reset();
        self.last_error = None;
        tracing::info!("History cleared");
        Ok(())
    }

    /// Whether `user_text` reads as a homework submission.
    pub fn is_submission(&self, user_text: &str) -> bool {
        let lower = user_text.to_lowercase();
        self.policy
            .submission_keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    }

    fn complete_turn(&mut self) -> ControllerUpdate {
        let turn = self.assembler.finalize();
        let reply = parse_tutor_reply(&turn.output_text);

        let turn_millis = self.clock.now_millis().max(self.last_turn_millis + 1);
        self.last_turn_millis = turn_millis;

        self.refresh_day();
        let submitted = self.is_submission(&turn.input_text);
        if submitted {
            self.stats.homework_completed = true;
            tracing::info!("Homework submission detected");
        }
        if !reply.homework.is_empty() {
            self.stats.homework_assigned = Some(reply.homework.clone());
        }

        let user_text = match turn.input_text.trim() {
            "" => self.policy.voice_placeholder.clone(),
            text => text.to_string(),
        };
        let user = TurnRecord::user(
            turn_millis,
            user_text,
            TurnAudio::new(self.user_audio_rate, turn.user_audio),
        );
        let tutor = TurnRecord::tutor(
            turn_millis,
            reply,
            submitted,
            TurnAudio::new(self.tutor_audio_rate, turn.tutor_audio),
        );

        self.transcript.push(user.clone());
        self.transcript.push(tutor.clone());
        save_snapshot(self.store.as_ref(), HISTORY_KEY, &self.transcript);
        save_snapshot(self.store.as_ref(), STATS_KEY, &self.stats);

        tracing::info!(turn = %user.id, turns = self.transcript.len() / 2, "Turn recorded");
        ControllerUpdate::Turn { user, tutor }
    }

    /// Credit elapsed minutes once and synthesize default homework.
    fn finish_session(&mut self) -> Option<u32> {
        let started = self.started_at.take()?;
        self.assembler.reset();

        let elapsed_ms = u64::try_from(self.clock.now_millis() - started).unwrap_or(0);
        let minutes = elapsed_minutes(elapsed_ms);

        self.refresh_day();
        self.stats.minutes_spoken = self.stats.minutes_spoken.saturating_add(minutes);
        if minutes >= 1 && self.stats.homework_assigned.is_none() {
            self.stats.homework_assigned = Some(self.policy.default_homework.clone());
        }
        save_snapshot(self.store.as_ref(), STATS_KEY, &self.stats);

        tracing::info!(minutes, total = self.stats.minutes_spoken, "Session ended");
        Some(minutes)
    }

    fn refresh_day(&mut self) {
        let today = self.clock.today();
        if self.stats.date != today {
            self.stats = rolled_over(&self.stats, today);
            save_snapshot(self.store.as_ref(), STATS_KEY, &self.stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Script {
        start_results: VecDeque<Result<()>>,
        hints: Vec<String>,
        sink: Option<EventSink>,
        stops: usize,
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport(Arc<Mutex<Script>>);

    impl ScriptedTransport {
        fn sink(&self) -> EventSink {
            self.0.lock().sink.clone().expect("session not started")
        }

        fn fail_next_start(&self, err: TutorError) {
            self.0.lock().start_results.push_back(Err(err));
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn start(&mut self, context_hint: &str, events: EventSink) -> Result<()> {
            let mut script = self.0.lock();
            script.hints.push(context_hint.to_string());
            let result = script.start_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                script.sink = Some(events);
            }
            result
        }

        async fn stop(&mut self) {
            let mut script = self.0.lock();
            script.stops += 1;
            if let Some(sink) = script.sink.take() {
                sink.close();
            }
        }
    }

    struct ManualClock(Mutex<(i64, NaiveDate)>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new((
                1_760_000_000_000,
                NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            ))))
        }

        fn advance(&self, ms: i64) {
            self.0.lock().0 += ms;
        }

        fn set_today(&self, date: NaiveDate) {
            self.0.lock().1 = date;
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.lock().0
        }

        fn today(&self) -> NaiveDate {
            self.0.lock().1
        }
    }

    struct Harness {
        controller: SessionController<ScriptedTransport>,
        transport: ScriptedTransport,
        store: MemoryStore,
        clock: Arc<ManualClock>,
    }

    fn harness_with(store: MemoryStore) -> Harness {
        let transport = ScriptedTransport::default();
        let clock = ManualClock::new();
        let controller = SessionController::new(
            transport.clone(),
            Box::new(store.clone()),
            clock.clone(),
            TutorPolicy::default(),
        );
        Harness {
            controller,
            transport,
            store,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new())
    }

    const REPLY: &str = "=== Spoken English Transcript ===\nGreat effort! What else did you do?\n=== Chinese Translation ===\n很努力！你还做了什么？\n=== Today's Homework (今日作业) ===\nWrite about your weekend.";

    async fn play_turn(h: &mut Harness, input: &str, output: &str) -> (TurnRecord, TurnRecord) {
        let sink = h.transport.sink();
        sink.emit(SessionEvent::UserAudio(vec![1, 0, 2, 0]));
        if !input.is_empty() {
            sink.emit(SessionEvent::Voice(VoiceEvent::InputTranscript {
                text: input.into(),
            }));
        }
        sink.emit(SessionEvent::Voice(VoiceEvent::OutputTranscript {
            text: output.into(),
        }));
        sink.emit(SessionEvent::Voice(VoiceEvent::Audio { data: vec![7, 0] }));
        sink.emit(SessionEvent::Voice(VoiceEvent::TurnComplete));
        loop {
            match h.controller.next_update().await {
                Some(ControllerUpdate::Turn { user, tutor }) => return (user, tutor),
                Some(_) => continue,
                None => panic!("session ended before turn completed"),
            }
        }
    }

    #[tokio::test]
    async fn start_and_stop_lifecycle() {
        let mut h = harness();
        assert_eq!(h.controller.status(), SessionStatus::Idle);
        h.controller.start_session().await.unwrap();
        assert_eq!(h.controller.status(), SessionStatus::Active);
        assert_eq!(
            h.transport.0.lock().hints,
            vec!["Mode: Practice. Current Date: 2026-10-16. ".to_string()]
        );

        h.clock.advance(30_000);
        assert_eq!(h.controller.stop_session().await, Some(1));
        assert_eq!(h.controller.status(), SessionStatus::Idle);
        assert_eq!(h.controller.next_update().await, None);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        let err = h.controller.start_session().await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidState(_)));
        assert_eq!(h.controller.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn ninety_seconds_counted_once_across_error_and_manual_stop() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        h.clock.advance(90_000);

        h.transport.sink().fail("socket reset");
        assert_eq!(
            h.controller.next_update().await,
            Some(ControllerUpdate::Failed("socket reset".into()))
        );
        assert_eq!(h.controller.status(), SessionStatus::Error);
        assert_eq!(
            h.controller.next_update().await,
            Some(ControllerUpdate::Closed { minutes: 2 })
        );

        h.clock.advance(60_000);
        assert_eq!(h.controller.stop_session().await, None);
        assert_eq!(h.controller.stats().minutes_spoken, 2);
        assert_eq!(h.controller.status(), SessionStatus::Error);
        assert!(matches!(
            h.controller.last_error(),
            Some(TutorError::Connection(m)) if m == "socket reset"
        ));
    }

    #[tokio::test]
    async fn manual_stop_after_failure_but_before_close() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        h.clock.advance(90_000);
        h.transport.sink().fail("boom");
        assert!(matches!(
            h.controller.next_update().await,
            Some(ControllerUpdate::Failed(_))
        ));
        assert_eq!(h.controller.stop_session().await, Some(2));
        assert_eq!(h.controller.next_update().await, None);
        assert_eq!(h.controller.stats().minutes_spoken, 2);
    }

    #[tokio::test]
    async fn remote_close_returns_to_idle() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        h.clock.advance(10_000);
        h.transport.sink().close();
        assert_eq!(
            h.controller.next_update().await,
            Some(ControllerUpdate::Closed { minutes: 1 })
        );
        assert_eq!(h.controller.status(), SessionStatus::Idle);
        assert!(h.transport.0.lock().stops >= 1);
    }

    #[tokio::test]
    async fn completed_turn_produces_paired_records() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        let (user, tutor) = play_turn(&mut h, " I went to the park.", REPLY).await;

        assert_eq!(user.sender, Sender::User);
        assert_eq!(user.text, "I went to the park.");
        assert_eq!(tutor.sender, Sender::Tutor);
        assert_eq!(tutor.text, "Great effort! What else did you do?");
        assert_eq!(tutor.translation.as_deref(), Some("很努力！你还做了什么？"));
        assert_eq!(tutor.vocabulary.as_deref(), Some(""));
        assert_eq!(user.id.trim_end_matches("-u"), tutor.id.trim_end_matches("-t"));
        assert_eq!(tutor.timestamp, user.timestamp + 1);
        assert_eq!(user.audio.as_ref().unwrap().pcm, vec![1, 0, 2, 0]);
        assert_eq!(tutor.audio.as_ref().unwrap().sample_rate, 24_000);
        assert!(!tutor.is_homework_correction);

        let saved: Vec<TurnRecord> = load_snapshot(&h.store, HISTORY_KEY).unwrap();
        assert_eq!(saved, vec![user, tutor]);
        let stats: DailyStats = load_snapshot(&h.store, STATS_KEY).unwrap();
        assert_eq!(stats.homework_assigned.as_deref(), Some("Write about your weekend."));
        assert!(!stats.homework_completed);
    }

    #[tokio::test]
    async fn partial_updates_accumulate() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        let sink = h.transport.sink();
        sink.emit(SessionEvent::Voice(VoiceEvent::InputTranscript { text: "How ".into() }));
        sink.emit(SessionEvent::Voice(VoiceEvent::InputTranscript { text: "are you".into() }));
        assert_eq!(
            h.controller.next_update().await,
            Some(ControllerUpdate::InputPartial("How ".into()))
        );
        assert_eq!(
            h.controller.next_update().await,
            Some(ControllerUpdate::InputPartial("How are you".into()))
        );
        assert_eq!(h.controller.partial_input(), "How are you");
    }

    #[tokio::test]
    async fn submission_keyword_marks_homework_completed() {
        let store = MemoryStore::new();
        let mut seeded = DailyStats::new(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        seeded.homework_assigned = Some("Describe your hometown.".into());
        save_snapshot(&store, STATS_KEY, &seeded);

        let mut h = harness_with(store);
        h.controller.start_session().await.unwrap();
        assert!(h.transport.0.lock().hints[0].starts_with("Mode: Homework Grading."));

        let (_, tutor) = play_turn(&mut h, "Here is my homework submission", REPLY).await;
        assert!(tutor.is_homework_correction);
        let stats = h.controller.stats();
        assert!(stats.homework_completed);
        assert_eq!(stats.homework_assigned.as_deref(), Some("Write about your weekend."));
    }

    #[tokio::test]
    async fn homework_from_grading_turn_beats_default_at_session_end() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        let (_, tutor) = play_turn(&mut h, "here is my homework", REPLY).await;
        assert!(tutor.is_homework_correction);

        h.clock.advance(90_000);
        h.controller.stop_session().await;
        let stats = h.controller.stats();
        assert!(stats.homework_completed);
        assert_eq!(stats.homework_assigned.as_deref(), Some("Write about your weekend."));

        let persisted: DailyStats = load_snapshot(&h.store, STATS_KEY).unwrap();
        assert_eq!(persisted.homework_assigned.as_deref(), Some("Write about your weekend."));
    }

    #[tokio::test]
    async fn configured_audio_rates_label_stored_audio() {
        let transport = ScriptedTransport::default();
        let store = MemoryStore::new();
        let clock = ManualClock::new();
        let controller = SessionController::new(
            transport.clone(),
            Box::new(store.clone()),
            clock.clone(),
            TutorPolicy::default(),
        )
        .with_audio_rates(8_000, 22_050);
        let mut h = Harness {
            controller,
            transport,
            store,
            clock,
        };

        h.controller.start_session().await.unwrap();
        let (user, tutor) = play_turn(&mut h, "hello", "Hi there!").await;
        assert_eq!(user.audio.unwrap().sample_rate, 8_000);
        assert_eq!(tutor.audio.unwrap().sample_rate, 22_050);
    }

    #[tokio::test]
    async fn ordinary_chat_is_not_a_submission() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        play_turn(&mut h, "How are you today", REPLY).await;
        assert!(!h.controller.stats().homework_completed);
        assert!(h.controller.is_submission("请帮我批改"));
        assert!(h.controller.is_submission("HOMEWORK time"));
        assert!(!h.controller.is_submission("How are you today"));
    }

    #[tokio::test]
    async fn empty_transcription_uses_placeholder() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        let (user, _) = play_turn(&mut h, "", "Hello! How was your day?").await;
        assert_eq!(user.text, "Voice interaction");
    }

    #[tokio::test]
    async fn turn_ids_strictly_increase_within_one_millisecond() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        let (first, _) = play_turn(&mut h, "one", "a").await;
        let (second, _) = play_turn(&mut h, "two", "b").await;
        assert!(second.timestamp > first.timestamp);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn default_homework_after_a_minute_without_assignment() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        h.clock.advance(61_000);
        h.controller.stop_session().await;
        let stats = h.controller.stats();
        assert_eq!(stats.minutes_spoken, 2);
        assert_eq!(
            stats.homework_assigned.as_deref(),
            Some("Review the vocabulary and phrases from today's conversation.")
        );
    }

    #[tokio::test]
    async fn instant_session_gets_no_default_homework() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        assert_eq!(h.controller.stop_session().await, Some(0));
        assert_eq!(h.controller.stats().homework_assigned, None);
    }

    #[tokio::test]
    async fn permission_denied_leaves_idle() {
        let mut h = harness();
        h.transport
            .fail_next_start(TutorError::PermissionDenied("no mic".into()));
        let err = h.controller.start_session().await.unwrap_err();
        assert!(matches!(err, TutorError::PermissionDenied(_)));
        assert_eq!(h.controller.status(), SessionStatus::Idle);
        assert!(h.controller.last_error().unwrap().is_user_visible());
        assert_eq!(h.controller.stop_session().await, None);
    }

    #[tokio::test]
    async fn connection_failure_moves_to_error_and_can_retry() {
        let mut h = harness();
        h.transport
            .fail_next_start(TutorError::Connection("setupComplete timeout (15s)".into()));
        assert!(h.controller.start_session().await.is_err());
        assert_eq!(h.controller.status(), SessionStatus::Error);

        h.controller.start_session().await.unwrap();
        assert_eq!(h.controller.status(), SessionStatus::Active);
        assert!(h.controller.last_error().is_none());
    }

    #[tokio::test]
    async fn clear_history_requires_idle_and_wipes_snapshots() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        play_turn(&mut h, "hello", REPLY).await;
        assert!(matches!(
            h.controller.clear_history(),
            Err(TutorError::InvalidState(_))
        ));

        h.controller.stop_session().await;
        h.controller.clear_history().unwrap();
        assert!(h.controller.transcript().is_empty());
        assert_eq!(h.controller.stats().homework_assigned, None);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn restores_and_rolls_over_saved_stats() {
        let store = MemoryStore::new();
        let yesterday = DailyStats {
            minutes_spoken: 25,
            date: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
            homework_assigned: Some("Pending task".into()),
            homework_completed: false,
        };
        save_snapshot(&store, STATS_KEY, &yesterday);

        let h = harness_with(store);
        let stats = h.controller.stats();
        assert_eq!(stats.minutes_spoken, 0);
        assert_eq!(stats.date, NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        assert_eq!(stats.homework_assigned.as_deref(), Some("Pending task"));

        let persisted: DailyStats = load_snapshot(&h.store, STATS_KEY).unwrap();
        assert_eq!(persisted, stats);
    }

    #[tokio::test]
    async fn day_change_between_sessions_rolls_over() {
        let mut h = harness();
        h.controller.start_session().await.unwrap();
        h.clock.advance(120_000);
        h.controller.stop_session().await;
        assert_eq!(h.controller.stats().minutes_spoken, 2);

        h.clock.set_today(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        assert_eq!(h.controller.stats().minutes_spoken, 0);
        h.controller.start_session().await.unwrap();
        assert!(h.transport.0.lock().hints[1].starts_with("Mode: Homework Grading."));
    }
}
