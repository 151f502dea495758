//! Transcript records.

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::response::ParsedReply;

/// Default sample rate of learner audio.
pub const USER_AUDIO_RATE: u32 = 16_000;

/// Default sample rate of tutor audio.
pub const TUTOR_AUDIO_RATE: u32 = 24_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Tutor,
}

/// PCM16LE mono audio attached to a record; base64 when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnAudio {
    pub sample_rate: u32,
    #[serde(with = "pcm_base64")]
    pub pcm: Vec<u8>,
}

impl TurnAudio {
    /// `None` for an empty buffer.
    pub fn new(sample_rate: u32, pcm: Vec<u8>) -> Option<Self> {
        (!pcm.is_empty()).then_some(Self { sample_rate, pcm })
    }

    pub fn duration_ms(&self) -> u64 {
        crate::voice::pcm::duration_ms(self.pcm.len(), self.sample_rate)
    }
}

mod pcm_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(pcm: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(pcm))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One half of a learner/tutor exchange.
///
/// The tutor-only fields are `None` on user records and `Some` (possibly
/// empty) on tutor records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrases: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grammar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improved_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homework: Option<String>,
    /// Set on the tutor reply to a turn the learner flagged as a homework submission.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_homework_correction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<TurnAudio>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl TurnRecord {
    pub fn user(turn_millis: i64, text: String, audio: Option<TurnAudio>) -> Self {
        Self {
            id: format!("{turn_millis}-u"),
            sender: Sender::User,
            text,
            translation: None,
            vocabulary: None,
            phrases: None,
            grammar: None,
            improved_version: None,
            homework: None,
            is_homework_correction: false,
            audio,
            timestamp: turn_millis,
        }
    }

    pub fn tutor(
        turn_millis: i64,
        reply: ParsedReply,
        is_homework_correction: bool,
        audio: Option<TurnAudio>,
    ) -> Self {
        Self {
            id: format!("{turn_millis}-t"),
            sender: Sender::Tutor,
            text: reply.natural,
            translation: Some(reply.translation),
            vocabulary: Some(reply.vocabulary),
            phrases: Some(reply.phrases),
            grammar: Some(reply.grammar),
            improved_version: Some(reply.improved),
            homework: Some(reply.homework),
            is_homework_correction,
            audio,
            timestamp: turn_millis + 1,
        }
    }

    /// Base64 of the attached audio, for hosts that want the raw payload.
    pub fn audio_base64(&self) -> Option<String> {
        self.audio
            .as_ref()
            .map(|a| base64::engine::general_purpose::STANDARD.encode(&a.pcm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply() -> ParsedReply {
        ParsedReply {
            natural: "Nice job!".into(),
            translation: "做得好！".into(),
            homework: "Describe your weekend.".into(),
            ..ParsedReply::default()
        }
    }

    #[test]
    fn halves_share_turn_millis() {
        let user = TurnRecord::user(1_700_000_000_000, "hi".into(), None);
        let tutor = TurnRecord::tutor(1_700_000_000_000, reply(), false, None);
        assert_eq!(user.id, "1700000000000-u");
        assert_eq!(tutor.id, "1700000000000-t");
        assert_eq!(tutor.timestamp, user.timestamp + 1);
    }

    #[test]
    fn tutor_fields_absent_on_user_record() {
        let json = serde_json::to_value(TurnRecord::user(5, "hi".into(), None)).unwrap();
        assert_eq!(json["sender"], "user");
        assert!(json.get("translation").is_none());
        assert!(json.get("isHomeworkCorrection").is_none());
        assert!(json.get("audio").is_none());
    }

    #[test]
    fn tutor_record_keeps_empty_sections() {
        let json = serde_json::to_value(TurnRecord::tutor(5, reply(), true, None)).unwrap();
        assert_eq!(json["sender"], "tutor");
        assert_eq!(json["vocabulary"], "");
        assert_eq!(json["improvedVersion"], "");
        assert_eq!(json["homework"], "Describe your weekend.");
        assert_eq!(json["isHomeworkCorrection"], true);
    }

    #[test]
    fn audio_serializes_as_base64() {
        let audio = TurnAudio::new(TUTOR_AUDIO_RATE, vec![1, 2, 3, 4]).unwrap();
        let record = TurnRecord::tutor(5, reply(), false, Some(audio.clone()));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["audio"]["sampleRate"], 24_000);
        assert_eq!(json["audio"]["pcm"], "AQIDBA==");
        assert_eq!(record.audio_base64().as_deref(), Some("AQIDBA=="));

        let back: TurnRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.audio, Some(audio));
    }

    #[test]
    fn empty_audio_is_dropped() {
        assert!(TurnAudio::new(USER_AUDIO_RATE, Vec::new()).is_none());
        let audio = TurnAudio::new(USER_AUDIO_RATE, vec![0; 32_000]).unwrap();
        assert_eq!(audio.duration_ms(), 1000);
    }
}
