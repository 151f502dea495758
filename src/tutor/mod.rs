//! Tutoring domain: reply parsing, turn assembly, transcript, daily stats,
//! and the session controller that ties them to a voice transport.

pub mod assembler;
pub mod controller;
pub mod prompt;
pub mod response;
pub mod stats;
pub mod transcript;

pub use controller::{Clock, ControllerUpdate, SessionController, SessionStatus, SystemClock};
pub use response::{parse_tutor_reply, ParsedReply};
pub use stats::DailyStats;
pub use transcript::{Sender, TurnAudio, TurnRecord};
