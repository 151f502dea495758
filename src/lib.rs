//! Linguist: a voice English tutor on top of Gemini Live.
//!
//! The learner speaks, the tutor answers in audio with a structured
//! breakdown (translation, vocabulary, grammar, homework), and every
//! exchange plus the day's practice minutes is kept locally.

pub mod config;
pub mod error;
pub mod store;
pub mod tutor;
pub mod voice;

pub use config::Config;
pub use error::{Result, TutorError};
