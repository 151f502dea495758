//! Per-turn accumulation of streamed fragments.

/// Everything streamed during one turn, handed over on completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishedTurn {
    pub input_text: String,
    pub output_text: String,
    /// Tutor PCM16LE at 24 kHz.
    pub tutor_audio: Vec<u8>,
    /// Learner PCM16LE at 16 kHz.
    pub user_audio: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblerState {
    #[default]
    Idle,
    Accumulating,
}

/// Collects transcript and audio fragments until the turn completes.
///
/// `finalize` takes `&mut self`, so no fragment can land between the
/// snapshot and the reset.
#[derive(Debug, Default)]
pub struct TurnAssembler {
    state: AssemblerState,
    input_text: String,
    output_text: String,
    tutor_audio: Vec<u8>,
    user_audio: Vec<u8>,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn push_input_text(&mut self, fragment: &str) {
        self.state = AssemblerState::Accumulating;
        self.input_text.push_str(fragment);
    }

    pub fn push_output_text(&mut self, fragment: &str) {
        self.state = AssemblerState::Accumulating;
        self.output_text.push_str(fragment);
    }

    pub fn push_tutor_audio(&mut self, pcm: &[u8]) {
        self.state = AssemblerState::Accumulating;
        self.tutor_audio.extend_from_slice(pcm);
    }

    pub fn push_user_audio(&mut self, pcm: &[u8]) {
        self.state = AssemblerState::Accumulating;
        self.user_audio.extend_from_slice(pcm);
    }

    /// Partial learner transcript of the turn in progress.
    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    /// Partial tutor transcript of the turn in progress.
    pub fn output_text(&self) -> &str {
        &self.output_text
    }

    /// Snapshot and clear all buffers, returning to `Idle`.
    pub fn finalize(&mut self) -> FinishedTurn {
        self.state = AssemblerState::Idle;
        FinishedTurn {
            input_text: std::mem::take(&mut self.input_text),
            output_text: std::mem::take(&mut self.output_text),
            tutor_audio: std::mem::take(&mut self.tutor_audio),
            user_audio: std::mem::take(&mut self.user_audio),
        }
    }

    /// Drop a partial turn.
    pub fn reset(&mut self) {
        let discarded = self.finalize();
        if discarded != FinishedTurn::default() {
            tracing::debug!(
                input_chars = discarded.input_text.len(),
                output_chars = discarded.output_text.len(),
                "Discarded partial turn"
            );
        }
    }
}
