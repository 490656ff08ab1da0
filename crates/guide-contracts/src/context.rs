use std::fmt::Write as _;

use crate::session::ConversationTurn;

pub const GUIDE_INSTRUCTION: &str = "You are a professional travel guide.";
pub const LANDMARK_PLACEHOLDER: &str = "(not yet identified)";

/// How much of the transcript is rendered into each prompt.
///
/// `Unbounded` renders every turn, so the prompt grows with the
/// conversation. `LastTurns(n)` keeps only the newest `n` turns (at least
/// one, so the latest user message is never dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryWindow {
    #[default]
    Unbounded,
    LastTurns(usize),
}

impl HistoryWindow {
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(turns) => Self::LastTurns(turns.max(1)),
            None => Self::Unbounded,
        }
    }

    pub fn apply<'a>(&self, transcript: &'a [ConversationTurn]) -> &'a [ConversationTurn] {
        match *self {
            Self::Unbounded => transcript,
            Self::LastTurns(turns) => {
                let keep = turns.max(1);
                &transcript[transcript.len().saturating_sub(keep)..]
            }
        }
    }
}

/// Renders the full prompt for the text-generation endpoint.
pub fn build(landmark: &str, transcript: &[ConversationTurn]) -> String {
    let landmark = landmark.trim();
    let landmark = if landmark.is_empty() {
        LANDMARK_PLACEHOLDER
    } else {
        landmark
    };

    let mut prompt = format!("{GUIDE_INSTRUCTION}\n\nLandmark:\n{landmark}\n\nConversation:\n");
    for turn in transcript {
        render_turn(&mut prompt, turn);
    }
    prompt
}

pub fn build_windowed(
    landmark: &str,
    transcript: &[ConversationTurn],
    window: HistoryWindow,
) -> String {
    build(landmark, window.apply(transcript))
}

pub fn render_turn(out: &mut String, turn: &ConversationTurn) {
    let _ = writeln!(out, "{}: {}", turn.role, turn.text);
}

pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}
