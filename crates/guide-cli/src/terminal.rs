use std::io::{self, Write};

use guide_contracts::session::{ConversationTurn, Role};
use guide_engine::landmark::ImageSummary;
use guide_engine::ui::UiSink;

/// Line-oriented renderer for the interactive terminal. Transcript renders
/// print only turns that have not been shown yet.
pub struct TerminalUi<W: Write> {
    out: W,
    shown_turns: usize,
    error: Option<io::Error>,
}

impl<W: Write> TerminalUi<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown_turns: 0,
            error: None,
        }
    }

    /// Returns the first write error seen since the last call.
    pub fn take_error(&mut self) -> io::Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn print_history(&mut self, transcript: &[ConversationTurn]) {
        if transcript.is_empty() {
            self.line("No conversation yet.");
            return;
        }
        for turn in transcript {
            self.turn(turn);
        }
        self.shown_turns = transcript.len();
    }

    pub fn line(&mut self, text: &str) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = writeln!(self.out, "{text}") {
            self.error = Some(err);
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn turn(&mut self, turn: &ConversationTurn) {
        let speaker = match turn.role {
            Role::User => "You",
            Role::Assistant => "Guide",
        };
        self.line(&format!("{speaker}: {}", turn.text));
    }
}

impl<W: Write> UiSink for TerminalUi<W> {
    fn show_image(&mut self, image: &ImageSummary) {
        let digest: String = image.sha256.chars().take(12).collect();
        self.line(&format!(
            "Image: {}x{}, {} bytes (sha256 {digest})",
            image.width, image.height, image.byte_len
        ));
    }

    fn show_working(&mut self, status: &str) {
        self.line(status);
    }

    fn show_landmark(&mut self, landmark: &str) {
        self.line(&format!("Landmark: {landmark}"));
    }

    fn render_transcript(&mut self, transcript: &[ConversationTurn]) {
        if transcript.len() < self.shown_turns {
            self.shown_turns = 0;
        }
        for turn in &transcript[self.shown_turns..] {
            self.turn(turn);
        }
        self.shown_turns = transcript.len();
    }

    fn show_notice(&mut self, notice: &str) {
        self.line(notice);
    }

    fn accept_input(&mut self) {
        if self.error.is_none() {
            if let Err(err) = self.out.flush() {
                self.error = Some(err);
            }
        }
    }
}
