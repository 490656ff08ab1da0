use guide_contracts::session::ConversationTurn;

use crate::landmark::ImageSummary;

/// Render commands the controller issues while handling a trigger. A
/// front end implements this and calls back into the controller.
pub trait UiSink {
    fn show_image(&mut self, image: &ImageSummary);
    fn show_working(&mut self, status: &str);
    fn show_landmark(&mut self, landmark: &str);
    fn render_transcript(&mut self, transcript: &[ConversationTurn]);
    fn show_notice(&mut self, notice: &str);
    /// The controller is idle again and ready for the next message.
    fn accept_input(&mut self);
}
