use std::sync::Arc;

use anyhow::Result;
use guide_contracts::context::{self, HistoryWindow};
use guide_contracts::events::{EventPayload, EventWriter};
use guide_contracts::session::ConversationSession;
use serde_json::{json, Value};

use crate::config::GuideConfig;
use crate::guide::TravelGuide;
use crate::inference::{AttemptFailure, InferenceClient, Transport};
use crate::landmark::{invalid_image_reply, prepare_image, LandmarkIdentifier, PreparedImage};
use crate::reply::GuideReply;
use crate::ui::UiSink;

pub const ANALYZING_STATUS: &str = "Analyzing image...";
pub const GENERATING_STATUS: &str = "Generating response...";
pub const PROCESSING_COMPLETE: &str = "Processing complete";

const DEFAULT_CONTEXT_WINDOW: u64 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Identifying,
    Answering,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Identifying => "identifying",
            ControllerState::Answering => "answering",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub pct: f64,
    pub alert_level: String,
}

/// Owns one conversation session and turns the two user triggers
/// (image upload, text message) into remote calls and render commands.
pub struct InteractionController {
    identifier: LandmarkIdentifier,
    guide: TravelGuide,
    session: ConversationSession,
    history_window: HistoryWindow,
    context_window: u64,
    events: EventWriter,
    state: ControllerState,
}

impl InteractionController {
    pub fn new(
        identifier: LandmarkIdentifier,
        guide: TravelGuide,
        session: ConversationSession,
        history_window: HistoryWindow,
        context_window: Option<u64>,
        events: EventWriter,
    ) -> Result<Self> {
        let controller = Self {
            identifier,
            guide,
            session,
            history_window,
            context_window: context_window.unwrap_or(DEFAULT_CONTEXT_WINDOW),
            events,
            state: ControllerState::Idle,
        };
        controller.events.emit(
            "session_started",
            map_object(json!({
                "caption_endpoint": controller.identifier.endpoint().url,
                "generation_endpoint": controller.guide.endpoint().url,
                "max_attempts": controller.identifier.endpoint().retry.max_attempts,
                "history_window": match controller.history_window {
                    HistoryWindow::Unbounded => Value::Null,
                    HistoryWindow::LastTurns(turns) => Value::from(turns),
                },
            })),
        )?;
        Ok(controller)
    }

    pub fn from_config(
        config: &GuideConfig,
        transport: Arc<dyn Transport>,
        events: EventWriter,
        session: ConversationSession,
    ) -> Result<Self> {
        let client = InferenceClient::new(transport);
        Self::new(
            LandmarkIdentifier::new(client.clone(), config.caption_endpoint()),
            TravelGuide::new(
                client,
                config.generation_endpoint(),
                config.generation_settings,
            ),
            session,
            config.history_window,
            config.generation.context_window,
            events,
        )
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Identifies the landmark in `image` and stores the caption (or the
    /// fallback text) as the session landmark.
    pub fn submit_image(&mut self, image: &[u8], ui: &mut dyn UiSink) -> Result<GuideReply> {
        let prepared = prepare_image(image);
        if let Ok(prepared) = &prepared {
            ui.show_image(&prepared.summary);
        }
        ui.show_working(ANALYZING_STATUS);
        self.state = ControllerState::Identifying;

        let mut log = AttemptLog::new(&self.events);
        let reply = match &prepared {
            Ok(prepared) => {
                log.emit_image_submitted(prepared);
                self.identifier
                    .identify_prepared(prepared, &mut |failure| log.record(failure))
            }
            Err(err) => {
                log.emit(
                    "image_rejected",
                    json!({
                        "byte_len": image.len(),
                        "error": format!("{err:#}"),
                    }),
                );
                invalid_image_reply()
            }
        };
        let log_result = log.finish();

        self.session.set_landmark(reply.text.clone());
        ui.show_landmark(self.session.snapshot().landmark);
        ui.show_notice(PROCESSING_COMPLETE);
        self.state = ControllerState::Idle;

        log_result?;
        self.events.emit(
            "landmark_identified",
            map_object(json!({
                "landmark": reply.text,
                "failure": reply.failure.map(|kind| kind.as_str()),
            })),
        )?;
        Ok(reply)
    }

    /// Answers `text` as the travel guide. Blank messages are ignored and
    /// return `None`.
    pub fn submit_message(
        &mut self,
        text: &str,
        ui: &mut dyn UiSink,
    ) -> Result<Option<GuideReply>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        self.session.append_user(text);
        let snapshot = self.session.snapshot();
        ui.render_transcript(snapshot.transcript);
        ui.show_working(GENERATING_STATUS);
        self.state = ControllerState::Answering;

        let prompt =
            context::build_windowed(snapshot.landmark, snapshot.transcript, self.history_window);
        let mut log = AttemptLog::new(&self.events);
        let reply = self
            .guide
            .generate_observed(&prompt, &mut |failure| log.record(failure));
        let log_result = log.finish();

        self.session.append_assistant(reply.text.clone());
        ui.render_transcript(self.session.snapshot().transcript);
        ui.accept_input();
        self.state = ControllerState::Idle;

        log_result?;
        self.track_context(&prompt, &reply.text)?;
        self.events.emit(
            "assistant_replied",
            map_object(json!({
                "turns": self.session.transcript().len(),
                "chars": reply.text.chars().count(),
                "failure": reply.failure.map(|kind| kind.as_str()),
            })),
        )?;
        Ok(Some(reply))
    }

    pub fn track_context(&self, text_in: &str, text_out: &str) -> Result<ContextUsage> {
        let used_tokens = context::estimate_tokens(text_in) + context::estimate_tokens(text_out);
        let max_tokens = self.context_window;
        let pct = if max_tokens == 0 {
            0.0
        } else {
            used_tokens as f64 / max_tokens as f64
        }
        .clamp(0.0, 1.0);
        let alert_level = if pct >= 0.95 {
            "critical"
        } else if pct >= 0.9 {
            "high"
        } else if pct >= 0.75 {
            "medium"
        } else {
            "none"
        }
        .to_string();

        self.events.emit(
            "context_window_update",
            map_object(json!({
                "used_tokens": used_tokens,
                "max_tokens": max_tokens,
                "pct": pct,
                "alert_level": alert_level,
            })),
        )?;

        Ok(ContextUsage {
            used_tokens,
            max_tokens,
            pct,
            alert_level,
        })
    }
}

/// Collects event-log writes made during a remote call so the first I/O
/// error can be surfaced after session state is settled.
struct AttemptLog<'a> {
    events: &'a EventWriter,
    error: Option<anyhow::Error>,
}

impl<'a> AttemptLog<'a> {
    fn new(events: &'a EventWriter) -> Self {
        Self {
            events,
            error: None,
        }
    }

    fn record(&mut self, failure: &AttemptFailure) {
        self.emit(
            "inference_attempt_failed",
            json!({
                "service": failure.service,
                "attempt": failure.attempt,
                "max_attempts": failure.max_attempts,
                "status": failure.status,
                "error": failure.error,
            }),
        );
    }

    fn emit_image_submitted(&mut self, prepared: &PreparedImage) {
        self.emit(
            "image_submitted",
            json!({
                "width": prepared.summary.width,
                "height": prepared.summary.height,
                "byte_len": prepared.summary.byte_len,
                "sha256": prepared.summary.sha256,
            }),
        );
    }

    fn emit(&mut self, event_type: &str, payload: Value) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.events.emit(event_type, map_object(payload)) {
            self.error = Some(err);
        }
    }

    fn finish(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use guide_contracts::context::HistoryWindow;
    use guide_contracts::events::EventWriter;
    use guide_contracts::session::{ConversationSession, ConversationTurn, Role};
    use image::ImageFormat;
    use serde_json::Value;

    use super::{
        ControllerState, InteractionController, ANALYZING_STATUS, GENERATING_STATUS,
        PROCESSING_COMPLETE,
    };
    use crate::guide::{GenerationSettings, TravelGuide, BUSY_MESSAGE, GENERATION_SERVICE};
    use crate::inference::testing::{Scripted, ScriptedTransport};
    use crate::inference::{EndpointSettings, FailureKind, InferenceClient, Payload, RetryPolicy};
    use crate::landmark::{
        sample_image, ImageSummary, LandmarkIdentifier, CAPTION_SERVICE, INVALID_IMAGE_MESSAGE,
        UNAVAILABLE_MESSAGE,
    };
    use crate::ui::UiSink;

    #[derive(Debug, Clone, PartialEq)]
    enum Rendered {
        Image(u32, u32),
        Working(String),
        Landmark(String),
        Transcript(Vec<ConversationTurn>),
        Notice(String),
        AcceptInput,
    }

    #[derive(Default)]
    struct RecordingUi {
        rendered: Vec<Rendered>,
    }

    impl UiSink for RecordingUi {
        fn show_image(&mut self, image: &ImageSummary) {
            self.rendered.push(Rendered::Image(image.width, image.height));
        }

        fn show_working(&mut self, status: &str) {
            self.rendered.push(Rendered::Working(status.to_string()));
        }

        fn show_landmark(&mut self, landmark: &str) {
            self.rendered.push(Rendered::Landmark(landmark.to_string()));
        }

        fn render_transcript(&mut self, transcript: &[ConversationTurn]) {
            self.rendered.push(Rendered::Transcript(transcript.to_vec()));
        }

        fn show_notice(&mut self, notice: &str) {
            self.rendered.push(Rendered::Notice(notice.to_string()));
        }

        fn accept_input(&mut self) {
            self.rendered.push(Rendered::AcceptInput);
        }
    }

    fn endpoint(service: &str, url: &str, delay: Duration) -> EndpointSettings {
        EndpointSettings {
            service: service.to_string(),
            url: url.to_string(),
            credential: "hf_test".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 3,
                retry_delay: delay,
            },
        }
    }

    fn controller(
        transport: Arc<ScriptedTransport>,
        delay: Duration,
        events: EventWriter,
    ) -> InteractionController {
        let client = InferenceClient::new(transport);
        InteractionController::new(
            LandmarkIdentifier::new(
                client.clone(),
                endpoint(CAPTION_SERVICE, "http://localhost/caption", delay),
            ),
            TravelGuide::new(
                client,
                endpoint(GENERATION_SERVICE, "http://localhost/generate", delay),
                GenerationSettings::default(),
            ),
            ConversationSession::new(),
            HistoryWindow::Unbounded,
            Some(8192),
            events,
        )
        .unwrap()
    }

    fn read_events(path: &std::path::Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn image_submission_sets_landmark_and_renders_in_order() {
        let transport = Arc::new(ScriptedTransport::always(
            200,
            r#"[{"generated_text": "Eiffel Tower"}]"#,
        ));
        let mut controller = controller(
            transport,
            Duration::from_millis(10),
            EventWriter::disabled("test"),
        );
        let mut ui = RecordingUi::default();

        let reply = controller
            .submit_image(&sample_image(ImageFormat::Jpeg), &mut ui)
            .unwrap();

        assert_eq!(reply.text, "Eiffel Tower");
        assert_eq!(controller.session().landmark(), "Eiffel Tower");
        assert!(controller.session().transcript().is_empty());
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(
            ui.rendered,
            vec![
                Rendered::Image(8, 6),
                Rendered::Working(ANALYZING_STATUS.to_string()),
                Rendered::Landmark("Eiffel Tower".to_string()),
                Rendered::Notice(PROCESSING_COMPLETE.to_string()),
            ]
        );
    }

    #[test]
    fn question_after_identification_carries_landmark_in_prompt() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Reply(200, r#"[{"generated_text": "Eiffel Tower"}]"#),
            Scripted::Reply(
                200,
                r#"[{"generated_text": "Spring and autumn are ideal."}]"#,
            ),
        ]));
        let mut controller = controller(
            transport.clone(),
            Duration::from_millis(10),
            EventWriter::disabled("test"),
        );
        let mut ui = RecordingUi::default();
        controller
            .submit_image(&sample_image(ImageFormat::Png), &mut ui)
            .unwrap();
        ui.rendered.clear();

        let reply = controller
            .submit_message("What's the best time to visit?", &mut ui)
            .unwrap()
            .unwrap();

        assert_eq!(reply.text, "Spring and autumn are ideal.");
        let transcript = controller.session().transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].text, "What's the best time to visit?");
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].text, "Spring and autumn are ideal.");

        let requests = transport.requests();
        let Payload::Json(body) = &requests[1].payload else {
            panic!("generation request should carry JSON");
        };
        let prompt = body["inputs"].as_str().unwrap();
        assert!(prompt.contains("Eiffel Tower"));
        assert!(prompt.ends_with("user: What's the best time to visit?\n"));

        assert_eq!(
            ui.rendered,
            vec![
                Rendered::Transcript(transcript[..1].to_vec()),
                Rendered::Working(GENERATING_STATUS.to_string()),
                Rendered::Transcript(transcript.to_vec()),
                Rendered::AcceptInput,
            ]
        );
    }

    #[test]
    fn renders_match_the_session_snapshot() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Reply(200, r#"[{"generated_text": "Colosseum"}]"#),
            Scripted::Reply(200, r#"[{"generated_text": "Buy tickets online."}]"#),
        ]));
        let mut controller = controller(
            transport,
            Duration::from_millis(5),
            EventWriter::disabled("test"),
        );
        let mut ui = RecordingUi::default();
        controller
            .submit_image(&sample_image(ImageFormat::Png), &mut ui)
            .unwrap();
        controller
            .submit_message("Any tips for visiting?", &mut ui)
            .unwrap();

        let snapshot = controller.session().snapshot();
        assert_eq!(snapshot.landmark, "Colosseum");
        assert_eq!(snapshot.transcript.len(), 2);
        assert!(ui
            .rendered
            .contains(&Rendered::Landmark(snapshot.landmark.to_string())));
        let last_transcript = ui.rendered.iter().rev().find_map(|rendered| match rendered {
            Rendered::Transcript(turns) => Some(turns.clone()),
            _ => None,
        });
        assert_eq!(last_transcript.as_deref(), Some(snapshot.transcript));
    }

    #[test]
    fn busy_language_model_falls_back_after_retries() {
        let delay = Duration::from_millis(40);
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Reply(200, r#"[{"generated_text": "Eiffel Tower"}]"#),
            Scripted::Reply(503, "Model is overloaded"),
        ]));
        let mut controller = controller(transport.clone(), delay, EventWriter::disabled("test"));
        let mut ui = RecordingUi::default();
        controller
            .submit_image(&sample_image(ImageFormat::Png), &mut ui)
            .unwrap();

        let started = Instant::now();
        let reply = controller
            .submit_message("Is it open at night?", &mut ui)
            .unwrap()
            .unwrap();

        assert!(started.elapsed() >= delay * 2);
        assert_eq!(reply.text, BUSY_MESSAGE);
        assert_eq!(reply.failure, Some(FailureKind::ServiceUnavailable));
        assert_eq!(transport.call_count(), 4);
        let transcript = controller.session().transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].text, BUSY_MESSAGE);
        assert_eq!(ui.rendered.last(), Some(&Rendered::AcceptInput));
    }

    #[test]
    fn blank_message_is_ignored() {
        let transport = Arc::new(ScriptedTransport::always(
            200,
            r#"[{"generated_text": "unused"}]"#,
        ));
        let mut controller = controller(
            transport.clone(),
            Duration::from_millis(10),
            EventWriter::disabled("test"),
        );
        let mut ui = RecordingUi::default();

        assert_eq!(controller.submit_message("   \n", &mut ui).unwrap(), None);
        assert!(controller.session().transcript().is_empty());
        assert!(ui.rendered.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn unavailable_caption_is_stored_as_landmark() {
        let transport = Arc::new(ScriptedTransport::always(503, "loading"));
        let mut controller = controller(
            transport,
            Duration::from_millis(5),
            EventWriter::disabled("test"),
        );
        let mut ui = RecordingUi::default();
        let reply = controller
            .submit_image(&sample_image(ImageFormat::Png), &mut ui)
            .unwrap();
        assert_eq!(reply.failure, Some(FailureKind::ServiceUnavailable));
        assert_eq!(controller.session().landmark(), UNAVAILABLE_MESSAGE);
    }

    #[test]
    fn undecodable_image_skips_preview_and_network() {
        let transport = Arc::new(ScriptedTransport::always(
            200,
            r#"[{"generated_text": "Eiffel Tower"}]"#,
        ));
        let mut controller = controller(
            transport.clone(),
            Duration::from_millis(5),
            EventWriter::disabled("test"),
        );
        let mut ui = RecordingUi::default();
        let reply = controller.submit_image(b"not an image", &mut ui).unwrap();

        assert_eq!(reply.failure, Some(FailureKind::InvalidImage));
        assert_eq!(transport.call_count(), 0);
        assert_eq!(
            ui.rendered,
            vec![
                Rendered::Working(ANALYZING_STATUS.to_string()),
                Rendered::Landmark(INVALID_IMAGE_MESSAGE.to_string()),
                Rendered::Notice(PROCESSING_COMPLETE.to_string()),
            ]
        );
    }

    #[test]
    fn actions_are_written_to_the_event_log() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::Reply(503, "loading"),
            Scripted::Reply(200, r#"[{"generated_text": "Eiffel Tower"}]"#),
            Scripted::Reply(200, r#"[{"generated_text": "Take the stairs."}]"#),
        ]));
        let mut controller = controller(
            transport,
            Duration::from_millis(5),
            EventWriter::new(path.clone(), "sess-1"),
        );
        let mut ui = RecordingUi::default();
        controller
            .submit_image(&sample_image(ImageFormat::Png), &mut ui)
            .unwrap();
        controller.submit_message("How do I get up?", &mut ui).unwrap();

        let events = read_events(&path);
        let types: Vec<&str> = events
            .iter()
            .map(|event| event["type"].as_str().unwrap())
            .collect();
        assert_eq!(
            types,
            vec![
                "session_started",
                "image_submitted",
                "inference_attempt_failed",
                "landmark_identified",
                "context_window_update",
                "assistant_replied",
            ]
        );
        assert!(events.iter().all(|event| event["session_id"] == "sess-1"));
        assert_eq!(events[2]["service"], "Image model");
        assert_eq!(events[2]["status"], 503);
        assert_eq!(events[3]["landmark"], "Eiffel Tower");
        assert_eq!(events[3]["failure"], Value::Null);
        assert_eq!(events[4]["alert_level"], "none");
        assert_eq!(events[5]["turns"], 2);
    }

    #[test]
    fn context_alert_levels_follow_usage() {
        let transport = Arc::new(ScriptedTransport::always(200, "[]"));
        let mut controller = controller(
            transport,
            Duration::from_millis(5),
            EventWriter::disabled("test"),
        );
        controller.context_window = 100;
        assert_eq!(controller.track_context("", "").unwrap().alert_level, "none");
        let medium = "x".repeat(300);
        assert_eq!(
            controller.track_context(&medium, "").unwrap().alert_level,
            "medium"
        );
        let critical = "x".repeat(1000);
        let usage = controller.track_context(&critical, "").unwrap();
        assert_eq!(usage.alert_level, "critical");
        assert_eq!(usage.pct, 1.0);
    }
}
