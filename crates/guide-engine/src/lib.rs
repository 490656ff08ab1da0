pub mod config;
pub mod controller;
pub mod guide;
pub mod inference;
pub mod landmark;
pub mod reply;
pub mod ui;

pub use config::{ConfigError, ConfigOverrides, GuideConfig};
pub use controller::{ControllerState, InteractionController};
pub use guide::TravelGuide;
pub use inference::{FailureKind, HttpTransport, InferenceClient, Transport};
pub use landmark::LandmarkIdentifier;
pub use reply::GuideReply;
pub use ui::UiSink;
