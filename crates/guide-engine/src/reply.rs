use crate::inference::FailureKind;

/// Text to show the user, plus why it is a stand-in when the remote call
/// did not produce an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideReply {
    pub text: String,
    pub failure: Option<FailureKind>,
}

impl GuideReply {
    pub fn answered(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            failure: None,
        }
    }

    pub fn fallback(kind: FailureKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            failure: Some(kind),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.failure.is_some()
    }
}
