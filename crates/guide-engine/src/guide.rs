use serde_json::{json, Map, Value};

use crate::inference::{AttemptFailure, EndpointSettings, FailureKind, InferenceClient, Payload};
use crate::reply::GuideReply;

pub const GENERATION_SERVICE: &str = "Language model";
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 300;

pub const BUSY_MESSAGE: &str = "Language model is busy. Please try again.";
pub const GENERATION_FAILED_MESSAGE: &str = "Failed to generate response. Please retry.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub max_new_tokens: u32,
    pub temperature: Option<f64>,
    /// Drop the prompt when the endpoint echoes it before the answer.
    pub strip_prompt_echo: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: None,
            strip_prompt_echo: true,
        }
    }
}

pub struct TravelGuide {
    client: InferenceClient,
    endpoint: EndpointSettings,
    settings: GenerationSettings,
}

impl TravelGuide {
    pub fn new(
        client: InferenceClient,
        endpoint: EndpointSettings,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            client,
            endpoint,
            settings,
        }
    }

    pub fn endpoint(&self) -> &EndpointSettings {
        &self.endpoint
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn payload(&self, prompt: &str) -> Value {
        let mut parameters = Map::new();
        parameters.insert(
            "max_new_tokens".to_string(),
            Value::from(self.settings.max_new_tokens),
        );
        if let Some(temperature) = self.settings.temperature {
            parameters.insert("temperature".to_string(), Value::from(temperature));
        }
        json!({
            "inputs": prompt,
            "parameters": parameters,
        })
    }

    pub fn generate(&self, prompt: &str) -> GuideReply {
        self.generate_observed(prompt, &mut |_| {})
    }

    pub fn generate_observed(
        &self,
        prompt: &str,
        on_failed_attempt: &mut dyn FnMut(&AttemptFailure),
    ) -> GuideReply {
        let request = self.endpoint.request(Payload::Json(self.payload(prompt)));
        let result = self
            .client
            .call_observed(&request, &self.endpoint.retry, on_failed_attempt);
        let generated = match result {
            Ok(generated) => generated,
            Err(failure) => {
                return match failure.kind() {
                    FailureKind::ServiceUnavailable => {
                        GuideReply::fallback(FailureKind::ServiceUnavailable, BUSY_MESSAGE)
                    }
                    kind => GuideReply::fallback(kind, GENERATION_FAILED_MESSAGE),
                };
            }
        };

        if self.settings.strip_prompt_echo {
            if let Some(answer) = generated.strip_prefix(prompt) {
                return GuideReply::answered(answer.trim_start());
            }
        }
        GuideReply::answered(generated)
    }
}
