use indexmap::IndexMap;

pub const HF_INFERENCE_BASE: &str = "https://api-inference.huggingface.co/models";

pub const CAPTION: &str = "caption";
pub const GENERATION: &str = "generation";

/// A known hosted model that can back one of the two remote endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPreset {
    pub name: String,
    pub model_id: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl EndpointPreset {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn endpoint(&self) -> String {
        format!("{HF_INFERENCE_BASE}/{}", self.model_id)
    }
}

#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: IndexMap<String, EndpointPreset>,
}

impl PresetRegistry {
    pub fn new(presets: Option<IndexMap<String, EndpointPreset>>) -> Self {
        Self {
            presets: presets.unwrap_or_else(default_presets),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EndpointPreset> {
        self.presets.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &EndpointPreset> {
        self.presets.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<EndpointPreset> {
        self.presets
            .values()
            .filter(|preset| preset.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<EndpointPreset> {
        let preset = self.get(name)?;
        if preset.supports(capability) {
            return Some(preset.clone());
        }
        None
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

// First entry per capability is the default.
fn default_presets() -> IndexMap<String, EndpointPreset> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, model_id: &str, capability: &str, context_window: Option<u64>| {
        map.insert(
            name.to_string(),
            EndpointPreset {
                name: name.to_string(),
                model_id: model_id.to_string(),
                capabilities: vec![capability.to_string()],
                context_window,
            },
        );
    };

    insert(
        "blip-large",
        "Salesforce/blip-image-captioning-large",
        CAPTION,
        None,
    );
    insert(
        "blip-base",
        "Salesforce/blip-image-captioning-base",
        CAPTION,
        None,
    );
    insert(
        "vit-gpt2",
        "nlpconnect/vit-gpt2-image-captioning",
        CAPTION,
        None,
    );
    insert(
        "mistral-7b-instruct-v0.2",
        "mistralai/Mistral-7B-Instruct-v0.2",
        GENERATION,
        Some(32768),
    );
    insert(
        "mistral-7b-instruct-v0.1",
        "mistralai/Mistral-7B-Instruct-v0.1",
        GENERATION,
        Some(8192),
    );
    insert(
        "zephyr-7b-beta",
        "HuggingFaceH4/zephyr-7b-beta",
        GENERATION,
        Some(8192),
    );
    insert("flan-t5-large", "google/flan-t5-large", GENERATION, Some(512));

    map
}
