use super::registry::{EndpointPreset, PresetRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetSelection {
    pub preset: EndpointPreset,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PresetSelector {
    pub registry: PresetRegistry,
}

impl PresetSelector {
    pub fn new(registry: Option<PresetRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Resolves a preset by name. An unknown or missing name falls back to
    /// the first preset with the capability and records why.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<PresetSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = if let Some(name) = requested {
            if let Some(preset) = self.registry.ensure(name, capability) {
                return Ok(PresetSelection {
                    preset,
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                });
            }
            Some(format!(
                "Requested model '{name}' unavailable for capability '{capability}'."
            ))
        } else {
            None
        };

        let candidates = self.registry.by_capability(capability);
        let Some(preset) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(PresetSelection {
            preset,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }
}
