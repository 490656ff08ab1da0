mod registry;
mod selectors;

pub use registry::{EndpointPreset, PresetRegistry, CAPTION, GENERATION, HF_INFERENCE_BASE};
pub use selectors::{PresetSelection, PresetSelector};
