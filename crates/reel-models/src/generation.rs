//! Provider-agnostic generation request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::backend::AspectRatio;
use crate::sub_resource::SubResourceKind;

/// Generic request for one sub-resource. Adapters translate it into their
/// provider's request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationSpec {
    pub kind: SubResourceKind,
    /// Visual directive.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    pub duration_secs: f64,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Output video must carry the narration audio.
    #[serde(default)]
    pub with_audio: bool,
    /// Provider-specific passthrough options.
    #[serde(default)]
    pub extra: serde_json::Value,
}
