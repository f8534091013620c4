//! Typed request builders for each backend kind.
//!
//! Style parameters are read once, defaulted, and validated before anything is
//! dispatched; invalid combinations surface as `GenerationError::InvalidRequest`.

use crate::error::GenerationError;
use crate::types::{Resolution, SceneRequest, StyleParams};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, blurry, distorted, deformed";
const DEFAULT_LORA_STRENGTH: f64 = 0.8;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_STEPS: u32 = 20;
const DEFAULT_CFG: f64 = 7.5;
const DEFAULT_SAMPLER: &str = "euler_ancestral";

/// Wrap scene text with the style's prompt prefix and suffix.
pub fn enhance_prompt(text: &str, style: &StyleParams) -> String {
    let prefix = style.get_str("prompt_prefix").unwrap_or("");
    let suffix = style.get_str("prompt_suffix").unwrap_or("");
    [prefix.trim(), text.trim(), suffix.trim()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

fn negative_prompt(style: &StyleParams) -> String {
    style
        .get_str("negative_prompt")
        .unwrap_or(DEFAULT_NEGATIVE_PROMPT)
        .to_string()
}

fn validate_common(prompt: &str, resolution: Resolution) -> Result<(), GenerationError> {
    if prompt.is_empty() {
        return Err(GenerationError::InvalidRequest(
            "prompt is empty after style enhancement".to_string(),
        ));
    }
    if resolution.width == 0 || resolution.height == 0 {
        return Err(GenerationError::InvalidRequest(format!(
            "resolution {} has a zero dimension",
            resolution
        )));
    }
    Ok(())
}

/// LoRA adapter applied by the local workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSpec {
    pub name: String,
    pub strength: f64,
}

/// Job payload for the local GPU job service (`POST {endpoint}/submit`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalJobRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_template: Option<String>,
    pub style: String,
    pub prompt: String,
    pub negative_prompt: String,
    /// Base64-encoded reference image
    pub reference_image: String,
    pub reference_name: String,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    pub steps: u32,
    pub cfg: f64,
    pub sampler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora: Option<LoraSpec>,
}

impl LocalJobRequest {
    pub fn builder<'a>(
        scene: &'a SceneRequest,
        reference_image: &'a [u8],
        resolution: Resolution,
    ) -> LocalJobRequestBuilder<'a> {
        LocalJobRequestBuilder {
            scene,
            reference_image,
            resolution,
        }
    }
}

/// A numeric style parameter: absent is `None`, any other JSON type is rejected.
fn u64_param(style: &StyleParams, key: &str) -> Result<Option<u64>, GenerationError> {
    match style.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            GenerationError::InvalidRequest(format!(
                "{} must be a non-negative integer, got {}",
                key, value
            ))
        }),
    }
}

fn f64_param(style: &StyleParams, key: &str) -> Result<Option<f64>, GenerationError> {
    match style.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            GenerationError::InvalidRequest(format!("{} must be a number, got {}", key, value))
        }),
    }
}

pub struct LocalJobRequestBuilder<'a> {
    scene: &'a SceneRequest,
    reference_image: &'a [u8],
    resolution: Resolution,
}

impl LocalJobRequestBuilder<'_> {
    pub fn build(self) -> Result<LocalJobRequest, GenerationError> {
        let style = &self.scene.style_params;
        let prompt = enhance_prompt(&self.scene.text, style);
        validate_common(&prompt, self.resolution)?;

        let steps = u64_param(style, "steps")?.unwrap_or(DEFAULT_STEPS as u64);
        if steps == 0 || steps > u32::MAX as u64 {
            return Err(GenerationError::InvalidRequest(format!(
                "steps must be positive, got {}",
                steps
            )));
        }

        let lora = match style.get_str("lora_name") {
            Some(name) if !name.is_empty() => {
                let strength = f64_param(style, "lora_strength")?.unwrap_or(DEFAULT_LORA_STRENGTH);
                if !(0.0..=2.0).contains(&strength) {
                    return Err(GenerationError::InvalidRequest(format!(
                        "lora_strength must be within 0..=2, got {}",
                        strength
                    )));
                }
                Some(LoraSpec {
                    name: name.to_string(),
                    strength,
                })
            }
            _ => None,
        };

        let seed = u64_param(style, "seed")?.unwrap_or(DEFAULT_SEED);
        let cfg = f64_param(style, "cfg")?.unwrap_or(DEFAULT_CFG);

        Ok(LocalJobRequest {
            workflow_template: style.get_str("workflow_template").map(str::to_string),
            style: self.scene.style_name.clone(),
            prompt,
            negative_prompt: negative_prompt(style),
            reference_image: BASE64.encode(self.reference_image),
            reference_name: self
                .scene
                .reference_image_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "reference.png".to_string()),
            width: self.resolution.width,
            height: self.resolution.height,
            seed,
            steps: steps as u32,
            cfg,
            sampler: style
                .get_str("sampler")
                .unwrap_or(DEFAULT_SAMPLER)
                .to_string(),
            lora,
        })
    }
}

/// JSON body for a cloud image operation (`POST {endpoint}/{operation}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudImageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    pub negative_prompt: String,
    pub style: String,
    /// `"{width}x{height}"`
    pub size: String,
    pub width: u32,
    pub height: u32,
    pub n: u32,
    /// Base64-encoded reference image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub response_format: String,
}

impl CloudImageRequest {
    pub fn builder<'a>(
        scene: &'a SceneRequest,
        reference_image: &'a [u8],
        resolution: Resolution,
    ) -> CloudImageRequestBuilder<'a> {
        CloudImageRequestBuilder {
            scene,
            reference_image,
            resolution,
            model: None,
        }
    }
}

pub struct CloudImageRequestBuilder<'a> {
    scene: &'a SceneRequest,
    reference_image: &'a [u8],
    resolution: Resolution,
    model: Option<String>,
}

impl CloudImageRequestBuilder<'_> {
    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn build(self) -> Result<CloudImageRequest, GenerationError> {
        let style = &self.scene.style_params;
        let prompt = enhance_prompt(&self.scene.text, style);
        validate_common(&prompt, self.resolution)?;

        Ok(CloudImageRequest {
            model: self.model,
            prompt,
            negative_prompt: negative_prompt(style),
            style: self.scene.style_name.clone(),
            size: self.resolution.to_string(),
            width: self.resolution.width,
            height: self.resolution.height,
            n: 1,
            image: (!self.reference_image.is_empty()).then(|| BASE64.encode(self.reference_image)),
            response_format: "b64_json".to_string(),
        })
    }
}
