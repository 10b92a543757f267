//! Model categories, lifecycle states and the per-model registry record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ResourceError;

/// Closed set of model categories hosted by the studio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    LanguageModel,
    DiffusionImage,
    SpeechToText,
    TextToSpeech,
    Vision,
}

impl ModelType {
    pub const ALL: [ModelType; 5] = [
        Self::LanguageModel,
        Self::DiffusionImage,
        Self::SpeechToText,
        Self::TextToSpeech,
        Self::Vision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LanguageModel => "language_model",
            Self::DiffusionImage => "diffusion_image",
            Self::SpeechToText => "speech_to_text",
            Self::TextToSpeech => "text_to_speech",
            Self::Vision => "vision",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" | "language_model" | "language-model" | "chat" => Ok(Self::LanguageModel),
            "diffusion" | "diffusion_image" | "diffusion-image" | "sd" | "image" => {
                Ok(Self::DiffusionImage)
            }
            "stt" | "speech_to_text" | "speech-to-text" | "whisper" => Ok(Self::SpeechToText),
            "tts" | "text_to_speech" | "text-to-speech" => Ok(Self::TextToSpeech),
            "vision" | "vlm" => Ok(Self::Vision),
            _ => Err(ResourceError::UnknownModelType(s.to_string())),
        }
    }
}

/// Lifecycle state of a managed model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Busy,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A VRAM/RAM pair in GB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryFootprint {
    pub vram_gb: f64,
    pub ram_gb: f64,
}

impl MemoryFootprint {
    pub const ZERO: MemoryFootprint = MemoryFootprint {
        vram_gb: 0.0,
        ram_gb: 0.0,
    };

    pub fn new(vram_gb: f64, ram_gb: f64) -> Self {
        // Negative or NaN measurements would corrupt the running sums.
        let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        Self {
            vram_gb: clean(vram_gb),
            ram_gb: clean(ram_gb),
        }
    }

    /// Re-apply the [`Self::new`] clamping to a footprint built as a literal.
    pub fn sanitized(self) -> Self {
        Self::new(self.vram_gb, self.ram_gb)
    }

    pub fn fits_within(&self, other: &MemoryFootprint) -> bool {
        self.vram_gb <= other.vram_gb && self.ram_gb <= other.ram_gb
    }
}

impl std::ops::Add for MemoryFootprint {
    type Output = MemoryFootprint;

    fn add(self, rhs: Self) -> Self::Output {
        MemoryFootprint {
            vram_gb: self.vram_gb + rhs.vram_gb,
            ram_gb: self.ram_gb + rhs.ram_gb,
        }
    }
}

impl std::ops::AddAssign for MemoryFootprint {
    fn add_assign(&mut self, rhs: Self) {
        self.vram_gb += rhs.vram_gb;
        self.ram_gb += rhs.ram_gb;
    }
}

/// Registry record. Only the manager holds these; readers get [`ActiveModel`] copies.
#[derive(Debug, Clone)]
pub(crate) struct ManagedModel {
    pub id: String,
    pub model_type: ModelType,
    pub state: ModelState,
    pub footprint: MemoryFootprint,
    pub pinned: bool,
    /// Registry tick of the last admission or transition; lower is older.
    pub last_used: u64,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl ManagedModel {
    pub fn new(id: &str, model_type: ModelType) -> Self {
        Self {
            id: id.to_string(),
            model_type,
            state: ModelState::Unloaded,
            footprint: MemoryFootprint::ZERO,
            pinned: false,
            last_used: 0,
            loaded_at: None,
        }
    }

    /// Eligible for auto-swap eviction.
    pub fn can_unload(&self) -> bool {
        self.state == ModelState::Loaded && !self.pinned
    }

    /// Memory charged against the budget. Unloaded entries hold nothing.
    pub fn accounted(&self) -> MemoryFootprint {
        match self.state {
            ModelState::Unloaded => MemoryFootprint::ZERO,
            _ => self.footprint,
        }
    }

    pub fn touch(&mut self, tick: u64) {
        self.last_used = tick;
    }

    pub fn snapshot(&self) -> ActiveModel {
        ActiveModel {
            id: self.id.clone(),
            model_type: self.model_type,
            state: self.state,
            vram_allocated_gb: self.accounted().vram_gb,
            ram_allocated_gb: self.accounted().ram_gb,
            can_unload: self.can_unload(),
            pinned: self.pinned,
            loaded_at: self.loaded_at,
        }
    }
}

/// Read-only view of a resident model, for diagnostics and UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveModel {
    pub id: String,
    pub model_type: ModelType,
    pub state: ModelState,
    pub vram_allocated_gb: f64,
    pub ram_allocated_gb: f64,
    pub can_unload: bool,
    pub pinned: bool,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Outcome of a load admission request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadDecision {
    pub can_load: bool,
    pub reason: String,
    /// Models unloaded from the accounting to make room. Their owners must
    /// release their own handles.
    pub evicted: Vec<String>,
}

impl LoadDecision {
    pub(crate) fn approve(reason: impl Into<String>) -> Self {
        Self {
            can_load: true,
            reason: reason.into(),
            evicted: Vec::new(),
        }
    }

    pub(crate) fn deny(reason: impl Into<String>) -> Self {
        Self {
            can_load: false,
            reason: reason.into(),
            evicted: Vec::new(),
        }
    }
}

/// GPU-bound work a caller may want to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    TextGeneration,
    TextToImage,
    ImageToImage,
    Inpaint,
    Upscale,
    SpeechToText,
    TextToSpeech,
    VisionAnalysis,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::TextToImage => "text_to_image",
            Self::ImageToImage => "image_to_image",
            Self::Inpaint => "inpaint",
            Self::Upscale => "upscale",
            Self::SpeechToText => "speech_to_text",
            Self::TextToSpeech => "text_to_speech",
            Self::VisionAnalysis => "vision_analysis",
        }
    }

    /// Whether this operation competes for the GPU with other running inference.
    pub fn is_gpu_heavy(&self) -> bool {
        !matches!(self, Self::TextToSpeech)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "text_generation" | "chat" => Ok(Self::TextGeneration),
            "text_to_image" | "txt2img" => Ok(Self::TextToImage),
            "image_to_image" | "img2img" => Ok(Self::ImageToImage),
            "inpaint" => Ok(Self::Inpaint),
            "upscale" => Ok(Self::Upscale),
            "speech_to_text" | "transcribe" => Ok(Self::SpeechToText),
            "text_to_speech" | "speak" => Ok(Self::TextToSpeech),
            "vision_analysis" | "vision" => Ok(Self::VisionAnalysis),
            _ => Err(ResourceError::UnknownOperation(s.to_string())),
        }
    }
}

/// Outcome of [`super::ResourceManager::can_perform_operation`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationDecision {
    pub allowed: bool,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_type_parses_common_tags() {
        assert_eq!("llm".parse::<ModelType>().unwrap(), ModelType::LanguageModel);
        assert_eq!("SD".parse::<ModelType>().unwrap(), ModelType::DiffusionImage);
        assert_eq!("whisper".parse::<ModelType>().unwrap(), ModelType::SpeechToText);
        assert_eq!("tts".parse::<ModelType>().unwrap(), ModelType::TextToSpeech);
        assert_eq!("vlm".parse::<ModelType>().unwrap(), ModelType::Vision);
    }

    #[test]
    fn model_type_rejects_unknown_tag() {
        let err = "hologram".parse::<ModelType>().unwrap_err();
        assert!(matches!(err, ResourceError::UnknownModelType(ref t) if t == "hologram"));
    }

    #[test]
    fn model_type_as_str_parses_back() {
        for ty in ModelType::ALL {
            assert_eq!(ty.as_str().parse::<ModelType>().unwrap(), ty);
        }
    }

    #[test]
    fn operation_kind_parses_hyphenated() {
        assert_eq!(
            "text-to-image".parse::<OperationKind>().unwrap(),
            OperationKind::TextToImage
        );
        assert!("render".parse::<OperationKind>().is_err());
    }

    #[test]
    fn footprint_sanitizes_bad_measurements() {
        let fp = MemoryFootprint::new(-1.0, f64::NAN);
        assert_eq!(fp, MemoryFootprint::ZERO);
    }

    #[test]
    fn unloaded_entry_accounts_nothing() {
        let mut model = ManagedModel::new("m", ModelType::Vision);
        model.footprint = MemoryFootprint::new(2.0, 1.0);
        assert_eq!(model.accounted(), MemoryFootprint::ZERO);
        assert!(!model.can_unload());

        model.state = ModelState::Loaded;
        assert_eq!(model.accounted(), MemoryFootprint::new(2.0, 1.0));
        assert!(model.can_unload());

        model.pinned = true;
        assert!(!model.can_unload());
    }
}
