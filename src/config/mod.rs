use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Paths;
use crate::resources::{DeviceCapacity, MemoryFootprint, ModelType, default_estimate};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub estimates: EstimatesConfig,

    #[serde(default)]
    pub canvas: CanvasConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total GPU memory. The device probe is external; set this to the card's size.
    #[serde(default = "default_total_vram")]
    pub total_vram_gb: f64,

    /// Total host memory (0 = read from the host)
    #[serde(default)]
    pub total_ram_gb: f64,

    /// Headroom never offered to models
    #[serde(default = "default_reserve_vram")]
    pub system_reserve_vram_gb: f64,

    #[serde(default = "default_reserve_ram")]
    pub system_reserve_ram_gb: f64,

    /// VRAM held by other applications on the same GPU
    #[serde(default)]
    pub external_apps_vram_gb: f64,
}

/// Reservation estimates per model category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatesConfig {
    #[serde(default = "default_llm_estimate")]
    pub language_model: EstimateEntry,

    #[serde(default = "default_diffusion_estimate")]
    pub diffusion_image: EstimateEntry,

    #[serde(default = "default_stt_estimate")]
    pub speech_to_text: EstimateEntry,

    #[serde(default = "default_tts_estimate")]
    pub text_to_speech: EstimateEntry,

    #[serde(default = "default_vision_estimate")]
    pub vision: EstimateEntry,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EstimateEntry {
    pub vram_gb: f64,
    pub ram_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Minimum change in history size before the budget is updated
    #[serde(default = "default_push_threshold_mb")]
    pub push_threshold_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_total_vram() -> f64 {
    8.0
}
fn default_reserve_vram() -> f64 {
    1.0
}
fn default_reserve_ram() -> f64 {
    2.0
}
fn estimate_entry(model_type: ModelType) -> EstimateEntry {
    let fp = default_estimate(model_type);
    EstimateEntry {
        vram_gb: fp.vram_gb,
        ram_gb: fp.ram_gb,
    }
}
fn default_llm_estimate() -> EstimateEntry {
    estimate_entry(ModelType::LanguageModel)
}
fn default_diffusion_estimate() -> EstimateEntry {
    estimate_entry(ModelType::DiffusionImage)
}
fn default_stt_estimate() -> EstimateEntry {
    estimate_entry(ModelType::SpeechToText)
}
fn default_tts_estimate() -> EstimateEntry {
    estimate_entry(ModelType::TextToSpeech)
}
fn default_vision_estimate() -> EstimateEntry {
    estimate_entry(ModelType::Vision)
}
fn default_push_threshold_mb() -> f64 {
    64.0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_vram_gb: default_total_vram(),
            total_ram_gb: 0.0, // 0 = probe host
            system_reserve_vram_gb: default_reserve_vram(),
            system_reserve_ram_gb: default_reserve_ram(),
            external_apps_vram_gb: 0.0,
        }
    }
}

impl BudgetConfig {
    /// Capacity as configured. `total_ram_gb` may be 0 until probed.
    pub fn capacity(&self) -> DeviceCapacity {
        DeviceCapacity {
            total_vram_gb: self.total_vram_gb,
            total_ram_gb: self.total_ram_gb,
            external_apps_vram_gb: self.external_apps_vram_gb,
        }
    }

    pub fn probe_host_ram(&self) -> bool {
        self.total_ram_gb <= 0.0
    }
}

impl Default for EstimatesConfig {
    fn default() -> Self {
        Self {
            language_model: default_llm_estimate(),
            diffusion_image: default_diffusion_estimate(),
            speech_to_text: default_stt_estimate(),
            text_to_speech: default_tts_estimate(),
            vision: default_vision_estimate(),
        }
    }
}

impl EstimatesConfig {
    pub fn for_type(&self, model_type: ModelType) -> MemoryFootprint {
        let entry = self.entry(model_type);
        MemoryFootprint::new(entry.vram_gb, entry.ram_gb)
    }

    fn entry(&self, model_type: ModelType) -> &EstimateEntry {
        match model_type {
            ModelType::LanguageModel => &self.language_model,
            ModelType::DiffusionImage => &self.diffusion_image,
            ModelType::SpeechToText => &self.speech_to_text,
            ModelType::TextToSpeech => &self.text_to_speech,
            ModelType::Vision => &self.vision,
        }
    }

    fn entry_mut(&mut self, model_type: ModelType) -> &mut EstimateEntry {
        match model_type {
            ModelType::LanguageModel => &mut self.language_model,
            ModelType::DiffusionImage => &mut self.diffusion_image,
            ModelType::SpeechToText => &mut self.speech_to_text,
            ModelType::TextToSpeech => &mut self.text_to_speech,
            ModelType::Vision => &mut self.vision,
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            push_threshold_mb: default_push_threshold_mb(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load from the resolved config file, creating it from the template on first run.
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        let path = paths.config_file();

        if !path.exists() {
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let mut config = Self::load_from(&path)?;
        config.paths = paths;
        Ok(config)
    }

    /// Load from an explicit file (`--config`). `~` is expanded.
    pub fn load_from(path: &Path) -> Result<Self> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
        let path = PathBuf::from(expanded);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&self.paths.config_file())
    }

    /// Write to an explicit file, e.g. the one given with `--config`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["budget", "total_vram_gb"] => Ok(self.budget.total_vram_gb.to_string()),
            ["budget", "total_ram_gb"] => Ok(self.budget.total_ram_gb.to_string()),
            ["budget", "system_reserve_vram_gb"] => {
                Ok(self.budget.system_reserve_vram_gb.to_string())
            }
            ["budget", "system_reserve_ram_gb"] => {
                Ok(self.budget.system_reserve_ram_gb.to_string())
            }
            ["budget", "external_apps_vram_gb"] => {
                Ok(self.budget.external_apps_vram_gb.to_string())
            }
            ["estimates", category, field] => {
                let model_type: ModelType = category.parse()?;
                let entry = self.estimates.entry(model_type);
                match *field {
                    "vram_gb" => Ok(entry.vram_gb.to_string()),
                    "ram_gb" => Ok(entry.ram_gb.to_string()),
                    _ => anyhow::bail!("Unknown config key: {}", key),
                }
            }
            ["canvas", "push_threshold_mb"] => Ok(self.canvas.push_threshold_mb.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["budget", "total_vram_gb"] => self.budget.total_vram_gb = value.parse()?,
            ["budget", "total_ram_gb"] => self.budget.total_ram_gb = value.parse()?,
            ["budget", "system_reserve_vram_gb"] => {
                self.budget.system_reserve_vram_gb = value.parse()?
            }
            ["budget", "system_reserve_ram_gb"] => {
                self.budget.system_reserve_ram_gb = value.parse()?
            }
            ["budget", "external_apps_vram_gb"] => {
                self.budget.external_apps_vram_gb = value.parse()?
            }
            ["estimates", category, field] => {
                let model_type: ModelType = category.parse()?;
                let entry = self.estimates.entry_mut(model_type);
                match *field {
                    "vram_gb" => entry.vram_gb = value.parse()?,
                    "ram_gb" => entry.ram_gb = value.parse()?,
                    _ => anyhow::bail!("Unknown config key: {}", key),
                }
            }
            ["canvas", "push_threshold_mb"] => self.canvas.push_threshold_mb = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => match value {
                "pretty" | "json" => self.logging.format = value.to_string(),
                _ => anyhow::bail!("logging.format must be \"pretty\" or \"json\""),
            },
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# modelgate configuration
# Auto-created on first run. Edit as needed.

[budget]
# GPU memory of the card models are loaded onto
total_vram_gb = 8.0
# Host memory; 0 reads MemTotal from the host
total_ram_gb = 0.0
# Headroom never handed to models
system_reserve_vram_gb = 1.0
system_reserve_ram_gb = 2.0
# VRAM held by other applications (browser, compositor, games)
external_apps_vram_gb = 0.0

# Reservation per model category, used until the loader reports measured usage
# [estimates.language_model]
# vram_gb = 6.0
# ram_gb = 2.0
#
# [estimates.diffusion_image]
# vram_gb = 7.0
# ram_gb = 4.0

[canvas]
# Undo/redo history changes smaller than this don't update the budget
push_threshold_mb = 64.0

[logging]
level = "info"
# pretty | json
format = "pretty"
"#;
