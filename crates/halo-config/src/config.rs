//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest accepted mip chain length.
pub const MAX_MIP_LEVELS: u32 = 16;

/// Largest accepted frame edge in pixels.
pub const MAX_DIMENSION: u32 = 16384;

/// Top-level renderer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output resolution.
    pub render: RenderConfig,
    /// Mip chain and upsample settings.
    pub bloom: BloomConfig,
    /// Tone mapping and blend settings.
    pub composite: CompositeConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Output resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Width of the HDR frame in pixels.
    pub width: u32,
    /// Height of the HDR frame in pixels.
    pub height: u32,
}

/// Bloom pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BloomConfig {
    /// Run the bloom pipeline and blend its result into the frame.
    pub enabled: bool,
    /// Length of the mip chain.
    pub mip_levels: u32,
    /// Upsample tap spacing in UV units. Larger values give a softer glow.
    pub filter_radius: f32,
    /// Luminance-weighted first downsample, which suppresses fireflies.
    pub karis_average: bool,
}

/// Final composite configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositeConfig {
    /// Exposure applied before tone mapping.
    pub exposure: f32,
    /// Blend selector: 1 = scene only, 2 = additive, 3 = mix.
    pub program_choice: i32,
    /// Bloom weight for the mix blend.
    pub bloom_strength: f32,
    /// Display gamma.
    pub gamma: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mip_levels: 6,
            filter_radius: 0.005,
            karis_average: true,
        }
    }
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            program_choice: 3,
            bloom_strength: 0.04,
            gamma: 2.2,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Validation ---

impl Config {
    /// A copy with every value clamped into the range the renderer accepts.
    /// Each adjusted value is logged at `warn`.
    pub fn validated(&self) -> Self {
        let mut config = self.clone();

        if config.render.width == 0 || config.render.height == 0 {
            log::warn!(
                "Resolution {}x{} has a zero dimension, using at least 1x1",
                config.render.width,
                config.render.height
            );
            config.render.width = config.render.width.max(1);
            config.render.height = config.render.height.max(1);
        }

        if config.render.width > MAX_DIMENSION || config.render.height > MAX_DIMENSION {
            log::warn!(
                "Resolution {}x{} exceeds {MAX_DIMENSION}, clamping each edge",
                config.render.width,
                config.render.height
            );
            config.render.width = config.render.width.min(MAX_DIMENSION);
            config.render.height = config.render.height.min(MAX_DIMENSION);
        }

        let levels = config.bloom.mip_levels.clamp(1, MAX_MIP_LEVELS);
        if levels != config.bloom.mip_levels {
            log::warn!(
                "bloom.mip_levels {} out of range, using {levels}",
                config.bloom.mip_levels
            );
            config.bloom.mip_levels = levels;
        }

        if !(config.bloom.filter_radius >= 0.0) {
            log::warn!(
                "bloom.filter_radius {} is negative, using 0",
                config.bloom.filter_radius
            );
            config.bloom.filter_radius = 0.0;
        }

        if !(config.composite.exposure >= 0.0) {
            log::warn!(
                "composite.exposure {} is negative, using 0",
                config.composite.exposure
            );
            config.composite.exposure = 0.0;
        }

        let choice = config.composite.program_choice.clamp(1, 3);
        if choice != config.composite.program_choice {
            log::warn!(
                "composite.program_choice {} out of range, using {choice}",
                config.composite.program_choice
            );
            config.composite.program_choice = choice;
        }

        config
    }
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("width: 1280"));
        assert!(ron_str.contains("mip_levels: 6"));
        assert!(ron_str.contains("program_choice: 3"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(render: (width: 640))").unwrap();
        assert_eq!(config.render.width, 640);
        assert_eq!(config.render.height, 720);
        assert_eq!(config.bloom, BloomConfig::default());
        assert_eq!(config.composite, CompositeConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.render.width = 1920;
        config.render.height = 1080;
        config.bloom.filter_radius = 0.01;
        config.composite.program_choice = 2;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_invalid_file_produces_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validated_clamps_out_of_range_values() {
        let mut config = Config::default();
        config.render.width = 0;
        config.bloom.mip_levels = 0;
        config.bloom.filter_radius = -0.5;
        config.composite.exposure = -1.0;
        config.composite.program_choice = 9;

        let valid = config.validated();
        assert_eq!(valid.render.width, 1);
        assert_eq!(valid.render.height, 720);
        assert_eq!(valid.bloom.mip_levels, 1);
        assert_eq!(valid.bloom.filter_radius, 0.0);
        assert_eq!(valid.composite.exposure, 0.0);
        assert_eq!(valid.composite.program_choice, 3);

        config.bloom.mip_levels = 40;
        assert_eq!(config.validated().bloom.mip_levels, MAX_MIP_LEVELS);
    }

    #[test]
    fn test_validated_caps_resolution() {
        let mut config = Config::default();
        config.render.width = 70_000;
        config.render.height = 70_000;

        let valid = config.validated();
        assert_eq!(valid.render.width, MAX_DIMENSION);
        assert_eq!(valid.render.height, MAX_DIMENSION);
    }

    #[test]
    fn test_validated_keeps_defaults() {
        let config = Config::default();
        assert_eq!(config.validated(), config);
    }
}
