//! Configuration system
//!
//! Holds the settings the frame state reads at construction time
//! ([`FrameStateConfig`]) and the render settings it mirrors on every
//! scene pass ([`RenderSettings`]).

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Uniform binding slot every shader program declares for the frame state block
pub const DEFAULT_FRAME_STATE_BINDING: u32 = 1;

/// Construction-time settings for the frame state buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameStateConfig {
    /// Binding slot the buffer is attached to
    pub uniform_binding: u32,
    /// Use the direct update path when the device supports it.
    /// Setting this to false forces bind-then-update.
    pub prefer_direct_update: bool,
}

impl Default for FrameStateConfig {
    fn default() -> Self {
        Self {
            uniform_binding: DEFAULT_FRAME_STATE_BINDING,
            prefer_direct_update: true,
        }
    }
}

impl Config for FrameStateConfig {}

/// Render settings mirrored into the frame state on every scene pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Shader lighting algorithm selector
    pub light_mode: i32,
    /// Shader fog algorithm selector
    pub fog_mode: i32,
    /// Tint light amplification green instead of white
    pub enhanced_nightvision: bool,
}

impl Config for RenderSettings {}
