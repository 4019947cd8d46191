use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::loader::DEFAULT_BATCH_SIZE;
use crate::viewport::{
    ViewportConfig, DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, DEFAULT_VIEWPORT_HEIGHT,
    DEFAULT_VIEWPORT_WIDTH,
};
use crate::ScrollSteps;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    pub viewport: ViewportSection,
    pub scroll: ScrollSection,
    pub loader: LoaderSection,
    pub render: RenderSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewportSection {
    pub width: f32,
    pub height: f32,
    /// Use the terminal's pixel size when it reports one.
    pub fit_terminal: bool,
}

impl Default for ViewportSection {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
            fit_terminal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrollSection {
    pub speed_step: f32,
    pub fast_speed_step: f32,
    pub zoom_step: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for ScrollSection {
    fn default() -> Self {
        let steps = ScrollSteps::default();
        Self {
            speed_step: steps.speed,
            fast_speed_step: steps.fast_speed,
            zoom_step: steps.zoom,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }
}

impl ScrollSection {
    pub fn steps(&self) -> ScrollSteps {
        ScrollSteps {
            speed: self.speed_step,
            fast_speed: self.fast_speed_step,
            zoom: self.zoom_step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSection {
    pub batch_size: usize,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSection {
    pub ticks_per_second: u32,
    /// Raster width of decoded pages; 0 follows the viewport width.
    pub target_width: u32,
    pub pdfium_library: Option<PathBuf>,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            ticks_per_second: 60,
            target_width: 0,
            pdfium_library: None,
        }
    }
}

impl ViewerConfig {
    /// Reads an explicitly requested config file, which must exist. Values
    /// are not checked; call [`ViewerConfig::validate`] after overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Reads the default config location; a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("viewport.width", self.viewport.width),
            ("viewport.height", self.viewport.height),
            ("scroll.speed_step", self.scroll.speed_step),
            ("scroll.fast_speed_step", self.scroll.fast_speed_step),
            ("scroll.zoom_step", self.scroll.zoom_step),
            ("scroll.min_zoom", self.scroll.min_zoom),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if !(self.scroll.max_zoom.is_finite() && self.scroll.max_zoom >= self.scroll.min_zoom) {
            return Err(ConfigError::Invalid(format!(
                "scroll.max_zoom ({}) must not be below scroll.min_zoom ({})",
                self.scroll.max_zoom, self.scroll.min_zoom
            )));
        }
        if self.loader.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "loader.batch_size must be at least 1".to_string(),
            ));
        }
        if self.render.ticks_per_second == 0 {
            return Err(ConfigError::Invalid(
                "render.ticks_per_second must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn viewport_config(&self) -> ViewportConfig {
        ViewportConfig {
            width: self.viewport.width,
            height: self.viewport.height,
            min_zoom: self.scroll.min_zoom,
            max_zoom: self.scroll.max_zoom,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.render.ticks_per_second.max(1)))
    }
}
