use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::error::{Result, ViewerError};
use crate::scale::ScaleValue;
use crate::virtualizer::RenderParams;

pub const DEFAULT_PAGE_GAP: f32 = 10.0;

/// Viewer settings, usually read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub initial_scale: ScaleValue,
    pub zoom_enabled: bool,
    pub text_layer: bool,
    pub annotation_layer: bool,
    pub device_pixel_ratio: f32,
    pub page_gap: f32,
    pub tracking: TrackingConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            initial_scale: ScaleValue::default(),
            zoom_enabled: true,
            text_layer: true,
            annotation_layer: true,
            device_pixel_ratio: 1.0,
            page_gap: DEFAULT_PAGE_GAP,
            tracking: TrackingConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_ms")]
    pub debounce: Duration,
    pub visibility_threshold: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            visibility_threshold: 0.5,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ViewerConfig =
            toml::from_str(raw).map_err(|err| ViewerError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("failed to load config file {:?}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0) {
            return Err(ViewerError::Config(format!(
                "device_pixel_ratio must be positive, got {}",
                self.device_pixel_ratio
            )));
        }
        if !(self.page_gap.is_finite() && self.page_gap >= 0.0) {
            return Err(ViewerError::Config(format!(
                "page_gap must not be negative, got {}",
                self.page_gap
            )));
        }
        if !(0.0..=1.0).contains(&self.tracking.visibility_threshold) {
            return Err(ViewerError::Config(format!(
                "tracking.visibility_threshold must be within 0..=1, got {}",
                self.tracking.visibility_threshold
            )));
        }
        Ok(())
    }

    pub(crate) fn render_params(&self, scale: f32, rotation: crate::Rotation) -> RenderParams {
        RenderParams {
            scale,
            rotation,
            pixel_ratio: self.device_pixel_ratio,
            text_layer: self.text_layer,
            annotation_layer: self.annotation_layer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScalePolicy;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ViewerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.tracking.debounce, Duration::from_millis(100));
        assert_eq!(config.initial_scale, ScalePolicy::Auto.into());
    }

    #[test]
    fn parses_policies_numbers_and_durations() {
        let config = ViewerConfig::from_toml_str(
            r#"
            initial_scale = "page-width"
            zoom_enabled = false
            device_pixel_ratio = 2.0

            [tracking]
            debounce_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.initial_scale, ScalePolicy::PageWidth.into());
        assert!(!config.zoom_enabled);
        assert_eq!(config.tracking.debounce, Duration::from_millis(250));
        assert_eq!(config.tracking.visibility_threshold, 0.5);

        let numeric = ViewerConfig::from_toml_str("initial_scale = 1.25").unwrap();
        assert_eq!(numeric.initial_scale, ScaleValue::Numeric(1.25));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            ViewerConfig::from_toml_str("device_pixel_ratio = 0.0"),
            Err(ViewerError::Config(_))
        ));
        assert!(ViewerConfig::from_toml_str("[tracking]\nvisibility_threshold = 1.5").is_err());
        assert!(ViewerConfig::from_toml_str("initial_scale = \"huge\"").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViewerConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());

        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "page_gap = 4.0").unwrap();
        assert_eq!(ViewerConfig::load(&path).unwrap().page_gap, 4.0);
    }
}
