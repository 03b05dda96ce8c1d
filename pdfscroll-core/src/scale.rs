use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::geometry::PageSize;

pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 10.0;
pub const ZOOM_STEP: f32 = 0.25;
/// Upper bound for `auto`; it never upscales past this.
pub const AUTO_MAX_SCALE: f32 = 1.5;
/// Subtracted from container dimensions (20 units per side) before fitting.
pub const CONTAINER_PADDING: f32 = 40.0;

/// Symbolic scale policy resolved against container and page geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalePolicy {
    PageWidth,
    PageFit,
    PageActual,
    Auto,
}

impl ScalePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalePolicy::PageWidth => "page-width",
            ScalePolicy::PageFit => "page-fit",
            ScalePolicy::PageActual => "page-actual",
            ScalePolicy::Auto => "auto",
        }
    }
}

/// A requested scale: either a literal factor or a policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScaleValue {
    Numeric(f32),
    Policy(ScalePolicy),
}

impl Default for ScaleValue {
    fn default() -> Self {
        ScaleValue::Policy(ScalePolicy::Auto)
    }
}

impl From<f32> for ScaleValue {
    fn from(value: f32) -> Self {
        ScaleValue::Numeric(value)
    }
}

impl From<ScalePolicy> for ScaleValue {
    fn from(value: ScalePolicy) -> Self {
        ScaleValue::Policy(value)
    }
}

impl FromStr for ScaleValue {
    type Err = ViewerError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let policy = match trimmed {
            "page-width" => Some(ScalePolicy::PageWidth),
            "page-fit" => Some(ScalePolicy::PageFit),
            "page-actual" => Some(ScalePolicy::PageActual),
            "auto" => Some(ScalePolicy::Auto),
            _ => None,
        };
        if let Some(policy) = policy {
            return Ok(ScaleValue::Policy(policy));
        }
        trimmed
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .map(ScaleValue::Numeric)
            .ok_or_else(|| ViewerError::Config(format!("unrecognized scale value {s:?}")))
    }
}

impl fmt::Display for ScaleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleValue::Numeric(value) => write!(f, "{value}"),
            ScaleValue::Policy(policy) => f.write_str(policy.as_str()),
        }
    }
}

pub fn clamp_scale(scale: f32) -> f32 {
    if scale.is_nan() {
        return 1.0;
    }
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

/// Resolves `value` to a numeric factor. `page` is the reference page's
/// geometry at scale 1 under the current rotation.
pub fn resolve_scale(
    value: ScaleValue,
    container_width: f32,
    container_height: f32,
    page: PageSize,
) -> f32 {
    let policy = match value {
        ScaleValue::Numeric(scale) => return clamp_scale(scale),
        ScaleValue::Policy(policy) => policy,
    };

    if policy == ScalePolicy::PageActual {
        return 1.0;
    }
    if !(page.width > 0.0 && page.height > 0.0) {
        return 1.0;
    }

    let width_ratio = (container_width - CONTAINER_PADDING) / page.width;
    let height_ratio = (container_height - CONTAINER_PADDING) / page.height;
    let resolved = match policy {
        ScalePolicy::PageWidth => width_ratio,
        ScalePolicy::PageFit => width_ratio.min(height_ratio),
        ScalePolicy::Auto => width_ratio.min(AUTO_MAX_SCALE),
        ScalePolicy::PageActual => 1.0,
    };
    clamp_scale(resolved)
}

pub fn zoom_in(scale: f32) -> f32 {
    clamp_scale(scale + ZOOM_STEP)
}

pub fn zoom_out(scale: f32) -> f32 {
    clamp_scale(scale - ZOOM_STEP)
}

/// Clockwise page rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// Relative rotation; `delta` must be a multiple of 90 (normally ±90).
    pub fn rotate(self, delta: i32) -> Result<Rotation> {
        if delta % 90 != 0 {
            return Err(ViewerError::InvalidRotation(delta));
        }
        let next = (self.degrees() + delta % 360 + 360) % 360;
        Rotation::try_from(next)
    }
}

impl TryFrom<i32> for Rotation {
    type Error = ViewerError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(ViewerError::InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for i32 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}
