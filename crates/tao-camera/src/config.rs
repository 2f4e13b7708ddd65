//! Producer-side configuration: ring depth, default acquisition geometry,
//! and shared-segment permissions, loaded from a TOML file merged with
//! environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tao_geometry::{PixelEncoding, Roi};

/// Errors raised while loading or validating producer configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("configuration validation error: {0}")]
    Validation(String),
}

/// Top-level producer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub ring: RingConfig,
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub segment: SegmentConfig,
}

/// The frame ring's static sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    4
}

/// The default acquisition geometry a producer opens with before any
/// `set_configuration` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub sensor_width: i64,
    pub sensor_height: i64,
    pub xoff: i64,
    pub yoff: i64,
    pub width: i64,
    pub height: i64,
    #[serde(default = "default_bin")]
    pub xbin: i64,
    #[serde(default = "default_bin")]
    pub ybin: i64,
    #[serde(default = "default_framerate")]
    pub framerate: f64,
    #[serde(default = "default_exposure")]
    pub exposure_time: f64,
    /// One of the `PixelEncoding` variant names, e.g. `"Mono16"`.
    pub pixel_encoding: String,
}

fn default_bin() -> i64 {
    1
}

fn default_framerate() -> f64 {
    30.0
}

fn default_exposure() -> f64 {
    0.01
}

impl GeometryConfig {
    fn roi(&self) -> Roi {
        Roi {
            xoff: self.xoff,
            yoff: self.yoff,
            width: self.width,
            height: self.height,
            xbin: self.xbin,
            ybin: self.ybin,
        }
    }

    fn parsed_encoding(&self) -> Option<PixelEncoding> {
        parse_pixel_encoding(&self.pixel_encoding)
    }
}

fn parse_pixel_encoding(name: &str) -> Option<PixelEncoding> {
    match name {
        "Mono8" => Some(PixelEncoding::Mono8),
        "Mono12" => Some(PixelEncoding::Mono12),
        "Mono12Packed" => Some(PixelEncoding::Mono12Packed),
        "Mono12Coded" => Some(PixelEncoding::Mono12Coded),
        "Mono12CodedPacked" => Some(PixelEncoding::Mono12CodedPacked),
        "Mono16" => Some(PixelEncoding::Mono16),
        "Mono22Parallel" => Some(PixelEncoding::Mono22Parallel),
        "Mono22PackedParallel" => Some(PixelEncoding::Mono22PackedParallel),
        "Mono32" => Some(PixelEncoding::Mono32),
        "RGB8Packed" => Some(PixelEncoding::RGB8Packed),
        "Float32" => Some(PixelEncoding::Float32),
        "Float64" => Some(PixelEncoding::Float64),
        _ => None,
    }
}

/// Permission bits and slot count for shared segments this producer creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    #[serde(default = "default_perm")]
    pub perm: u32,
}

fn default_perm() -> u32 {
    0o600
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig { perm: default_perm() }
    }
}

impl ProducerConfig {
    /// Load from `path`, merged with `TAO_`-prefixed environment overrides,
    /// then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<ProducerConfig, ConfigError> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        let config: ProducerConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TAO_").split("_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency: ring depth is usable, geometry fits the
    /// sensor, and the configured pixel encoding name is recognized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring.depth < 2 {
            return Err(ConfigError::Validation(format!(
                "ring.depth must be at least 2, got {}",
                self.ring.depth
            )));
        }
        let Some(encoding) = self.geometry.parsed_encoding() else {
            return Err(ConfigError::Validation(format!(
                "unrecognized pixel_encoding '{}'",
                self.geometry.pixel_encoding
            )));
        };
        let _ = encoding;
        tao_geometry::validate_roi(&self.geometry.roi(), self.geometry.sensor_width, self.geometry.sensor_height)
            .map_err(|e| ConfigError::Validation(format!("default geometry rejected: {e}")))?;
        if self.geometry.framerate.is_nan() || self.geometry.framerate <= 0.0 {
            return Err(ConfigError::Validation("geometry.framerate must be positive".to_string()));
        }
        if self.geometry.exposure_time.is_nan() || self.geometry.exposure_time < 0.0 {
            return Err(ConfigError::Validation("geometry.exposure_time must be non-negative".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn pixel_encoding(&self) -> PixelEncoding {
        self.geometry.parsed_encoding().unwrap_or(PixelEncoding::Unknown)
    }

    #[must_use]
    pub fn roi(&self) -> Roi {
        self.geometry.roi()
    }

    #[must_use]
    pub fn perm(&self) -> tao_shm::Perm {
        tao_shm::Perm(self.segment.perm)
    }
}
