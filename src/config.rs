use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::emotion::{Thresholds, UnknownPolicy, DEFAULT_THRESHOLD};
use crate::frame::Rotation;
use crate::ingest::{SourceConfig, MIN_OUTSTANDING};
use crate::pipeline::{PipelineSettings, DEFAULT_DETECTION_INTERVAL};

const DEFAULT_BACKEND: &str = "synthetic";
const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_ROTATION: Rotation = Rotation::Deg270;
const DEFAULT_MAX_OUTSTANDING: u64 = 4;
const DEFAULT_VIEW_WIDTH: i32 = 1080;
const DEFAULT_VIEW_HEIGHT: i32 = 1920;

#[derive(Debug, Deserialize, Default)]
struct SentimoConfigFile {
    detection: Option<DetectionConfigFile>,
    source: Option<SourceConfigFile>,
    view: Option<ViewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    interval_ms: Option<u64>,
    smile_threshold: Option<f32>,
    eye_open_threshold: Option<f32>,
    unknown_policy: Option<UnknownPolicy>,
    backend: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    rotation_degrees: Option<u32>,
    front_facing: Option<bool>,
    permission_granted: Option<bool>,
    unavailable_ratio: Option<f32>,
    max_outstanding: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewConfigFile {
    width: Option<i32>,
    height: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub detection: DetectionSettings,
    pub source: SourceConfig,
    pub view: ViewSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub interval: Duration,
    pub thresholds: Thresholds,
    pub unknown_policy: UnknownPolicy,
    /// Registered face detector backend name.
    pub backend: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSettings {
    pub width: i32,
    pub height: i32,
}

impl PipelineConfig {
    /// Defaults, then the file named by `SENTIMO_CONFIG`, then `SENTIMO_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTIMO_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentimoConfigFile) -> Result<Self> {
        let detection = file.detection.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        let view = file.view.unwrap_or_default();

        let rotation = match source.rotation_degrees {
            Some(degrees) => Rotation::try_from(degrees)
                .map_err(|e| anyhow!("invalid source.rotation_degrees: {}", e))?,
            None => DEFAULT_ROTATION,
        };

        Ok(Self {
            detection: DetectionSettings {
                interval: detection
                    .interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_DETECTION_INTERVAL),
                thresholds: Thresholds {
                    smile: detection.smile_threshold.unwrap_or(DEFAULT_THRESHOLD),
                    eye_open: detection.eye_open_threshold.unwrap_or(DEFAULT_THRESHOLD),
                },
                unknown_policy: detection.unknown_policy.unwrap_or_default(),
                backend: detection
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            },
            source: SourceConfig {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                rotation,
                front_facing: source.front_facing.unwrap_or(true),
                permission_granted: source.permission_granted.unwrap_or(true),
                unavailable_ratio: source.unavailable_ratio.unwrap_or(0.0),
                max_outstanding: source.max_outstanding.unwrap_or(DEFAULT_MAX_OUTSTANDING),
            },
            view: ViewSettings {
                width: view.width.unwrap_or(DEFAULT_VIEW_WIDTH),
                height: view.height.unwrap_or(DEFAULT_VIEW_HEIGHT),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(interval) = std::env::var("SENTIMO_DETECTION_INTERVAL_MS") {
            let ms: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("SENTIMO_DETECTION_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.detection.interval = Duration::from_millis(ms);
        }
        if let Ok(value) = std::env::var("SENTIMO_SMILE_THRESHOLD") {
            self.detection.thresholds.smile = parse_threshold("SENTIMO_SMILE_THRESHOLD", &value)?;
        }
        if let Ok(value) = std::env::var("SENTIMO_EYE_OPEN_THRESHOLD") {
            self.detection.thresholds.eye_open =
                parse_threshold("SENTIMO_EYE_OPEN_THRESHOLD", &value)?;
        }
        if let Ok(policy) = std::env::var("SENTIMO_UNKNOWN_POLICY") {
            if !policy.trim().is_empty() {
                self.detection.unknown_policy = policy
                    .parse()
                    .map_err(|e| anyhow!("SENTIMO_UNKNOWN_POLICY: {}", e))?;
            }
        }
        if let Ok(backend) = std::env::var("SENTIMO_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detection.backend = backend.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("SENTIMO_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(front) = std::env::var("SENTIMO_FRONT_FACING") {
            self.source.front_facing = parse_bool("SENTIMO_FRONT_FACING", &front)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.detection
            .thresholds
            .validate()
            .map_err(|e| anyhow!("invalid detection thresholds: {}", e))?;
        if self.detection.backend.trim().is_empty() {
            return Err(anyhow!("detection.backend must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be at least 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source extent {}x{} must be non-zero",
                self.source.width,
                self.source.height
            ));
        }
        if !(0.0..=1.0).contains(&self.source.unavailable_ratio) {
            return Err(anyhow!("source.unavailable_ratio must be within [0, 1]"));
        }
        if self.source.max_outstanding < MIN_OUTSTANDING {
            return Err(anyhow!(
                "source.max_outstanding must be at least {}",
                MIN_OUTSTANDING
            ));
        }
        if self.view.width <= 0 || self.view.height <= 0 {
            return Err(anyhow!(
                "view extent {}x{} must be positive",
                self.view.width,
                self.view.height
            ));
        }
        Ok(())
    }

    /// Worker settings derived from this configuration.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            detection_interval: self.detection.interval,
            thresholds: self.detection.thresholds,
            unknown_policy: self.detection.unknown_policy,
            front_facing: self.source.front_facing,
            view_width: self.view.width,
            view_height: self.view.height,
        }
    }
}

fn read_config_file(path: &Path) -> Result<SentimoConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_threshold(name: &str, value: &str) -> Result<f32> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a number in [0, 1]", name))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be true or false", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> PipelineConfig {
        PipelineConfig::from_file(SentimoConfigFile::default()).unwrap()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = defaults();
        assert_eq!(cfg.source, SourceConfig::default());
        assert_eq!(cfg.detection.interval, Duration::from_millis(1000));
        assert_eq!(cfg.detection.thresholds, Thresholds::default());
        assert_eq!(cfg.source.rotation, Rotation::Deg270);
        assert!(cfg.source.front_facing);
        assert_eq!((cfg.view.width, cfg.view.height), (1080, 1920));
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_bad_rotation_and_bad_ranges() {
        let file = SentimoConfigFile {
            source: Some(SourceConfigFile {
                rotation_degrees: Some(45),
                ..SourceConfigFile::default()
            }),
            ..SentimoConfigFile::default()
        };
        assert!(PipelineConfig::from_file(file).is_err());

        let mut cfg = defaults();
        cfg.detection.thresholds.smile = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.view.width = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.source.target_fps = 0;
        assert!(cfg.validate().is_err());

        // One frame in detection and one pending would starve the source.
        let mut cfg = defaults();
        cfg.source.max_outstanding = 2;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_outstanding"));
        cfg.source.max_outstanding = 3;
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_bools_loosely() {
        assert!(parse_bool("X", "Yes").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
