#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runtime settings for the heatmap server.
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! named by `HEATMAP_CONFIG`, then individual environment variables.
//! Every field of the TOML file is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use heatmap_aggregate::AggregateSource;
use heatmap_aggregate::binner::{DEFAULT_CHUNK_SIZE, PointColumns};
use heatmap_aggregate_models::BoundingBox;
use heatmap_forecast::ForecastConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the TOML settings file.
pub const CONFIG_PATH_ENV: &str = "HEATMAP_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Map center reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CityCenter {
    pub lat: f64,
    pub lng: f64,
}

impl Default for CityCenter {
    fn default() -> Self {
        Self {
            lat: 51.169,
            lng: 71.449,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Raw point CSV, binned at startup when no precomputed file is set.
    pub data_csv: PathBuf,
    /// Precomputed aggregate CSV; takes precedence over `data_csv`.
    pub precomputed_agg: Option<PathBuf>,
    /// Directory holding optional enrichment artifacts.
    pub artifacts_dir: Option<PathBuf>,
    pub supported_resolutions: Vec<u8>,
    pub default_resolution: u8,
    /// k-anonymity threshold.
    pub suppress_k: u64,
    /// `minLat,minLng,maxLat,maxLng` filter applied while binning.
    pub bbox: Option<String>,
    pub forecast_decay_per_hour: f64,
    pub forecast_max_minutes: u32,
    pub forecast_cache_capacity: u64,
    pub forecast_cache_ttl_secs: u64,
    /// Rows per chunk when streaming the raw CSV.
    pub chunk_size: usize,
    pub city_center: CityCenter,
    pub bind_addr: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_csv: PathBuf::from("./data/tracks.csv"),
            precomputed_agg: None,
            artifacts_dir: Some(PathBuf::from("./outputs")),
            supported_resolutions: vec![7, 8, 9],
            default_resolution: 8,
            suppress_k: 20,
            bbox: None,
            forecast_decay_per_hour: 0.15,
            forecast_max_minutes: 180,
            forecast_cache_capacity: 256,
            forecast_cache_ttl_secs: 120,
            chunk_size: DEFAULT_CHUNK_SIZE,
            city_center: CityCenter::default(),
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Settings {
    /// Loads settings from `HEATMAP_CONFIG` (if set) and the process
    /// environment, then validates them.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, an
    /// environment value is malformed, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                log::info!("Loading settings from {path}");
                Self::from_file(Path::new(&path))?
            }
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses a TOML settings file; absent keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Toml`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] on malformed input.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// An empty `PRECOMPUTED_AGG`, `ARTIFACTS_DIR` or `HEATMAP_BBOX` clears
    /// the setting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable does not parse.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parsed<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(format!("{key}='{value}' is not valid")))
        }
        fn optional(value: String) -> Option<String> {
            Some(value).filter(|v| !v.trim().is_empty())
        }

        if let Some(v) = lookup("DATA_CSV") {
            self.data_csv = PathBuf::from(v);
        }
        if let Some(v) = lookup("PRECOMPUTED_AGG") {
            self.precomputed_agg = optional(v).map(PathBuf::from);
        }
        if let Some(v) = lookup("ARTIFACTS_DIR") {
            self.artifacts_dir = optional(v).map(PathBuf::from);
        }
        if let Some(v) = lookup("DEFAULT_H3_RES") {
            self.default_resolution = parsed("DEFAULT_H3_RES", &v)?;
        }
        if let Some(v) = lookup("SUPPRESS_K") {
            self.suppress_k = parsed("SUPPRESS_K", &v)?;
        }
        if let Some(v) = lookup("HEATMAP_BBOX") {
            self.bbox = optional(v);
        }
        if let Some(v) = lookup("FORECAST_DECAY_PER_HOUR") {
            self.forecast_decay_per_hour = parsed("FORECAST_DECAY_PER_HOUR", &v)?;
        }
        if let Some(v) = lookup("FORECAST_MAX_MINUTES") {
            self.forecast_max_minutes = parsed("FORECAST_MAX_MINUTES", &v)?;
        }
        if let Some(v) = lookup("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parsed("PORT", &v)?;
        }
        Ok(())
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supported_resolutions.is_empty() {
            return Err(ConfigError::invalid("supported_resolutions is empty"));
        }
        if let Some(r) = self.supported_resolutions.iter().find(|r| **r > 15) {
            return Err(ConfigError::invalid(format!(
                "resolution {r} is outside 0-15"
            )));
        }
        if !self.supported_resolutions.contains(&self.default_resolution) {
            return Err(ConfigError::invalid(format!(
                "default_resolution {} is not in supported_resolutions {:?}",
                self.default_resolution, self.supported_resolutions
            )));
        }
        if self.suppress_k < 1 {
            return Err(ConfigError::invalid("suppress_k must be at least 1"));
        }
        if !self.forecast_decay_per_hour.is_finite() || self.forecast_decay_per_hour < 0.0 {
            return Err(ConfigError::invalid(
                "forecast_decay_per_hour must be a non-negative number",
            ));
        }
        if self.forecast_max_minutes < 1 {
            return Err(ConfigError::invalid("forecast_max_minutes must be at least 1"));
        }
        self.bounding_box()?;
        Ok(())
    }

    /// The parsed `bbox`, if one is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is malformed or inverted.
    pub fn bounding_box(&self) -> Result<Option<BoundingBox>, ConfigError> {
        self.bbox
            .as_deref()
            .map(|s| {
                s.parse::<BoundingBox>()
                    .map_err(|e| ConfigError::invalid(e.to_string()))
            })
            .transpose()
    }

    /// Where the aggregate store loads from: the precomputed file when set,
    /// otherwise the raw CSV at every supported resolution.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bbox` is malformed.
    pub fn aggregate_source(&self) -> Result<AggregateSource, ConfigError> {
        if let Some(path) = &self.precomputed_agg {
            return Ok(AggregateSource::Precomputed { path: path.clone() });
        }
        Ok(AggregateSource::RawCsv {
            path: self.data_csv.clone(),
            resolutions: self.supported_resolutions.clone(),
            bbox: self.bounding_box()?,
            chunk_size: self.chunk_size,
            columns: PointColumns::default(),
        })
    }

    #[must_use]
    pub fn forecast_config(&self) -> ForecastConfig {
        ForecastConfig {
            decay_per_hour: self.forecast_decay_per_hour,
            max_minutes: self.forecast_max_minutes,
            suppress_k: self.suppress_k,
            cache_capacity: self.forecast_cache_capacity,
            cache_ttl: Duration::from_secs(self.forecast_cache_ttl_secs),
        }
    }

    /// `requested` if it is supported, else the default resolution.
    #[must_use]
    pub fn resolve_resolution(&self, requested: Option<u8>) -> u8 {
        requested
            .filter(|r| self.supported_resolutions.contains(r))
            .unwrap_or(self.default_resolution)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.default_resolution, 8);
        assert_eq!(settings.suppress_k, 20);
        assert_eq!(settings.chunk_size, 200_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            suppress_k = 5
            supported_resolutions = [8, 9]
            precomputed_agg = "data/agg.csv"

            [city_center]
            lat = 43.2
            lng = 76.9
            "#,
        )
        .unwrap();
        assert_eq!(settings.suppress_k, 5);
        assert_eq!(settings.default_resolution, 8);
        assert!((settings.city_center.lat - 43.2).abs() < f64::EPSILON);
        assert!((settings.forecast_decay_per_hour - 0.15).abs() < f64::EPSILON);
        assert!(matches!(
            settings.aggregate_source().unwrap(),
            AggregateSource::Precomputed { .. }
        ));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let path = std::env::temp_dir().join(format!("heatmap_{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(Settings::from_file(&path), Err(ConfigError::Io { .. })));

        std::fs::write(&path, "port = 9000\n").unwrap();
        assert_eq!(Settings::from_file(&path).unwrap().port, 9000);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut settings = Settings::from_toml("suppress_k = 5\nport = 9000\n").unwrap();
        settings
            .apply_env(env(&[
                ("SUPPRESS_K", "12"),
                ("DEFAULT_H3_RES", "9"),
                ("HEATMAP_BBOX", "51.0,71.2,51.3,71.7"),
                ("ARTIFACTS_DIR", ""),
            ]))
            .unwrap();
        assert_eq!(settings.suppress_k, 12);
        assert_eq!(settings.default_resolution, 9);
        assert_eq!(settings.port, 9000);
        assert!(settings.artifacts_dir.is_none());
        assert!(settings.bounding_box().unwrap().is_some());
    }

    #[test]
    fn malformed_environment_value_is_rejected() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.apply_env(env(&[("PORT", "eighty")])),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn default_resolution_must_be_supported() {
        let settings = Settings {
            default_resolution: 10,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_bad_values() {
        for settings in [
            Settings {
                suppress_k: 0,
                ..Settings::default()
            },
            Settings {
                forecast_decay_per_hour: -0.1,
                ..Settings::default()
            },
            Settings {
                forecast_max_minutes: 0,
                ..Settings::default()
            },
            Settings {
                supported_resolutions: vec![8, 16],
                ..Settings::default()
            },
            Settings {
                bbox: Some("51.3,71.2,51.0,71.7".to_string()),
                ..Settings::default()
            },
        ] {
            assert!(settings.validate().is_err(), "{settings:?}");
        }
    }

    #[test]
    fn raw_source_carries_bbox_and_resolutions() {
        let settings = Settings {
            bbox: Some("51.0,71.2,51.3,71.7".to_string()),
            ..Settings::default()
        };
        match settings.aggregate_source().unwrap() {
            AggregateSource::RawCsv {
                resolutions, bbox, ..
            } => {
                assert_eq!(resolutions, vec![7, 8, 9]);
                assert!(bbox.unwrap().contains(51.1, 71.4));
            }
            AggregateSource::Precomputed { .. } => panic!("expected raw source"),
        }
    }

    #[test]
    fn unsupported_resolution_falls_back_to_default() {
        let settings = Settings::default();
        assert_eq!(settings.resolve_resolution(Some(9)), 9);
        assert_eq!(settings.resolve_resolution(Some(12)), 8);
        assert_eq!(settings.resolve_resolution(None), 8);
    }
}
