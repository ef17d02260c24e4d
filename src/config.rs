use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::aspect_sets::{AspectSet, AspectSetRegistry};
use crate::chart::{AspectSetId, ChartDefaults, GeoPoint, HouseSystemId, ZodiacId};
use crate::engine::EngineConfig;
use crate::session::{ChartSelectors, SessionConfig};

pub const CONFIG_ENV_VAR: &str = "ZODIAC_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub records_dir: PathBuf,
    pub ask_to_save: bool,
    /// `[longitude, latitude, elevation]`.
    pub default_location: [f64; 3],
    pub default_location_name: String,
    pub zodiac: ZodiacId,
    pub house_system: HouseSystemId,
    pub aspect_set: AspectSetId,
    pub aspect_sets: Vec<AspectSet>,
    pub engine: Option<EngineConfig>,
    pub capture_period_ms: u64,
    pub capture_background: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            records_dir: PathBuf::from("user"),
            ask_to_save: false,
            default_location: [37.6184, 55.7512, 0.0],
            default_location_name: "Moscow, Russia".to_owned(),
            zodiac: 0,
            house_system: 0,
            aspect_set: 1,
            aspect_sets: AspectSetRegistry::default().sets().to_vec(),
            engine: None,
            capture_period_ms: 1000,
            capture_background: "#ff0000".to_owned(),
        }
    }
}

impl AppConfig {
    /// Loads the YAML file at `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::from_yaml(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;

        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.resolve_relative_paths(&base);
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!("failed to parse yaml at {}: {}", location, error)
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.aspect_sets.is_empty() {
            bail!("aspect_sets must list at least one set");
        }
        for (index, set) in self.aspect_sets.iter().enumerate() {
            if self.aspect_sets[..index].iter().any(|other| other.id == set.id) {
                bail!("aspect set id {} is listed twice", set.id);
            }
        }
        parse_hex_color(&self.capture_background)?;
        Ok(())
    }

    /// Fixture paths are relative to the config file, like the records dir.
    fn resolve_relative_paths(&mut self, base: &Path) {
        if self.records_dir.is_relative() {
            self.records_dir = base.join(&self.records_dir);
        }
        if let Some(EngineConfig::Fixture { path }) = &mut self.engine {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn chart_defaults(&self) -> ChartDefaults {
        let [longitude, latitude, elevation] = self.default_location;
        ChartDefaults {
            location: GeoPoint::new(longitude, latitude, elevation),
            location_name: self.default_location_name.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ask_to_save: self.ask_to_save,
            defaults: self.chart_defaults(),
            selectors: ChartSelectors {
                zodiac: self.zodiac,
                house_system: self.house_system,
                aspect_set: self.aspect_set,
            },
            aspect_sets: AspectSetRegistry::new(self.aspect_sets.clone()),
        }
    }

    pub fn capture_period(&self) -> Duration {
        Duration::from_millis(self.capture_period_ms)
    }

    pub fn capture_background_rgb(&self) -> Result<[u8; 3]> {
        parse_hex_color(&self.capture_background)
    }
}

/// Parses `#rrggbb`.
pub fn parse_hex_color(raw: &str) -> Result<[u8; 3]> {
    let digits = raw
        .strip_prefix('#')
        .filter(|digits| digits.len() == 6 && digits.is_ascii())
        .ok_or_else(|| anyhow!("color must look like #rrggbb, got '{raw}'"))?;

    let mut rgb = [0_u8; 3];
    for (channel, value) in rgb.iter_mut().enumerate() {
        let pair = &digits[channel * 2..channel * 2 + 2];
        *value = u8::from_str_radix(pair, 16)
            .with_context(|| format!("invalid color channel '{pair}' in '{raw}'"))?;
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::{parse_hex_color, AppConfig};
    use crate::engine::EngineConfig;

    #[test]
    fn absent_path_yields_defaults() {
        let config = AppConfig::load(None).expect("defaults should load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.records_dir, PathBuf::from("user"));
        assert_eq!(config.capture_period().as_millis(), 1000);

        let session = config.session_config();
        assert_eq!(session.selectors.aspect_set, 1);
        assert!(session.aspect_sets.contains(4));
        assert_eq!(session.defaults.location_name, "Moscow, Russia");
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config = AppConfig::from_yaml("ask_to_save: true\naspect_set: 2\n").expect("parse");
        assert!(config.ask_to_save);
        assert_eq!(config.aspect_set, 2);
        assert_eq!(config.default_location, [37.6184, 55.7512, 0.0]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = AppConfig::from_yaml("records: user\n").expect_err("unknown key");
        assert!(error.to_string().contains("line 1"), "{error}");
    }

    #[test]
    fn duplicate_aspect_set_ids_are_rejected() {
        let yaml = "aspect_sets:\n  - {id: 1, name: A}\n  - {id: 1, name: B}\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn relative_paths_resolve_against_config_file() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("zodiac.yaml");
        std::fs::write(
            &path,
            "records_dir: charts\nengine:\n  kind: fixture\n  path: transcript.txt\n",
        )
        .expect("write config");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.records_dir, dir.path().join("charts"));
        assert_eq!(
            config.engine,
            Some(EngineConfig::Fixture {
                path: dir.path().join("transcript.txt"),
            })
        );
    }

    #[test]
    fn hex_colors_parse_strictly() {
        assert_eq!(parse_hex_color("#ff0000").expect("red"), [255, 0, 0]);
        assert_eq!(parse_hex_color("#0A1b2C").expect("mixed case"), [10, 27, 44]);
        for bad in ["ff0000", "#fff", "#gg0000", "#ff00000"] {
            assert!(parse_hex_color(bad).is_err(), "{bad}");
        }
    }
}
