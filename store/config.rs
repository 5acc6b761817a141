//! Run settings, loadable from a TOML file and overridable from the command line.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML settings: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize settings to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings for building a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportSettings {
    pub maf_min: f64,
    pub hwe_min: f64,
    /// How many variants' worth of simple-encoded calls a block may stage before it is flushed.
    pub block_budget_variants: usize,
    /// Explicit staging threshold in bytes; replaces the sample-derived one when set.
    pub flush_limit: Option<usize>,
    pub compression_level: u32,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            maf_min: 0.0,
            hwe_min: 0.0,
            block_budget_variants: 102,
            flush_limit: None,
            compression_level: 6,
        }
    }
}

impl ImportSettings {
    /// Staging size in bytes that triggers a flush for a cohort of `sample_count` samples
    /// encoded with `word_bytes`-byte words.
    pub fn flush_limit_for(&self, sample_count: u64, word_bytes: usize) -> usize {
        self.flush_limit
            .unwrap_or_else(|| {
                (sample_count as usize)
                    .saturating_mul(word_bytes)
                    .saturating_mul(self.block_budget_variants)
            })
            .max(1)
    }
}

/// Settings for the pairwise calculation and its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalcSettings {
    /// Worker threads; 0 means one per logical CPU.
    pub threads: usize,
    pub upper_only: bool,
    pub r2_min: f64,
    pub flush_limit: usize,
    pub compression_level: u32,
}

impl Default for CalcSettings {
    fn default() -> Self {
        Self {
            threads: 0,
            upper_only: false,
            r2_min: 0.1,
            flush_limit: 512 * 1024,
            compression_level: 6,
        }
    }
}

impl CalcSettings {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub import: ImportSettings,
    pub calc: CalcSettings,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("import.maf_min", self.import.maf_min, 0.0, 0.5)?;
        check_range("import.hwe_min", self.import.hwe_min, 0.0, 1.0)?;
        check_range("calc.r2_min", self.calc.r2_min, 0.0, 1.0)?;
        if self.import.block_budget_variants == 0 {
            return Err(ConfigError::Invalid {
                field: "import.block_budget_variants",
                reason: "must be at least 1".into(),
            });
        }
        if self.calc.flush_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "calc.flush_limit",
                reason: "must be at least 1 byte".into(),
            });
        }
        for (field, level) in [
            ("import.compression_level", self.import.compression_level),
            ("calc.compression_level", self.calc.compression_level),
        ] {
            if level > 9 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{level} is not a deflate level (0-9)"),
                });
            }
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, low: f64, high: f64) -> Result<(), ConfigError> {
    if (low..=high).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is outside [{low}, {high}]"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.import.block_budget_variants, 102);
        assert_eq!(settings.calc.flush_limit, 524_288);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let settings = Settings::from_toml_str(
            "[import]\nmaf_min = 0.05\nflush_limit = 4096\n\n[calc]\nupper_only = true\n",
        )
        .unwrap();
        assert_eq!(settings.import.maf_min, 0.05);
        assert_eq!(settings.import.flush_limit_for(1000, 2), 4096);
        assert!(settings.calc.upper_only);
        assert_eq!(settings.calc.r2_min, 0.1);
    }

    #[test]
    fn derived_flush_limit_scales_with_cohort() {
        let import = ImportSettings::default();
        assert_eq!(import.flush_limit_for(100, 1), 100 * 102);
        assert_eq!(import.flush_limit_for(1000, 2), 2000 * 102);
        assert_eq!(import.flush_limit_for(0, 1), 1);
    }

    #[test]
    fn bad_values_and_unknown_fields_are_rejected() {
        assert!(matches!(
            Settings::from_toml_str("[import]\nmaf_min = 0.7\n"),
            Err(ConfigError::Invalid { field: "import.maf_min", .. })
        ));
        assert!(matches!(
            Settings::from_toml_str("[calc]\ncompression_level = 12\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            Settings::from_toml_str("[import]\nbogus = 1\n"),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn settings_survive_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut settings = Settings::default();
        settings.calc.threads = 3;
        settings.import.flush_limit = Some(1 << 20);
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }
}
