//! Configuration file handling

use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for sqlvein
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Data platform identifier (postgres, mysql, hive, ...)
    #[serde(default)]
    pub platform: Option<String>,

    /// Default database for unqualified table names
    #[serde(default)]
    pub database: Option<String>,

    /// Default schema for unqualified table names
    #[serde(default)]
    pub schema: Option<String>,

    /// Query file patterns to analyze
    #[serde(default)]
    pub files: Vec<String>,

    /// Output format (human, json, json-lines)
    #[serde(default)]
    pub format: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).into_diagnostic()?;
        let config: Config = toml::from_str(&contents).into_diagnostic()?;
        Ok(config)
    }

    /// Try to find and load sqlvein.toml in current directory or parent directories
    pub fn find_and_load() -> Result<Option<Self>> {
        let mut current_dir = std::env::current_dir().into_diagnostic()?;

        loop {
            let config_path = current_dir.join("sqlvein.toml");
            if config_path.exists() {
                return Ok(Some(Self::from_file(&config_path)?));
            }

            // Try parent directory
            if !current_dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Merge CLI arguments into configuration.
    /// CLI arguments take precedence over config file values.
    pub fn merge_with_args(
        mut self,
        platform: &str,
        database: &Option<String>,
        schema: &Option<String>,
        files: &[PathBuf],
    ) -> Self {
        // A platform given on the command line always wins; the clap default
        // only applies when the config file has no platform either.
        if self.platform.is_none() || platform != "postgres" {
            self.platform = Some(platform.to_string());
        }

        if database.is_some() {
            self.database = database.clone();
        }

        if schema.is_some() {
            self.schema = schema.clone();
        }

        if !files.is_empty() {
            self.files = files.iter().map(|p| p.display().to_string()).collect();
        }

        self
    }
}
