//! Configuration management
//!
//! Loads the `[improvements]` table that drives scanning, analytics and
//! fix application.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::improvement::detectors::code_quality::default_pattern_rules;
use crate::improvement::detectors::PatternRule;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Self-improvement pipeline settings
    #[serde(default)]
    pub improvements: ImprovementConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementConfig {
    /// Record store location; defaults to `improvements.db` in the data dir
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Minimum hours between unforced scans
    #[serde(default = "default_scan_interval_hours")]
    pub scan_interval_hours: u64,
    /// Rejection ratio above which a category is suggested for exclusion
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: f64,
    /// Decisions needed before a category can be suggested for exclusion
    #[serde(default = "default_min_decisions")]
    pub min_decisions: u32,
    /// Upper bound on a single fix application (package installs)
    #[serde(default = "default_apply_timeout_secs")]
    pub apply_timeout_secs: u64,
    /// Program invoked as `<command> install <package>==<version>`
    #[serde(default = "default_installer_command")]
    pub installer_command: String,
    /// Requirements manifest checked by the dependency detector
    #[serde(default)]
    pub requirements_path: Option<PathBuf>,
    /// Directories walked by the code-quality detector
    #[serde(default)]
    pub source_dirs: Vec<PathBuf>,
    /// Categories left out of full scans
    #[serde(default)]
    pub excluded_categories: Vec<String>,
    /// Package name → minimum supported version
    #[serde(default)]
    pub minimum_versions: BTreeMap<String, String>,
    #[serde(default = "default_pattern_rules")]
    pub deprecated_patterns: Vec<PatternRule>,
}

fn default_scan_interval_hours() -> u64 {
    24
}

fn default_rejection_threshold() -> f64 {
    0.6
}

fn default_min_decisions() -> u32 {
    3
}

fn default_apply_timeout_secs() -> u64 {
    120
}

fn default_installer_command() -> String {
    "pip".to_string()
}

impl Default for ImprovementConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            scan_interval_hours: default_scan_interval_hours(),
            rejection_threshold: default_rejection_threshold(),
            min_decisions: default_min_decisions(),
            apply_timeout_secs: default_apply_timeout_secs(),
            installer_command: default_installer_command(),
            requirements_path: None,
            source_dirs: Vec::new(),
            excluded_categories: Vec::new(),
            minimum_versions: BTreeMap::new(),
            deprecated_patterns: default_pattern_rules(),
        }
    }
}

impl ImprovementConfig {
    /// Resolved record store path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("improvements.db")),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "home-agent", "home-agent")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "home-agent", "home-agent")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    let imp = &config.improvements;

    println!("Improvement pipeline");
    println!("  Database:            {}", imp.database_path()?.display());
    println!("  Scan interval:       {}h", imp.scan_interval_hours);
    println!("  Apply timeout:       {}s", imp.apply_timeout_secs);
    println!("  Installer:           {}", imp.installer_command);
    println!(
        "  Filter suggestions:  >{:.0}% rejected over at least {} decisions",
        imp.rejection_threshold * 100.0,
        imp.min_decisions
    );
    println!(
        "  Requirements:        {}",
        imp.requirements_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("  Source dirs:         {}", imp.source_dirs.len());
    println!("  Pinned minimums:     {}", imp.minimum_versions.len());
    println!("  Deprecated patterns: {}", imp.deprecated_patterns.len());
    if !imp.excluded_categories.is_empty() {
        println!("  Excluded:            {}", imp.excluded_categories.join(", "));
    }

    println!("\nConfig file: {}", config_path()?.display());
    Ok(())
}

/// Get default config as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
