// User settings

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

pub const MAX_MINOR_UNIT_DIGITS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Calendar
    #[serde(rename = "calendar.fiscalYearStartMonth")]
    pub fiscal_year_start_month: u32,

    // Amounts
    #[serde(rename = "amount.minorUnitDigits")]
    pub minor_unit_digits: u32,

    // Recalc
    #[serde(rename = "recalc.logChanges")]
    pub log_changes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // April
            fiscal_year_start_month: 4,
            // Whole currency units
            minor_unit_digits: 0,
            log_changes: false,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"{
    // Calendar month the fiscal year starts in (1 = January, 4 = April)
    "calendar.fiscalYearStartMonth": 4,

    // Decimal places kept for amounts (0 = whole units, 2 = cents; max 6)
    "amount.minorUnitDigits": 0,

    // Log every changed cell after each edit
    "recalc.logChanges": false
}
"#;

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fpgrid");
        config_dir.join("settings.json")
    }

    /// Load settings from the user config dir, creating it with defaults
    /// when missing.
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            let settings = Self::default();
            settings.create_default_file(&path);
            return settings;
        }
        Self::load_from(&path)
    }

    /// Load settings from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Error parsing {}: {}; using default settings", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Error reading {}: {}; using default settings", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings JSON. Lines starting with `//` are comments.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        let settings: Self = serde_json::from_str(&cleaned)?;
        Ok(settings.clamped())
    }

    /// Replace out-of-range values with their defaults.
    pub fn clamped(mut self) -> Self {
        let defaults = Self::default();
        if !(1..=12).contains(&self.fiscal_year_start_month) {
            warn!(
                "calendar.fiscalYearStartMonth {} out of range 1..=12; using {}",
                self.fiscal_year_start_month, defaults.fiscal_year_start_month
            );
            self.fiscal_year_start_month = defaults.fiscal_year_start_month;
        }
        if self.minor_unit_digits > MAX_MINOR_UNIT_DIGITS {
            warn!(
                "amount.minorUnitDigits {} exceeds {}; using {}",
                self.minor_unit_digits, MAX_MINOR_UNIT_DIGITS, MAX_MINOR_UNIT_DIGITS
            );
            self.minor_unit_digits = MAX_MINOR_UNIT_DIGITS;
        }
        self
    }

    /// Save settings to `path`
    pub fn save(&self, path: &Path) -> Result<(), String> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;

        fs::write(path, json).map_err(|e| e.to_string())
    }

    /// Create default settings file with comments
    fn create_default_file(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Error creating config directory: {}", e);
                return;
            }
        }

        if let Err(e) = fs::write(path, DEFAULT_CONFIG) {
            warn!("Error writing default settings.json: {}", e);
        }
    }

    /// Get the config file path for display/opening
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}
