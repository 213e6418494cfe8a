use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::projection::DisplayOptions;
use crate::schema::LogicalField;
use crate::store::UniqueKey;
use crate::storage::StorageError;

/// Optional board features. Everything is on unless the config turns it off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub filters: bool,
    pub drag_drop: bool,
    pub recurring: bool,
    pub background: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            filters: true,
            drag_drop: true,
            recurring: true,
            background: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_icons: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { show_icons: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurringConfig {
    /// Whether the store itself rejects a second occurrence of the same title, project and day.
    pub enforce_unique: bool,
    /// `HH:MM` applied to generated occurrences when none is given.
    pub default_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub features: Features,
    pub display: DisplayConfig,
    pub recurring: RecurringConfig,
}

impl BoardConfig {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn display_options(&self) -> DisplayOptions {
        DisplayOptions {
            show_icons: self.display.show_icons,
        }
    }

    pub fn default_time(&self) -> Result<Option<NaiveTime>, ValidationError> {
        self.recurring
            .default_time
            .as_deref()
            .map(parse_time_of_day)
            .transpose()
    }

    /// The uniqueness constraint to install on the store, using the default field codes.
    pub fn unique_key(&self) -> Option<UniqueKey> {
        self.recurring.enforce_unique.then(|| UniqueKey {
            fields: vec![
                LogicalField::TaskName.default_code().to_string(),
                LogicalField::ProjectId.default_code().to_string(),
            ],
            day_field: Some(LogicalField::StartDate.default_code().to_string()),
        })
    }
}

pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ValidationError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ValidationError::InvalidTime(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::BoardConfig;

    #[test]
    fn partial_files_keep_defaults() {
        let config: BoardConfig = toml::from_str(
            r#"
            [features]
            drag_drop = false

            [recurring]
            enforce_unique = true
            default_time = "09:30"
            "#,
        )
        .expect("config");

        assert!(config.features.filters);
        assert!(!config.features.drag_drop);
        assert!(config.display.show_icons);
        assert_eq!(config.default_time(), Ok(NaiveTime::from_hms_opt(9, 30, 0)));
        let key = config.unique_key().expect("unique key");
        assert_eq!(key.fields, vec!["task_name", "project_id"]);
    }

    #[test]
    fn missing_file_means_defaults() {
        let mut path = std::env::temp_dir();
        path.push(format!("taskboard_missing_config_{}.toml", std::process::id()));
        let config = BoardConfig::load(&path).expect("defaults");
        assert_eq!(config, BoardConfig::default());
        assert!(config.unique_key().is_none());
    }
}
