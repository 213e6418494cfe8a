use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

const DEFAULT_OPACITY: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackgroundSide {
    Left,
    Right,
}

/// Decorative images shown beside the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    pub left_image: Option<String>,
    pub right_image: Option<String>,
    /// Percent, 0..=100.
    pub opacity: u8,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            left_image: None,
            right_image: None,
            opacity: DEFAULT_OPACITY,
        }
    }
}

/// Per-user UI preferences. Never part of the task data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Free-text memo per `YYYY-MM-DD`.
    memos: BTreeMap<String, String>,
    pub background: BackgroundSettings,
}

impl Preferences {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn memo(&self, day: NaiveDate) -> Option<&str> {
        self.memos.get(&memo_key(day)).map(String::as_str)
    }

    /// Blank text removes the memo.
    pub fn set_memo(&mut self, day: NaiveDate, text: &str) {
        let text = text.trim_end();
        if text.trim().is_empty() {
            self.memos.remove(&memo_key(day));
        } else {
            self.memos.insert(memo_key(day), text.to_string());
        }
    }

    pub fn set_background_image(&mut self, side: BackgroundSide, image: Option<String>) {
        let image = image.filter(|image| !image.trim().is_empty());
        match side {
            BackgroundSide::Left => self.background.left_image = image,
            BackgroundSide::Right => self.background.right_image = image,
        }
    }

    pub fn set_opacity(&mut self, percent: u8) {
        self.background.opacity = percent.min(100);
    }
}

fn memo_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
