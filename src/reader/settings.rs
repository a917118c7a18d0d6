use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::LastRead;

pub const DEFAULT_SCROLL_SPEED: u32 = 2;
pub const DEFAULT_BRIGHTNESS: u32 = 100;
pub const BRIGHTNESS_RANGE: (u32, u32) = (10, 200);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub scroll_speed: u32,
    pub auto_next: bool,
    pub auto_play: bool,
    pub brightness: u32,
    pub last_read: Option<LastRead>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scroll_speed: DEFAULT_SCROLL_SPEED,
            auto_next: false,
            auto_play: false,
            brightness: DEFAULT_BRIGHTNESS,
            last_read: None,
        }
    }
}

impl Settings {
    /// Fixes values a hand-edited file may carry.
    pub fn sanitized(mut self) -> Self {
        if self.scroll_speed == 0 {
            self.scroll_speed = DEFAULT_SCROLL_SPEED;
        }
        self.brightness = self.brightness.clamp(BRIGHTNESS_RANGE.0, BRIGHTNESS_RANGE.1);
        self
    }

    pub fn set_brightness(&mut self, percent: u32) {
        self.brightness = percent.clamp(BRIGHTNESS_RANGE.0, BRIGHTNESS_RANGE.1);
    }

    pub fn set_scroll_speed(&mut self, speed: u32) {
        self.scroll_speed = speed.max(1);
    }
}

#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SettingsFile { path: path.into() }
    }

    /// `MANHUA_CONFIG` if set, else `<config dir>/manhua/settings.json`.
    pub fn locate() -> Self {
        if let Ok(p) = std::env::var("MANHUA_CONFIG") {
            if !p.trim().is_empty() {
                return SettingsFile::new(p);
            }
        }
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("manhua");
        path.push("settings.json");
        SettingsFile::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unreadable or missing files give defaults.
    pub fn load(&self) -> Settings {
        let parsed = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| match serde_json::from_str::<Settings>(&text) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("ignoring unreadable settings {}: {}", self.path.display(), e);
                    None
                }
            });
        parsed.unwrap_or_default().sanitized()
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建配置目录 {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(settings).context("序列化配置失败")?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("保存配置失败: {}", self.path.display()))?;
        Ok(())
    }
}
