use crate::domain::models::{ClimbPlacements, DeviceId};
use crate::infrastructure::bluetooth::protocol::{self, WireFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "climb_board_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Board BLE Settings
    #[serde(default = "default_advertising_uuid")]
    pub ble_advertising_service_uuid: String,
    #[serde(default = "default_data_service_uuid")]
    pub ble_data_service_uuid: String,
    #[serde(default = "default_data_char_uuid")]
    pub ble_data_char_uuid: String,
    #[serde(default = "default_wire_format")]
    pub wire_format: WireFormat,

    // Timing
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,

    // Restored on next start
    #[serde(default)]
    pub last_connected_device: Option<DeviceId>,
    #[serde(default)]
    pub climb_in_progress: ClimbPlacements,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            ble_advertising_service_uuid: default_advertising_uuid(),
            ble_data_service_uuid: default_data_service_uuid(),
            ble_data_char_uuid: default_data_char_uuid(),
            wire_format: default_wire_format(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            scan_duration_ms: default_scan_duration_ms(),
            last_connected_device: None,
            climb_in_progress: ClimbPlacements::default(),
        }
    }
}

fn default_advertising_uuid() -> String {
    protocol::ADVERTISING_SERVICE_UUID.to_string()
}
fn default_data_service_uuid() -> String {
    protocol::DATA_SERVICE_UUID.to_string()
}
fn default_data_char_uuid() -> String {
    protocol::DATA_CHAR_UUID.to_string()
}
fn default_wire_format() -> WireFormat {
    WireFormat::Rgb332
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_operation_timeout_ms() -> u64 {
    5_000
}
fn default_scan_duration_ms() -> u64 {
    5_000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
    load_error: Option<String>,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults.
    ///
    /// A missing file is normal. A file that exists but cannot be read is
    /// kept in [`SettingsService::load_error`] so it can be reported once
    /// logging is up.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let (settings, load_error) = match Self::load_from_file(&settings_path) {
            Ok(settings) => (settings, None),
            Err(e) if settings_path.exists() => (Settings::default(), Some(format!("{:#}", e))),
            Err(_) => (Settings::default(), None),
        };

        Self {
            settings,
            settings_path,
            load_error,
        }
    }

    /// Why an existing settings file was ignored, if it was
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ClimbBoardLink");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn set_last_connected_device(&mut self, device: Option<DeviceId>) -> anyhow::Result<()> {
        if self.settings.last_connected_device != device {
            self.settings.last_connected_device = device;
            self.save()?;
        }
        Ok(())
    }

    pub fn set_climb_in_progress(&mut self, placements: ClimbPlacements) -> anyhow::Result<()> {
        self.settings.climb_in_progress = placements;
        self.save()
    }
}
