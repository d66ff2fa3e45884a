use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::PersistError;
use crate::models::{FilterRule, ProviderSource};
use crate::persist;

/// Admin-editable runtime settings, persisted as `settings.json` in the
/// data directory. Unknown fields from older versions are dropped on
/// rewrite; missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Lowest channel number handed to newly created channels.
    pub first_channel: f64,
    /// Wall-clock refresh times as `HHmm` strings, e.g. `"0300"`.
    pub update_times: Vec<String>,
    /// Dummy-guide slot length bound to channels with no EPG when not
    /// `"-"` (minutes as string, e.g. `"60_Minutes"`).
    pub default_missing_epg: String,
    /// Backup snapshots retained before scheduled refreshes.
    pub backup_keep: usize,

    /// Working-buffer (and segment) size for the shared-stream buffer.
    pub buffer_size_kb: u64,
    /// Reader idle timeout in milliseconds.
    pub buffer_client_timeout_ms: u64,
    /// Whether the producer range-resumes after transport errors.
    pub retry_enabled: bool,
    /// Consecutive transport failures tolerated before the session fails.
    pub max_retries: u32,
    /// Delay between producer retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Keep segments in an in-memory filesystem instead of on disk.
    pub store_buffer_in_ram: bool,
    /// Directory for on-disk segment folders.
    pub temp_path: PathBuf,
    /// User agent sent on provider downloads and upstream streams.
    pub user_agent: String,
    /// Permit loopback upstream URLs (also via TVMUX_ALLOW_LOOPBACK).
    pub allow_loopback: bool,

    /// Advertised HDHomeRun device id.
    pub device_id: String,
    /// Advertised tuner count.
    pub tuner_count: u32,
    /// Require username/password query parameters on the file endpoints.
    pub auth_files: bool,

    pub providers: Vec<ProviderSource>,
    pub filters: Vec<FilterRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            first_channel: 1000.0,
            update_times: vec!["0300".to_string()],
            default_missing_epg: "-".to_string(),
            backup_keep: 10,
            buffer_size_kb: 1024,
            buffer_client_timeout_ms: 500,
            retry_enabled: true,
            max_retries: 3,
            retry_delay_ms: 500,
            store_buffer_in_ram: false,
            temp_path: std::env::temp_dir().join("tvmux"),
            user_agent: format!("tvmux/{}", env!("CARGO_PKG_VERSION")),
            allow_loopback: false,
            device_id: "12345678".to_string(),
            tuner_count: 1,
            auth_files: false,
            providers: Vec::new(),
            filters: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from the data directory, creating the file with
    /// defaults when absent, then apply environment overrides.
    pub fn load(paths: &DataPaths) -> Result<Self, PersistError> {
        let file = paths.settings_file();
        let mut settings: Settings = if file.exists() {
            persist::read_json(&file)?
        } else {
            let defaults = Settings::default();
            persist::write_json_atomic(&file, &defaults)?;
            defaults
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Persist the current settings atomically.
    pub fn save(&self, paths: &DataPaths) -> Result<(), PersistError> {
        persist::write_json_atomic(&paths.settings_file(), self)
    }

    /// Environment overrides, applied after every load.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("TVMUX_BUFFER_CLIENT_TIMEOUT") {
            match value.parse::<f64>() {
                Ok(seconds) if seconds >= 0.0 => {
                    self.buffer_client_timeout_ms = (seconds * 1000.0) as u64;
                }
                _ => warn!("Ignoring invalid TVMUX_BUFFER_CLIENT_TIMEOUT: {value}"),
            }
        }
        if env_flag("TVMUX_ALLOW_LOOPBACK") {
            self.allow_loopback = true;
        }
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderSource> {
        self.providers.iter().find(|p| p.id == id)
    }
}

/// True when the named environment variable is set to a truthy value.
pub fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

/// The on-disk layout of the data directory. Every persisted file and
/// output artifact lives under the root handed to `new`.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn xepg_file(&self) -> PathBuf {
        self.root.join("xepg.json")
    }

    pub fn urls_file(&self) -> PathBuf {
        self.root.join("urls.json")
    }

    pub fn auth_file(&self) -> PathBuf {
        self.root.join("authentication.json")
    }

    pub fn pms_file(&self) -> PathBuf {
        self.root.join("pms.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backup")
    }

    /// Cache file for a provider's last good download.
    pub fn provider_file(&self, provider_id: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{provider_id}.{extension}"))
    }

    pub fn merged_m3u_file(&self) -> PathBuf {
        self.root.join("tvmux.m3u")
    }

    pub fn merged_xmltv_file(&self) -> PathBuf {
        self.root.join("tvmux.xml")
    }

    pub fn merged_xmltv_gz_file(&self) -> PathBuf {
        self.root.join("tvmux.xml.gz")
    }

    /// Create the directory tree if missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.backup_dir())
    }
}

/// Runtime identity of this server instance, derived from CLI flags at
/// startup. `domain` is what downstream clients are told to connect to.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub domain: String,
    pub port: u16,
}

impl SystemInfo {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.domain)
    }
}
