//! On-disk state under OEPL_HOME: user settings and the device cache

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use oepl_ble::{OperationConfig, RetryPolicy, UploadOptions};
use oepl_image::DitherMode;
use oepl_proto::frame::RefreshMode;
use oepl_proto::{AdvertisingData, DeviceCapabilities, FirmwareVersion, GlobalConfig, Protocol};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not determine home directory, set OEPL_HOME")]
    NoHome,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `$OEPL_HOME`, or `~/.oepl`, created if needed
pub fn oepl_home() -> Result<PathBuf, StoreError> {
    let home = match std::env::var_os("OEPL_HOME") {
        Some(home) => PathBuf::from(home),
        None => dirs::home_dir().ok_or(StoreError::NoHome)?.join(".oepl"),
    };
    fs::create_dir_all(&home).map_err(|source| StoreError::Io {
        path: home.clone(),
        source,
    })?;
    Ok(home)
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&data).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `settings.json`; missing keys take their defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub response_timeout_secs: u64,
    pub retry_attempts: u32,
    pub backoff_step_ms: u64,
    pub dither: DitherMode,
    pub refresh: RefreshMode,
    pub scan_duration_secs: u64,
    /// Use compressed direct write when the tag supports it
    pub compress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            response_timeout_secs: 10,
            retry_attempts: 3,
            backoff_step_ms: 250,
            dither: DitherMode::default(),
            refresh: RefreshMode::default(),
            scan_duration_secs: 5,
            compress: true,
        }
    }
}

impl Settings {
    fn path(home: &Path) -> PathBuf {
        home.join("settings.json")
    }

    pub fn load(home: &Path) -> Result<Self, StoreError> {
        load_json(&Self::path(home))
    }

    pub fn save(&self, home: &Path) -> Result<(), StoreError> {
        save_json(&Self::path(home), self)
    }

    pub fn operation_config(&self) -> OperationConfig {
        OperationConfig {
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                backoff_step: Duration::from_millis(self.backoff_step_ms),
            },
            ..OperationConfig::default()
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            dither: self.dither,
            refresh: self.refresh,
            compress: self.compress,
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}

/// What we know about one tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub protocol: Protocol,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub advertising: Option<AdvertisingData>,
    #[serde(default)]
    pub capabilities: Option<DeviceCapabilities>,
    #[serde(default)]
    pub config: Option<GlobalConfig>,
    #[serde(default)]
    pub firmware: Option<FirmwareVersion>,
}

impl DeviceRecord {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            name: None,
            advertising: None,
            capabilities: None,
            config: None,
            firmware: None,
        }
    }

    /// Transfer modes of the first display, 0 when unknown
    pub fn transmission_modes(&self) -> u8 {
        self.config
            .as_ref()
            .and_then(|c| c.displays.first())
            .map_or(0, |d| d.transmission_modes)
    }
}

/// `devices.json`, keyed by upper-case address
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeviceCache {
    devices: BTreeMap<String, DeviceRecord>,
}

impl DeviceCache {
    fn path(home: &Path) -> PathBuf {
        home.join("devices.json")
    }

    pub fn load(home: &Path) -> Result<Self, StoreError> {
        load_json(&Self::path(home))
    }

    pub fn save(&self, home: &Path) -> Result<(), StoreError> {
        save_json(&Self::path(home), self)
    }

    pub fn get(&self, address: &str) -> Option<&DeviceRecord> {
        self.devices.get(&address.to_ascii_uppercase())
    }

    /// The record for `address`, created for `protocol` when missing or
    /// when the tag turned out to speak another protocol
    pub fn entry(&mut self, address: &str, protocol: Protocol) -> &mut DeviceRecord {
        let record = self
            .devices
            .entry(address.to_ascii_uppercase())
            .or_insert_with(|| DeviceRecord::new(protocol));
        if record.protocol != protocol {
            *record = DeviceRecord::new(protocol);
        }
        record
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceRecord)> {
        self.devices.iter()
    }
}
