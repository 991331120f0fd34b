//! Configuration for provenance resolution.
//!
//! Constants live on unit structs (`NetworkConfig`, `FingerprintConfig`); the
//! user-editable settings are a [`ProvenanceConfig`] value that is loaded once
//! per session and handed to the registry clients and the resolver.

use crate::error::{ProvenanceError, Result};
use crate::metadata::Provider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);
    pub const SEARCH_LIMIT: u32 = 10;
    pub const HASH_SEARCH_LIMIT: u32 = 1;
    pub const USER_AGENT: &'static str = "model-provenance/0.3";
    pub const CIVITAI_API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const CIVITAI_WEB_BASE: &'static str = "https://civitai.com";
    pub const HUGGINGFACE_API_BASE: &'static str = "https://huggingface.co/api";
    pub const HUGGINGFACE_WEB_BASE: &'static str = "https://huggingface.co";
}

/// Fingerprint sizing.
pub struct FingerprintConfig;

impl FingerprintConfig {
    /// Files larger than this are fingerprinted from head and tail samples.
    pub const SAMPLE_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Bytes read from each end of a sampled file.
    pub const SAMPLE_WINDOW: u64 = 8 * 1024;
    pub const CHUNK_SIZE: usize = 1024 * 1024;
}

pub const CONFIG_FILE_NAME: &str = "provenance.json";

/// Settings for a single registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    /// Treat a missing API key as a configuration error for this registry.
    pub require_api_key: bool,
    /// Override for the API base URL (mirrors, tests).
    pub base_url: Option<String>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            require_api_key: false,
            base_url: None,
        }
    }
}

impl RegistrySettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// API key with surrounding whitespace removed; blank keys count as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintSettings {
    pub sample_threshold_bytes: u64,
    pub sample_window_bytes: u64,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            sample_threshold_bytes: FingerprintConfig::SAMPLE_THRESHOLD,
            sample_window_bytes: FingerprintConfig::SAMPLE_WINDOW,
        }
    }
}

/// Operating systems with their own device settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Linux, Platform::MacOs, Platform::Windows];

    /// The platform this binary was built for. Unlisted Unix targets use Linux settings.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
        }
    }
}

/// Per-device locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Root of the model collection on this device.
    pub models_root: Option<PathBuf>,
    /// Directory where metadata notes are written.
    pub notes_dir: Option<PathBuf>,
}

/// One value per [`Platform`]; every entry is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerPlatform<T> {
    pub linux: T,
    pub macos: T,
    pub windows: T,
}

impl<T> PerPlatform<T> {
    pub fn get(&self, platform: Platform) -> &T {
        match platform {
            Platform::Linux => &self.linux,
            Platform::MacOs => &self.macos,
            Platform::Windows => &self.windows,
        }
    }

    pub fn get_mut(&mut self, platform: Platform) -> &mut T {
        match platform {
            Platform::Linux => &mut self.linux,
            Platform::MacOs => &mut self.macos,
            Platform::Windows => &mut self.windows,
        }
    }
}

/// Session configuration passed into registry clients and the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub huggingface: RegistrySettings,
    pub civitai: RegistrySettings,
    pub min_request_interval_ms: u64,
    pub search_limit: u32,
    pub request_timeout_secs: u64,
    pub fingerprint: FingerprintSettings,
    pub devices: PerPlatform<DeviceSettings>,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            huggingface: RegistrySettings::default(),
            civitai: RegistrySettings::default(),
            min_request_interval_ms: NetworkConfig::MIN_REQUEST_INTERVAL.as_millis() as u64,
            search_limit: NetworkConfig::SEARCH_LIMIT,
            request_timeout_secs: NetworkConfig::REQUEST_TIMEOUT.as_secs(),
            fingerprint: FingerprintSettings::default(),
            devices: PerPlatform::default(),
        }
    }
}

impl ProvenanceConfig {
    /// Default location of the config file in the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("model-provenance").join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(ProvenanceError::io_with_path(e, path)),
        };

        serde_json::from_str(&contents).map_err(|e| ProvenanceError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })
    }

    pub fn registry(&self, provider: Provider) -> Option<&RegistrySettings> {
        match provider {
            Provider::HuggingFace => Some(&self.huggingface),
            Provider::Civitai => Some(&self.civitai),
            Provider::Unknown => None,
        }
    }

    /// Check that a registry can be used this session.
    ///
    /// Returns `Ok(false)` for a disabled registry and a configuration error for an
    /// enabled registry that requires a key it does not have.
    pub fn validate_registry(&self, provider: Provider) -> Result<bool> {
        let Some(settings) = self.registry(provider) else {
            return Ok(false);
        };
        if !settings.enabled {
            return Ok(false);
        }
        if settings.require_api_key && settings.api_key().is_none() {
            return Err(ProvenanceError::config(format!(
                "{} is enabled but no API key is configured",
                provider
            )));
        }
        Ok(true)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Device settings for the platform this binary runs on.
    pub fn device(&self) -> &DeviceSettings {
        self.devices.get(Platform::current())
    }
}
