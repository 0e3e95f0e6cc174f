//! Platform and probe configuration.
//!
//! Each host platform (Raspberry Pi, Jetson, a USB bridge, ...) is described
//! by one JSON file in a config directory. A file names the I2C bus and the
//! GPIO pins, and carries shell command templates for the command-line
//! backends. An optional `probe` object overrides the test timing.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::peripheral::as7265x::{PollBudget, SLAVE_ADDRESS};
use crate::tracing::prelude::*;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),
    #[error("platform `{platform}` has no `{command}` command")]
    MissingCommand { platform: String, command: String },
    #[error("command `{command}` needs parameter `{param}`")]
    MissingParameter { command: String, param: String },
    #[error("platform `{platform}` has no `{pin}` pin")]
    MissingPin { platform: String, pin: String },
}

/// Bus or pin identifier; platforms use numbers or names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum HwId {
    Number(u32),
    Name(String),
}

impl fmt::Display for HwId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwId::Number(n) => write!(f, "{}", n),
            HwId::Name(name) => write!(f, "{}", name),
        }
    }
}

impl Default for HwId {
    fn default() -> Self {
        HwId::Number(1)
    }
}

/// How the tester reaches the sensor's I2C registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Shell out to the platform's `i2c_read`/`i2c_write` templates
    #[default]
    Command,
    /// Linux `/dev/i2c-N` character device
    Direct,
}

/// Packages a platform needs installed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dependencies {
    #[serde(default)]
    pub python_packages: Vec<String>,
    #[serde(default)]
    pub system_packages: Vec<String>,
}

/// Probe timing and acceptance limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// STATUS samples per handshake phase
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    /// Wait after selecting a die before reading it
    pub settle_ms: u64,
    /// Time the reset line is held low
    pub reset_hold_ms: u64,
    /// Time allowed for boot after releasing reset
    pub reset_settle_ms: u64,
    /// Plausible die temperature range in °C
    pub temp_min: u8,
    pub temp_max: u8,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            poll_attempts: 50,
            poll_interval_ms: 100,
            settle_ms: 200,
            reset_hold_ms: 1000,
            reset_settle_ms: 2000,
            temp_min: 0,
            temp_max: 85,
        }
    }
}

impl ProbeSettings {
    pub fn poll_budget(&self) -> PollBudget {
        PollBudget::new(self.poll_attempts, Duration::from_millis(self.poll_interval_ms))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn reset_hold(&self) -> Duration {
        Duration::from_millis(self.reset_hold_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn temperature_plausible(&self, celsius: u8) -> bool {
        (self.temp_min..=self.temp_max).contains(&celsius)
    }
}

/// One host platform.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// Human-readable name
    pub name: String,
    /// Identifier; defaults to the file stem
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub i2c_bus: HwId,
    #[serde(default)]
    pub transport: TransportKind,
    /// Pin roles (`reset`, `status_led`, `sda`, ...) to pin numbers or names
    #[serde(default)]
    pub pins: BTreeMap<String, HwId>,
    /// Shell command templates keyed by role
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub setup_instructions: Vec<String>,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub probe: ProbeSettings,
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

impl PlatformConfig {
    /// Parse a platform file. `platform` falls back to the file stem.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PlatformConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if config.platform.is_empty() {
            config.platform = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(config)
    }

    pub fn pin(&self, role: &str) -> Result<&HwId, ConfigError> {
        self.pins.get(role).ok_or_else(|| ConfigError::MissingPin {
            platform: self.platform.clone(),
            pin: role.to_string(),
        })
    }

    /// Expand a command template.
    ///
    /// `{bus}`, `{addr}` and every pin role are always available; `params`
    /// adds or overrides the rest (`{reg}`, `{val}`, `{pin}`).
    pub fn command(&self, name: &str, params: &[(&str, String)]) -> Result<String, ConfigError> {
        let template = self
            .commands
            .get(name)
            .ok_or_else(|| ConfigError::MissingCommand {
                platform: self.platform.clone(),
                command: name.to_string(),
            })?;

        let mut values: BTreeMap<&str, String> = BTreeMap::new();
        values.insert("bus", self.i2c_bus.to_string());
        values.insert("addr", format!("0x{:02x}", SLAVE_ADDRESS));
        for (role, pin) in &self.pins {
            values.insert(role, pin.to_string());
        }
        for (key, value) in params {
            values.insert(key, value.clone());
        }

        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match values.get(key) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(param) => Err(ConfigError::MissingParameter {
                command: name.to_string(),
                param,
            }),
            None => Ok(rendered.into_owned()),
        }
    }

    /// Setup instructions and wiring, formatted for a terminal.
    pub fn setup_text(&self) -> String {
        let mut text = format!("Setup Instructions for {}\n", self.name);
        text.push_str(&"=".repeat(50));
        text.push_str("\n\n");
        for step in &self.setup_instructions {
            text.push_str(&format!("• {}\n", step));
        }

        text.push_str("\nPin Configuration:\n");
        for (role, pin) in &self.pins {
            text.push_str(&format!("  {}: {}\n", role, pin));
        }

        let deps = &self.dependencies;
        if !deps.python_packages.is_empty() || !deps.system_packages.is_empty() {
            text.push_str("\nDependencies:\n");
        }
        if !deps.python_packages.is_empty() {
            text.push_str(&format!("  Python: {}\n", deps.python_packages.join(", ")));
        }
        if !deps.system_packages.is_empty() {
            text.push_str(&format!("  System: {}\n", deps.system_packages.join(", ")));
        }
        text
    }
}

/// All platforms found in a config directory, keyed by id.
#[derive(Debug, Default)]
pub struct PlatformRegistry {
    platforms: BTreeMap<String, PlatformConfig>,
}

impl PlatformRegistry {
    /// Load every `*.json` file in `dir`.
    ///
    /// A missing directory yields an empty registry. Files that fail to
    /// parse are logged and skipped so one bad file does not hide the rest.
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        if !dir.is_dir() {
            warn!("Config directory {} does not exist", dir.display());
            return Ok(registry);
        }

        let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match PlatformConfig::from_file(&path) {
                Ok(config) => {
                    debug!("Loaded platform {} from {}", config.platform, path.display());
                    registry.insert(config);
                }
                Err(e) => error!("Error loading config: {}", e),
            }
        }

        Ok(registry)
    }

    pub fn insert(&mut self, config: PlatformConfig) {
        self.platforms.insert(config.platform.clone(), config);
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// `(id, config)` pairs in id order.
    pub fn platforms(&self) -> impl Iterator<Item = (&str, &PlatformConfig)> {
        self.platforms.iter().map(|(id, config)| (id.as_str(), config))
    }

    pub fn get(&self, id: &str) -> Result<&PlatformConfig, ConfigError> {
        self.platforms
            .get(id)
            .ok_or_else(|| ConfigError::UnknownPlatform(id.to_string()))
    }

    /// The platform to use when none is named.
    pub fn first(&self) -> Option<&PlatformConfig> {
        self.platforms.values().next()
    }
}
