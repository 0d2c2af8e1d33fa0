use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Process configuration, read from `REMAINDER_*` environment variables
/// (and a `.env` file when present).
///
/// This is separate from [`Settings`](crate::settings::Settings): it decides
/// where the settings live and how the process behaves, never what the user
/// edits on the settings page.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding `settings.json`, `port.json` and downloaded files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Port tried when no previous run recorded one
    #[serde(default)]
    pub port: Option<u16>,
    /// Timeout for every outbound request, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Whether to open the browser once the server is up
    #[serde(default = "default_browser")]
    pub browser: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            port: None,
            timeout: default_timeout(),
            browser: default_browser(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        let _ = dotenvy::dotenv();
        envy::prefixed("REMAINDER_").from_env()
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn port_path(&self) -> PathBuf {
        self.data_dir.join("port.json")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.data_dir.join("static")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_data_dir() -> PathBuf {
    let home = home::home_dir().unwrap_or_else(|| PathBuf::from("."));
    #[cfg(windows)]
    return home.join(".remainder");
    #[cfg(not(windows))]
    return home.join(".config/remainder");
}

fn default_timeout() -> u64 {
    15
}

fn default_browser() -> bool {
    true
}
