use std::fs::read_to_string;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

/// `/opt/<vendor>/<product>/{serial,auth}` when no override is given.
const IDENTITY_VENDOR: &str = "dataplicity";
const IDENTITY_PRODUCT: &str = "tuxtunnel";

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unrecognized log level '{}'", other)),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    pub file: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityConfig {
    pub dir: Option<String>,
    pub serial_path: Option<String>,
    pub auth_path: Option<String>,
}

impl IdentityConfig {
    /// Resolve the serial and auth file paths, falling back to
    /// `/opt/<vendor>/<product>/{serial,auth}` when nothing overrides them.
    pub fn resolve(&self) -> (String, String) {
        if let (Some(serial), Some(auth)) = (&self.serial_path, &self.auth_path) {
            return (serial.clone(), auth.clone());
        }
        let base = self
            .dir
            .clone()
            .unwrap_or_else(|| format!("/opt/{}/{}", IDENTITY_VENDOR, IDENTITY_PRODUCT));
        (
            self.serial_path.clone().unwrap_or_else(|| format!("{}/serial", base)),
            self.auth_path.clone().unwrap_or_else(|| format!("{}/auth", base)),
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default = "Config::api_url")]
    pub api_url: String,
    #[serde(default = "Config::m2m_url")]
    pub m2m_url: String,
    #[serde(default = "Config::limit_services")]
    pub limit_services: usize,
    #[serde(default = "Config::limit_terminals")]
    pub limit_terminals: usize,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default = "Config::remote_dir")]
    pub remote_dir: String,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    fn api_url() -> String {
        "https://api.dataplicity.com".to_string()
    }

    fn m2m_url() -> String {
        "wss://m2m.dataplicity.com/m2m/".to_string()
    }

    fn limit_services() -> usize {
        500
    }

    fn limit_terminals() -> usize {
        100
    }

    /// `/home/<user>/remote`, falling back to a relative `remote` if `$HOME`
    /// isn't set (e.g. a minimal service-account environment).
    fn remote_dir() -> String {
        match std::env::var("HOME") {
            Ok(home) => format!("{}/remote", home.trim_end_matches('/')),
            Err(_) => "remote".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: Self::api_url(),
            m2m_url: Self::m2m_url(),
            limit_services: Self::limit_services(),
            limit_terminals: Self::limit_terminals(),
            identity: IdentityConfig::default(),
            remote_dir: Self::remote_dir(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Defaults → optional TOML file (`--config`) → environment variables →
    /// CLI flags, in ascending precedence.
    pub fn load(args: &RunArgs) -> anyhow::Result<Config> {
        let mut config = match &args.config {
            Some(path) => {
                let text = read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {}", path, e))?;
                toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("failed to parse config file '{}': {}", path, e))?
            }
            None => Config::default(),
        };

        config.apply_env();
        config.apply_args(args);
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("API_URL") {
            self.api_url = v;
        }
        if let Ok(v) = std::env::var("M2M_URL") {
            self.m2m_url = v;
        }
        if let Ok(v) = std::env::var("LIMIT_SERVICES") {
            if let Ok(n) = v.parse() {
                self.limit_services = n;
            }
        }
        if let Ok(v) = std::env::var("LIMIT_TERMINALS") {
            if let Ok(n) = v.parse() {
                self.limit_terminals = n;
            }
        }
    }

    fn apply_args(&mut self, args: &RunArgs) {
        if let Some(v) = &args.api_url {
            self.api_url = v.clone();
        }
        if let Some(v) = &args.m2m_url {
            self.m2m_url = v.clone();
        }
        if let Some(v) = &args.serial {
            self.identity.serial_path = Some(v.clone());
        }
        if let Some(v) = &args.auth {
            self.identity.auth_path = Some(v.clone());
        }
        if let Some(v) = &args.remote_dir {
            self.remote_dir = v.clone();
        }
        if let Some(v) = &args.log_level {
            self.log.level = v.clone();
        }
        if let Some(v) = &args.log_file {
            self.log.file = Some(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            config: None,
            api_url: None,
            m2m_url: None,
            serial: None,
            auth: None,
            remote_dir: None,
            log_level: None,
            log_file: None,
        }
    }

    #[test]
    fn defaults_apply_without_a_config_file() {
        let config = Config::load(&args()).unwrap();
        assert_eq!(config.limit_services, 500);
        assert_eq!(config.limit_terminals, 100);
        assert_eq!(config.api_url, "https://api.dataplicity.com");
    }

    #[test]
    fn cli_flags_take_precedence_over_defaults() {
        let mut a = args();
        a.api_url = Some("https://example.test".to_string());
        a.serial = Some("/tmp/serial".to_string());
        let config = Config::load(&a).unwrap();
        assert_eq!(config.api_url, "https://example.test");
        assert_eq!(config.identity.serial_path.as_deref(), Some("/tmp/serial"));
    }

    #[test]
    fn identity_resolves_to_opt_path_by_default() {
        let identity = IdentityConfig::default();
        let (serial, auth) = identity.resolve();
        assert_eq!(serial, "/opt/dataplicity/tuxtunnel/serial");
        assert_eq!(auth, "/opt/dataplicity/tuxtunnel/auth");
    }

    #[test]
    fn remote_dir_defaults_under_home() {
        let config = Config::load(&args()).unwrap();
        assert!(config.remote_dir.ends_with("/remote"));
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert!(matches!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug));
        assert!("nonsense".parse::<LogLevel>().is_err());
    }
}
