use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use ::config::{Config, ConfigError as BuilderError, Environment, File};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ExchangeError;
use crate::pair::PairFormat;
use crate::signer::Credentials;

pub const DEFAULT_CONFIG_PATH: &str = "config/exchanges.yaml";
pub const CONFIG_PATH_ENV: &str = "EXCHANGE_CONFIG_PATH";
const ENV_PREFIX: &str = "EXCHANGE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration load failed: {0}")]
    Load(#[from] BuilderError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ExchangeError {
    fn from(err: ConfigError) -> Self {
        ExchangeError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub authenticated_api_support: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_polling_delay")]
    pub polling_delay_secs: u64,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub websocket: bool,
    #[serde(default)]
    pub use_sandbox: bool,
    /// Replaces the driver's production/sandbox base URL.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    /// Comma separated currency codes.
    #[serde(default)]
    pub base_currencies: String,
    /// Comma separated, spelled in `config_currency_pair_format`.
    #[serde(default)]
    pub available_pairs: String,
    #[serde(default)]
    pub enabled_pairs: String,
    #[serde(default)]
    pub request_currency_pair_format: Option<PairFormat>,
    #[serde(default)]
    pub config_currency_pair_format: Option<PairFormat>,
}

impl ExchangeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            authenticated_api_support: false,
            api_key: String::new(),
            api_secret: String::new(),
            polling_delay_secs: default_polling_delay(),
            verbose: false,
            websocket: false,
            use_sandbox: false,
            api_url: None,
            http_proxy: None,
            https_proxy: None,
            base_currencies: String::new(),
            available_pairs: String::new(),
            enabled_pairs: String::new(),
            request_currency_pair_format: None,
            config_currency_pair_format: None,
        }
    }

    /// `None` unless authenticated calls are switched on for this exchange.
    pub fn credentials(&self) -> Option<Credentials> {
        self.authenticated_api_support
            .then(|| Credentials::new(self.api_key.clone(), self.api_secret.clone()))
    }

    /// `KRAKEN_API_KEY`-style variables replace the file values when non-empty.
    fn apply_env_credentials(&mut self) {
        let prefix = env_name(&self.name);
        if let Ok(api_key) = env_var_non_empty(&format!("{prefix}_API_KEY")) {
            self.api_key = api_key;
        }
        if let Ok(api_secret) = env_var_non_empty(&format!("{prefix}_API_SECRET")) {
            self.api_secret = api_secret;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
}

impl AppConfig {
    /// Loads `path`, else `$EXCHANGE_CONFIG_PATH`, else the default path.
    /// Only an explicitly named file is required to exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        preload_env_files();

        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match env_var_non_empty(CONFIG_PATH_ENV) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
            },
        };
        debug!(path = %path.display(), required, "loading exchange configuration");

        let config: AppConfig = Config::builder()
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.finish()
    }

    pub fn exchange(&self, name: &str) -> Option<&ExchangeConfig> {
        self.exchanges
            .iter()
            .find(|exchange| exchange.name.eq_ignore_ascii_case(name))
    }

    pub fn enabled_exchanges(&self) -> impl Iterator<Item = &ExchangeConfig> {
        self.exchanges.iter().filter(|exchange| exchange.enabled)
    }

    fn finish(mut self) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for exchange in &mut self.exchanges {
            if exchange.name.trim().is_empty() {
                return Err(ConfigError::Invalid("exchange without a name".into()));
            }
            if !seen.insert(exchange.name.to_ascii_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "exchange '{}' configured twice",
                    exchange.name
                )));
            }
            if exchange.polling_delay_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}: polling_delay_secs must be positive",
                    exchange.name
                )));
            }
            exchange.apply_env_credentials();
        }
        Ok(self)
    }
}

fn env_name(exchange: &str) -> String {
    exchange
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn env_var_non_empty(key: &str) -> Result<String, env::VarError> {
    let value = env::var(key)?;
    if value.trim().is_empty() {
        return Err(env::VarError::NotPresent);
    }
    Ok(value)
}

fn default_true() -> bool {
    true
}

fn default_polling_delay() -> u64 {
    10
}

fn preload_env_files() {
    // Missing .env files are fine.
    let _ = dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_exchanges_from_yaml() {
        let file = write_yaml(
            r#"
exchanges:
  - name: Kraken
    authenticated_api_support: true
    api_key: file-key
    api_secret: file-secret
    polling_delay_secs: 5
    available_pairs: "ETH-USD,BTC-USD"
    enabled_pairs: "ETH-USD"
    https_proxy: "http://127.0.0.1:3128"
    config_currency_pair_format:
      delimiter: "-"
      uppercase: true
  - name: Liqui
    enabled: false
"#,
        );

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.exchanges.len(), 2);

        let kraken = config.exchange("kraken").unwrap();
        assert_eq!(kraken.polling_delay_secs, 5);
        assert_eq!(kraken.enabled_pairs, "ETH-USD");
        assert_eq!(
            kraken.config_currency_pair_format,
            Some(PairFormat::new("-", true))
        );
        assert!(kraken.request_currency_pair_format.is_none());
        assert_eq!(kraken.https_proxy.as_deref(), Some("http://127.0.0.1:3128"));
        assert!(kraken.http_proxy.is_none());
        assert_eq!(kraken.credentials().unwrap().api_key, "file-key");

        let liqui = config.exchange("Liqui").unwrap();
        assert_eq!(liqui.polling_delay_secs, 10);
        assert!(liqui.credentials().is_none());
        assert_eq!(config.enabled_exchanges().count(), 1);
    }

    #[test]
    fn env_credentials_override_file_values() {
        let file = write_yaml(
            r#"
exchanges:
  - name: Envtest-One
    authenticated_api_support: true
    api_key: file-key
    api_secret: file-secret
"#,
        );
        env::set_var("ENVTEST_ONE_API_KEY", "env-key");
        env::set_var("ENVTEST_ONE_API_SECRET", "   ");

        let config = AppConfig::load(Some(file.path())).unwrap();
        let credentials = config.exchange("envtest-one").unwrap().credentials().unwrap();
        assert_eq!(credentials.api_key, "env-key");
        assert_eq!(credentials.api_secret, "file-secret");

        env::remove_var("ENVTEST_ONE_API_KEY");
        env::remove_var("ENVTEST_ONE_API_SECRET");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let file = write_yaml(
            r#"
exchanges:
  - name: Gemini
  - name: gemini
"#,
        );
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        assert!(ExchangeError::from(err).to_string().contains("configured twice"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
