use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use library_ledger::fines::FinePolicy;
use library_records::client::DEFAULT_READ_RETRIES;

pub const SETTINGS_FILE: &str = "library_admin";
pub const ENV_PREFIX: &str = "LIBRARY_ADMIN";

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct AdminCredentials {
    pub email: String,
    pub password: String,
}

impl Default for AdminCredentials {
    fn default() -> Self {
        Self {
            email: "admin@library.com".to_string(),
            password: "admin123".to_string(),
        }
    }
}

impl AdminCredentials {
    pub fn matches(&self, email: &str, password: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim()) && self.password == password
    }
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub backend_url: String,
    pub use_in_memory_backend: bool,
    pub bind_address: String,
    pub port: u16,
    pub read_retries: u32,
    pub loan_period_days: i64,
    pub fines_cache_path: PathBuf,
    pub fines: FinePolicy,
    pub admin: AdminCredentials,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            use_in_memory_backend: false,
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            read_retries: DEFAULT_READ_RETRIES,
            loan_period_days: 7,
            fines_cache_path: PathBuf::from("fines_cache.json"),
            fines: FinePolicy::default(),
            admin: AdminCredentials::default(),
        }
    }
}

impl Settings {
    /// Defaults, overridden by `library_admin.toml` and then by `LIBRARY_ADMIN_*` variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(SETTINGS_FILE)
    }

    /// `file` is a path without extension, the file is optional
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Rates and the loan period must not be negative
    fn validated(self) -> Result<Self, ConfigError> {
        if self.fines.daily_rate < 0 || self.fines.damage_surcharge < 0 {
            return Err(ConfigError::Message(format!(
                "Fine rates must not be negative, got daily rate {} and damage surcharge {}",
                self.fines.daily_rate, self.fines.damage_surcharge
            )));
        }
        if self.loan_period_days < 0 {
            return Err(ConfigError::Message(format!(
                "Loan period must not be negative, got {} days",
                self.loan_period_days
            )));
        }
        Ok(self)
    }
}
