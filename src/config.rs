//! Kernel Configuration using Figment
//!
//! Strongly-typed configuration for the instrument kernel. Configuration is loaded from:
//! 1. a TOML file (base configuration, optional)
//! 2. environment variables prefixed with `RUST_ATE_`, nested keys separated by `__`
//!
//! Every key has a default, so [`KernelConfig::default`] works without any file.
//!
//! # Example
//! ```no_run
//! use rust_ate::config::KernelConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // RUST_ATE_EXECUTOR__WORKER_THREADS=8 overrides the file
//! let config = KernelConfig::load_from("config/ate.toml")?;
//! println!("Workers: {}", config.executor.worker_threads);
//! # Ok(())
//! # }
//! ```
//!
//! # File Layout
//!
//! ```toml
//! log_level = "info"
//!
//! [executor]
//! worker_threads = 0          # 0 = available parallelism
//!
//! [acquisition]
//! fetch_timeout_margin_s = 1.0
//! source_complete_timeout_s = 5.0
//!
//! [reducer]
//! shared_pin_policy = "require_agreement"   # or "first"
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, AteError};
use crate::reducer::SharedPinPolicy;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "RUST_ATE_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Upper bound on explicit worker counts; anything above is a typo.
const MAX_WORKER_THREADS: usize = 1024;

/// Top-level kernel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Fan-out pool
    pub executor: ExecutorConfig,
    /// Synchronized acquisition timing
    pub acquisition: AcquisitionConfig,
    /// Result re-keying
    pub reducer: ReducerConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads in the fan-out pool (0 = available parallelism)
    pub worker_threads: usize,
}

/// Hardware-timed acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Added to the measurement time to bound each fetch
    pub fetch_timeout_margin_s: f64,
    /// Bound on waiting for a source operation to complete
    pub source_complete_timeout_s: f64,
}

/// Result re-keying settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReducerConfig {
    /// What to do when two channels report the same (pin, site)
    pub shared_pin_policy: SharedPinPolicy,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            executor: ExecutorConfig::default(),
            acquisition: AcquisitionConfig::default(),
            reducer: ReducerConfig::default(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_margin_s: 1.0,
            source_complete_timeout_s: 5.0,
        }
    }
}

impl AcquisitionConfig {
    /// Fetch margin as a `Duration`, negative values clamp to zero.
    pub fn fetch_timeout_margin(&self) -> Duration {
        Duration::from_secs_f64(self.fetch_timeout_margin_s.max(0.0))
    }

    /// Source-complete bound as a `Duration`, negative values clamp to zero.
    pub fn source_complete_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.source_complete_timeout_s.max(0.0))
    }
}

impl KernelConfig {
    /// Figment with defaults, the TOML file at `path` and environment overrides.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(KernelConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from a TOML file and environment variables, then validate it.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: KernelConfig = Self::figment(path).extract()?;
        config.validate().map_err(AteError::Configuration)?;
        Ok(config)
    }

    /// Load from defaults and environment variables only.
    pub fn from_env() -> AppResult<Self> {
        let config: KernelConfig = Figment::from(Serialized::defaults(KernelConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate().map_err(AteError::Configuration)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !VALID_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        if self.executor.worker_threads > MAX_WORKER_THREADS {
            return Err(format!(
                "Invalid worker_threads {}. Must be 0-{}",
                self.executor.worker_threads, MAX_WORKER_THREADS
            ));
        }

        for (name, value) in [
            ("fetch_timeout_margin_s", self.acquisition.fetch_timeout_margin_s),
            ("source_complete_timeout_s", self.acquisition.source_complete_timeout_s),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("Invalid {name} {value}. Must be a non-negative number of seconds"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = KernelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.fetch_timeout_margin(), Duration::from_secs(1));
        assert_eq!(config.reducer.shared_pin_policy, SharedPinPolicy::RequireAgreement);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n[executor]\nworker_threads = 3\n[reducer]\nshared_pin_policy = \"first\""
        )
        .unwrap();

        let config = KernelConfig::load_from(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.executor.worker_threads, 3);
        assert_eq!(config.reducer.shared_pin_policy, SharedPinPolicy::First);
        assert_eq!(config.acquisition.source_complete_timeout_s, 5.0);
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let config = KernelConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("ate.toml", "[executor]\nworker_threads = 2")?;
            jail.set_env("RUST_ATE_EXECUTOR__WORKER_THREADS", "6");
            let config: KernelConfig = KernelConfig::figment("ate.toml").extract()?;
            assert_eq!(config.executor.worker_threads, 6);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_from_env_validates() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RUST_ATE_ACQUISITION__FETCH_TIMEOUT_MARGIN_S", "0.25");
            let config = KernelConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(config.acquisition.fetch_timeout_margin(), Duration::from_millis(250));

            jail.set_env("RUST_ATE_LOG_LEVEL", "chatty");
            assert!(matches!(
                KernelConfig::from_env(),
                Err(AteError::Configuration(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = KernelConfig::default();
        config.log_level = "chatty".to_string();
        assert!(config.validate().is_err());

        let mut config = KernelConfig::default();
        config.acquisition.fetch_timeout_margin_s = -1.0;
        assert!(config.validate().is_err());

        let mut config = KernelConfig::default();
        config.executor.worker_threads = 100_000;
        assert!(config.validate().is_err());
    }
}
