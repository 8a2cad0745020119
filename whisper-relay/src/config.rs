//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` and can be changed with the `-f` flag or the `WHISPER_RELAY_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - `WHISPER_RELAY_` prefixed variables, `__` separates nested keys
//! 3. **PORT** - plain `PORT` overrides `port`, for hosting platforms that inject it
//!
//! ```bash
//! WHISPER_RELAY_TRANSCRIBER__PROGRAM=/opt/whisper/venv/bin/python
//! WHISPER_RELAY_UPLOADS__MAX_FILE_SIZE=52428800
//! WHISPER_RELAY_LIMITS__TRANSCRIPTIONS__MAX_CONCURRENT=2
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Default ceiling for a single uploaded audio file.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 150 * 1024 * 1024;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "WHISPER_RELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Where uploaded audio is staged while the transcriber runs
    pub uploads: UploadsConfig,
    /// The external speech-recognition program
    pub transcriber: TranscriberConfig,
    /// Admission control for external processes
    pub limits: LimitsConfig,
    pub cors: CorsConfig,
    /// Directory with the browser form, served for any path no route matches
    pub static_dir: Option<PathBuf>,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Upload directory, created at startup if absent
    pub dir: PathBuf,
    /// Maximum accepted audio payload in bytes
    pub max_file_size: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// How the external program is launched: `<program> <script> <audio> [--language <code>]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscriberConfig {
    /// Executable name (looked up on `PATH`) or path
    pub program: String,
    /// Entry script passed as the first argument
    pub script: PathBuf,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            script: PathBuf::from("transcribe.py"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub transcriptions: TranscriptionLimitsConfig,
}

/// Bounds on simultaneously running transcriber processes.
///
/// The default leaves concurrency unbounded: every request gets its own process as soon as it
/// arrives. Setting `max_concurrent` turns on a semaphore with a waiting queue; requests that
/// cannot get a slot receive HTTP 429.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscriptionLimitsConfig {
    /// Maximum concurrent external processes. 0 means unlimited.
    pub max_concurrent: usize,
    /// Maximum requests waiting for a slot. 0 means unlimited.
    pub max_waiting: usize,
    /// How long a request may wait for a slot before being rejected
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for TranscriptionLimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            max_waiting: 0,
            max_wait: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
        }
    }
}

/// CORS origin: `*` or a specific URL.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CorsOrigin {
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            uploads: UploadsConfig::default(),
            transcriber: TranscriberConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            static_dir: None,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("WHISPER_RELAY_").ignore(&["config"]).split("__"))
            .merge(Env::raw().only(&["PORT"]))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.uploads.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.max_file_size must be greater than 0".to_string(),
            });
        }

        if self.transcriber.program.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: transcriber.program cannot be empty".to_string(),
            });
        }

        let limits = &self.limits.transcriptions;
        if limits.max_concurrent == 0 && limits.max_waiting > 0 {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: limits.transcriptions.max_waiting ({}) requires max_concurrent to be set",
                    limits.max_waiting
                ),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
