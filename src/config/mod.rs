//! Server configuration
//!
//! Loaded either from environment variables (`from_env`, the default) or
//! from a YAML file (`from_file`, via `--config`). Every field has a
//! production-safe default; validation runs on both paths before the
//! config is accepted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::pipeline::PipelineConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(String),
    #[error("invalid environment value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// TLS certificate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Complete server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    /// Comma-separated origin list, or `*`
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,

    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: usize,
    /// Idle WebSocket connections are closed after this many seconds
    pub ws_idle_timeout_secs: u64,

    /// Idle sessions with no subscribers are reaped after this window
    pub session_idle_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,

    /// 64 hex chars (AES-256 key) for provider credential blobs
    pub credential_key: Option<String>,
    pub provider_request_timeout_secs: u64,
    pub verify_webhook_signatures: bool,
    /// Externally reachable base URL, used to reconstruct webhook URLs for
    /// signature verification
    pub public_base_url: Option<String>,

    pub ai_response_timeout_ms: u64,
    pub pipeline_latency_budget_ms: u64,
    pub min_transcription_confidence: f32,
    pub audio_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 30,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
            ws_idle_timeout_secs: 300,
            session_idle_timeout_secs: 300,
            session_sweep_interval_secs: 60,
            credential_key: None,
            provider_request_timeout_secs: 5,
            verify_webhook_signatures: true,
            public_base_url: None,
            ai_response_timeout_ms: 10_000,
            pipeline_latency_budget_ms: 2_000,
            min_transcription_confidence: 0.4,
            audio_chunk_bytes: 32 * 1024,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => {
            value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv {
                    name: name.to_string(),
                    value,
                })
        }
        _ => Ok(None),
    }
}

impl ServerConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("HOST") {
            if !host.is_empty() {
                config.host = host;
            }
        }
        if let Some(port) = env_parse("PORT")? {
            config.port = port;
        }
        if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
            if !origins.is_empty() {
                config.cors_allowed_origins = Some(origins);
            }
        }
        if let Some(rps) = env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")? {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = env_parse("RATE_LIMIT_BURST_SIZE")? {
            config.rate_limit_burst_size = burst;
        }
        config.max_websocket_connections = env_parse("MAX_WEBSOCKET_CONNECTIONS")?;
        if let Some(per_ip) = env_parse("MAX_CONNECTIONS_PER_IP")? {
            config.max_connections_per_ip = per_ip;
        }
        if let Some(secs) = env_parse("WS_IDLE_TIMEOUT_SECS")? {
            config.ws_idle_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("SESSION_IDLE_TIMEOUT_SECS")? {
            config.session_idle_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("SESSION_SWEEP_INTERVAL_SECS")? {
            config.session_sweep_interval_secs = secs;
        }
        if let Ok(key) = std::env::var("CREDENTIAL_ENCRYPTION_KEY") {
            if !key.is_empty() {
                config.credential_key = Some(key);
            }
        }
        if let Some(secs) = env_parse("PROVIDER_REQUEST_TIMEOUT_SECS")? {
            config.provider_request_timeout_secs = secs;
        }
        if let Some(verify) = env_parse("VERIFY_WEBHOOK_SIGNATURES")? {
            config.verify_webhook_signatures = verify;
        }
        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            if !url.is_empty() {
                config.public_base_url = Some(url);
            }
        }
        if let Some(ms) = env_parse("AI_RESPONSE_TIMEOUT_MS")? {
            config.ai_response_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("PIPELINE_LATENCY_BUDGET_MS")? {
            config.pipeline_latency_budget_ms = ms;
        }
        if let Some(confidence) = env_parse("MIN_TRANSCRIPTION_CONFIDENCE")? {
            config.min_transcription_confidence = confidence;
        }
        if let (Ok(cert), Ok(key)) = (std::env::var("TLS_CERT_PATH"), std::env::var("TLS_KEY_PATH"))
        {
            if !cert.is_empty() && !key.is_empty() {
                config.tls = Some(TlsConfig {
                    cert_path: cert.into(),
                    key_path: key.into(),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(key) = &self.credential_key {
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::Invalid(
                    "credential_key must be 64 hex characters".to_string(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.min_transcription_confidence) {
            return Err(ConfigError::Invalid(
                "min_transcription_confidence must be within [0, 1]".to_string(),
            ));
        }
        if self.audio_chunk_bytes == 0 {
            return Err(ConfigError::Invalid(
                "audio_chunk_bytes must be positive".to_string(),
            ));
        }
        if self.session_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "session_sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn ws_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_idle_timeout_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_request_timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ai_timeout: Duration::from_millis(self.ai_response_timeout_ms),
            min_transcription_confidence: self.min_transcription_confidence,
            audio_chunk_bytes: self.audio_chunk_bytes,
        }
    }

    /// The externally visible URL a vendor signed its webhook against.
    pub fn public_webhook_url(&self, vendor: &str, config_id: u64) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/webhooks/{vendor}/{config_id}", base.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_validate() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.address(), "0.0.0.0:3001");
        assert!(!config.is_tls_enabled());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("PORT", "8443");
            std::env::set_var("MAX_WEBSOCKET_CONNECTIONS", "500");
            std::env::set_var("AI_RESPONSE_TIMEOUT_MS", "2500");
        }
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 8443);
        assert_eq!(config.max_websocket_connections, Some(500));
        assert_eq!(config.ai_response_timeout_ms, 2500);
        unsafe {
            std::env::remove_var("PORT");
            std::env::remove_var("MAX_WEBSOCKET_CONNECTIONS");
            std::env::remove_var("AI_RESPONSE_TIMEOUT_MS");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        unsafe {
            std::env::set_var("PORT", "not-a-port");
        }
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name, .. } if name == "PORT"));
        unsafe {
            std::env::remove_var("PORT");
        }
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(
            &path,
            "host: 127.0.0.1\nport: 9000\nsession_idle_timeout_secs: 120\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_idle_timeout(), Duration::from_secs(120));
        // Unspecified fields keep defaults
        assert_eq!(config.pipeline_latency_budget_ms, 2000);
    }

    #[test]
    fn test_bad_credential_key_rejected() {
        let config = ServerConfig {
            credential_key: Some("tooshort".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            credential_key: Some("zz".repeat(32)),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            credential_key: Some("ab".repeat(32)),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_public_webhook_url() {
        let config = ServerConfig {
            public_base_url: Some("https://gw.example.com/".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.public_webhook_url("twilio", 7).unwrap(),
            "https://gw.example.com/webhooks/twilio/7"
        );
        assert!(ServerConfig::default().public_webhook_url("twilio", 7).is_none());
    }
}
