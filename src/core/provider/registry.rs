//! Tenant provider resolution
//!
//! Maps `(organization, channel)` to a ready adapter. Resolution policy is
//! availability over strictness: a missing config, an unknown vendor name,
//! an inactive config, or a credential-decryption failure all degrade to
//! the Mock adapter instead of failing the call path. Callers that care
//! can inspect `adapter.kind()`.
//!
//! Resolved adapters are cached per `(organization, channel)`; any write
//! touching that key invalidates the cached instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::credentials::decrypt_credentials;
use super::{MockProvider, ProviderAdapter, ProviderKind, ProviderSettings, create_provider};

/// Delivery channel a provider config covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Phone,
    Whatsapp,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Phone => "phone",
            ChannelType::Whatsapp => "whatsapp",
        }
    }
}

/// One tenant's provider configuration. Credentials stay encrypted at rest
/// in the store; decryption happens only inside `resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: u64,
    pub organization_id: u64,
    pub channel_type: ChannelType,
    pub provider_name: String,
    /// AES-256-GCM blob, base64
    pub credentials_blob: String,
    #[serde(default)]
    pub settings: ProviderSettings,
    pub is_active: bool,
    pub is_primary: bool,
}

/// Errors from config-store writes. Resolution itself never errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider config {0} not found")]
    ConfigNotFound(u64),
    #[error("unknown provider name: {0}")]
    UnknownProvider(String),
}

type AdapterCacheKey = (u64, ChannelType);

/// Registry of provider configs plus the resolved-adapter cache.
pub struct ProviderRegistry {
    configs: RwLock<HashMap<u64, ProviderConfig>>,
    next_id: AtomicU64,
    adapters: Cache<AdapterCacheKey, Arc<dyn ProviderAdapter>>,
    encryption_key: Option<String>,
    request_timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(encryption_key: Option<String>, request_timeout: Duration) -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            adapters: Cache::builder()
                .max_capacity(1024)
                .time_to_idle(Duration::from_secs(30 * 60))
                .build(),
            encryption_key,
            request_timeout,
        }
    }

    /// Insert or update a config. When the config claims primary, every
    /// other config for the same `(organization, channel)` is demoted in
    /// the same write-lock scope - a concurrent reader can never observe
    /// two primaries.
    pub fn upsert(&self, mut config: ProviderConfig) -> ProviderConfig {
        let mut configs = self.configs.write();
        if config.id == 0 {
            config.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        if config.is_primary {
            for other in configs.values_mut() {
                if other.id != config.id
                    && other.organization_id == config.organization_id
                    && other.channel_type == config.channel_type
                {
                    other.is_primary = false;
                }
            }
        }
        let key = (config.organization_id, config.channel_type);
        configs.insert(config.id, config.clone());
        drop(configs);

        self.adapters.invalidate(&key);
        info!(
            config_id = config.id,
            organization_id = config.organization_id,
            channel = config.channel_type.as_str(),
            provider = %config.provider_name,
            is_primary = config.is_primary,
            "provider config stored"
        );
        config
    }

    /// Promote an existing config to primary, demoting the previous primary
    /// for its `(organization, channel)` atomically.
    pub fn set_primary(&self, config_id: u64) -> Result<ProviderConfig, RegistryError> {
        let mut configs = self.configs.write();
        let (org, channel) = {
            let config = configs
                .get(&config_id)
                .ok_or(RegistryError::ConfigNotFound(config_id))?;
            (config.organization_id, config.channel_type)
        };
        for other in configs.values_mut() {
            if other.organization_id == org && other.channel_type == channel {
                other.is_primary = other.id == config_id;
            }
        }
        let updated = configs[&config_id].clone();
        drop(configs);

        self.adapters.invalidate(&(org, channel));
        Ok(updated)
    }

    pub fn delete(&self, config_id: u64) -> Result<(), RegistryError> {
        let mut configs = self.configs.write();
        let config = configs
            .remove(&config_id)
            .ok_or(RegistryError::ConfigNotFound(config_id))?;
        drop(configs);
        self.adapters
            .invalidate(&(config.organization_id, config.channel_type));
        Ok(())
    }

    pub fn get(&self, config_id: u64) -> Option<ProviderConfig> {
        self.configs.read().get(&config_id).cloned()
    }

    pub fn list(&self, organization_id: Option<u64>) -> Vec<ProviderConfig> {
        let configs = self.configs.read();
        let mut out: Vec<ProviderConfig> = configs
            .values()
            .filter(|c| organization_id.is_none_or(|org| c.organization_id == org))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        out
    }

    /// The active primary config for a tenant/channel, if any.
    pub fn primary(&self, organization_id: u64, channel: ChannelType) -> Option<ProviderConfig> {
        self.configs
            .read()
            .values()
            .find(|c| {
                c.organization_id == organization_id
                    && c.channel_type == channel
                    && c.is_active
                    && c.is_primary
            })
            .cloned()
    }

    /// Resolve the adapter serving a tenant/channel. Never fails: every
    /// degraded path lands on Mock.
    pub fn resolve(&self, organization_id: u64, channel: ChannelType) -> Arc<dyn ProviderAdapter> {
        let key = (organization_id, channel);
        if let Some(adapter) = self.adapters.get(&key) {
            return adapter;
        }
        let adapter = self.build_adapter(organization_id, channel);
        self.adapters.insert(key, adapter.clone());
        adapter
    }

    /// Resolve the adapter for one specific config id (webhook routing).
    /// Degrades to Mock like `resolve`.
    pub fn resolve_config(&self, config_id: u64) -> Arc<dyn ProviderAdapter> {
        match self.get(config_id) {
            Some(config) => self.adapter_from_config(&config),
            None => {
                warn!(config_id, "webhook for unknown provider config, using mock");
                Arc::new(MockProvider::new())
            }
        }
    }

    fn build_adapter(&self, organization_id: u64, channel: ChannelType) -> Arc<dyn ProviderAdapter> {
        match self.primary(organization_id, channel) {
            Some(config) => self.adapter_from_config(&config),
            None => {
                warn!(
                    organization_id,
                    channel = channel.as_str(),
                    "no active primary provider config, using mock"
                );
                Arc::new(MockProvider::new())
            }
        }
    }

    fn adapter_from_config(&self, config: &ProviderConfig) -> Arc<dyn ProviderAdapter> {
        let kind = match config.provider_name.parse::<ProviderKind>() {
            Ok(kind) => kind,
            Err(_) => {
                warn!(
                    config_id = config.id,
                    provider = %config.provider_name,
                    "unknown provider name, using mock"
                );
                return Arc::new(MockProvider::new());
            }
        };
        if kind == ProviderKind::Mock {
            return Arc::new(MockProvider::new());
        }

        let Some(key) = self.encryption_key.as_deref() else {
            warn!(config_id = config.id, "no credential key configured, using mock");
            return Arc::new(MockProvider::new());
        };
        let credentials = match decrypt_credentials(&config.credentials_blob, key) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(config_id = config.id, error = %e, "credential decryption failed, using mock");
                return Arc::new(MockProvider::new());
            }
        };

        match create_provider(kind, credentials, config.settings.clone(), self.request_timeout) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(config_id = config.id, error = %e, "adapter construction failed, using mock");
                Arc::new(MockProvider::new())
            }
        }
    }
}
