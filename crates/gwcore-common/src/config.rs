use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged process configuration.
///
/// Merge order: CLI > ENV > previously-persisted DB row, then persisted
/// back to `config_version` / the global-config row so the next process
/// start sees the last-used values as defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN (`DB_URL`).
    pub db_url: String,
    /// SHA-256 hash of the static admin/master key (`ADMIN_KEY`). Never the
    /// raw value.
    pub admin_key_hash: Option<String>,
    /// Verify upstream TLS certificates (`VERIFY_SSL`).
    pub verify_ssl: bool,
    /// Overall upstream request deadline, in seconds (`REQUEST_TIMEOUT_SECS`).
    pub request_timeout_secs: u64,
    /// Optional model-name prefix stripped from inbound requests before
    /// matching against a provider's model map (`PROVIDER_SUFFIX`).
    pub provider_suffix: Option<String>,
    pub jsonl_log_enabled: bool,
    pub jsonl_log_path: Option<String>,
    pub jsonl_log_buffer_size: usize,
    pub request_log_body_enabled: bool,
    /// Clamp bounds applied to `max_tokens` during transform (spec §4.5.1).
    pub min_tokens_limit: u32,
    pub max_tokens_limit: u32,
}

/// Optional layer used while merging CLI/ENV/DB global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_url: Option<String>,
    pub admin_key_hash: Option<String>,
    pub verify_ssl: Option<bool>,
    pub request_timeout_secs: Option<u64>,
    pub provider_suffix: Option<String>,
    pub jsonl_log_enabled: Option<bool>,
    pub jsonl_log_path: Option<String>,
    pub jsonl_log_buffer_size: Option<usize>,
    pub request_log_body_enabled: Option<bool>,
    pub min_tokens_limit: Option<u32>,
    pub max_tokens_limit: Option<u32>,
}

impl GlobalConfigPatch {
    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(host);
        take!(port);
        take!(db_url);
        take!(admin_key_hash);
        take!(verify_ssl);
        take!(request_timeout_secs);
        take!(provider_suffix);
        take!(jsonl_log_enabled);
        take!(jsonl_log_path);
        take!(jsonl_log_buffer_size);
        take!(request_log_body_enabled);
        take!(min_tokens_limit);
        take!(max_tokens_limit);
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8080),
            db_url: self
                .db_url
                .ok_or(GlobalConfigError::MissingField("db_url"))?,
            admin_key_hash: self.admin_key_hash,
            verify_ssl: self.verify_ssl.unwrap_or(true),
            request_timeout_secs: self.request_timeout_secs.unwrap_or(300),
            provider_suffix: self.provider_suffix,
            jsonl_log_enabled: self.jsonl_log_enabled.unwrap_or(false),
            jsonl_log_path: self.jsonl_log_path,
            jsonl_log_buffer_size: self.jsonl_log_buffer_size.unwrap_or(1024),
            request_log_body_enabled: self.request_log_body_enabled.unwrap_or(false),
            min_tokens_limit: self.min_tokens_limit.unwrap_or(1),
            max_tokens_limit: self.max_tokens_limit.unwrap_or(128_000),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            db_url: Some(value.db_url),
            admin_key_hash: value.admin_key_hash,
            verify_ssl: Some(value.verify_ssl),
            request_timeout_secs: Some(value.request_timeout_secs),
            provider_suffix: value.provider_suffix,
            jsonl_log_enabled: Some(value.jsonl_log_enabled),
            jsonl_log_path: value.jsonl_log_path,
            jsonl_log_buffer_size: Some(value.jsonl_log_buffer_size),
            request_log_body_enabled: Some(value.request_log_body_enabled),
            min_tokens_limit: Some(value.min_tokens_limit),
            max_tokens_limit: Some(value.max_tokens_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_values() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(8080),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9090),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(9090));
    }

    #[test]
    fn into_config_requires_db_url() {
        let patch = GlobalConfigPatch::default();
        assert!(matches!(
            patch.into_config(),
            Err(GlobalConfigError::MissingField("db_url"))
        ));
    }
}
