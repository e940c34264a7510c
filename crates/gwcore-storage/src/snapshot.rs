use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use gwcore_common::{CredentialId, ProviderId};
use gwcore_protocol::Protocol;
use gwcore_routing::{Credential, CompiledPattern, ModelMapEntry, Provider, RateLimitSpec, VersionedConfig};

/// Wire shape of one `model_mapping` JSON array entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMappingEntryJson {
    pub pattern: String,
    pub upstream_model: String,
}

#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    pub provider_type: String,
    pub api_base: String,
    pub api_key: String,
    pub weight: i32,
    pub model_mapping: serde_json::Value,
    pub is_enabled: bool,
    pub anthropic_version: Option<String>,
    pub gcp_project: Option<String>,
    pub gcp_location: Option<String>,
    pub gcp_publisher: Option<String>,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub id: i64,
    pub name: String,
    pub key_hash: String,
    pub allowed_models: serde_json::Value,
    pub rate_limit_rps: Option<i32>,
    pub burst_size: Option<i32>,
    pub is_enabled: bool,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct StorageSnapshot {
    pub version: i64,
    pub installed_at: OffsetDateTime,
    pub providers: Vec<ProviderRow>,
    pub credentials: Vec<CredentialRow>,
}

/// Errors converting a raw DB row into the routing engine's in-memory
/// shape. The loader logs and skips rows that fail this rather than
/// aborting the whole reload — one malformed `model_mapping` blob must
/// not take the rest of the fleet offline.
#[derive(Debug, thiserror::Error)]
pub enum RowConversionError {
    #[error("unknown provider_type {0:?}")]
    UnknownProtocol(String),
    #[error("model_mapping is not a JSON array of {{pattern, upstream_model}}: {0}")]
    BadModelMapping(#[from] serde_json::Error),
}

pub fn provider_row_to_model(row: &ProviderRow) -> Result<Provider, RowConversionError> {
    let protocol = Protocol::parse(&row.provider_type)
        .ok_or_else(|| RowConversionError::UnknownProtocol(row.provider_type.clone()))?;
    let entries: Vec<ModelMappingEntryJson> = serde_json::from_value(row.model_mapping.clone())?;
    let model_map = entries
        .into_iter()
        .map(|entry| ModelMapEntry {
            pattern: CompiledPattern::compile(&entry.pattern),
            upstream_model: entry.upstream_model,
        })
        .collect();

    Ok(Provider {
        id: ProviderId(row.id),
        name: row.name.clone(),
        protocol,
        base_url: row.api_base.clone(),
        api_key: row.api_key.clone(),
        weight: row.weight.max(1) as u32,
        enabled: row.is_enabled,
        model_map,
        anthropic_version: row.anthropic_version.clone(),
        gcp_project: row.gcp_project.clone(),
        gcp_location: row.gcp_location.clone(),
        gcp_publisher: row.gcp_publisher.clone(),
    })
}

pub fn credential_row_to_model(row: &CredentialRow) -> Result<Credential, RowConversionError> {
    let patterns: Vec<String> = serde_json::from_value(row.allowed_models.clone())?;
    let allowed_models = patterns.iter().map(|p| CompiledPattern::compile(p)).collect();
    let rate_limit = row.rate_limit_rps.map(|rps| RateLimitSpec {
        requests_per_second: rps as f64,
        burst_size: row.burst_size.unwrap_or(0).max(0) as u32,
    });

    Ok(Credential {
        id: CredentialId(row.id),
        name: row.name.clone(),
        key_hash: row.key_hash.clone(),
        allowed_models,
        rate_limit,
        enabled: row.is_enabled,
    })
}

/// Converts a DB snapshot into the routing engine's `VersionedConfig`,
/// skipping (and logging) any row that fails to parse.
pub fn snapshot_to_versioned_config(snapshot: &StorageSnapshot) -> VersionedConfig {
    let providers = snapshot
        .providers
        .iter()
        .filter_map(|row| match provider_row_to_model(row) {
            Ok(provider) => Some(provider),
            Err(err) => {
                tracing::warn!(provider_id = row.id, error = %err, "skipping malformed provider row");
                None
            }
        })
        .collect();

    let credentials = snapshot
        .credentials
        .iter()
        .filter_map(|row| match credential_row_to_model(row) {
            Ok(credential) => Some(credential),
            Err(err) => {
                tracing::warn!(credential_id = row.id, error = %err, "skipping malformed credential row");
                None
            }
        })
        .collect();

    VersionedConfig {
        version: snapshot.version,
        installed_at: snapshot.installed_at,
        providers,
        credentials,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_row_parses_model_mapping() {
        let row = ProviderRow {
            id: 1,
            name: "p1".to_string(),
            provider_type: "openai".to_string(),
            api_base: "https://api.openai.com".to_string(),
            api_key: "sk-live".to_string(),
            weight: 2,
            model_mapping: serde_json::json!([{"pattern": "gpt-4", "upstream_model": "gpt-4-0613"}]),
            is_enabled: true,
            anthropic_version: None,
            gcp_project: None,
            gcp_location: None,
            gcp_publisher: None,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let provider = provider_row_to_model(&row).unwrap();
        assert_eq!(provider.resolve_model("gpt-4"), Some("gpt-4-0613"));
        assert_eq!(provider.weight, 2);
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let row = ProviderRow {
            id: 1,
            name: "p1".to_string(),
            provider_type: "made-up".to_string(),
            api_base: "https://api.example.com".to_string(),
            api_key: "sk-live".to_string(),
            weight: 1,
            model_mapping: serde_json::json!([]),
            is_enabled: true,
            anthropic_version: None,
            gcp_project: None,
            gcp_location: None,
            gcp_publisher: None,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(provider_row_to_model(&row).is_err());
    }

    #[test]
    fn malformed_snapshot_rows_are_skipped_not_fatal() {
        let snapshot = StorageSnapshot {
            version: 3,
            installed_at: OffsetDateTime::UNIX_EPOCH,
            providers: vec![ProviderRow {
                id: 1,
                name: "bad".to_string(),
                provider_type: "openai".to_string(),
                api_base: "https://api.example.com".to_string(),
                api_key: "sk-live".to_string(),
                weight: 1,
                model_mapping: serde_json::json!("not-an-array"),
                is_enabled: true,
                anthropic_version: None,
                gcp_project: None,
                gcp_location: None,
                gcp_publisher: None,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            }],
            credentials: Vec::new(),
        };

        let config = snapshot_to_versioned_config(&snapshot);
        assert!(config.providers.is_empty());
        assert_eq!(config.version, 3);
    }
}
