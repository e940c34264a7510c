use gwcore_common::{CredentialId, ProviderId};
use gwcore_protocol::Protocol;

use crate::pattern::CompiledPattern;

/// One client-facing model name/pattern → upstream model name mapping
/// entry, in the order the Provider declared it.
#[derive(Debug, Clone)]
pub struct ModelMapEntry {
    pub pattern: CompiledPattern,
    pub upstream_model: String,
}

#[derive(Debug, Clone)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub protocol: Protocol,
    pub base_url: String,
    pub api_key: String,
    pub weight: u32,
    pub enabled: bool,
    pub model_map: Vec<ModelMapEntry>,
    pub anthropic_version: Option<String>,
    pub gcp_project: Option<String>,
    pub gcp_location: Option<String>,
    pub gcp_publisher: Option<String>,
}

impl Provider {
    /// Resolve a client-facing model name against this provider's model
    /// map: an exact entry wins regardless of position; otherwise the
    /// first matching pattern entry in declaration order (invariant 2).
    pub fn resolve_model(&self, requested: &str) -> Option<&str> {
        if let Some(entry) = self
            .model_map
            .iter()
            .find(|entry| entry.pattern.is_literal() && entry.pattern.matches(requested))
        {
            return Some(entry.upstream_model.as_str());
        }
        self.model_map
            .iter()
            .find(|entry| !entry.pattern.is_literal() && entry.pattern.matches(requested))
            .map(|entry| entry.upstream_model.as_str())
    }

    pub fn supports_model(&self, requested: &str) -> bool {
        self.resolve_model(requested).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitSpec {
    pub requests_per_second: f64,
    pub burst_size: u32,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub id: CredentialId,
    pub name: String,
    pub key_hash: String,
    pub allowed_models: Vec<CompiledPattern>,
    pub rate_limit: Option<RateLimitSpec>,
    pub enabled: bool,
}

impl Credential {
    /// Empty allowed-models list means "all".
    pub fn allows_model(&self, requested: &str) -> bool {
        if self.allowed_models.is_empty() {
            return true;
        }
        if let Some(entry) = self
            .allowed_models
            .iter()
            .find(|p| p.is_literal() && p.matches(requested))
        {
            let _ = entry;
            return true;
        }
        self.allowed_models
            .iter()
            .any(|p| !p.is_literal() && p.matches(requested))
    }
}

/// An immutable `(version, timestamp, providers, credentials)` tuple,
/// atomically installed by the Config Store's reload (spec §3, invariant
/// 1 & 4).
#[derive(Debug, Clone)]
pub struct VersionedConfig {
    pub version: i64,
    pub installed_at: time::OffsetDateTime,
    pub providers: Vec<Provider>,
    pub credentials: Vec<Credential>,
}

impl VersionedConfig {
    pub fn empty() -> Self {
        Self {
            version: 0,
            installed_at: time::OffsetDateTime::UNIX_EPOCH,
            providers: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn find_credential_by_hash(&self, hash: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.key_hash == hash)
    }

    /// Union of exact-match keys across all enabled providers; patterns
    /// are excluded from the listing (spec open question: exact-keys-only).
    pub fn all_exact_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .providers
            .iter()
            .filter(|p| p.enabled)
            .flat_map(|p| p.model_map.iter())
            .filter(|entry| entry.pattern.is_literal())
            .map(|entry| entry.pattern.source().to_string())
            .collect();
        models.sort();
        models.dedup();
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pattern: &str, upstream: &str) -> ModelMapEntry {
        ModelMapEntry {
            pattern: CompiledPattern::compile(pattern),
            upstream_model: upstream.to_string(),
        }
    }

    fn provider_with(entries: Vec<ModelMapEntry>) -> Provider {
        Provider {
            id: ProviderId(1),
            name: "p1".to_string(),
            protocol: Protocol::OpenAi,
            base_url: "https://api.example.com".to_string(),
            api_key: "secret".to_string(),
            weight: 1,
            enabled: true,
            model_map: entries,
            anthropic_version: None,
            gcp_project: None,
            gcp_location: None,
            gcp_publisher: None,
        }
    }

    #[test]
    fn exact_match_wins_over_earlier_pattern() {
        let provider = provider_with(vec![
            entry("gpt-*", "gpt-wild"),
            entry("gpt-4", "gpt-4-0613"),
        ]);
        assert_eq!(provider.resolve_model("gpt-4"), Some("gpt-4-0613"));
    }

    #[test]
    fn falls_back_to_first_matching_pattern_in_order() {
        let provider = provider_with(vec![
            entry("gpt-3*", "gpt-3-upstream"),
            entry("gpt-*", "gpt-wild"),
        ]);
        assert_eq!(provider.resolve_model("gpt-4"), Some("gpt-wild"));
    }

    #[test]
    fn empty_allowed_models_means_all() {
        let cred = Credential {
            id: CredentialId(1),
            name: "k1".to_string(),
            key_hash: "hash".to_string(),
            allowed_models: Vec::new(),
            rate_limit: None,
            enabled: true,
        };
        assert!(cred.allows_model("anything"));
    }
}
