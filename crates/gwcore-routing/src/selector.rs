use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use gwcore_common::{GatewayError, ProviderId};
use rand::Rng;

use crate::config_store::ConfigStore;
use crate::model::Provider;

/// Liveness bookkeeping the selector consults when filtering eligible
/// providers. Feedback only ever marks a provider as temporarily
/// unhealthy; it never removes it from the snapshot and never changes its
/// weight (invariant 6 — feedback informs selection, it doesn't
/// exclude permanently or redefine the configured weights).
#[derive(Default)]
struct Health {
    /// Providers currently serving a 5xx/timeout/transport-error streak;
    /// cleared on the next successful response.
    unhealthy: HashSet<ProviderId>,
}

/// Provider Selector (spec §4.3): weighted-random pick among providers
/// whose model map resolves the requested model, restricted to enabled,
/// currently-healthy providers. Shaped after the pack's "filter eligible
/// then select" load balancer.
pub struct ProviderSelector {
    config: Arc<ConfigStore>,
    health: RwLock<Health>,
}

impl ProviderSelector {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            health: RwLock::new(Health::default()),
        }
    }

    fn is_eligible(&self, provider: &Provider, model: &str) -> bool {
        if !provider.enabled || !provider.supports_model(model) {
            return false;
        }
        let health = self.health.read().expect("selector health lock poisoned");
        !health.unhealthy.contains(&provider.id)
    }

    /// Picks one provider able to serve `model`, weighted by configured
    /// weight among eligible providers. Falls back to considering
    /// unhealthy providers eligible too if every matching provider is
    /// currently marked unhealthy, so a transient all-down state degrades
    /// rather than wedges (spec §4.3 edge case).
    pub fn pick(&self, model: &str) -> Result<Provider, GatewayError> {
        let snapshot = self.config.current();
        let matching: Vec<&Provider> = snapshot
            .providers
            .iter()
            .filter(|p| p.enabled && p.supports_model(model))
            .collect();

        if matching.is_empty() {
            return Err(GatewayError::NoProviderForModel {
                model: model.to_string(),
            });
        }

        let mut eligible: Vec<&Provider> = matching
            .iter()
            .copied()
            .filter(|p| self.is_eligible(p, model))
            .collect();
        if eligible.is_empty() {
            eligible = matching;
        }

        weighted_pick(&eligible)
            .cloned()
            .ok_or_else(|| GatewayError::NoEligibleProvider {
                model: model.to_string(),
            })
    }

    /// Picks any enabled provider regardless of model, for health-check /
    /// admin-style probes that don't target a specific model.
    pub fn pick_any(&self) -> Option<Provider> {
        let snapshot = self.config.current();
        let enabled: Vec<&Provider> = snapshot.providers.iter().filter(|p| p.enabled).collect();
        weighted_pick(&enabled).cloned()
    }

    pub fn report_http_status(&self, provider_id: ProviderId, status: u16, _retry_after: Option<u64>) {
        let mut health = self.health.write().expect("selector health lock poisoned");
        if status >= 500 {
            health.unhealthy.insert(provider_id);
        } else {
            health.unhealthy.remove(&provider_id);
        }
    }

    pub fn report_transport_error(&self, provider_id: ProviderId) {
        let mut health = self.health.write().expect("selector health lock poisoned");
        health.unhealthy.insert(provider_id);
    }

    pub fn report_success(&self, provider_id: ProviderId) {
        let mut health = self.health.write().expect("selector health lock poisoned");
        health.unhealthy.remove(&provider_id);
    }

    pub fn all_models(&self) -> Vec<String> {
        self.config.current().all_exact_models()
    }

    /// `(provider, currently_marked_unhealthy)` for every enabled provider
    /// in the current snapshot, for the `/health/detailed` probe.
    pub fn health_snapshot(&self) -> Vec<(Provider, bool)> {
        let snapshot = self.config.current();
        let health = self.health.read().expect("selector health lock poisoned");
        snapshot
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.clone(), health.unhealthy.contains(&p.id)))
            .collect()
    }
}

fn weighted_pick<'p>(providers: &[&'p Provider]) -> Option<&'p Provider> {
    if providers.is_empty() {
        return None;
    }
    let total_weight: u64 = providers.iter().map(|p| p.weight.max(1) as u64).sum();
    if total_weight == 0 {
        return providers.first().copied();
    }
    let mut roll = rand::rng().random_range(0..total_weight);
    for provider in providers {
        let weight = provider.weight.max(1) as u64;
        if roll < weight {
            return Some(provider);
        }
        roll -= weight;
    }
    providers.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelMapEntry, VersionedConfig};
    use crate::pattern::CompiledPattern;
    use gwcore_protocol::Protocol;
    use std::collections::HashMap;

    fn provider(id: i64, weight: u32) -> Provider {
        Provider {
            id: ProviderId(id),
            name: format!("p{id}"),
            protocol: Protocol::OpenAi,
            base_url: "https://api.example.com".to_string(),
            api_key: "key".to_string(),
            weight,
            enabled: true,
            model_map: vec![ModelMapEntry {
                pattern: CompiledPattern::compile("gpt-4o"),
                upstream_model: "gpt-4o".to_string(),
            }],
            anthropic_version: None,
            gcp_project: None,
            gcp_location: None,
            gcp_publisher: None,
        }
    }

    #[test]
    fn no_matching_provider_is_not_found() {
        let config = Arc::new(ConfigStore::empty());
        let selector = ProviderSelector::new(config);
        let err = selector.pick("gpt-4o").unwrap_err();
        assert!(matches!(err, GatewayError::NoProviderForModel { .. }));
    }

    #[test]
    fn weighted_selection_distribution_is_proportional() {
        let config = Arc::new(ConfigStore::new(VersionedConfig {
            version: 1,
            installed_at: time::OffsetDateTime::UNIX_EPOCH,
            providers: vec![provider(1, 2), provider(2, 1)],
            credentials: Vec::new(),
        }));
        let selector = ProviderSelector::new(config);

        let mut counts: HashMap<i64, u32> = HashMap::new();
        for _ in 0..3000 {
            let picked = selector.pick("gpt-4o").unwrap();
            *counts.entry(picked.id.0).or_insert(0) += 1;
        }

        let c1 = *counts.get(&1).unwrap_or(&0);
        let c2 = *counts.get(&2).unwrap_or(&0);
        assert!((1800..=2200).contains(&c1), "p1 count out of range: {c1}");
        assert!((800..=1200).contains(&c2), "p2 count out of range: {c2}");
    }

    #[test]
    fn unhealthy_provider_is_skipped_unless_it_is_the_only_option() {
        let config = Arc::new(ConfigStore::new(VersionedConfig {
            version: 1,
            installed_at: time::OffsetDateTime::UNIX_EPOCH,
            providers: vec![provider(1, 1), provider(2, 1)],
            credentials: Vec::new(),
        }));
        let selector = ProviderSelector::new(config);
        selector.report_http_status(ProviderId(1), 500, None);

        for _ in 0..50 {
            let picked = selector.pick("gpt-4o").unwrap();
            assert_eq!(picked.id, ProviderId(2));
        }
    }

    #[test]
    fn all_providers_unhealthy_degrades_instead_of_erroring() {
        let config = Arc::new(ConfigStore::new(VersionedConfig {
            version: 1,
            installed_at: time::OffsetDateTime::UNIX_EPOCH,
            providers: vec![provider(1, 1)],
            credentials: Vec::new(),
        }));
        let selector = ProviderSelector::new(config);
        selector.report_http_status(ProviderId(1), 500, None);

        let picked = selector.pick("gpt-4o").unwrap();
        assert_eq!(picked.id, ProviderId(1));
    }

    #[test]
    fn health_snapshot_reflects_reported_status() {
        let config = Arc::new(ConfigStore::new(VersionedConfig {
            version: 1,
            installed_at: time::OffsetDateTime::UNIX_EPOCH,
            providers: vec![provider(1, 1), provider(2, 1)],
            credentials: Vec::new(),
        }));
        let selector = ProviderSelector::new(config);
        selector.report_http_status(ProviderId(1), 500, None);

        let snapshot = selector.health_snapshot();
        let p1 = snapshot.iter().find(|(p, _)| p.id == ProviderId(1)).unwrap();
        let p2 = snapshot.iter().find(|(p, _)| p.id == ProviderId(2)).unwrap();
        assert!(p1.1);
        assert!(!p2.1);
    }

    #[test]
    fn feedback_never_changes_configured_weight() {
        let config = Arc::new(ConfigStore::new(VersionedConfig {
            version: 1,
            installed_at: time::OffsetDateTime::UNIX_EPOCH,
            providers: vec![provider(1, 5)],
            credentials: Vec::new(),
        }));
        let selector = ProviderSelector::new(config);
        selector.report_http_status(ProviderId(1), 500, None);
        selector.report_success(ProviderId(1));

        let picked = selector.pick("gpt-4o").unwrap();
        assert_eq!(picked.weight, 5);
    }
}
