use std::sync::Arc;
use std::time::Duration;

use gwcore_routing::{ConfigStore, RateLimiter};
use gwcore_storage::{snapshot_to_versioned_config, Storage};

/// Loads the current snapshot from storage and installs it into the
/// Config Store, skipping the install entirely if the store's version
/// already matches, so a reload with nothing changed is a no-op. Once a
/// newer snapshot is installed, `rate_limiter` is swept of bookkeeping for
/// any credential id no longer present, reclaiming a disabled/removed
/// credential's sliding-window state (spec §9 Open Question, resolved in
/// DESIGN.md: lazy reclaim on the next reload that drops the credential).
pub async fn reload_once(storage: &dyn Storage, config: &ConfigStore, rate_limiter: &RateLimiter) -> anyhow::Result<bool> {
    let snapshot = storage.load_snapshot().await?;
    if snapshot.version == config.version() {
        return Ok(false);
    }
    let next = snapshot_to_versioned_config(&snapshot);
    let known_ids: std::collections::HashSet<_> = next.credentials.iter().map(|c| c.id).collect();
    config.install(next).await;
    rate_limiter.retain_known(|id| known_ids.contains(id));
    Ok(true)
}

/// Background task polling storage for a newer config version at a fixed
/// interval. This is how the admin surface's writes become visible to
/// every request-handling task without a direct call between them:
/// polling a shared store rather than pushing change notifications.
pub fn spawn_reload_loop(
    storage: Arc<dyn Storage>,
    config: Arc<ConfigStore>,
    rate_limiter: Arc<RateLimiter>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match reload_once(storage.as_ref(), config.as_ref(), rate_limiter.as_ref()).await {
                Ok(true) => tracing::info!(version = config.version(), "installed new config snapshot"),
                Ok(false) => {}
                Err(err) => tracing::warn!(error = %err, "config reload failed, keeping previous snapshot"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwcore_storage::storage::{CredentialInput, ProviderInput};
    use gwcore_storage::SeaOrmStorage;

    async fn sqlite_storage() -> SeaOrmStorage {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        storage.sync().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn reload_installs_a_newer_snapshot_once() {
        let storage = sqlite_storage().await;
        storage
            .upsert_provider(ProviderInput {
                id: None,
                name: "p1".to_string(),
                provider_type: "openai".to_string(),
                api_base: "https://api.openai.com".to_string(),
                api_key: "sk-live".to_string(),
                weight: 1,
                model_mapping: serde_json::json!([{"pattern": "gpt-4", "upstream_model": "gpt-4-0613"}]),
                is_enabled: true,
                anthropic_version: None,
                gcp_project: None,
                gcp_location: None,
                gcp_publisher: None,
            })
            .await
            .unwrap();

        let config = ConfigStore::empty();
        let rate_limiter = RateLimiter::new();
        let changed = reload_once(&storage, &config, &rate_limiter).await.unwrap();
        assert!(changed);
        assert_eq!(config.current().providers.len(), 1);

        let changed_again = reload_once(&storage, &config, &rate_limiter).await.unwrap();
        assert!(!changed_again);
    }

    #[tokio::test]
    async fn reload_picks_up_credentials_too() {
        let storage = sqlite_storage().await;
        storage
            .upsert_credential(CredentialInput {
                id: None,
                name: "k1".to_string(),
                key_hash: "hash".to_string(),
                allowed_models: serde_json::json!([]),
                rate_limit_rps: None,
                burst_size: None,
                is_enabled: true,
            })
            .await
            .unwrap();

        let config = ConfigStore::empty();
        let rate_limiter = RateLimiter::new();
        reload_once(&storage, &config, &rate_limiter).await.unwrap();
        assert_eq!(config.current().credentials.len(), 1);
    }

    #[tokio::test]
    async fn reload_drops_rate_limiter_state_for_removed_credentials() {
        let storage = sqlite_storage().await;
        let cred_id = storage
            .upsert_credential(CredentialInput {
                id: None,
                name: "k1".to_string(),
                key_hash: "hash".to_string(),
                allowed_models: serde_json::json!([]),
                rate_limit_rps: None,
                burst_size: None,
                is_enabled: true,
            })
            .await
            .unwrap();

        let config = ConfigStore::empty();
        let rate_limiter = RateLimiter::new();
        reload_once(&storage, &config, &rate_limiter).await.unwrap();

        let credential_id = gwcore_common::CredentialId(cred_id);
        let spec = gwcore_routing::model::RateLimitSpec {
            requests_per_second: 1.0,
            burst_size: 0,
        };
        assert!(rate_limiter.check(credential_id, &spec, std::time::Instant::now()));

        storage.delete_credential(cred_id).await.unwrap();
        reload_once(&storage, &config, &rate_limiter).await.unwrap();

        // the stale entry was swept, so a fresh check for the same id
        // starts a new window rather than inheriting the old hit.
        assert!(rate_limiter.check(credential_id, &spec, std::time::Instant::now()));
    }
}
