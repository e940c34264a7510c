use std::sync::Arc;
use std::time::Duration;

use gwcore_common::{GatewayError, GlobalConfig, GlobalConfigPatch};
use gwcore_engine::reload::{reload_once, spawn_reload_loop};
use gwcore_engine::state::AppState;
use gwcore_routing::{ConfigStore, RateLimiter};
use gwcore_storage::{SeaOrmStorage, Storage};

use crate::cli::CliArgs;

/// How often the background task re-reads storage for a newer
/// `config_version` (spec §4.1: polling, not push).
const RELOAD_INTERVAL: Duration = Duration::from_secs(5);

pub struct Bootstrap {
    pub state: Arc<AppState>,
    pub storage: Arc<SeaOrmStorage>,
}

/// Merges CLI/ENV into a `GlobalConfig` (clap already resolved CLI > ENV
/// precedence per field), connects storage, installs the first config
/// snapshot, and starts the background reload loop.
pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let global = build_global_config(&args)?;

    let storage = Arc::new(SeaOrmStorage::connect(&global.db_url).await?);
    storage.sync().await?;

    let config = Arc::new(ConfigStore::empty());
    let rate_limiter = Arc::new(RateLimiter::new());
    reload_once(storage.as_ref(), &config, &rate_limiter).await?;
    spawn_reload_loop(storage.clone(), config.clone(), rate_limiter.clone(), RELOAD_INTERVAL);

    let state = AppState::bootstrap(global, storage.clone(), config, rate_limiter, true).await?;

    Ok(Bootstrap { state, storage })
}

fn build_global_config(args: &CliArgs) -> anyhow::Result<GlobalConfig> {
    let mut patch = GlobalConfigPatch::default();
    patch.overlay(args.as_patch());

    if let Some(admin_key) = &args.admin_key {
        patch.admin_key_hash = Some(gwcore_common::hash_key(admin_key));
    }

    patch.into_config().map_err(|e| {
        tracing::error!(error = %e, "failed to assemble global config");
        anyhow::anyhow!(e)
    })
}

/// Applies `PROVIDER_SUFFIX` stripping to a client-requested model name
/// before it is matched against any provider's model map (spec §6). The
/// caller restores the caller's original, unstripped name in the
/// client-facing response regardless of which suffix-stripped name was
/// actually routed.
pub fn strip_provider_suffix<'a>(global: &GlobalConfig, requested_model: &'a str) -> &'a str {
    match &global.provider_suffix {
        Some(suffix) if !suffix.is_empty() => requested_model.strip_prefix(suffix.as_str()).unwrap_or(requested_model),
        _ => requested_model,
    }
}

pub fn internal(message: impl Into<String>) -> GatewayError {
    GatewayError::Internal(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_stripped_when_present() {
        let mut global = sample_global();
        global.provider_suffix = Some("openrouter/".to_string());
        assert_eq!(strip_provider_suffix(&global, "openrouter/gpt-4o"), "gpt-4o");
    }

    #[test]
    fn unmatched_suffix_leaves_model_untouched() {
        let mut global = sample_global();
        global.provider_suffix = Some("openrouter/".to_string());
        assert_eq!(strip_provider_suffix(&global, "gpt-4o"), "gpt-4o");
    }

    #[test]
    fn no_configured_suffix_is_a_no_op() {
        let global = sample_global();
        assert_eq!(strip_provider_suffix(&global, "gpt-4o"), "gpt-4o");
    }

    fn sample_global() -> GlobalConfig {
        GlobalConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            db_url: "sqlite::memory:".to_string(),
            admin_key_hash: None,
            verify_ssl: true,
            request_timeout_secs: 300,
            provider_suffix: None,
            jsonl_log_enabled: false,
            jsonl_log_path: None,
            jsonl_log_buffer_size: 1024,
            request_log_body_enabled: false,
            min_tokens_limit: 1,
            max_tokens_limit: 128_000,
        }
    }
}
