use std::sync::Arc;
use std::time::Instant;

use gwcore_common::{hash_key, CredentialId, GatewayError};

use crate::config_store::ConfigStore;
use crate::rate_limiter::RateLimiter;

/// The authenticated identity attached to a request once the gate passes.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub credential_id: CredentialId,
    pub credential_name: String,
    /// Set when the store has zero credentials configured and the gate
    /// fell back to open-mode bootstrap (spec §4.2 step 1).
    pub is_bootstrap: bool,
}

/// Extracts a raw API key from `Authorization: Bearer <key>` or
/// `x-api-key: <key>`, matching the header precedence the teacher's
/// `extract_api_key` helper used. `header` is a case-insensitive lookup
/// supplied by the caller so this crate stays independent of any
/// particular HTTP server framework's header map type.
pub fn extract_api_key<'a>(header: impl Fn(&str) -> Option<&'a str>) -> Option<String> {
    if let Some(value) = header("authorization") {
        if let Some(key) = value.strip_prefix("Bearer ") {
            return Some(key.trim().to_string());
        }
    }
    header("x-api-key").map(|v| v.trim().to_string())
}

/// Credential Gate (spec §4.2): authenticates a request against the
/// current config snapshot, consults the rate limiter, and checks the
/// requested model against the credential's allow-list.
pub struct CredentialGate {
    config: Arc<ConfigStore>,
    rate_limiter: Arc<RateLimiter>,
}

impl CredentialGate {
    pub fn new(config: Arc<ConfigStore>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            config,
            rate_limiter,
        }
    }

    /// Runs the full 6-step algorithm and returns the authenticated
    /// identity, or the `GatewayError` to report to the client.
    pub fn authenticate(
        &self,
        raw_key: Option<String>,
        requested_model: &str,
        now: Instant,
    ) -> Result<AuthContext, GatewayError> {
        let snapshot = self.config.current();

        // Step 1: open-mode bootstrap. Zero configured credentials means
        // the gateway has not been provisioned yet; every request is
        // admitted as an implicit bootstrap identity so the admin surface
        // can be reached to create the first real credential.
        if snapshot.credentials.is_empty() {
            return Ok(AuthContext {
                credential_id: CredentialId(0),
                credential_name: "bootstrap".to_string(),
                is_bootstrap: true,
            });
        }

        // Step 2/3: extract and hash-compare the presented key.
        let raw_key = raw_key.ok_or(GatewayError::MissingCredential)?;
        let hash = hash_key(&raw_key);
        let credential = snapshot
            .find_credential_by_hash(&hash)
            .ok_or(GatewayError::InvalidCredential)?;

        if !credential.enabled {
            return Err(GatewayError::CredentialDisabled);
        }

        // Step 4: rate limit.
        if let Some(spec) = &credential.rate_limit {
            if !self.rate_limiter.check(credential.id, spec, now) {
                return Err(GatewayError::RateLimited {
                    retry_after_secs: Some(1),
                });
            }
        }

        // Step 5: model allow-list.
        if !credential.allows_model(requested_model) {
            return Err(GatewayError::ModelNotAllowed {
                model: requested_model.to_string(),
            });
        }

        // Step 6: identity.
        Ok(AuthContext {
            credential_id: credential.id,
            credential_name: credential.name.clone(),
            is_bootstrap: false,
        })
    }

    /// Steps 1-4 and 6 of §4.2, without step 5's per-model allow-list
    /// check. Used by listing-style endpoints (`/v1/models`, health
    /// probes) that authenticate a caller without targeting one model.
    pub fn authenticate_any_model(&self, raw_key: Option<String>, now: Instant) -> Result<AuthContext, GatewayError> {
        let snapshot = self.config.current();

        if snapshot.credentials.is_empty() {
            return Ok(AuthContext {
                credential_id: CredentialId(0),
                credential_name: "bootstrap".to_string(),
                is_bootstrap: true,
            });
        }

        let raw_key = raw_key.ok_or(GatewayError::MissingCredential)?;
        let hash = hash_key(&raw_key);
        let credential = snapshot
            .find_credential_by_hash(&hash)
            .ok_or(GatewayError::InvalidCredential)?;

        if !credential.enabled {
            return Err(GatewayError::CredentialDisabled);
        }

        if let Some(spec) = &credential.rate_limit {
            if !self.rate_limiter.check(credential.id, spec, now) {
                return Err(GatewayError::RateLimited {
                    retry_after_secs: Some(1),
                });
            }
        }

        Ok(AuthContext {
            credential_id: credential.id,
            credential_name: credential.name.clone(),
            is_bootstrap: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credential, RateLimitSpec, VersionedConfig};

    fn config_with(credential: Credential) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::new(VersionedConfig {
            version: 1,
            installed_at: time::OffsetDateTime::UNIX_EPOCH,
            providers: Vec::new(),
            credentials: vec![credential],
        }))
    }

    fn credential(raw_key: &str) -> Credential {
        Credential {
            id: CredentialId(1),
            name: "test-key".to_string(),
            key_hash: hash_key(raw_key),
            allowed_models: Vec::new(),
            rate_limit: None,
            enabled: true,
        }
    }

    #[test]
    fn bearer_prefix_is_extracted() {
        let headers = [("authorization", "Bearer sk-live-abc")];
        let lookup = |name: &str| headers.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
        assert_eq!(extract_api_key(lookup), Some("sk-live-abc".to_string()));
    }

    #[test]
    fn x_api_key_header_is_used_when_no_bearer() {
        let headers = [("x-api-key", "sk-live-xyz")];
        let lookup = |name: &str| headers.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
        assert_eq!(extract_api_key(lookup), Some("sk-live-xyz".to_string()));
    }

    #[test]
    fn zero_credentials_bootstraps_every_request() {
        let config = Arc::new(ConfigStore::empty());
        let limiter = Arc::new(RateLimiter::new());
        let gate = CredentialGate::new(config, limiter);

        let ctx = gate.authenticate(None, "gpt-4o", Instant::now()).unwrap();
        assert!(ctx.is_bootstrap);
    }

    #[test]
    fn wrong_key_is_rejected_once_credentials_exist() {
        let config = config_with(credential("sk-live-real"));
        let limiter = Arc::new(RateLimiter::new());
        let gate = CredentialGate::new(config, limiter);

        let err = gate
            .authenticate(Some("sk-live-wrong".to_string()), "gpt-4o", Instant::now())
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredential));
    }

    #[test]
    fn disabled_credential_is_rejected() {
        let mut cred = credential("sk-live-real");
        cred.enabled = false;
        let config = config_with(cred);
        let limiter = Arc::new(RateLimiter::new());
        let gate = CredentialGate::new(config, limiter);

        let err = gate
            .authenticate(Some("sk-live-real".to_string()), "gpt-4o", Instant::now())
            .unwrap_err();
        assert!(matches!(err, GatewayError::CredentialDisabled));
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn model_outside_allow_list_is_forbidden() {
        let mut cred = credential("sk-live-real");
        cred.allowed_models = vec![crate::pattern::CompiledPattern::compile("claude-*")];
        let config = config_with(cred);
        let limiter = Arc::new(RateLimiter::new());
        let gate = CredentialGate::new(config, limiter);

        let err = gate
            .authenticate(Some("sk-live-real".to_string()), "gpt-4o", Instant::now())
            .unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotAllowed { .. }));
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn authenticate_any_model_skips_the_allow_list_check() {
        let mut cred = credential("sk-live-real");
        cred.allowed_models = vec![crate::pattern::CompiledPattern::compile("claude-*")];
        let config = config_with(cred);
        let limiter = Arc::new(RateLimiter::new());
        let gate = CredentialGate::new(config, limiter);

        let ctx = gate
            .authenticate_any_model(Some("sk-live-real".to_string()), Instant::now())
            .unwrap();
        assert!(!ctx.is_bootstrap);
    }

    #[test]
    fn rate_limit_exceeded_surfaces_as_rate_limited() {
        let mut cred = credential("sk-live-real");
        cred.rate_limit = Some(RateLimitSpec {
            requests_per_second: 1.0,
            burst_size: 0,
        });
        let config = config_with(cred);
        let limiter = Arc::new(RateLimiter::new());
        let gate = CredentialGate::new(config, limiter);
        let now = Instant::now();

        gate.authenticate(Some("sk-live-real".to_string()), "gpt-4o", now)
            .unwrap();
        let err = gate
            .authenticate(Some("sk-live-real".to_string()), "gpt-4o", now)
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }
}
