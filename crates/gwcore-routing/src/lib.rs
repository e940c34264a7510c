pub mod config_store;
pub mod credential_gate;
pub mod model;
pub mod pattern;
pub mod rate_limiter;
pub mod selector;

pub use config_store::ConfigStore;
pub use credential_gate::{extract_api_key, AuthContext, CredentialGate};
pub use model::{Credential, ModelMapEntry, Provider, RateLimitSpec, VersionedConfig};
pub use pattern::CompiledPattern;
pub use rate_limiter::RateLimiter;
pub use selector::ProviderSelector;
