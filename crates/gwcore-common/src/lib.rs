pub mod config;
pub mod error;
pub mod ids;
pub mod secret;

pub use config::{GlobalConfig, GlobalConfigError, GlobalConfigPatch};
pub use error::{ErrorBody, ErrorDetail, GatewayError};
pub use ids::{CredentialId, ProviderId, RequestId};
pub use secret::{hash_key, mask_headers};
