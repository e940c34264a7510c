use serde::Serialize;

/// Error taxonomy shared by every layer of the gateway. Each variant knows
/// its own HTTP status and the wire error `type` string each client
/// protocol expects in its error envelope.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("credential disabled")]
    CredentialDisabled,
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("model {model} is not on this credential's allow-list")]
    ModelNotAllowed { model: String },
    #[error("no provider configured for model {model}")]
    NoProviderForModel { model: String },
    #[error("all providers for model {model} are disabled or unreachable")]
    NoEligibleProvider { model: String },
    #[error("malformed request body: {0}")]
    BadRequest(String),
    #[error("client disconnected before the response completed")]
    ClientDisconnect,
    #[error("upstream provider error: {message}")]
    Upstream {
        status: u16,
        message: String,
        error_type: String,
        retry_after_secs: Option<u64>,
    },
    #[error("upstream request timed out")]
    UpstreamTimeout,
    #[error("upstream transport failure: {0}")]
    UpstreamTransport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status this error should be reported with on the inbound side.
    pub fn status(&self) -> u16 {
        match self {
            // Spec §4.2 step 3: a disabled credential is rejected the same
            // way as an unknown one ("Reject unauthorized if not found or
            // credential is disabled"), so this is a 401, not a 403.
            GatewayError::MissingCredential
            | GatewayError::InvalidCredential
            | GatewayError::CredentialDisabled => 401,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::ModelNotAllowed { .. } => 403,
            // The route exists, the named model just has no backing
            // provider in the current snapshot, so this is a 400 rather
            // than a 404.
            GatewayError::NoProviderForModel { .. } => 400,
            GatewayError::NoEligibleProvider { .. } => 503,
            GatewayError::BadRequest(_) => 400,
            GatewayError::Upstream { status, .. } => *status,
            GatewayError::UpstreamTimeout => 504,
            GatewayError::UpstreamTransport(_) => 502,
            GatewayError::ClientDisconnect => 408,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Wire `type` tag, independent of which client protocol renders the
    /// final envelope (each protocol transform maps this onto its own
    /// error shape).
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::MissingCredential
            | GatewayError::InvalidCredential
            | GatewayError::CredentialDisabled => "authentication_error",
            GatewayError::RateLimited { .. } => "rate_limit_error",
            GatewayError::ModelNotAllowed { .. } => "forbidden",
            GatewayError::NoProviderForModel { .. } => "invalid_request_error",
            GatewayError::NoEligibleProvider { .. } => "overloaded_error",
            GatewayError::BadRequest(_) => "invalid_request_error",
            GatewayError::Upstream { error_type, .. } => {
                // Leaked upstream error types are not 'static; callers that need
                // the exact string should match on `Upstream` directly.
                let _ = error_type;
                "upstream_error"
            }
            GatewayError::UpstreamTimeout => "timeout_error",
            GatewayError::UpstreamTransport(_) => "api_connection_error",
            GatewayError::ClientDisconnect => "request_timeout",
            GatewayError::Internal(_) => "api_error",
        }
    }

    /// Spec §9 Open Question, resolved: an upstream `Retry-After` is
    /// surfaced to the client unchanged when present (see DESIGN.md).
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_secs } => *retry_after_secs,
            GatewayError::Upstream { retry_after_secs, .. } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Minimal `{"error": {...}}` body, protocol-neutral; each client-facing
/// transform wraps or relabels this as its own error envelope before
/// writing the response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        ErrorBody {
            error: ErrorDetail {
                kind: err.error_type().to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_429_with_retry_after() {
        let err = GatewayError::RateLimited {
            retry_after_secs: Some(3),
        };
        assert_eq!(err.status(), 429);
        assert_eq!(err.retry_after_secs(), Some(3));
    }

    #[test]
    fn no_eligible_provider_is_503() {
        let err = GatewayError::NoEligibleProvider {
            model: "gpt-4o".to_string(),
        };
        assert_eq!(err.status(), 503);
    }

    #[test]
    fn upstream_error_surfaces_retry_after_unchanged() {
        let err = GatewayError::Upstream {
            status: 429,
            message: "rate limited upstream".to_string(),
            error_type: "rate_limit_error".to_string(),
            retry_after_secs: Some(12),
        };
        assert_eq!(err.status(), 429);
        assert_eq!(err.retry_after_secs(), Some(12));
    }
}
