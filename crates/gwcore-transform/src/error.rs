#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("malformed request body: {0}")]
    InvalidRequest(String),
    #[error("malformed upstream response body: {0}")]
    InvalidResponse(String),
    #[error("serialization failure: {0}")]
    Encode(#[from] serde_json::Error),
}
