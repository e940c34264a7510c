use clap::Parser;

use gwcore_common::GlobalConfigPatch;

/// Process configuration, one field per recognized environment variable
/// (spec §6). `clap`'s `env` feature gives CLI flags precedence over the
/// environment automatically; the remaining precedence step (CLI/ENV over
/// whatever is persisted in the `config_version` row) happens in
/// `bootstrap::merge_global_config`.
#[derive(Debug, Clone, Parser)]
#[command(name = "gatewayd", version, about = "Multi-protocol LLM API gateway")]
pub struct CliArgs {
    #[arg(long, env = "DB_URL")]
    pub db_url: Option<String>,

    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "VERIFY_SSL")]
    pub verify_ssl: Option<bool>,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Plaintext admin key. Hashed immediately after parsing; never kept
    /// around or logged in plaintext past bootstrap.
    #[arg(long, env = "ADMIN_KEY")]
    pub admin_key: Option<String>,

    #[arg(long, env = "PROVIDER_SUFFIX")]
    pub provider_suffix: Option<String>,

    #[arg(long, env = "JSONL_LOG_ENABLED")]
    pub jsonl_log_enabled: Option<bool>,

    #[arg(long, env = "JSONL_LOG_PATH")]
    pub jsonl_log_path: Option<String>,

    #[arg(long, env = "JSONL_LOG_BUFFER_SIZE")]
    pub jsonl_log_buffer_size: Option<usize>,

    #[arg(long, env = "REQUEST_LOG_BODY_ENABLED")]
    pub request_log_body_enabled: Option<bool>,
}

impl CliArgs {
    /// Builds the CLI/ENV layer of the config-merge patch. Does not yet
    /// know about `admin_key_hash` — that's resolved by the bootstrap
    /// module once a persisted hash (or the need to mint one) is known.
    pub fn as_patch(&self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            db_url: self.db_url.clone(),
            admin_key_hash: None,
            verify_ssl: self.verify_ssl,
            request_timeout_secs: self.request_timeout_secs,
            provider_suffix: self.provider_suffix.clone(),
            jsonl_log_enabled: self.jsonl_log_enabled,
            jsonl_log_path: self.jsonl_log_path.clone(),
            jsonl_log_buffer_size: self.jsonl_log_buffer_size,
            request_log_body_enabled: self.request_log_body_enabled,
            min_tokens_limit: None,
            max_tokens_limit: None,
        }
    }
}
