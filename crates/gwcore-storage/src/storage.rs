use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait, QueryOrder, Schema};
use time::OffsetDateTime;

use crate::db::connect_shared;
use crate::entities;
use crate::snapshot::{CredentialRow, ProviderRow, StorageSnapshot};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ProviderInput {
    pub id: Option<i64>,
    pub name: String,
    pub provider_type: String,
    pub api_base: String,
    pub api_key: String,
    pub weight: i32,
    pub model_mapping: serde_json::Value,
    pub is_enabled: bool,
    pub anthropic_version: Option<String>,
    pub gcp_project: Option<String>,
    pub gcp_location: Option<String>,
    pub gcp_publisher: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialInput {
    pub id: Option<i64>,
    pub name: String,
    pub key_hash: String,
    pub allowed_models: serde_json::Value,
    pub rate_limit_rps: Option<i32>,
    pub burst_size: Option<i32>,
    pub is_enabled: bool,
}

/// Persistence boundary. Runtime request handling never touches this
/// trait directly — it reads from the in-memory `VersionedConfig`
/// snapshot the Config Store holds. This is consulted only at bootstrap,
/// on reload, by the admin surface, and by the traffic-log writer.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn sync(&self) -> StorageResult<()>;
    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;
    async fn current_version(&self) -> StorageResult<i64>;
    async fn bump_version(&self) -> StorageResult<i64>;

    async fn upsert_provider(&self, input: ProviderInput) -> StorageResult<i64>;
    async fn delete_provider(&self, id: i64) -> StorageResult<()>;

    async fn upsert_credential(&self, input: CredentialInput) -> StorageResult<i64>;
    async fn delete_credential(&self, id: i64) -> StorageResult<()>;
}

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(database_url: &str) -> Result<Self, sea_orm::DbErr> {
        let db = connect_shared(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::Credentials)
            .register(entities::ConfigVersion)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let version = self.current_version().await?;

        let providers = entities::Providers::find().all(&self.db).await?;
        let credentials = entities::Credentials::find().all(&self.db).await?;

        Ok(StorageSnapshot {
            version,
            installed_at: OffsetDateTime::now_utc(),
            providers: providers
                .into_iter()
                .map(|m| ProviderRow {
                    id: m.id,
                    name: m.name,
                    provider_type: m.provider_type,
                    api_base: m.api_base,
                    api_key: m.api_key,
                    weight: m.weight,
                    model_mapping: m.model_mapping,
                    is_enabled: m.is_enabled,
                    anthropic_version: m.anthropic_version,
                    gcp_project: m.gcp_project,
                    gcp_location: m.gcp_location,
                    gcp_publisher: m.gcp_publisher,
                    updated_at: m.updated_at,
                })
                .collect(),
            credentials: credentials
                .into_iter()
                .map(|m| CredentialRow {
                    id: m.id,
                    name: m.name,
                    key_hash: m.key_hash,
                    allowed_models: m.allowed_models,
                    rate_limit_rps: m.rate_limit_rps,
                    burst_size: m.burst_size,
                    is_enabled: m.is_enabled,
                    updated_at: m.updated_at,
                })
                .collect(),
        })
    }

    async fn current_version(&self) -> StorageResult<i64> {
        let row = entities::ConfigVersion::find()
            .order_by_desc(entities::config_version::Column::Id)
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.version).unwrap_or(0))
    }

    async fn bump_version(&self) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let next = self.current_version().await? + 1;
        let active = entities::config_version::ActiveModel {
            id: ActiveValue::Set(1),
            version: ActiveValue::Set(next),
            updated_at: ActiveValue::Set(now),
        };
        entities::ConfigVersion::insert(active)
            .on_conflict(
                OnConflict::column(entities::config_version::Column::Id)
                    .update_columns([
                        entities::config_version::Column::Version,
                        entities::config_version::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(next)
    }

    async fn upsert_provider(&self, input: ProviderInput) -> StorageResult<i64> {
        use entities::providers::Column;
        let now = OffsetDateTime::now_utc();
        let input_id = input.id;
        let active = entities::providers::ActiveModel {
            id: match input_id {
                Some(id) => ActiveValue::Set(id),
                None => ActiveValue::NotSet,
            },
            name: ActiveValue::Set(input.name),
            provider_type: ActiveValue::Set(input.provider_type),
            api_base: ActiveValue::Set(input.api_base),
            api_key: ActiveValue::Set(input.api_key),
            weight: ActiveValue::Set(input.weight),
            model_mapping: ActiveValue::Set(input.model_mapping),
            is_enabled: ActiveValue::Set(input.is_enabled),
            anthropic_version: ActiveValue::Set(input.anthropic_version),
            gcp_project: ActiveValue::Set(input.gcp_project),
            gcp_location: ActiveValue::Set(input.gcp_location),
            gcp_publisher: ActiveValue::Set(input.gcp_publisher),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };

        let result = entities::Providers::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::ProviderType,
                        Column::ApiBase,
                        Column::ApiKey,
                        Column::Weight,
                        Column::ModelMapping,
                        Column::IsEnabled,
                        Column::AnthropicVersion,
                        Column::GcpProject,
                        Column::GcpLocation,
                        Column::GcpPublisher,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        let id = input_id.unwrap_or(result.last_insert_id);
        self.bump_version().await?;
        Ok(id)
    }

    async fn delete_provider(&self, id: i64) -> StorageResult<()> {
        entities::Providers::delete_by_id(id).exec(&self.db).await?;
        self.bump_version().await?;
        Ok(())
    }

    async fn upsert_credential(&self, input: CredentialInput) -> StorageResult<i64> {
        use entities::credentials::Column;
        let now = OffsetDateTime::now_utc();
        let input_id = input.id;
        let active = entities::credentials::ActiveModel {
            id: match input_id {
                Some(id) => ActiveValue::Set(id),
                None => ActiveValue::NotSet,
            },
            name: ActiveValue::Set(input.name),
            key_hash: ActiveValue::Set(input.key_hash),
            allowed_models: ActiveValue::Set(input.allowed_models),
            rate_limit_rps: ActiveValue::Set(input.rate_limit_rps),
            burst_size: ActiveValue::Set(input.burst_size),
            is_enabled: ActiveValue::Set(input.is_enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };

        let result = entities::Credentials::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::KeyHash,
                        Column::AllowedModels,
                        Column::RateLimitRps,
                        Column::BurstSize,
                        Column::IsEnabled,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        let id = input_id.unwrap_or(result.last_insert_id);
        self.bump_version().await?;
        Ok(id)
    }

    async fn delete_credential(&self, id: i64) -> StorageResult<()> {
        entities::Credentials::delete_by_id(id)
            .exec(&self.db)
            .await?;
        self.bump_version().await?;
        Ok(())
    }
}
