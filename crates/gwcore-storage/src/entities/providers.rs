use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    pub provider_type: String,
    pub api_base: String,
    pub api_key: String,
    pub weight: i32,
    pub model_mapping: Json,
    pub is_enabled: bool,
    pub anthropic_version: Option<String>,
    pub gcp_project: Option<String>,
    pub gcp_location: Option<String>,
    pub gcp_publisher: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
