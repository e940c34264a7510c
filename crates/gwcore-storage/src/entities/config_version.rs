use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Singleton row (`id = 1`) recording the monotonically increasing config
/// version, bumped on every successful admin write so other processes can
/// detect a pending reload.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "config_version")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub version: i64,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
