pub mod db;
pub mod entities;
pub mod sinks;
pub mod snapshot;
pub mod storage;

pub use snapshot::{
    credential_row_to_model, provider_row_to_model, snapshot_to_versioned_config, CredentialRow,
    ModelMappingEntryJson, ProviderRow, RowConversionError, StorageSnapshot,
};
pub use storage::{CredentialInput, ProviderInput, SeaOrmStorage, Storage, StorageError, StorageResult};
