use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Device is offline")]
    Offline,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected sync: {0}")]
    ServerRejection(String),

    #[error("Server feature references unknown feature type {feature_type_id}")]
    MergeInconsistency { feature_type_id: i64 },

    #[error("Store error: {0}")]
    Store(#[from] core_store::StoreError),

    #[error("Platform bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
