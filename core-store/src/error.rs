use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Write to {key} could not be verified after {attempts} attempts")]
    PersistenceVerification { key: String, attempts: u32 },

    #[error("Storage backend error: {0}")]
    Backend(#[from] bridge_traits::BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid geometry type: {0}")]
    InvalidGeometryType(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
