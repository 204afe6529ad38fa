use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Sealing failed")]
    SealFailed,

    #[error("Opening failed: invalid ciphertext or wrong key")]
    OpenFailed,

    #[error("Invalid key: expected 32 hex-encoded bytes")]
    InvalidKey,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Identity file error: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("Identity serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
