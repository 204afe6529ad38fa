use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] secours_store::StoreError),

    #[error("Network error: {0}")]
    Net(#[from] secours_net::NetError),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
