use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("store error: {0}")]
    Store(#[from] keybridge_store::StoreError),

    #[error("wallet capability error: {0}")]
    Sdk(#[from] keybridge_sdk::SdkError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
