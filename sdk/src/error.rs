use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("bridge transport error: {0}")]
    Transport(String),

    #[error("device refused to sign: {0}")]
    Signing(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("node query failed: {0}")]
    Node(String),

    #[error("no derived key for {0}")]
    MissingKey(String),

    #[error("bridge returned malformed response: {0}")]
    Malformed(String),
}
