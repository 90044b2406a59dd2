/// Failures at the JSON wire boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed client message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode server message: {0}")]
    Encode(#[source] serde_json::Error),
}
