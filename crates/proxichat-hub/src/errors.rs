/// Failures talking to the hub event loop.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub event loop has shut down")]
    Closed,
}
