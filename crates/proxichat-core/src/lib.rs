pub mod errors;
pub mod ids;
pub mod protocol;
pub mod status;

pub use errors::ProtocolError;
pub use ids::ClientId;
pub use protocol::{ClientEvent, Payload, ServerMessage, UserView};
pub use status::UserStatus;
