pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod server;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::{build_router, start, AppState, ServerHandle};
