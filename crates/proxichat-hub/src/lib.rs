//! Connection hub: the single authority over who is online and who is
//! paired with whom.
//!
//! All mutation flows through one [`Hub`] task. Connections talk to it only
//! through a cloneable [`HubHandle`].

pub mod directory;
pub mod errors;
pub mod hub;
pub mod matching;
pub mod metrics;
pub mod session;

pub use directory::Directory;
pub use errors::HubError;
pub use hub::{Hub, HubCommand, HubHandle};
pub use matching::Outcome;
pub use session::{Delivery, Outbound, Session};

#[cfg(test)]
pub(crate) mod testing;
