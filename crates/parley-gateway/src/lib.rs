//! Real-time delivery core: sessions and presence, conversation routing,
//! sequenced message storage and ephemeral signals.

pub mod connection;
pub mod error;
pub mod hub;
pub mod registry;
pub mod router;
pub mod signals;
pub mod store;

pub use error::{ChatError, ChatResult, blocking};
pub use hub::{Hub, HubConfig};
