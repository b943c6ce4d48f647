pub mod chat;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod sanitize;
pub mod store;
pub mod users;

pub use error::{ChatError, GatewayError};
pub use gateway::{ChatGateway, GatewayConfig};
pub use registry::{ConnectionHandle, Outbound, SessionRegistry};
pub use store::ChatStore;
