mod builder;
mod context;
mod hub_connection;

pub use builder::HubConnectionBuilder;
pub use context::InvocationContext;
pub use hub_connection::{
    CloseHandler, HubConnection, HubConnectionState, HubStream, ReconnectedHandler, DEFAULT_SERVER_TIMEOUT,
};
