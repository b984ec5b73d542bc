mod configuration;
mod http_connection;
mod negotiation;

pub use configuration::{HttpConnectionOptions, TransportRequest, DEFAULT_SHUTDOWN_TIMEOUT};
pub use http_connection::{ConnectionCloseHandler, ConnectionReceiveHandler, ConnectionState, HttpConnection};
pub use negotiation::MAX_REDIRECTS;
#[cfg(test)]
pub(crate) use negotiation::{create_connect_url, resolve_negotiate_url};
