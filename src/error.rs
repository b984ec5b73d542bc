use thiserror::Error;

/// Errors produced by the hub connection stack.
///
/// The type is `Clone` because a single fatal error is handed to every pending
/// invocation, every open stream and every close observer of a connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubError {
    #[error("A timeout occurred.")]
    Timeout,

    #[error("The request was aborted.")]
    Aborted,

    #[error("HTTP request failed with status code {status}: {text}")]
    Http { status: u16, text: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to complete negotiation with the server: {0}")]
    Negotiation(String),

    #[error("Negotiate redirection limit exceeded.")]
    RedirectLimitExceeded,

    #[error("Detected a connection attempt to an ASP.NET SignalR Server. This client only supports connecting to an ASP.NET Core SignalR Server.")]
    LegacyServer,

    #[error("None of the transports supported by the client are supported by the server.")]
    NoTransportsAvailable,

    #[error("Unable to initialize any of the available transports.")]
    TransportsFailed,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Message is incomplete.")]
    IncompleteMessage,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Server timeout elapsed without receiving a message from the server.")]
    ServerTimeout,

    #[error("Server closed the connection{}", .0.as_ref().map(|e| format!(" with an error: {}", e)).unwrap_or_default())]
    ServerClosed(Option<String>),

    #[error("Invocation canceled due to the underlying connection being closed.")]
    ConnectionClosed,

    #[error("{0}")]
    InvocationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for HubError {
    fn from(value: serde_json::Error) -> Self {
        HubError::Serialization(value.to_string())
    }
}

impl From<url::ParseError> for HubError {
    fn from(value: url::ParseError) -> Self {
        HubError::Negotiation(format!("invalid url: {}", value))
    }
}
