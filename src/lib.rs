mod client;
mod communication;
mod completer;
mod connection;
mod error;
mod execution;
mod protocol;
mod sync;

#[cfg(test)]
mod tests;

pub use client::{
    CloseHandler, HubConnection, HubConnectionBuilder, HubConnectionState, HubStream, InvocationContext,
    ReconnectedHandler, DEFAULT_SERVER_TIMEOUT,
};
pub use communication::{
    access_token_fn, AccessTokenFactory, EhttpClient, EhttpEventSourceFactory, EventSourceFactory,
    EventSourceReceiver, HttpClient, HttpRequest, HttpResponse, HttpTransportType, LongPollingTransport,
    ServerSentEventsTransport, SocketEvent, StaticAccessToken, TokioWebSocketFactory, Transport, TransportEvents,
    TransportKind, WebSocketFactory, WebSocketReceiver, WebSocketSender, WebSocketTransport,
};
pub use communication::reconnection::{
    ConstantDelayPolicy, DefaultReconnectPolicy, ExponentialBackoffPolicy, LinearBackoffPolicy, NoReconnectPolicy,
    ReconnectionConfig, ReconnectionPolicy, RetryContext,
};
pub use communication::server_sent_events::EventStreamParser;
pub use completer::{ManualFuture, ManualFutureCompleter, ManualStream, ManualStreamCompleter};
pub use connection::{
    ConnectionState, HttpConnection, HttpConnectionOptions, TransportRequest, DEFAULT_SHUTDOWN_TIMEOUT,
    MAX_REDIRECTS,
};
pub use error::HubError;
pub use execution::{CallbackHandler, MethodHandler};
pub use protocol::handshake::{HandshakeProtocol, HandshakeRequest, HandshakeResponse};
pub use protocol::hub_protocol::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, HubMessage, HubProtocol, InvocationMessage,
    MessagePayload, MessageType, StreamInvocationMessage, StreamItemMessage, TransferFormat,
};
pub use protocol::json::JsonHubProtocol;
pub use protocol::messages::{TextMessageFormat, RECORD_SEPARATOR};
pub use protocol::negotiate::{AvailableTransport, NegotiateResponse};
