use std::{sync::Arc, time::Duration};

use crate::communication::{
    access_token::AccessTokenFactory,
    http::{EhttpClient, HttpClient},
    server_sent_events::{EhttpEventSourceFactory, EventSourceFactory},
    transport::{HttpTransportType, Transport},
    websocket::{TokioWebSocketFactory, WebSocketFactory},
};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Which transport the connection may use.
#[derive(Clone)]
pub enum TransportRequest {
    /// Any of the kinds in the mask, picked from what the server advertises.
    Types(HttpTransportType),
    /// A ready-made transport, used after negotiation as is.
    Instance(Arc<dyn Transport>),
}

impl Default for TransportRequest {
    fn default() -> Self {
        TransportRequest::Types(HttpTransportType::ALL)
    }
}

/// The capabilities and switches an [`HttpConnection`](super::HttpConnection) is built from.
///
/// The embedding application hands over the HTTP client and the socket and event
/// stream factories; a missing factory means that transport kind is unavailable.
#[derive(Clone)]
pub struct HttpConnectionOptions {
    pub http_client: Arc<dyn HttpClient>,
    pub websocket_factory: Option<Arc<dyn WebSocketFactory>>,
    pub event_source_factory: Option<Arc<dyn EventSourceFactory>>,
    pub access_token: Option<Arc<dyn AccessTokenFactory>>,
    pub transport: TransportRequest,
    pub skip_negotiation: bool,
    pub with_credentials: bool,
    /// Bounds how long a transport `stop` waits for the server before aborting.
    pub shutdown_timeout: Duration,
}

impl Default for HttpConnectionOptions {
    fn default() -> Self {
        HttpConnectionOptions {
            http_client: Arc::new(EhttpClient::new()),
            websocket_factory: Some(Arc::new(TokioWebSocketFactory)),
            event_source_factory: Some(Arc::new(EhttpEventSourceFactory)),
            access_token: None,
            transport: TransportRequest::default(),
            skip_negotiation: false,
            with_credentials: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl HttpConnectionOptions {
    /// Options without any transport factory, for callers that inject everything themselves.
    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        HttpConnectionOptions {
            http_client,
            websocket_factory: None,
            event_source_factory: None,
            ..HttpConnectionOptions::default()
        }
    }
}
