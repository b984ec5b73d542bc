use std::{sync::Arc, time::Duration};

use crate::{
    communication::{
        access_token::AccessTokenFactory,
        http::HttpClient,
        reconnection::{ReconnectionConfig, ReconnectionPolicy},
        server_sent_events::EventSourceFactory,
        transport::{HttpTransportType, Transport},
        websocket::WebSocketFactory,
    },
    connection::{HttpConnection, HttpConnectionOptions, TransportRequest},
    protocol::{hub_protocol::HubProtocol, json::JsonHubProtocol},
};

use super::hub_connection::{HubConnection, DEFAULT_SERVER_TIMEOUT};

/// Configures and creates a [`HubConnection`].
///
/// # Examples
///
/// ```ignore
/// let connection = HubConnectionBuilder::new("https://localhost:5001/chat")
///     .with_transport(HttpTransportType::WEB_SOCKETS | HttpTransportType::LONG_POLLING)
///     .with_access_token(StaticAccessToken("token".to_string()))
///     .with_automatic_reconnect(DefaultReconnectPolicy::new())
///     .build();
/// ```
pub struct HubConnectionBuilder {
    url: String,
    options: HttpConnectionOptions,
    protocol: Arc<dyn HubProtocol>,
    server_timeout: Duration,
    reconnection: ReconnectionConfig,
}

impl HubConnectionBuilder {
    /// Starts from the native defaults: JSON protocol, every transport, no reconnect.
    pub fn new(url: impl Into<String>) -> Self {
        HubConnectionBuilder {
            url: url.into(),
            options: HttpConnectionOptions::default(),
            protocol: Arc::new(JsonHubProtocol::new()),
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            reconnection: ReconnectionConfig::default(),
        }
    }

    /// Replaces every connection option at once.
    pub fn with_options(mut self, options: HttpConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_protocol(mut self, protocol: Arc<dyn HubProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    /// Limits the transports negotiation may pick from.
    pub fn with_transport(mut self, transports: HttpTransportType) -> Self {
        self.options.transport = TransportRequest::Types(transports);
        self
    }

    pub fn with_transport_instance(mut self, transport: Arc<dyn Transport>) -> Self {
        self.options.transport = TransportRequest::Instance(transport);
        self
    }

    /// Connects straight to the url. Only valid together with WebSockets as the sole transport.
    pub fn skip_negotiation(mut self, skip: bool) -> Self {
        self.options.skip_negotiation = skip;
        self
    }

    pub fn with_access_token(mut self, factory: impl AccessTokenFactory + 'static) -> Self {
        self.options.access_token = Some(Arc::new(factory));
        self
    }

    pub fn with_access_token_factory(mut self, factory: Arc<dyn AccessTokenFactory>) -> Self {
        self.options.access_token = Some(factory);
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.options.http_client = client;
        self
    }

    /// `None` disables the WebSockets transport.
    pub fn with_websocket_factory(mut self, factory: Option<Arc<dyn WebSocketFactory>>) -> Self {
        self.options.websocket_factory = factory;
        self
    }

    /// `None` disables the Server-Sent Events transport.
    pub fn with_event_source_factory(mut self, factory: Option<Arc<dyn EventSourceFactory>>) -> Self {
        self.options.event_source_factory = factory;
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.options.with_credentials = with_credentials;
        self
    }

    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options.shutdown_timeout = timeout;
        self
    }

    pub fn with_automatic_reconnect(mut self, policy: impl ReconnectionPolicy + 'static) -> Self {
        self.reconnection = ReconnectionConfig::with_policy(policy);
        self
    }

    pub fn with_reconnection_config(mut self, config: ReconnectionConfig) -> Self {
        self.reconnection = config;
        self
    }

    pub fn build(self) -> HubConnection {
        let connection = HttpConnection::new(self.url, self.options);

        HubConnection::new(connection, self.protocol, self.server_timeout, self.reconnection)
    }
}
