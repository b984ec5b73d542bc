use std::sync::{Arc, Mutex, Weak};

use futures::{future::{BoxFuture, Shared}, FutureExt};
use log::{debug, error, info, warn};

use crate::{
    communication::{
        access_token::{AccessTokenFactory, StaticAccessToken},
        long_polling::LongPollingTransport,
        server_sent_events::ServerSentEventsTransport,
        transport::{HttpTransportType, Transport, TransportKind},
        websocket::WebSocketTransport,
    },
    error::HubError,
    protocol::{hub_protocol::{MessagePayload, TransferFormat}, negotiate::NegotiateResponse},
    sync::MutexExt,
};

use super::{
    configuration::{HttpConnectionOptions, TransportRequest},
    negotiation::{create_connect_url, negotiate, select_transport, MAX_REDIRECTS},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub type ConnectionReceiveHandler = Arc<dyn Fn(MessagePayload) + Send + Sync>;
pub type ConnectionCloseHandler = Arc<dyn Fn(Option<HubError>) + Send + Sync>;

type StartFuture = Shared<BoxFuture<'static, Result<(), HubError>>>;

struct ConnectionSlots {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    /// Bumped for every transport handed out, so a stale close is recognized.
    transport_id: u64,
    stop_error: Option<HubError>,
    /// A close that arrived while the start was still in flight.
    start_close_error: Option<HubError>,
    start: Option<StartFuture>,
    connection_id: Option<String>,
}

struct ConnectionCore {
    base_url: String,
    options: HttpConnectionOptions,
    slots: Mutex<ConnectionSlots>,
    on_receive: Mutex<Option<ConnectionReceiveHandler>>,
    on_close: Mutex<Option<ConnectionCloseHandler>>,
}

/// Owns at most one transport and walks it through negotiate, connect and stop.
#[derive(Clone)]
pub struct HttpConnection {
    core: Arc<ConnectionCore>,
}

impl HttpConnection {
    pub fn new(url: impl Into<String>, options: HttpConnectionOptions) -> Self {
        HttpConnection {
            core: Arc::new(ConnectionCore {
                base_url: url.into(),
                options,
                slots: Mutex::new(ConnectionSlots {
                    state: ConnectionState::Disconnected,
                    transport: None,
                    transport_id: 0,
                    stop_error: None,
                    start_close_error: None,
                    start: None,
                    connection_id: None,
                }),
                on_receive: Mutex::new(None),
                on_close: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core.slots.locked().state
    }

    pub fn connection_id(&self) -> Option<String> {
        self.core.slots.locked().connection_id.clone()
    }

    /// True when the current transport proves liveness by itself.
    pub fn inherent_keep_alive(&self) -> bool {
        self.core
            .slots
            .locked()
            .transport
            .as_ref()
            .is_some_and(|t| t.inherent_keep_alive())
    }

    pub fn set_on_receive(&self, handler: ConnectionReceiveHandler) {
        *self.core.on_receive.locked() = Some(handler);
    }

    pub fn set_on_close(&self, handler: ConnectionCloseHandler) {
        *self.core.on_close.locked() = Some(handler);
    }

    pub async fn start(&self, transfer_format: TransferFormat) -> Result<(), HubError> {
        let start = {
            let mut slots = self.core.slots.locked();
            let start_pending = slots.start.as_ref().is_some_and(|s| s.peek().is_none());

            if slots.state != ConnectionState::Disconnected || start_pending {
                return Err(HubError::InvalidState(
                    "Cannot start a connection that is not in the 'Disconnected' state.".to_string(),
                ));
            }

            slots.state = ConnectionState::Connecting;
            slots.stop_error = None;
            slots.start_close_error = None;
            slots.connection_id = None;

            let core = self.core.clone();
            let handle = tokio::spawn(async move { core.start_internal(transfer_format).await });
            let start: StartFuture = async move {
                handle
                    .await
                    .unwrap_or_else(|e| Err(HubError::InvalidState(format!("connection start task failed: {}", e))))
            }
            .boxed()
            .shared();

            slots.start = Some(start.clone());
            start
        };

        start.await
    }

    pub async fn send(&self, data: MessagePayload) -> Result<(), HubError> {
        let transport = {
            let slots = self.core.slots.locked();
            match (&slots.transport, slots.state) {
                (Some(transport), ConnectionState::Connected) => transport.clone(),
                _ => {
                    return Err(HubError::InvalidState(
                        "Cannot send data if the connection is not in the 'Connected' State.".to_string(),
                    ))
                },
            }
        };

        transport.send(data).await
    }

    /// Stops the connection. An `error` given here is what the close handler reports.
    pub async fn stop(&self, error: Option<HubError>) -> Result<(), HubError> {
        let start = {
            let mut slots = self.core.slots.locked();
            if slots.state == ConnectionState::Disconnected && slots.transport.is_none() {
                debug!("Connection is already stopped.");
                return Ok(());
            }

            slots.state = ConnectionState::Disconnected;
            slots.stop_error = error;
            slots.start.clone()
        };

        if let Some(start) = start {
            // its failure already went to whoever called start
            _ = start.await;
        }

        let transport = self.core.slots.locked().transport.clone();
        if let Some(transport) = transport {
            if let Err(e) = transport.stop().await {
                warn!("Transport did not stop cleanly: {}", e);
            }
        }

        Ok(())
    }
}

impl ConnectionCore {
    fn state(&self) -> ConnectionState {
        self.slots.locked().state
    }

    async fn start_internal(self: Arc<Self>, transfer_format: TransferFormat) -> Result<(), HubError> {
        let result = self.start_transport(transfer_format).await;

        let failure = {
            let mut slots = self.slots.locked();
            match result {
                Ok(()) if slots.state == ConnectionState::Connecting => {
                    slots.state = ConnectionState::Connected;
                    info!("Connection to {} started.", self.base_url);
                    return Ok(());
                },
                Ok(()) => slots.start_close_error.take().unwrap_or_else(|| {
                    HubError::InvalidState("The connection was stopped before it was established.".to_string())
                }),
                Err(e) => e,
            }
        };

        error!("Failed to start the connection: {}", failure);
        let transport = {
            let mut slots = self.slots.locked();
            slots.state = ConnectionState::Disconnected;
            slots.transport_id += 1;
            slots.transport.take()
        };
        if let Some(transport) = transport {
            _ = transport.stop().await;
        }

        Err(failure)
    }

    async fn start_transport(self: &Arc<Self>, transfer_format: TransferFormat) -> Result<(), HubError> {
        if self.options.skip_negotiation {
            return match &self.options.transport {
                TransportRequest::Types(types) if *types == HttpTransportType::WEB_SOCKETS => {
                    let transport = self.construct_transport(TransportKind::WebSockets, None)?;
                    self.connect_transport(transport, &self.base_url, transfer_format).await
                },
                _ => Err(HubError::Negotiation(
                    "Negotiation can only be skipped when using the WebSocket transport directly.".to_string(),
                )),
            };
        }

        let (url, mut negotiation, access_token) = self.negotiate_with_redirects().await?;
        self.slots.locked().connection_id = negotiation.connection_id.clone();

        let requested = match &self.options.transport {
            TransportRequest::Instance(transport) => {
                let connect_url = create_connect_url(&url, negotiation.connection_id.as_deref());
                return self.connect_transport(transport.clone(), &connect_url, transfer_format).await;
            },
            TransportRequest::Types(types) => *types,
        };

        let mut attempted = false;
        let endpoints = negotiation.available_transports.clone();

        for endpoint in &endpoints {
            let Some(kind) = select_transport(endpoint, requested, transfer_format, &self.options) else {
                continue;
            };
            attempted = true;

            if negotiation.connection_id.is_none() {
                negotiation = negotiate(self.options.http_client.as_ref(), access_token.as_ref(), &url).await?;
                self.slots.locked().connection_id = negotiation.connection_id.clone();
            }

            let transport = self.construct_transport(kind, access_token.clone())?;
            let connect_url = create_connect_url(&url, negotiation.connection_id.as_deref());

            match self.connect_transport(transport, &connect_url, transfer_format).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Failed to start the transport '{}': {}", kind.name(), e);
                    negotiation.connection_id = None;

                    if self.state() != ConnectionState::Connecting {
                        return Err(HubError::InvalidState(
                            "Failed to select transport before stop() was called.".to_string(),
                        ));
                    }
                },
            }
        }

        Err(if attempted { HubError::TransportsFailed } else { HubError::NoTransportsAvailable })
    }

    /// Negotiates and follows redirects. Returns the final url, its response and any token a redirect handed out.
    async fn negotiate_with_redirects(
        &self,
    ) -> Result<(String, NegotiateResponse, Option<Arc<dyn AccessTokenFactory>>), HubError> {
        let mut url = self.base_url.clone();
        let mut token_override: Option<Arc<dyn AccessTokenFactory>> = None;
        let mut redirects = 0;

        loop {
            let access_token = token_override.clone().or_else(|| self.options.access_token.clone());
            let negotiation = negotiate(self.options.http_client.as_ref(), access_token.as_ref(), &url).await?;

            if self.state() != ConnectionState::Connecting {
                return Err(HubError::InvalidState("The connection was stopped during negotiation.".to_string()));
            }

            let Some(redirect) = negotiation.url.clone() else {
                return Ok((url, negotiation, access_token));
            };

            if redirects == MAX_REDIRECTS {
                return Err(HubError::RedirectLimitExceeded);
            }

            debug!("Negotiation redirected to {}", redirect);
            url = redirect;
            token_override = negotiation
                .access_token
                .map(|token| Arc::new(StaticAccessToken(token)) as Arc<dyn AccessTokenFactory>);
            redirects += 1;
        }
    }

    fn construct_transport(
        &self,
        kind: TransportKind,
        access_token: Option<Arc<dyn AccessTokenFactory>>,
    ) -> Result<Arc<dyn Transport>, HubError> {
        let options = &self.options;
        let access_token = access_token.or_else(|| options.access_token.clone());
        let unavailable = || HubError::Transport(format!("'{}' is not supported in your environment.", kind.name()));

        Ok(match kind {
            TransportKind::WebSockets => Arc::new(WebSocketTransport::new(
                options.websocket_factory.clone().ok_or_else(unavailable)?,
                options.http_client.clone(),
                access_token,
                options.shutdown_timeout,
            )),
            TransportKind::ServerSentEvents => Arc::new(ServerSentEventsTransport::new(
                options.event_source_factory.clone().ok_or_else(unavailable)?,
                options.http_client.clone(),
                access_token,
                options.with_credentials,
            )),
            TransportKind::LongPolling => Arc::new(LongPollingTransport::new(
                options.http_client.clone(),
                access_token,
                options.shutdown_timeout,
            )),
        })
    }

    async fn connect_transport(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        url: &str,
        transfer_format: TransferFormat,
    ) -> Result<(), HubError> {
        let transport_id = {
            let mut slots = self.slots.locked();
            slots.transport_id += 1;
            slots.transport = Some(transport.clone());
            slots.transport_id
        };

        let core: Weak<ConnectionCore> = Arc::downgrade(self);
        transport.events().set_on_receive(Arc::new(move |data| {
            if let Some(core) = core.upgrade() {
                core.receive(data);
            }
        }));

        let core: Weak<ConnectionCore> = Arc::downgrade(self);
        transport.events().set_on_close(Box::new(move |error| {
            if let Some(core) = core.upgrade() {
                core.transport_closed(transport_id, error);
            }
        }));

        let result = transport.connect(url, transfer_format).await;

        if result.is_err() {
            let mut slots = self.slots.locked();
            if slots.transport_id == transport_id {
                slots.transport = None;
            }
        }

        result
    }

    fn receive(&self, data: MessagePayload) {
        let handler = self.on_receive.locked().clone();

        if let Some(handler) = handler {
            handler(data);
        }
    }

    fn transport_closed(&self, transport_id: u64, error: Option<HubError>) {
        let error = {
            let mut slots = self.slots.locked();
            if slots.transport_id != transport_id {
                debug!("Ignoring the close of a transport that is no longer in use.");
                return;
            }

            let was_connecting = slots.state == ConnectionState::Connecting;
            slots.state = ConnectionState::Disconnected;
            slots.transport = None;
            let error = slots.stop_error.take().or(error);

            if was_connecting {
                slots.start_close_error = error;
                return;
            }

            error
        };

        match &error {
            Some(e) => error!("Connection disconnected with error '{}'.", e),
            None => info!("Connection disconnected."),
        }

        let handler = self.on_close.locked().clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }
}
