use std::{str::FromStr, sync::{Arc, Mutex}, time::Duration};

use async_trait::async_trait;
use futures::{stream::{SplitSink, SplitStream}, SinkExt, StreamExt};
use http::{HeaderName, HeaderValue, Uri};
use log::{debug, info, warn};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_native_tls::native_tls::TlsConnector;
use tokio_websockets::{ClientBuilder, CloseCode, Connector, MaybeTlsStream, Message, WebSocketStream};

use crate::{
    error::HubError,
    protocol::hub_protocol::{MessagePayload, TransferFormat},
    sync::MutexExt,
};

use super::{
    access_token::{resolve_token, AccessTokenFactory},
    http::HttpClient,
    transport::{append_query, Transport, TransportEvents},
};

pub const NORMAL_CLOSURE: u16 = 1000;
const ABNORMAL_CLOSURE: u16 = 1006;

/// What a raw socket reports from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Message(MessagePayload),
    Closed { code: u16, reason: String },
    Error(String),
}

#[async_trait]
pub trait WebSocketSender: Send {
    async fn send(&mut self, message: MessagePayload) -> Result<(), HubError>;
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), HubError>;
}

#[async_trait]
pub trait WebSocketReceiver: Send {
    /// `None` once the socket went away without a close frame.
    async fn next(&mut self) -> Option<SocketEvent>;
}

/// Opens raw full-duplex sockets. Injected so the embedding application decides
/// which socket implementation exists instead of it being probed at runtime.
#[async_trait]
pub trait WebSocketFactory: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<(Box<dyn WebSocketSender>, Box<dyn WebSocketReceiver>), HubError>;

    fn supports_binary(&self) -> bool {
        true
    }
}

type TokioSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`WebSocketFactory`] over `tokio-websockets`, with native TLS for `wss` endpoints.
#[derive(Debug, Clone, Default)]
pub struct TokioWebSocketFactory;

struct TokioSocketSender {
    sink: SplitSink<TokioSocket, Message>,
}

struct TokioSocketReceiver {
    stream: SplitStream<TokioSocket>,
}

#[async_trait]
impl WebSocketFactory for TokioWebSocketFactory {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<(Box<dyn WebSocketSender>, Box<dyn WebSocketReceiver>), HubError> {
        let endpoint = Uri::from_str(url).map_err(|e| HubError::Transport(format!("The endpoint Uri {} is invalid: {}", url, e)))?;
        info!("Connecting to endpoint {}", endpoint);

        let connector = if Some("wss") == endpoint.scheme_str() {
            debug!("Connection to secure endpoint...");
            let Ok(tls) = TlsConnector::new() else {
                return Err(HubError::Transport("Cannot create default TLS connector".to_string()));
            };
            Connector::NativeTls(tls.into())
        } else {
            debug!("Connection to plain endpoint...");
            Connector::Plain
        };

        let mut builder = ClientBuilder::from_uri(endpoint).connector(&connector);
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| HubError::Transport(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| HubError::Transport(e.to_string()))?;
            builder = builder.add_header(name, value).map_err(|e| HubError::Transport(e.to_string()))?;
        }

        let (socket, _) = builder.connect().await.map_err(|e| HubError::Transport(e.to_string()))?;
        let (sink, stream) = socket.split();

        Ok((Box::new(TokioSocketSender { sink }), Box::new(TokioSocketReceiver { stream })))
    }
}

#[async_trait]
impl WebSocketSender for TokioSocketSender {
    async fn send(&mut self, message: MessagePayload) -> Result<(), HubError> {
        let message = match message {
            MessagePayload::Text(text) => Message::text(text),
            MessagePayload::Binary(data) => Message::binary(data),
        };

        self.sink.send(message).await.map_err(|e| HubError::Transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), HubError> {
        let code = CloseCode::try_from(code).ok();

        self.sink
            .send(Message::close(code, reason))
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }
}

#[async_trait]
impl WebSocketReceiver for TokioSocketReceiver {
    async fn next(&mut self) -> Option<SocketEvent> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(SocketEvent::Error(e.to_string())),
            };

            if message.is_text() {
                if let Some(text) = message.as_text() {
                    return Some(SocketEvent::Message(MessagePayload::Text(text.to_string())));
                }
            } else if message.is_binary() {
                return Some(SocketEvent::Message(MessagePayload::Binary(message.as_payload().to_vec())));
            } else if message.is_close() {
                let (code, reason) = message
                    .as_close()
                    .map(|(code, reason)| (u16::from(code), reason.to_string()))
                    .unwrap_or((1005, String::new()));
                return Some(SocketEvent::Closed { code, reason });
            }
        }
    }
}

/// Full-duplex transport over a message socket.
pub struct WebSocketTransport {
    factory: Arc<dyn WebSocketFactory>,
    http_client: Arc<dyn HttpClient>,
    access_token: Option<Arc<dyn AccessTokenFactory>>,
    shutdown_timeout: Duration,
    events: Arc<TransportEvents>,
    sender: tokio::sync::Mutex<Option<Box<dyn WebSocketSender>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(
        factory: Arc<dyn WebSocketFactory>,
        http_client: Arc<dyn HttpClient>,
        access_token: Option<Arc<dyn AccessTokenFactory>>,
        shutdown_timeout: Duration,
    ) -> Self {
        WebSocketTransport {
            factory,
            http_client,
            access_token,
            shutdown_timeout,
            events: Arc::new(TransportEvents::new()),
            sender: tokio::sync::Mutex::new(None),
            receiver: Mutex::new(None),
        }
    }

    fn start_receiving(&self, mut receiver: Box<dyn WebSocketReceiver>) {
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            loop {
                match receiver.next().await {
                    Some(SocketEvent::Message(data)) => events.receive(data),
                    Some(SocketEvent::Closed { code, reason }) => {
                        if code == NORMAL_CLOSURE {
                            events.close(None);
                        } else {
                            events.close(Some(close_error(code, &reason)));
                        }
                        break;
                    },
                    Some(SocketEvent::Error(error)) => {
                        events.close(Some(HubError::Transport(error)));
                        break;
                    },
                    None => {
                        events.close(Some(close_error(ABNORMAL_CLOSURE, "")));
                        break;
                    },
                }
            }
        });

        *self.receiver.locked() = Some(handle);
    }
}

fn close_error(code: u16, reason: &str) -> HubError {
    let reason = if reason.is_empty() { "no reason given" } else { reason };

    HubError::Transport(format!("WebSocket closed with status code: {} ({}).", code, reason))
}

/// `http://` becomes `ws://` and `https://` becomes `wss://`.
pub(crate) fn to_socket_url(url: &str) -> String {
    if url.starts_with("http") {
        url.replacen("http", "ws", 1)
    } else {
        url.to_string()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str, transfer_format: TransferFormat) -> Result<(), HubError> {
        if transfer_format == TransferFormat::Binary && !self.factory.supports_binary() {
            return Err(HubError::Transport("'Binary' is not supported by the configured WebSocket factory.".to_string()));
        }

        let mut url = to_socket_url(url);
        if let Some(token) = resolve_token(self.access_token.as_ref()).await? {
            url = append_query(&url, "access_token", &token);
        }

        let cookies = self.http_client.cookie_string(&url);
        let headers = if cookies.is_empty() {
            Vec::new()
        } else {
            vec![("Cookie".to_string(), cookies)]
        };

        debug!("(WebSockets transport) Connecting to {}", url);
        let (sender, receiver) = self.factory.connect(&url, &headers).await?;

        *self.sender.lock().await = Some(sender);
        self.start_receiving(receiver);

        Ok(())
    }

    async fn send(&self, data: MessagePayload) -> Result<(), HubError> {
        if self.events.is_closed() {
            return Err(HubError::InvalidState("WebSocket is not in the OPEN state".to_string()));
        }

        let mut sender = self.sender.lock().await;
        match sender.as_mut() {
            Some(sender) => sender.send(data).await,
            None => Err(HubError::InvalidState("WebSocket is not in the OPEN state".to_string())),
        }
    }

    async fn stop(&self) -> Result<(), HubError> {
        if let Some(mut sender) = self.sender.lock().await.take() {
            if let Err(e) = sender.close(NORMAL_CLOSURE, "").await {
                debug!("(WebSockets transport) Close frame could not be sent: {}", e);
            }
        }

        let receiver = self.receiver.locked().take();
        if let Some(mut receiver) = receiver {
            if tokio::time::timeout(self.shutdown_timeout, &mut receiver).await.is_err() {
                warn!("(WebSockets transport) Server did not acknowledge the close in time, aborting the read loop.");
                receiver.abort();
            }
        }

        self.events.close(None);

        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}
