use std::{
    future::Future,
    sync::{atomic::{AtomicBool, Ordering}, Arc, Mutex},
};

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use http::Method;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    communication::{
        EventSourceFactory, EventSourceReceiver, HttpClient, HttpRequest, HttpResponse, HttpTransportType, SocketEvent,
        WebSocketFactory, WebSocketReceiver, WebSocketSender,
    },
    error::HubError,
    protocol::hub_protocol::MessagePayload,
    sync::MutexExt,
    HubConnection, HubConnectionBuilder,
};

pub(crate) const HUB_URL: &str = "http://localhost/hub";

type Responder = Box<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, HubError>> + Send + Sync>;

/// Answers every request through a test supplied closure and keeps a log of what was sent.
pub(crate) struct MockHttpClient {
    responder: Responder,
    requests: Mutex<Vec<HttpRequest>>,
    cookies: Mutex<String>,
}

impl MockHttpClient {
    pub fn new<F, Fut>(responder: F) -> Arc<Self>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, HubError>> + Send + 'static,
    {
        Arc::new(MockHttpClient {
            responder: Box::new(move |request| responder(request).boxed()),
            requests: Mutex::new(Vec::new()),
            cookies: Mutex::new(String::new()),
        })
    }

    pub fn set_cookies(&self, cookies: &str) {
        *self.cookies.locked() = cookies.to_string();
    }

    pub fn unreachable() -> Arc<Self> {
        MockHttpClient::new(|request| async move {
            Err(HubError::Transport(format!("unexpected request to {}", request.url)))
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.locked().clone()
    }

    pub fn count(&self, method: Method, fragment: &str) -> usize {
        self.requests
            .locked()
            .iter()
            .filter(|r| r.method == method && r.url.contains(fragment))
            .count()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HubError> {
        self.requests.locked().push(request.clone());

        (self.responder)(request).await
    }

    fn cookie_string(&self, _url: &str) -> String {
        self.cookies.locked().clone()
    }
}

pub(crate) fn json_response(value: Value) -> HttpResponse {
    HttpResponse::new(200, value.to_string())
}

/// A negotiate answer advertising `transports` as `(name, "Format,Format")` pairs.
pub(crate) fn negotiate_response(connection_id: &str, transports: &[(&str, &str)]) -> HttpResponse {
    let transports: Vec<Value> = transports
        .iter()
        .map(|(name, formats)| {
            let formats: Vec<&str> = formats.split(',').collect();
            serde_json::json!({"transport": name, "transferFormats": formats})
        })
        .collect();

    json_response(serde_json::json!({
        "connectionId": connection_id,
        "negotiateVersion": 0,
        "availableTransports": transports,
    }))
}

/// The server end of a socket opened through [`ChannelWebSocketFactory`].
pub(crate) struct ServerSocket {
    pub url: String,
    incoming: mpsc::UnboundedSender<SocketEvent>,
    outgoing: mpsc::UnboundedReceiver<MessagePayload>,
}

impl ServerSocket {
    pub fn push(&self, text: &str) {
        _ = self.incoming.send(SocketEvent::Message(MessagePayload::Text(text.to_string())));
    }

    pub fn close(&self, code: u16, reason: &str) {
        _ = self.incoming.send(SocketEvent::Closed { code, reason: reason.to_string() });
    }

    pub async fn next_sent(&mut self) -> Option<MessagePayload> {
        self.outgoing.recv().await
    }

    /// The next hub message the client sent, as JSON.
    pub async fn next_message(&mut self) -> Value {
        let payload = self.next_sent().await.expect("client socket closed");
        let text = std::str::from_utf8(payload.as_bytes()).expect("text frame");

        serde_json::from_str(text.trim_end_matches('\u{1e}')).expect("valid JSON record")
    }

    pub async fn accept_handshake(&mut self) {
        let request = self.next_message().await;
        assert_eq!(request["protocol"], "json");
        assert_eq!(request["version"], 1);

        self.push("{}\u{1e}");
    }
}

struct ChannelSocketSender {
    outgoing: mpsc::UnboundedSender<MessagePayload>,
    incoming: mpsc::UnboundedSender<SocketEvent>,
}

struct ChannelSocketReceiver {
    incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait]
impl WebSocketSender for ChannelSocketSender {
    async fn send(&mut self, message: MessagePayload) -> Result<(), HubError> {
        self.outgoing
            .send(message)
            .map_err(|_| HubError::Transport("server end went away".to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), HubError> {
        // the server echoes the close frame
        _ = self.incoming.send(SocketEvent::Closed { code, reason: reason.to_string() });
        Ok(())
    }
}

#[async_trait]
impl WebSocketReceiver for ChannelSocketReceiver {
    async fn next(&mut self) -> Option<SocketEvent> {
        self.incoming.recv().await
    }
}

/// Hands the server end of every opened socket to the test.
pub(crate) struct ChannelWebSocketFactory {
    sockets: mpsc::UnboundedSender<ServerSocket>,
    failing: AtomicBool,
    binary: bool,
}

impl ChannelWebSocketFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSocket>) {
        Self::create(true)
    }

    pub fn text_only() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSocket>) {
        Self::create(false)
    }

    fn create(binary: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSocket>) {
        let (sockets, accepted) = mpsc::unbounded_channel();
        let factory = ChannelWebSocketFactory {
            sockets,
            failing: AtomicBool::new(false),
            binary,
        };

        (Arc::new(factory), accepted)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl WebSocketFactory for ChannelWebSocketFactory {
    async fn connect(
        &self,
        url: &str,
        _headers: &[(String, String)],
    ) -> Result<(Box<dyn WebSocketSender>, Box<dyn WebSocketReceiver>), HubError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HubError::Transport(format!("connection to {} refused", url)));
        }

        let (incoming_sender, incoming) = mpsc::unbounded_channel();
        let (outgoing_sender, outgoing) = mpsc::unbounded_channel();

        let socket = ServerSocket {
            url: url.to_string(),
            incoming: incoming_sender.clone(),
            outgoing,
        };
        self.sockets
            .send(socket)
            .map_err(|_| HubError::Transport("test dropped the socket receiver".to_string()))?;

        let sender = ChannelSocketSender {
            outgoing: outgoing_sender,
            incoming: incoming_sender,
        };

        Ok((Box::new(sender), Box::new(ChannelSocketReceiver { incoming })))
    }

    fn supports_binary(&self) -> bool {
        self.binary
    }
}

/// An event source that is never expected to be opened.
pub(crate) struct RefusingEventSourceFactory {
    pub opened: AtomicBool,
}

impl RefusingEventSourceFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(RefusingEventSourceFactory { opened: AtomicBool::new(false) })
    }
}

#[async_trait]
impl EventSourceFactory for RefusingEventSourceFactory {
    async fn open(
        &self,
        url: &str,
        _headers: &[(String, String)],
        _with_credentials: bool,
    ) -> Result<Box<dyn EventSourceReceiver>, HubError> {
        self.opened.store(true, Ordering::SeqCst);

        Err(HubError::Transport(format!("event source {} refused", url)))
    }
}

/// The server end of an event stream opened through [`ChannelEventSourceFactory`].
pub(crate) struct ServerEventStream {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub with_credentials: bool,
    events: mpsc::UnboundedSender<Result<String, HubError>>,
}

impl ServerEventStream {
    pub fn push(&self, data: &str) {
        _ = self.events.send(Ok(data.to_string()));
    }

    pub fn fail(&self, error: HubError) {
        _ = self.events.send(Err(error));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Ends the stream the way a server finishing the response does.
    pub fn end(self) {}
}

struct ChannelEventSource {
    events: mpsc::UnboundedReceiver<Result<String, HubError>>,
}

#[async_trait]
impl EventSourceReceiver for ChannelEventSource {
    async fn next(&mut self) -> Option<Result<String, HubError>> {
        self.events.recv().await
    }
}

/// Hands the server end of every opened event stream to the test.
pub(crate) struct ChannelEventSourceFactory {
    streams: mpsc::UnboundedSender<ServerEventStream>,
}

impl ChannelEventSourceFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEventStream>) {
        let (streams, opened) = mpsc::unbounded_channel();

        (Arc::new(ChannelEventSourceFactory { streams }), opened)
    }
}

#[async_trait]
impl EventSourceFactory for ChannelEventSourceFactory {
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
        with_credentials: bool,
    ) -> Result<Box<dyn EventSourceReceiver>, HubError> {
        let (sender, events) = mpsc::unbounded_channel();
        let stream = ServerEventStream {
            url: url.to_string(),
            headers: headers.to_vec(),
            with_credentials,
            events: sender,
        };
        self.streams
            .send(stream)
            .map_err(|_| HubError::Transport("test dropped the stream receiver".to_string()))?;

        Ok(Box::new(ChannelEventSource { events }))
    }
}

/// A hub talking straight to a [`ChannelWebSocketFactory`] without negotiation.
pub(crate) fn socket_hub(factory: Arc<ChannelWebSocketFactory>) -> HubConnectionBuilder {
    let factory: Arc<dyn WebSocketFactory> = factory;
    let http_client: Arc<dyn HttpClient> = MockHttpClient::unreachable();

    HubConnectionBuilder::new(HUB_URL)
        .with_http_client(http_client)
        .with_websocket_factory(Some(factory))
        .with_event_source_factory(None)
        .with_transport(HttpTransportType::WEB_SOCKETS)
        .skip_negotiation(true)
}

/// Starts `hub` and plays the server side of the handshake.
pub(crate) async fn connect(hub: &HubConnection, sockets: &mut mpsc::UnboundedReceiver<ServerSocket>) -> ServerSocket {
    let starting = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.start().await })
    };

    let mut socket = sockets.recv().await.expect("hub opened no socket");
    socket.accept_handshake().await;
    starting.await.expect("start task panicked").expect("hub failed to start");

    socket
}
