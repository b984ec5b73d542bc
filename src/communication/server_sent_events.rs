use std::{ops::ControlFlow, sync::{Arc, Mutex}};

use async_trait::async_trait;
use log::debug;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    error::HubError,
    protocol::hub_protocol::{MessagePayload, TransferFormat},
    sync::MutexExt,
};

use super::{
    access_token::{resolve_token, AccessTokenFactory},
    http::HttpClient,
    transport::{append_query, post_message, Transport, TransportEvents},
};

/// Inbound side of an event stream. Dropping it closes the stream.
#[async_trait]
pub trait EventSourceReceiver: Send {
    /// The next event's `data`, `None` once the server ended the stream.
    async fn next(&mut self) -> Option<Result<String, HubError>>;
}

/// Opens text-only server-push streams.
#[async_trait]
pub trait EventSourceFactory: Send + Sync {
    /// `headers` carries the cookies to send when the transport was asked to send credentials.
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
        with_credentials: bool,
    ) -> Result<Box<dyn EventSourceReceiver>, HubError>;
}

/// Incremental `text/event-stream` decoder; yields the `data` of every completed event.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        EventStreamParser::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(position) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=position).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        events
    }
}

/// [`EventSourceFactory`] over `ehttp`'s streaming fetch.
#[derive(Debug, Clone, Default)]
pub struct EhttpEventSourceFactory;

struct EhttpEventSource {
    events: mpsc::UnboundedReceiver<Result<String, HubError>>,
}

struct StreamState {
    opened: Option<futures::channel::oneshot::Sender<Result<(), HubError>>>,
    parser: EventStreamParser,
}

#[async_trait]
impl EventSourceFactory for EhttpEventSourceFactory {
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
        _with_credentials: bool,
    ) -> Result<Box<dyn EventSourceReceiver>, HubError> {
        let mut request = ehttp::Request::get(url);
        // the stream stays open for the whole session
        request.timeout = None;
        request.headers.insert("Accept", "text/event-stream");
        request.headers.insert("Cache-Control", "no-cache");
        for (name, value) in headers {
            request.headers.insert(name.clone(), value.clone());
        }

        let (opened, on_open) = futures::channel::oneshot::channel::<Result<(), HubError>>();
        let (sender, events) = mpsc::unbounded_channel::<Result<String, HubError>>();
        let state = Mutex::new(StreamState { opened: Some(opened), parser: EventStreamParser::new() });

        ehttp::streaming::fetch(request, move |part| {
            let mut state = state.locked();

            match part {
                Err(error) => {
                    let error = HubError::Transport(format!("EventSource failed: {}", error));
                    match state.opened.take() {
                        Some(opened) => {
                            _ = opened.send(Err(error));
                        },
                        None => {
                            _ = sender.send(Err(error));
                        },
                    }
                    ControlFlow::Break(())
                },
                Ok(ehttp::streaming::Part::Response(response)) => {
                    let ok = response.ok;
                    if let Some(opened) = state.opened.take() {
                        let result = if ok {
                            Ok(())
                        } else {
                            Err(HubError::Http { status: response.status, text: response.status_text })
                        };
                        _ = opened.send(result);
                    }
                    if ok { ControlFlow::Continue(()) } else { ControlFlow::Break(()) }
                },
                Ok(ehttp::streaming::Part::Chunk(chunk)) => {
                    if chunk.is_empty() {
                        return ControlFlow::Break(());
                    }
                    for data in state.parser.feed(&chunk) {
                        if sender.send(Ok(data)).is_err() {
                            // the receiving side was dropped
                            return ControlFlow::Break(());
                        }
                    }
                    ControlFlow::Continue(())
                },
            }
        });

        match on_open.await {
            Ok(Ok(())) => Ok(Box::new(EhttpEventSource { events })),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(HubError::Transport("EventSource closed before it opened.".to_string())),
        }
    }
}

#[async_trait]
impl EventSourceReceiver for EhttpEventSource {
    async fn next(&mut self) -> Option<Result<String, HubError>> {
        self.events.recv().await
    }
}

/// Server-push inbound stream with one POST per outbound message. Text only.
pub struct ServerSentEventsTransport {
    factory: Arc<dyn EventSourceFactory>,
    http_client: Arc<dyn HttpClient>,
    access_token: Option<Arc<dyn AccessTokenFactory>>,
    with_credentials: bool,
    events: Arc<TransportEvents>,
    url: Mutex<Option<String>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ServerSentEventsTransport {
    pub fn new(
        factory: Arc<dyn EventSourceFactory>,
        http_client: Arc<dyn HttpClient>,
        access_token: Option<Arc<dyn AccessTokenFactory>>,
        with_credentials: bool,
    ) -> Self {
        ServerSentEventsTransport {
            factory,
            http_client,
            access_token,
            with_credentials,
            events: Arc::new(TransportEvents::new()),
            url: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for ServerSentEventsTransport {
    async fn connect(&self, url: &str, transfer_format: TransferFormat) -> Result<(), HubError> {
        if transfer_format != TransferFormat::Text {
            return Err(HubError::Transport("The Server-Sent Events transport only supports the 'Text' transfer format".to_string()));
        }

        let mut connect_url = url.to_string();
        if let Some(token) = resolve_token(self.access_token.as_ref()).await? {
            connect_url = append_query(&connect_url, "access_token", &token);
        }

        let cookies = if self.with_credentials {
            self.http_client.cookie_string(&connect_url)
        } else {
            String::new()
        };
        let headers = if cookies.is_empty() {
            Vec::new()
        } else {
            vec![("Cookie".to_string(), cookies)]
        };

        debug!("(SSE transport) Connecting to {}", connect_url);
        let mut source = self.factory.open(&connect_url, &headers, self.with_credentials).await?;
        *self.url.locked() = Some(url.to_string());

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(data)) => events.receive(MessagePayload::Text(data)),
                    Some(Err(error)) => {
                        events.close(Some(error));
                        break;
                    },
                    None => {
                        events.close(None);
                        break;
                    },
                }
            }
        });
        *self.reader.locked() = Some(handle);

        Ok(())
    }

    async fn send(&self, data: MessagePayload) -> Result<(), HubError> {
        let url = self.url.locked().clone();
        let url = match url {
            Some(url) if !self.events.is_closed() => url,
            _ => return Err(HubError::InvalidState("Cannot send until the transport is connected".to_string())),
        };

        post_message(self.http_client.as_ref(), self.access_token.as_ref(), &url, data).await
    }

    async fn stop(&self) -> Result<(), HubError> {
        if let Some(reader) = self.reader.locked().take() {
            reader.abort();
        }
        self.events.close(None);

        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_joins_chunks() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"data: {\"type\"").is_empty());
        assert!(parser.feed(b":6}\x1e\n").is_empty());
        assert_eq!(parser.feed(b"\n"), vec!["{\"type\":6}\u{1e}".to_string()]);
    }

    #[test]
    fn test_parser_multiline_data_and_comments() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(b": keep-alive\r\nevent: message\r\ndata: first\r\ndata:second\r\n\r\ndata: third\n\n");
        assert_eq!(events, vec!["first\nsecond".to_string(), "third".to_string()]);
    }

    #[test]
    fn test_parser_ignores_empty_events() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"id: 1\n\n\n").is_empty());
    }
}
