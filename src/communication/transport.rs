use std::{ops::BitOr, sync::{Arc, Mutex}};

use async_trait::async_trait;

use crate::{error::HubError, protocol::hub_protocol::{MessagePayload, TransferFormat}, sync::MutexExt};

use super::{access_token::{resolve_token, AccessTokenFactory}, http::{HttpClient, HttpRequest}};

/// The concrete channel kinds a server can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSockets,
    ServerSentEvents,
    LongPolling,
}

impl TransportKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::WebSockets => "WebSockets",
            TransportKind::ServerSentEvents => "ServerSentEvents",
            TransportKind::LongPolling => "LongPolling",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "WebSockets" => Some(TransportKind::WebSockets),
            "ServerSentEvents" => Some(TransportKind::ServerSentEvents),
            "LongPolling" => Some(TransportKind::LongPolling),
            _ => None,
        }
    }

    pub fn mask(&self) -> HttpTransportType {
        match self {
            TransportKind::WebSockets => HttpTransportType::WEB_SOCKETS,
            TransportKind::ServerSentEvents => HttpTransportType::SERVER_SENT_EVENTS,
            TransportKind::LongPolling => HttpTransportType::LONG_POLLING,
        }
    }
}

/// A set of transport kinds the caller is willing to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTransportType(u8);

impl HttpTransportType {
    pub const NONE: Self = HttpTransportType(0);
    pub const WEB_SOCKETS: Self = HttpTransportType(1);
    pub const SERVER_SENT_EVENTS: Self = HttpTransportType(2);
    pub const LONG_POLLING: Self = HttpTransportType(4);
    pub const ALL: Self = HttpTransportType(1 | 2 | 4);

    pub fn contains(&self, other: HttpTransportType) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for HttpTransportType {
    fn default() -> Self {
        HttpTransportType::ALL
    }
}

impl BitOr for HttpTransportType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        HttpTransportType(self.0 | rhs.0)
    }
}

pub type ReceiveCallback = Arc<dyn Fn(MessagePayload) + Send + Sync>;
pub type CloseCallback = Box<dyn FnOnce(Option<HubError>) + Send>;

#[derive(Default)]
struct EventSlots {
    on_receive: Option<ReceiveCallback>,
    on_close: Option<CloseCallback>,
    closed: bool,
    unobserved_close: Option<Option<HubError>>,
}

/// Single-slot receive and close callbacks shared by every transport.
///
/// `close` fires at most once per instance. After it fires the transport is
/// inert: inbound data is dropped. A close raised before anyone listened is
/// delivered as soon as a close callback is installed.
#[derive(Default)]
pub struct TransportEvents {
    slots: Mutex<EventSlots>,
}

impl TransportEvents {
    pub fn new() -> Self {
        TransportEvents::default()
    }

    pub fn set_on_receive(&self, callback: ReceiveCallback) {
        self.slots.locked().on_receive = Some(callback);
    }

    pub fn set_on_close(&self, callback: CloseCallback) {
        let pending = {
            let mut slots = self.slots.locked();
            match slots.unobserved_close.take() {
                Some(error) => Some(error),
                None => {
                    slots.on_close = Some(callback);
                    return;
                },
            }
        };

        if let Some(error) = pending {
            callback(error);
        }
    }

    pub fn receive(&self, data: MessagePayload) {
        let callback = {
            let slots = self.slots.locked();
            if slots.closed {
                return;
            }
            slots.on_receive.clone()
        };

        if let Some(callback) = callback {
            callback(data);
        }
    }

    pub fn close(&self, error: Option<HubError>) {
        let callback = {
            let mut slots = self.slots.locked();
            if slots.closed {
                return;
            }
            slots.closed = true;
            slots.on_receive = None;

            match slots.on_close.take() {
                Some(callback) => callback,
                None => {
                    slots.unobserved_close = Some(error);
                    return;
                },
            }
        };

        callback(error);
    }

    pub fn is_closed(&self) -> bool {
        self.slots.locked().closed
    }
}

/// The contract shared by the WebSockets, Server-Sent Events and Long Polling channels.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str, transfer_format: TransferFormat) -> Result<(), HubError>;
    async fn send(&self, data: MessagePayload) -> Result<(), HubError>;
    async fn stop(&self) -> Result<(), HubError>;
    fn events(&self) -> &TransportEvents;

    /// True when the transport's own request cadence proves the server is alive.
    fn inherent_keep_alive(&self) -> bool {
        false
    }
}

/// Appends `key=value` to `url`, percent-encoding the value.
pub(crate) fn append_query(url: &str, key: &str, value: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    let separator = if url.contains('?') { '&' } else { '?' };

    format!("{}{}{}={}", url, separator, key, encoded)
}

/// Delivers one outbound message as its own POST, as the request based transports do.
pub(crate) async fn post_message(
    http_client: &dyn HttpClient,
    access_token: Option<&Arc<dyn AccessTokenFactory>>,
    url: &str,
    data: MessagePayload,
) -> Result<(), HubError> {
    let token = resolve_token(access_token).await?;
    let content_type = match data {
        MessagePayload::Text(_) => "text/plain;charset=UTF-8",
        MessagePayload::Binary(_) => "application/octet-stream",
    };
    let body = match data {
        MessagePayload::Text(text) => text.into_bytes(),
        MessagePayload::Binary(bytes) => bytes,
    };

    let request = HttpRequest::post(url, body)
        .with_header("Content-Type", content_type)
        .with_bearer(token.as_deref());
    let response = http_client.send(request).await?;

    if (200..300).contains(&response.status_code) {
        Ok(())
    } else {
        Err(HubError::Http {
            status: response.status_code,
            text: response.status_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_close_fires_once() {
        let events = TransportEvents::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        events.set_on_close(Box::new(move |error| {
            assert_eq!(error, Some(HubError::Transport("lost".to_string())));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        events.close(Some(HubError::Transport("lost".to_string())));
        events.close(None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(events.is_closed());
    }

    #[test]
    fn test_close_before_handler_is_delivered_later() {
        let events = TransportEvents::new();
        events.close(Some(HubError::Timeout));

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        events.set_on_close(Box::new(move |error| {
            *slot.locked() = Some(error);
        }));

        assert_eq!(*seen.locked(), Some(Some(HubError::Timeout)));
    }

    #[test]
    fn test_receive_after_close_is_dropped() {
        let events = TransportEvents::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        events.set_on_receive(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        events.receive(MessagePayload::Text("a".to_string()));
        events.close(None);
        events.receive(MessagePayload::Text("b".to_string()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transport_type_mask() {
        let requested = HttpTransportType::WEB_SOCKETS | HttpTransportType::LONG_POLLING;
        assert!(requested.contains(HttpTransportType::WEB_SOCKETS));
        assert!(!requested.contains(HttpTransportType::SERVER_SENT_EVENTS));
        assert!(!requested.contains(HttpTransportType::NONE));
        assert_eq!(HttpTransportType::default(), HttpTransportType::ALL);
        assert_eq!(TransportKind::from_name("LongPolling"), Some(TransportKind::LongPolling));
        assert_eq!(TransportKind::from_name("ForeverFrame"), None);
    }

    #[test]
    fn test_append_query() {
        assert_eq!(append_query("http://host/hub", "id", "a b"), "http://host/hub?id=a+b");
        assert_eq!(append_query("http://host/hub?x=1", "id", "abc"), "http://host/hub?x=1&id=abc");
    }
}
