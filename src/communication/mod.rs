pub mod access_token;
pub mod http;
pub mod long_polling;
pub mod reconnection;
pub mod server_sent_events;
pub mod transport;
pub mod websocket;

pub use access_token::{access_token_fn, AccessTokenFactory, StaticAccessToken};
pub use http::{EhttpClient, HttpClient, HttpRequest, HttpResponse};
pub use long_polling::LongPollingTransport;
pub use server_sent_events::{EhttpEventSourceFactory, EventSourceFactory, EventSourceReceiver, ServerSentEventsTransport};
pub use transport::{HttpTransportType, Transport, TransportEvents, TransportKind};
pub use websocket::{SocketEvent, TokioWebSocketFactory, WebSocketFactory, WebSocketReceiver, WebSocketSender, WebSocketTransport};
