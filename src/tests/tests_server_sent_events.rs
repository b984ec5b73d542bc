use std::sync::Arc;

use http::Method;
use tokio::sync::mpsc;

use crate::{
    tests::mocks::{ChannelEventSourceFactory, MockHttpClient},
    AccessTokenFactory, EventSourceFactory, HttpClient, HttpResponse, HubError, MessagePayload, ServerSentEventsTransport,
    StaticAccessToken, TransferFormat, Transport,
};

const CONNECT_URL: &str = "http://localhost/hub?id=c1";

fn accepting_http() -> Arc<MockHttpClient> {
    MockHttpClient::new(|_| async { Ok(HttpResponse::new(200, "")) })
}

fn transport(
    factory: Arc<ChannelEventSourceFactory>,
    http: Arc<MockHttpClient>,
    token: Option<&str>,
    with_credentials: bool,
) -> ServerSentEventsTransport {
    let factory: Arc<dyn EventSourceFactory> = factory;
    let http: Arc<dyn HttpClient> = http;
    let token = token.map(|t| Arc::new(StaticAccessToken(t.to_string())) as Arc<dyn AccessTokenFactory>);

    ServerSentEventsTransport::new(factory, http, token, with_credentials)
}

fn watch(transport: &ServerSentEventsTransport) -> (mpsc::UnboundedReceiver<MessagePayload>, mpsc::UnboundedReceiver<Option<HubError>>) {
    let (sender, received) = mpsc::unbounded_channel();
    transport.events().set_on_receive(Arc::new(move |data| {
        _ = sender.send(data);
    }));

    let (sender, closed) = mpsc::unbounded_channel();
    transport.events().set_on_close(Box::new(move |error| {
        _ = sender.send(error);
    }));

    (received, closed)
}

#[test_log::test(tokio::test)]
async fn test_events_are_delivered_and_sends_are_posts() {
    let (factory, mut streams) = ChannelEventSourceFactory::new();
    let http = accepting_http();
    let transport = transport(factory, http.clone(), Some("a b"), true);
    let (mut received, _closed) = watch(&transport);

    transport.connect(CONNECT_URL, TransferFormat::Text).await.unwrap();
    let stream = streams.recv().await.unwrap();
    assert_eq!(stream.url, "http://localhost/hub?id=c1&access_token=a+b");

    stream.push("{}\u{1e}");
    stream.push("{\"type\":6}\u{1e}");
    assert_eq!(received.recv().await, Some(MessagePayload::Text("{}\u{1e}".to_string())));
    assert_eq!(received.recv().await, Some(MessagePayload::Text("{\"type\":6}\u{1e}".to_string())));

    transport.send(MessagePayload::Text("first\u{1e}".to_string())).await.unwrap();
    transport.send(MessagePayload::Text("second\u{1e}".to_string())).await.unwrap();

    let posts: Vec<_> = http.requests().into_iter().filter(|r| r.method == Method::POST).collect();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].url, CONNECT_URL);
    assert_eq!(posts[0].body, Some(b"first\x1e".to_vec()));
    assert_eq!(posts[1].body, Some(b"second\x1e".to_vec()));
    assert_eq!(posts[0].header("Authorization"), Some("Bearer a b"));
    assert_eq!(posts[0].header("Content-Type"), Some("text/plain;charset=UTF-8"));
}

#[test_log::test(tokio::test)]
async fn test_binary_is_refused_before_opening() {
    let (factory, mut streams) = ChannelEventSourceFactory::new();
    let transport = transport(factory, MockHttpClient::unreachable(), None, true);

    let result = transport.connect(CONNECT_URL, TransferFormat::Binary).await;
    assert!(matches!(result, Err(HubError::Transport(ref e)) if e.contains("'Text'")));
    assert!(streams.try_recv().is_err());
}

#[test_log::test(tokio::test)]
async fn test_stream_end_closes_without_error() {
    let (factory, mut streams) = ChannelEventSourceFactory::new();
    let transport = transport(factory, accepting_http(), None, true);
    let (_, mut closed) = watch(&transport);

    transport.connect(CONNECT_URL, TransferFormat::Text).await.unwrap();
    streams.recv().await.unwrap().end();

    assert_eq!(closed.recv().await, Some(None));
    assert!(matches!(
        transport.send(MessagePayload::Text("x".to_string())).await,
        Err(HubError::InvalidState(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_stream_error_closes_with_it() {
    let (factory, mut streams) = ChannelEventSourceFactory::new();
    let transport = transport(factory, accepting_http(), None, true);
    let (_, mut closed) = watch(&transport);

    transport.connect(CONNECT_URL, TransferFormat::Text).await.unwrap();
    let stream = streams.recv().await.unwrap();
    stream.fail(HubError::Transport("EventSource failed: reset".to_string()));

    assert_eq!(closed.recv().await, Some(Some(HubError::Transport("EventSource failed: reset".to_string()))));
}

#[test_log::test(tokio::test)]
async fn test_cookies_follow_with_credentials() {
    let (factory, mut streams) = ChannelEventSourceFactory::new();
    let http = accepting_http();
    http.set_cookies("session=42");

    let with = transport(factory.clone(), http.clone(), None, true);
    with.connect(CONNECT_URL, TransferFormat::Text).await.unwrap();
    let stream = streams.recv().await.unwrap();
    assert!(stream.with_credentials);
    assert_eq!(stream.header("Cookie"), Some("session=42"));

    let without = transport(factory, http, None, false);
    without.connect(CONNECT_URL, TransferFormat::Text).await.unwrap();
    let stream = streams.recv().await.unwrap();
    assert!(!stream.with_credentials);
    assert_eq!(stream.header("Cookie"), None);

    with.stop().await.unwrap();
    without.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_stop_closes_once() {
    let (factory, mut streams) = ChannelEventSourceFactory::new();
    let transport = transport(factory, accepting_http(), None, true);
    let (_, mut closed) = watch(&transport);

    transport.connect(CONNECT_URL, TransferFormat::Text).await.unwrap();
    let stream = streams.recv().await.unwrap();
    assert!(!transport.inherent_keep_alive());

    transport.stop().await.unwrap();
    stream.end();

    assert_eq!(closed.recv().await, Some(None));
    assert!(closed.try_recv().is_err());
}
