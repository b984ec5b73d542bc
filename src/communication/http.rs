use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;

/// A single request handed to an [`HttpClient`].
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    /// Cancels the request when triggered; a request whose token is already
    /// cancelled must fail with [`HubError::Aborted`] without going out.
    pub abort: Option<CancellationToken>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        let mut request = HttpRequest::new(Method::POST, url);
        request.body = Some(body);
        request
    }

    pub fn delete(url: impl Into<String>) -> Self {
        HttpRequest::new(Method::DELETE, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.with_header("Authorization", format!("Bearer {}", token)),
            None => self,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status_code,
            status_text: String::new(),
            body: body.into(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// The request/response primitive every negotiate, poll and send goes through.
///
/// Responses are returned for every status code; interpreting the status is left
/// to the caller. Timeouts surface as [`HubError::Timeout`] and cancellation as
/// [`HubError::Aborted`] so pollers can tell them apart from network failures.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HubError>;

    /// Cookies to forward on requests this client cannot make itself, such as a socket upgrade.
    fn cookie_string(&self, _url: &str) -> String {
        String::new()
    }
}

/// [`HttpClient`] backed by `ehttp`.
#[derive(Debug, Clone, Default)]
pub struct EhttpClient;

impl EhttpClient {
    pub fn new() -> Self {
        EhttpClient
    }
}

async fn elapse(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => futures::future::pending::<()>().await,
    }
}

async fn cancelled(abort: Option<CancellationToken>) {
    match abort {
        Some(token) => token.cancelled_owned().await,
        None => futures::future::pending::<()>().await,
    }
}

fn to_ehttp(request: HttpRequest) -> ehttp::Request {
    let mut outgoing = ehttp::Request::get(&request.url);
    outgoing.method = request.method.to_string();
    outgoing.body = request.body.unwrap_or_default();
    // ehttp's own 30 s default would cut long polls short; `timeout` is enforced by the caller
    outgoing.timeout = None;
    for (name, value) in request.headers {
        outgoing.headers.insert(name, value);
    }

    outgoing
}

#[async_trait]
impl HttpClient for EhttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HubError> {
        if request.abort.as_ref().is_some_and(|a| a.is_cancelled()) {
            return Err(HubError::Aborted);
        }

        debug!("HTTP {} {}", request.method, request.url);
        let timeout = request.timeout;
        let abort = request.abort.clone();
        let outgoing = to_ehttp(request);

        let (s, r) = futures::channel::oneshot::channel::<ehttp::Result<ehttp::Response>>();
        ehttp::fetch(outgoing, move |result| {
            _ = s.send(result);
        });

        let response = async move {
            match r.await {
                Ok(Ok(response)) => Ok(HttpResponse {
                    status_code: response.status,
                    status_text: response.status_text,
                    body: response.bytes,
                }),
                Ok(Err(error)) => Err(HubError::Transport(format!("The call failed {}", error))),
                Err(_) => Err(HubError::Transport("The request is cancelled.".to_string())),
            }
        };

        tokio::select! {
            result = response => result,
            _ = elapse(timeout) => Err(HubError::Timeout),
            _ = cancelled(abort) => Err(HubError::Aborted),
        }
    }
}
