use std::{
    sync::{atomic::{AtomicBool, Ordering}, Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::HubError,
    protocol::hub_protocol::{MessagePayload, TransferFormat},
    sync::MutexExt,
};

use super::{
    access_token::{resolve_token, AccessTokenFactory},
    http::{HttpClient, HttpRequest, HttpResponse},
    transport::{append_query, post_message, Transport, TransportEvents},
};

/// How long the server may hold a poll before answering empty.
const POLL_TIMEOUT: Duration = Duration::from_secs(100);

/// Request/response transport: a loop of long GETs inbound, one POST per message outbound.
pub struct LongPollingTransport {
    http_client: Arc<dyn HttpClient>,
    access_token: Option<Arc<dyn AccessTokenFactory>>,
    shutdown_timeout: Duration,
    events: Arc<TransportEvents>,
    running: Arc<AtomicBool>,
    poll_abort: CancellationToken,
    url: Mutex<Option<String>>,
    receiving: Mutex<Option<JoinHandle<()>>>,
}

struct Poller {
    http_client: Arc<dyn HttpClient>,
    access_token: Option<Arc<dyn AccessTokenFactory>>,
    events: Arc<TransportEvents>,
    running: Arc<AtomicBool>,
    abort: CancellationToken,
    url: String,
    transfer_format: TransferFormat,
}

fn to_payload(body: Vec<u8>, transfer_format: TransferFormat) -> MessagePayload {
    match transfer_format {
        TransferFormat::Text => MessagePayload::Text(String::from_utf8_lossy(&body).into_owned()),
        TransferFormat::Binary => MessagePayload::Binary(body),
    }
}

fn poll_url(url: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    append_query(url, "_", &now.to_string())
}

impl Poller {
    async fn poll_once(&self) -> Result<HttpResponse, HubError> {
        let token = resolve_token(self.access_token.as_ref()).await?;
        let request = HttpRequest::get(poll_url(&self.url))
            .with_bearer(token.as_deref())
            .with_timeout(POLL_TIMEOUT)
            .with_abort(self.abort.clone());

        self.http_client.send(request).await
    }

    async fn run(self) {
        let mut close_error = None;

        while self.running.load(Ordering::SeqCst) {
            match self.poll_once().await {
                Ok(response) if response.status_code == 204 => {
                    info!("(LongPolling transport) Poll terminated by server.");
                    self.running.store(false, Ordering::SeqCst);
                },
                Ok(response) if response.status_code != 200 => {
                    warn!("(LongPolling transport) Unexpected response code: {}.", response.status_code);
                    close_error = Some(HubError::Http {
                        status: response.status_code,
                        text: response.status_text,
                    });
                    self.running.store(false, Ordering::SeqCst);
                },
                Ok(response) => {
                    if response.body.is_empty() {
                        debug!("(LongPolling transport) Poll timed out, reissuing.");
                    } else {
                        self.events.receive(to_payload(response.body, self.transfer_format));
                    }
                },
                Err(HubError::Timeout) if self.running.load(Ordering::SeqCst) => {
                    debug!("(LongPolling transport) Poll timed out, reissuing.");
                },
                Err(error) => {
                    if self.running.swap(false, Ordering::SeqCst) {
                        close_error = Some(error);
                    }
                },
            }
        }

        debug!("(LongPolling transport) Polling complete.");
        self.events.close(close_error);
    }
}

impl LongPollingTransport {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        access_token: Option<Arc<dyn AccessTokenFactory>>,
        shutdown_timeout: Duration,
    ) -> Self {
        LongPollingTransport {
            http_client,
            access_token,
            shutdown_timeout,
            events: Arc::new(TransportEvents::new()),
            running: Arc::new(AtomicBool::new(false)),
            poll_abort: CancellationToken::new(),
            url: Mutex::new(None),
            receiving: Mutex::new(None),
        }
    }

    async fn send_delete(&self, url: &str) {
        let token = match resolve_token(self.access_token.as_ref()).await {
            Ok(token) => token,
            Err(e) => {
                warn!("(LongPolling transport) Could not get an access token for the DELETE request: {}", e);
                None
            },
        };

        match self.http_client.send(HttpRequest::delete(url).with_bearer(token.as_deref())).await {
            Ok(response) => debug!("(LongPolling transport) DELETE request answered with {}.", response.status_code),
            Err(e) => warn!("(LongPolling transport) DELETE request failed: {}", e),
        }
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    async fn connect(&self, url: &str, transfer_format: TransferFormat) -> Result<(), HubError> {
        *self.url.locked() = Some(url.to_string());

        let poller = Poller {
            http_client: self.http_client.clone(),
            access_token: self.access_token.clone(),
            events: self.events.clone(),
            running: self.running.clone(),
            abort: self.poll_abort.clone(),
            url: url.to_string(),
            transfer_format,
        };

        // the first poll lets the server finish setting up the connection
        debug!("(LongPolling transport) Connecting to {}", url);
        let response = poller.poll_once().await?;
        if response.status_code != 200 {
            return Err(HubError::Http {
                status: response.status_code,
                text: response.status_text,
            });
        }

        self.running.store(true, Ordering::SeqCst);
        if !response.body.is_empty() {
            self.events.receive(to_payload(response.body, transfer_format));
        }

        *self.receiving.locked() = Some(tokio::spawn(poller.run()));

        Ok(())
    }

    async fn send(&self, data: MessagePayload) -> Result<(), HubError> {
        let url = self.url.locked().clone();
        let url = match url {
            Some(url) if self.running.load(Ordering::SeqCst) => url,
            _ => return Err(HubError::InvalidState("Cannot send until the transport is connected".to_string())),
        };

        post_message(self.http_client.as_ref(), self.access_token.as_ref(), &url, data).await
    }

    async fn stop(&self) -> Result<(), HubError> {
        debug!("(LongPolling transport) Stopping polling.");
        self.running.store(false, Ordering::SeqCst);

        let url = self.url.locked().clone();
        let receiving = self.receiving.locked().take();

        let graceful = async {
            if let Some(url) = &url {
                self.send_delete(url).await;
            }
            if let Some(receiving) = receiving {
                receiving.await.ok();
            }
        };

        if tokio::time::timeout(self.shutdown_timeout, graceful).await.is_err() {
            warn!("(LongPolling transport) Server did not end the poll in time, aborting it.");
            self.poll_abort.cancel();
        }

        self.events.close(None);

        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }

    fn inherent_keep_alive(&self) -> bool {
        true
    }
}
