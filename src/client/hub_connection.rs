use std::{
    pin::Pin,
    sync::{Arc, Mutex, Weak},
    task::{Context, Poll},
    time::Duration,
};

use futures::{channel::oneshot, Stream};
use log::{debug, error, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    communication::reconnection::{ReconnectionConfig, ReconnectionPolicy, RetryContext},
    completer::ManualStream,
    connection::{ConnectionState, HttpConnection},
    error::HubError,
    execution::{CallbackHandler, InvocationStorage, MethodHandler, MethodRegistry, RegistrationHandle},
    protocol::{
        handshake::{HandshakeProtocol, HandshakeRequest},
        hub_protocol::{
            CancelInvocationMessage, HubMessage, HubProtocol, InvocationMessage, MessagePayload,
            StreamInvocationMessage,
        },
    },
    sync::MutexExt,
};

use super::InvocationContext;

pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

/// Observes a closed connection, or the loss that started a reconnect.
pub type CloseHandler = Arc<dyn Fn(Option<HubError>) + Send + Sync>;
/// Observes a successful reconnect with the new connection id.
pub type ReconnectedHandler = Arc<dyn Fn(Option<String>) + Send + Sync>;

enum Handshake {
    Pending(Option<oneshot::Sender<Result<(), HubError>>>),
    Received,
}

struct HubInner {
    connection: HttpConnection,
    protocol: Arc<dyn HubProtocol>,
    invocations: InvocationStorage,
    methods: MethodRegistry,
    state: Mutex<HubConnectionState>,
    handshake: Mutex<Handshake>,
    server_timeout: Mutex<Duration>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    close_handlers: Mutex<Vec<CloseHandler>>,
    reconnecting_handlers: Mutex<Vec<CloseHandler>>,
    reconnected_handlers: Mutex<Vec<ReconnectedHandler>>,
    reconnection: ReconnectionConfig,
    reconnect_abort: Mutex<Option<CancellationToken>>,
    // set once start reaches Connected; close observers only hear about started sessions
    started: Mutex<bool>,
    lost_during_start: Mutex<Option<HubError>>,
}

/// A client for connecting to and interacting with a hub.
///
/// Built with [`HubConnectionBuilder`](super::HubConnectionBuilder). The
/// connection can be cloned and used freely across tasks; all clones share
/// one underlying session.
///
/// ```ignore
/// let connection = HubConnectionBuilder::new("https://localhost:5001/chat").build();
/// connection.register("ReceiveMessage", |ctx| {
///     let text: String = ctx.argument(0).unwrap_or_default();
///     info!("received {}", text);
/// });
///
/// connection.start().await?;
/// let sum: i32 = connection.invoke("Add", (1, 2)).await?;
/// connection.send("Broadcast", ("hello",)).await?;
///
/// let mut counter = connection.stream::<i32, _>("Counter", (10,)).await?;
/// while let Some(item) = counter.next().await {
///     info!("item {}", item?);
/// }
///
/// connection.stop().await?;
/// ```
#[derive(Clone)]
pub struct HubConnection {
    inner: Arc<HubInner>,
}

fn to_arguments<A: Serialize>(args: &A) -> Result<Vec<Value>, HubError> {
    match serde_json::to_value(args)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(values) => Ok(values),
        value => Ok(vec![value]),
    }
}

impl HubConnection {
    pub(crate) fn new(
        connection: HttpConnection,
        protocol: Arc<dyn HubProtocol>,
        server_timeout: Duration,
        reconnection: ReconnectionConfig,
    ) -> Self {
        let inner = Arc::new(HubInner {
            connection,
            protocol,
            invocations: InvocationStorage::new(),
            methods: MethodRegistry::new(),
            state: Mutex::new(HubConnectionState::Disconnected),
            handshake: Mutex::new(Handshake::Received),
            server_timeout: Mutex::new(server_timeout),
            watchdog: Mutex::new(None),
            close_handlers: Mutex::new(Vec::new()),
            reconnecting_handlers: Mutex::new(Vec::new()),
            reconnected_handlers: Mutex::new(Vec::new()),
            reconnection,
            reconnect_abort: Mutex::new(None),
            started: Mutex::new(false),
            lost_during_start: Mutex::new(None),
        });

        let hub: Weak<HubInner> = Arc::downgrade(&inner);
        inner.connection.set_on_receive(Arc::new(move |data| {
            if let Some(hub) = hub.upgrade() {
                hub.process_incoming_data(data);
            }
        }));

        let hub: Weak<HubInner> = Arc::downgrade(&inner);
        inner.connection.set_on_close(Arc::new(move |error| {
            if let Some(hub) = hub.upgrade() {
                hub.connection_closed(error);
            }
        }));

        HubConnection { inner }
    }

    pub fn state(&self) -> HubConnectionState {
        *self.inner.state.locked()
    }

    /// The id the server assigned during negotiation, while connected.
    pub fn connection_id(&self) -> Option<String> {
        if self.state() == HubConnectionState::Connected {
            self.inner.connection.connection_id()
        } else {
            None
        }
    }

    pub fn server_timeout(&self) -> Duration {
        *self.inner.server_timeout.locked()
    }

    /// Takes effect the next time the watchdog is armed.
    pub fn set_server_timeout(&self, timeout: Duration) {
        *self.inner.server_timeout.locked() = timeout;
    }

    /// Starts the connection and completes the handshake.
    pub async fn start(&self) -> Result<(), HubError> {
        {
            let mut state = self.inner.state.locked();
            if *state != HubConnectionState::Disconnected {
                return Err(HubError::InvalidState(
                    "Cannot start a HubConnection that is not in the 'Disconnected' state.".to_string(),
                ));
            }
            *state = HubConnectionState::Connecting;
        }

        debug!("Starting HubConnection.");
        let result = self.inner.start_internal().await;

        let mut state = self.inner.state.locked();
        match result {
            Ok(()) if *state == HubConnectionState::Connecting => match self.inner.lost_after_handshake() {
                Some(e) => {
                    warn!("Connection was lost before start completed: {}", e);
                    *state = HubConnectionState::Disconnected;
                    Err(e)
                },
                None => {
                    *state = HubConnectionState::Connected;
                    *self.inner.started.locked() = true;
                    info!("HubConnection connected successfully.");
                    Ok(())
                },
            },
            Ok(()) => Err(HubError::InvalidState("The connection was stopped during start.".to_string())),
            Err(e) => {
                if *state == HubConnectionState::Connecting {
                    *state = HubConnectionState::Disconnected;
                }
                Err(e)
            },
        }
    }

    /// Stops the connection; pending calls fail and close observers run.
    pub async fn stop(&self) -> Result<(), HubError> {
        self.inner.stop_internal(None).await
    }

    /// Calls `method` on the server and waits for its result.
    ///
    /// `args` is a tuple of the positional arguments, `()` for none.
    pub async fn invoke<T, A>(&self, method: &str, args: A) -> Result<T, HubError>
    where
        T: DeserializeOwned + Send + 'static,
        A: Serialize,
    {
        let arguments = to_arguments(&args)?;
        let invocation_id = self.inner.invocations.create_key();
        let result = self.inner.invocations.add_invocation::<T>(invocation_id.clone());

        let message = HubMessage::Invocation(InvocationMessage {
            invocation_id: Some(invocation_id.clone()),
            target: method.to_string(),
            arguments,
        });

        if let Err(e) = self.inner.send_message(&message).await {
            self.inner.invocations.remove(&invocation_id);
            return Err(e);
        }

        result.await
    }

    /// Calls `method` on the server without expecting a result.
    pub async fn send<A: Serialize>(&self, method: &str, args: A) -> Result<(), HubError> {
        let message = HubMessage::Invocation(InvocationMessage {
            invocation_id: None,
            target: method.to_string(),
            arguments: to_arguments(&args)?,
        });

        self.inner.send_message(&message).await
    }

    /// Calls a streaming `method` on the server. Dropping the returned stream cancels it.
    pub async fn stream<T, A>(&self, method: &str, args: A) -> Result<HubStream<T>, HubError>
    where
        T: DeserializeOwned + Send + 'static,
        A: Serialize,
    {
        let arguments = to_arguments(&args)?;
        let invocation_id = self.inner.invocations.create_key();
        let items = self.inner.invocations.add_stream::<T>(invocation_id.clone());

        let message = HubMessage::StreamInvocation(StreamInvocationMessage {
            invocation_id: invocation_id.clone(),
            target: method.to_string(),
            arguments,
        });

        if let Err(e) = self.inner.send_message(&message).await {
            self.inner.invocations.remove(&invocation_id);
            return Err(e);
        }

        Ok(HubStream {
            items,
            invocation_id,
            hub: Arc::downgrade(&self.inner),
            finished: false,
        })
    }

    /// Adds a handler for server calls to `method` (case-insensitive).
    pub fn on(&self, method: &str, handler: MethodHandler) {
        self.inner.methods.on(method, handler);
    }

    /// Removes `handler` from `method`, or all of its handlers when `None`.
    pub fn off(&self, method: &str, handler: Option<&MethodHandler>) {
        self.inner.methods.off(method, handler);
    }

    /// Like [`on`](Self::on), returning a handle that unregisters the handler.
    pub fn register(
        &self,
        method: &str,
        handler: impl Fn(InvocationContext) + Send + Sync + 'static,
    ) -> impl CallbackHandler {
        let handler: MethodHandler = Arc::new(handler);
        self.inner.methods.on(method, handler.clone());

        RegistrationHandle::new(self.inner.methods.clone(), method.to_string(), handler)
    }

    pub fn on_close(&self, handler: impl Fn(Option<HubError>) + Send + Sync + 'static) {
        self.inner.close_handlers.locked().push(Arc::new(handler));
    }

    pub fn on_reconnecting(&self, handler: impl Fn(Option<HubError>) + Send + Sync + 'static) {
        self.inner.reconnecting_handlers.locked().push(Arc::new(handler));
    }

    pub fn on_reconnected(&self, handler: impl Fn(Option<String>) + Send + Sync + 'static) {
        self.inner.reconnected_handlers.locked().push(Arc::new(handler));
    }

    #[cfg(test)]
    pub(crate) fn pending_invocations(&self) -> usize {
        self.inner.invocations.len()
    }
}

impl HubInner {
    async fn start_internal(self: &Arc<Self>) -> Result<(), HubError> {
        self.lost_during_start.locked().take();
        let (waiter, handshake) = oneshot::channel();
        *self.handshake.locked() = Handshake::Pending(Some(waiter));

        self.connection.start(self.protocol.transfer_format()).await?;

        let request = HandshakeRequest::new(self.protocol.name(), self.protocol.version());
        let sent = match HandshakeProtocol::write_request(&request) {
            Ok(request) => {
                debug!("Sending handshake request.");
                self.connection.send(MessagePayload::Text(request)).await
            },
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            _ = self.connection.stop(Some(e.clone())).await;
            return Err(e);
        }

        self.reset_watchdog();

        match handshake.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                _ = self.connection.stop(Some(e.clone())).await;
                Err(e)
            },
            Err(_) => Err(HubError::ConnectionClosed),
        }
    }

    /// The error of a connection that closed between the handshake and the end of start.
    ///
    /// Called with the hub state locked; a close after this check sees the hub Connected.
    fn lost_after_handshake(&self) -> Option<HubError> {
        if self.connection.state() == ConnectionState::Connected {
            return None;
        }

        Some(self.lost_during_start.locked().take().unwrap_or(HubError::ConnectionClosed))
    }

    async fn stop_internal(self: &Arc<Self>, error: Option<HubError>) -> Result<(), HubError> {
        let previous = {
            let mut state = self.state.locked();
            match *state {
                HubConnectionState::Disconnected => {
                    debug!("Call to HubConnection.stop ignored because it is already in the disconnected state.");
                    return Ok(());
                },
                HubConnectionState::Disconnecting => {
                    debug!("Call to HubConnection.stop ignored because it is already in the disconnecting state.");
                    return Ok(());
                },
                other => {
                    *state = HubConnectionState::Disconnecting;
                    other
                },
            }
        };

        if let Some(abort) = self.reconnect_abort.locked().take() {
            abort.cancel();
        }
        self.clear_watchdog();

        let result = self.connection.stop(error).await;

        if previous == HubConnectionState::Connecting {
            let mut state = self.state.locked();
            if *state == HubConnectionState::Disconnecting {
                *state = HubConnectionState::Disconnected;
            }
        } else {
            // no-op when the transport's close already completed it
            self.complete_close(None);
        }

        result
    }

    async fn send_message(&self, message: &HubMessage) -> Result<(), HubError> {
        let payload = self.protocol.write_message(message)?;

        self.connection.send(payload).await
    }

    fn process_incoming_data(self: &Arc<Self>, data: MessagePayload) {
        self.clear_watchdog();

        let mut data = Some(data);
        if matches!(*self.handshake.locked(), Handshake::Pending(_)) {
            data = match self.process_handshake(data.take()) {
                Ok(remainder) => remainder,
                Err(_) => return,
            };
        }

        if let Some(data) = data.filter(|d| !d.is_empty()) {
            match self.protocol.parse_messages(&data) {
                Ok(messages) => {
                    for message in messages {
                        self.dispatch(message);
                    }
                },
                Err(e) => {
                    error!("Error parsing hub messages: {}", e);
                    self.spawn_connection_stop(Some(e));
                    return;
                },
            }
        }

        self.reset_watchdog();
    }

    fn process_handshake(&self, data: Option<MessagePayload>) -> Result<Option<MessagePayload>, HubError> {
        let Some(data) = data else {
            return Ok(None);
        };

        let outcome = match HandshakeProtocol::parse_response(&data) {
            Ok((_, response)) if response.error.is_some() => Err(HubError::Handshake(format!(
                "Server returned handshake error: {}",
                response.error.unwrap_or_default()
            ))),
            Ok((remainder, _)) => Ok(remainder),
            Err(e) => Err(HubError::Handshake(format!("Error parsing handshake response: {}", e))),
        };

        let waiter = match std::mem::replace(&mut *self.handshake.locked(), Handshake::Received) {
            Handshake::Pending(waiter) => waiter,
            Handshake::Received => None,
        };

        match &outcome {
            Ok(_) => debug!("Server handshake complete."),
            Err(e) => error!("{}", e),
        }

        match waiter {
            Some(waiter) => {
                _ = waiter.send(outcome.as_ref().map(|_| ()).map_err(|e| e.clone()));
            },
            None => {
                if let Err(e) = &outcome {
                    self.spawn_connection_stop(Some(e.clone()));
                }
            },
        }

        outcome
    }

    fn dispatch(self: &Arc<Self>, message: HubMessage) {
        match message {
            HubMessage::Invocation(invocation) => self.invoke_client_method(invocation),
            HubMessage::StreamItem(_) | HubMessage::Completion(_) => self.invocations.process_message(&message),
            HubMessage::Ping => {},
            HubMessage::Close(close) => {
                info!("Close message received from server.");
                let error = close.error.map(|e| HubError::ServerClosed(Some(e)));
                let hub = self.clone();
                tokio::spawn(async move {
                    _ = hub.stop_internal(error).await;
                });
            },
            other => warn!("Invalid message type: {:?}", other.message_type()),
        }
    }

    fn invoke_client_method(&self, invocation: InvocationMessage) {
        let handlers = self.methods.handlers(&invocation.target);
        if handlers.is_empty() {
            warn!("No client method with the name '{}' found.", invocation.target);
        }

        for handler in handlers {
            handler(InvocationContext::create(invocation.target.clone(), invocation.arguments.clone()));
        }

        if invocation.invocation_id.is_some() {
            let message = "Server requested a response, which is not supported in this version of the client.";
            error!("{}", message);
            self.spawn_connection_stop(Some(HubError::Protocol(message.to_string())));
        }
    }

    fn spawn_connection_stop(&self, error: Option<HubError>) {
        let connection = self.connection.clone();

        tokio::spawn(async move {
            _ = connection.stop(error).await;
        });
    }

    /// Arms the single-shot server timeout, replacing any armed one.
    fn reset_watchdog(&self) {
        if self.connection.inherent_keep_alive() {
            self.clear_watchdog();
            return;
        }

        let timeout = *self.server_timeout.locked();
        let connection = self.connection.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("Server timeout of {:?} elapsed without receiving a message from the server.", timeout);

            // the stop clears this watchdog, so it must not run on the watchdog's own task
            tokio::spawn(async move {
                _ = connection.stop(Some(HubError::ServerTimeout)).await;
            });
        });

        if let Some(previous) = self.watchdog.locked().replace(watchdog) {
            previous.abort();
        }
    }

    fn clear_watchdog(&self) {
        if let Some(watchdog) = self.watchdog.locked().take() {
            watchdog.abort();
        }
    }

    fn connection_closed(self: &Arc<Self>, error: Option<HubError>) {
        let pending_error = error.clone().unwrap_or(HubError::ConnectionClosed);

        if let Handshake::Pending(waiter) = &mut *self.handshake.locked() {
            if let Some(waiter) = waiter.take() {
                _ = waiter.send(Err(pending_error.clone()));
            }
        }

        self.invocations.fail_all(&pending_error);
        self.clear_watchdog();

        let state = *self.state.locked();
        match state {
            HubConnectionState::Disconnecting => self.complete_close(error),
            HubConnectionState::Connected => match self.reconnection.policy.clone() {
                Some(policy) => self.begin_reconnect(policy, error),
                None => self.complete_close(error),
            },
            HubConnectionState::Connecting | HubConnectionState::Reconnecting => {
                debug!("Connection closed while the HubConnection was {:?}.", state);
                *self.lost_during_start.locked() = Some(pending_error);
            },
            HubConnectionState::Disconnected => debug!("Connection closed while the HubConnection was disconnected."),
        }
    }

    fn complete_close(&self, error: Option<HubError>) {
        {
            let mut state = self.state.locked();
            if *state == HubConnectionState::Disconnected {
                return;
            }
            *state = HubConnectionState::Disconnected;
        }

        if let Some(abort) = self.reconnect_abort.locked().take() {
            abort.cancel();
        }

        if !std::mem::replace(&mut *self.started.locked(), false) {
            debug!("Connection never started, close observers are not notified.");
            return;
        }

        let handlers = self.close_handlers.locked().clone();
        for handler in handlers {
            handler(error.clone());
        }
    }

    fn begin_reconnect(self: &Arc<Self>, policy: Arc<dyn ReconnectionPolicy>, error: Option<HubError>) {
        let context = RetryContext {
            previous_retry_count: 0,
            elapsed: Duration::ZERO,
            retry_reason: error.clone(),
        };
        let Some(delay) = policy.next_retry_delay(&context) else {
            info!("Connection not reconnecting because the reconnection policy declined.");
            self.complete_close(error);
            return;
        };

        {
            let mut state = self.state.locked();
            if *state != HubConnectionState::Connected {
                return;
            }
            *state = HubConnectionState::Reconnecting;
        }

        let abort = CancellationToken::new();
        *self.reconnect_abort.locked() = Some(abort.clone());

        match &error {
            Some(e) => info!("Connection reconnecting because of error '{}'.", e),
            None => info!("Connection reconnecting."),
        }

        let handlers = self.reconnecting_handlers.locked().clone();
        for handler in handlers {
            handler(error.clone());
        }

        let hub = self.clone();
        tokio::spawn(async move { hub.reconnect(policy, error, delay, abort).await });
    }

    async fn reconnect(
        self: Arc<Self>,
        policy: Arc<dyn ReconnectionPolicy>,
        error: Option<HubError>,
        mut delay: Duration,
        abort: CancellationToken,
    ) {
        let started = tokio::time::Instant::now();
        let mut retry_count = 0u32;
        let mut reason = error;

        loop {
            info!("Reconnect attempt number {} will start in {:?}.", retry_count + 1, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = abort.cancelled() => {
                    debug!("Reconnect canceled.");
                    return;
                },
            }

            if *self.state.locked() != HubConnectionState::Reconnecting {
                debug!("Connection left the reconnecting state during the reconnect delay.");
                return;
            }

            let result = self.start_internal().await;
            let result = {
                let mut state = self.state.locked();
                if *state != HubConnectionState::Reconnecting {
                    return;
                }
                match result.map(|()| self.lost_after_handshake()) {
                    Ok(None) => {
                        *state = HubConnectionState::Connected;
                        Ok(())
                    },
                    Ok(Some(e)) | Err(e) => Err(e),
                }
            };

            match result {
                Ok(()) => {
                    self.reconnect_abort.locked().take();

                    info!("HubConnection reconnected successfully after {} attempts.", retry_count + 1);
                    let connection_id = self.connection.connection_id();
                    let handlers = self.reconnected_handlers.locked().clone();
                    for handler in handlers {
                        handler(connection_id.clone());
                    }
                    return;
                },
                Err(e) => {
                    warn!("Reconnect attempt failed because of error '{}'.", e);
                    if *self.state.locked() != HubConnectionState::Reconnecting {
                        return;
                    }
                    reason = Some(e);
                },
            }

            retry_count += 1;
            let context = RetryContext {
                previous_retry_count: retry_count,
                elapsed: started.elapsed(),
                retry_reason: reason.clone(),
            };

            match policy.next_retry_delay(&context) {
                Some(next) => delay = next,
                None => {
                    info!("Reconnect retries have been exhausted after {} failed attempts.", retry_count);
                    self.complete_close(reason);
                    return;
                },
            }
        }
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.clear_watchdog();
    }
}

/// Items of a server stream started with [`HubConnection::stream`].
///
/// Ends after the server's Completion; a failed completion or a lost
/// connection is yielded as the last item. Dropping it earlier, or calling
/// [`cancel`](Self::cancel), tells the server to stop streaming.
pub struct HubStream<T> {
    items: ManualStream<T>,
    invocation_id: String,
    hub: Weak<HubInner>,
    finished: bool,
}

impl<T> HubStream<T> {
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Stream for HubStream<T> {
    type Item = Result<T, HubError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.items).poll_next(cx);

        if let Poll::Ready(None) = poll {
            this.finished = true;
        }

        poll
    }
}

impl<T> Drop for HubStream<T> {
    fn drop(&mut self) {
        if self.finished || self.items.is_terminated() {
            return;
        }

        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        if !hub.invocations.remove(&self.invocation_id) {
            return;
        }

        let message = HubMessage::CancelInvocation(CancelInvocationMessage {
            invocation_id: self.invocation_id.clone(),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = hub.send_message(&message).await {
                        debug!("Stream cancellation could not be sent: {}", e);
                    }
                });
            },
            Err(_) => debug!("No runtime to send the stream cancellation on."),
        }
    }
}
