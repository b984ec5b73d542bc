use log::{debug, error};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    completer::{ManualFuture, ManualFutureCompleter},
    error::HubError,
    protocol::hub_protocol::HubMessage,
};

use super::actions::UpdatableAction;

/// Resolves an `invoke` call from its Completion.
pub(crate) struct InvocationAction<R> {
    invocation_id: String,
    completer: ManualFutureCompleter<R>,
}

impl<R: DeserializeOwned> InvocationAction<R> {
    pub fn new(invocation_id: String) -> (Self, ManualFuture<R>) {
        let (future, completer) = ManualFuture::new();

        (InvocationAction { invocation_id, completer }, future)
    }

    fn complete(&self, result: Result<R, HubError>) {
        if !self.completer.complete(result) {
            debug!("Invocation {} was already completed", self.invocation_id);
        }
    }
}

impl<R: DeserializeOwned + Send> UpdatableAction for InvocationAction<R> {
    fn update_with(&mut self, message: &HubMessage) {
        match message {
            HubMessage::Completion(completion) => {
                if let Some(error) = &completion.error {
                    self.complete(Err(HubError::InvocationFailed(error.clone())));
                    return;
                }

                let result = completion.result.clone().unwrap_or(Value::Null);
                self.complete(serde_json::from_value::<R>(result).map_err(HubError::from));
            },
            other => {
                error!("Cannot complete invocation {} with message type {:?}", self.invocation_id, other.message_type());
                self.complete(Err(HubError::Protocol(format!("Unexpected message type: {:?}", other.message_type()))));
            },
        }
    }

    fn fail(&mut self, error: HubError) {
        self.complete(Err(error));
    }
}
