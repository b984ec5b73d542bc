use log::error;
use serde::de::DeserializeOwned;

use crate::{
    completer::{ManualStream, ManualStreamCompleter},
    error::HubError,
    protocol::hub_protocol::HubMessage,
};

use super::actions::UpdatableAction;

/// Feeds a `stream` call from StreamItems and ends it on Completion.
pub(crate) struct EnumerableAction<R> {
    invocation_id: String,
    completer: ManualStreamCompleter<R>,
}

impl<R: DeserializeOwned> EnumerableAction<R> {
    pub fn new(invocation_id: String) -> (Self, ManualStream<R>) {
        let (stream, completer) = ManualStream::create();

        (EnumerableAction { invocation_id, completer }, stream)
    }
}

impl<R: DeserializeOwned + Send> UpdatableAction for EnumerableAction<R> {
    fn update_with(&mut self, message: &HubMessage) {
        match message {
            HubMessage::StreamItem(item) => match serde_json::from_value::<R>(item.item.clone()) {
                Ok(item) => self.completer.push(item),
                Err(e) => {
                    error!("Cannot update stream {} with unparseable item: {}", self.invocation_id, e);
                    self.completer.fail(HubError::from(e));
                },
            },
            HubMessage::Completion(completion) => match &completion.error {
                Some(error) => self.completer.fail(HubError::InvocationFailed(error.clone())),
                None => self.completer.close(),
            },
            other => error!("Cannot update stream {} with message type {:?}", self.invocation_id, other.message_type()),
        }
    }

    fn fail(&mut self, error: HubError) {
        self.completer.fail(error);
    }
}
