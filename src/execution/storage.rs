use std::{collections::HashMap, sync::{Arc, Mutex}};

use log::{debug, info};
use serde::de::DeserializeOwned;

use crate::{
    completer::{ManualFuture, ManualStream},
    error::HubError,
    protocol::hub_protocol::HubMessage,
    sync::MutexExt,
};

use super::{actions::UpdatableAction, enumerable::EnumerableAction, invocation::InvocationAction};

struct StorageState {
    next_id: u64,
    actions: HashMap<String, Box<dyn UpdatableAction>>,
}

/// Pending `invoke` and `stream` calls keyed by invocation id.
///
/// Ids count up from `"1"` and are never handed out twice by the same storage.
#[derive(Clone)]
pub(crate) struct InvocationStorage {
    state: Arc<Mutex<StorageState>>,
}

impl InvocationStorage {
    pub fn new() -> Self {
        InvocationStorage {
            state: Arc::new(Mutex::new(StorageState {
                next_id: 1,
                actions: HashMap::new(),
            })),
        }
    }

    pub fn create_key(&self) -> String {
        let mut state = self.state.locked();
        let id = state.next_id;
        state.next_id += 1;

        id.to_string()
    }

    pub fn add_invocation<R: DeserializeOwned + Send + 'static>(&self, invocation_id: String) -> ManualFuture<R> {
        let (action, future) = InvocationAction::<R>::new(invocation_id.clone());

        debug!("Inserting invocation for key {}", invocation_id);
        self.state.locked().actions.insert(invocation_id, Box::new(action));

        future
    }

    pub fn add_stream<R: DeserializeOwned + Send + 'static>(&self, invocation_id: String) -> ManualStream<R> {
        let (action, stream) = EnumerableAction::<R>::new(invocation_id.clone());

        debug!("Inserting stream for key {}", invocation_id);
        self.state.locked().actions.insert(invocation_id, Box::new(action));

        stream
    }

    /// Returns `true` when `invocation_id` was still pending.
    pub fn remove(&self, invocation_id: &str) -> bool {
        self.state.locked().actions.remove(invocation_id).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, invocation_id: &str) -> bool {
        self.state.locked().actions.contains_key(invocation_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.locked().actions.len()
    }

    /// Routes a StreamItem or Completion to its call; unknown ids are dropped.
    pub fn process_message(&self, message: &HubMessage) {
        let Some(invocation_id) = message.invocation_id() else {
            return;
        };

        let mut state = self.state.locked();
        let completed = matches!(message, HubMessage::Completion(_));

        match state.actions.get_mut(invocation_id) {
            Some(action) => action.update_with(message),
            None => {
                debug!("No pending call for invocation id {}, message dropped", invocation_id);
                return;
            },
        }

        if completed {
            info!("Completion received for {}", invocation_id);
            state.actions.remove(invocation_id);
        }
    }

    /// Empties the storage and terminates every call with `error`.
    pub fn fail_all(&self, error: &HubError) {
        let drained: Vec<Box<dyn UpdatableAction>> = {
            let mut state = self.state.locked();
            state.actions.drain().map(|(_, action)| action).collect()
        };

        if !drained.is_empty() {
            debug!("Failing {} pending calls: {}", drained.len(), error);
        }

        for mut action in drained {
            action.fail(error.clone());
        }
    }
}
