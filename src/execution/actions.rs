use crate::{error::HubError, protocol::hub_protocol::HubMessage};

/// A pending call waiting for StreamItem or Completion messages carrying its id.
pub(crate) trait UpdatableAction: Send {
    fn update_with(&mut self, message: &HubMessage);
    /// Terminates the call with `error` unless it already completed.
    fn fail(&mut self, error: HubError);
}
