use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::HubError;

/// A server-to-client call as seen by a registered method handler.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    target: String,
    arguments: Vec<Value>,
}

impl InvocationContext {
    pub(crate) fn create(target: String, arguments: Vec<Value>) -> Self {
        InvocationContext { target, arguments }
    }

    /// The method name as the server sent it.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Deserializes the positional argument at `index`.
    ///
    /// ```ignore
    /// connection.register("ReceiveMessage", |ctx| {
    ///     let user: String = ctx.argument(0).unwrap_or_default();
    ///     let text: String = ctx.argument(1).unwrap_or_default();
    /// });
    /// ```
    pub fn argument<T: DeserializeOwned>(&self, index: usize) -> Result<T, HubError> {
        match self.arguments.get(index) {
            Some(value) => serde_json::from_value(value.clone()).map_err(HubError::from),
            None => Err(HubError::Serialization(format!(
                "argument {} requested but {} has only {}",
                index,
                self.target,
                self.arguments.len()
            ))),
        }
    }
}
