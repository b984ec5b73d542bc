mod actions;
mod callback;
mod enumerable;
mod invocation;
mod storage;

pub use callback::{CallbackHandler, MethodHandler};
pub(crate) use callback::{MethodRegistry, RegistrationHandle};
pub(crate) use storage::InvocationStorage;
