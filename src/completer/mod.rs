mod manual_future;
mod manual_stream;

pub use manual_future::{ManualFuture, ManualFutureCompleter};
pub use manual_stream::{ManualStream, ManualStreamCompleter};
