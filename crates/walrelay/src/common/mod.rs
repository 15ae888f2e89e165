//! Database-agnostic pieces of the relay: the error taxonomy, the published
//! event shape, and the watch-list / topic routing configuration.

mod error;
mod event;
mod watch;

pub use error::{RelayError, Result};
pub use event::{ActionKind, ChangeEvent};
pub use watch::{build_topic, WatchConfig, WatchList};
