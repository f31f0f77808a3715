//! Event stream - append-only audit trail of board mutations and agent activity.
//!
//! The orchestrator is the only writer. Readers query the stream or
//! [`EventStream::subscribe`] to get events as they are appended.

mod event;
mod stream;

pub use event::{Event, EventKind};
pub use stream::EventStream;
