pub mod event;
pub mod queue;

pub use event::{EventKind, PendingEvent};
pub use queue::{EventOutbox, RetryOutcome};
