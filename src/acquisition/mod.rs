pub mod loader;
pub mod retry;

pub use loader::{parse_configuration, ConfigLoader};
pub use retry::{retry_with_backoff, Backoff, RetryPolicy};
