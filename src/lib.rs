pub mod acquisition;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod observability;
pub mod outbox;
pub mod storage;
pub mod transport;
pub mod validation;

pub use config::Config;
pub use domain::{Configuration, Preferences};
pub use engine::ConsentEngine;
pub use error::{ConsentError, Result};
