pub mod consent;
pub mod state;

pub use consent::ConsentEngine;
pub use state::{accept_all, default_preferences, reject_all, ConsentState};
