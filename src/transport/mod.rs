pub mod http;
pub mod mock;
pub mod traits;

pub use http::{HttpTransport, TransportSettings};
pub use mock::MockTransport;
pub use traits::{HttpRequest, Method, NetworkError, Transport};
