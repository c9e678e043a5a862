//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → request.rs (request ID, host/path/client extraction)
//!     → [routing picks host and route]
//!     → [action produces the response]
//!     → response.rs (error mapping, compression opt-in)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestMeta, Scheme, X_REQUEST_ID};
pub use response::RouteError;
pub use server::EdgeServer;
