//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bound socket, in-flight limit)
//!     → tls.rs (TLS listeners only: SNI → certificate from current Snapshot)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded in-flight requests prevent resource exhaustion
//! - TLS is per listener and handled transparently by axum-server
//! - Certificates follow config reloads without rebinding

pub mod listener;
pub mod tls;

pub use listener::{BoundListener, ListenerContext, ListenerError};
pub use tls::{CertStore, SniResolver, TlsError};
