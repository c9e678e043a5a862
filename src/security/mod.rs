//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Proxied request:
//!     → limits.rs (check request body size)
//!     → headers.rs (strip hop-by-hop, set X-Real-IP / X-Forwarded-*)
//!     → Pass to upstream
//! ```
//!
//! # Design Decisions
//! - Fail closed: an oversized body never reaches the upstream
//! - No trust in client input: X-Real-IP always comes from the socket

pub mod headers;
pub mod limits;
