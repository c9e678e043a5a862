//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → matcher.rs (hostname → VirtualHost, or unknown-host policy)
//!     → router.rs (first route whose prefix matches)
//!     → Return: matched Route or RouteError
//!
//! Route Compilation (at load and on reload):
//!     HostConfig[]
//!     → Compile each route into an Action
//!     → Index hosts by every name
//!     → Freeze inside a Snapshot
//! ```
//!
//! # Design Decisions
//! - Routes compiled ahead of time, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (declaration order)

pub mod matcher;
pub mod router;

pub use matcher::{HostMatcher, HostTableError, PathPrefix};
pub use router::{CompileError, Route, VirtualHost};
