//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all profiles)
//!     → snapshot.rs (select profile, compile hosts, load certificates)
//!     → Snapshot (immutable generation) behind an ArcSwap
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs / lifecycle::signals load the file again
//!     → validation.rs validates
//!     → snapshot.rs builds the next generation
//!     → atomic swap; requests already running keep their Arc
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A failed reload leaves the previous generation active

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod validation;
pub mod watcher;

pub use schema::ByteSize;
pub use schema::HostConfig;
pub use schema::ListenerConfig;
pub use schema::ListenerMode;
pub use schema::ProfileConfig;
pub use schema::ProxyConfig;
pub use schema::RouteConfig;
pub use schema::RouteKind;
pub use schema::TimeoutConfig;
pub use schema::TlsConfig;
pub use schema::UnknownHostPolicy;
pub use snapshot::{Snapshot, SnapshotStore};
