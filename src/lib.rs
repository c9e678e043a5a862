//! Minimal edge router: TLS termination, virtual hosts, prefix routes and
//! three actions (redirect, static files with SPA fallback, reverse proxy).

// Core subsystems
pub mod actions;
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::EdgeServer;
pub use lifecycle::Shutdown;
