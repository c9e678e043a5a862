//! Action executors.
//!
//! # Data Flow
//! ```text
//! Matched route
//!     → redirect.rs (render template → 301 + Location)
//!     → static_files.rs (lookup chain → file, content-type, cache headers)
//!     → proxy.rs (body limit → forwarded headers → upstream → streamed response)
//! ```
//!
//! # Design Decisions
//! - Each action is fully described by its compiled route; no shared state
//! - Static reads and upstream calls are always time-bounded
//! - Failures map to a RouteError and are never retried

pub mod proxy;
pub mod redirect;
pub mod static_files;

use std::sync::Arc;

pub use proxy::{ProxyTarget, UpstreamClient};
pub use redirect::RedirectTemplate;
pub use static_files::StaticSite;

/// What a route does once matched.
#[derive(Debug, Clone)]
pub enum Action {
    Redirect(RedirectTemplate),
    Static(Arc<StaticSite>),
    Proxy(ProxyTarget),
}

impl Action {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Redirect(_) => "redirect",
            Action::Static(_) => "static",
            Action::Proxy(_) => "proxy",
        }
    }
}
