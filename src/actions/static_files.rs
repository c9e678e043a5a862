//! Static file action.
//!
//! Lookup order for a request path `p` under `root`:
//! 1. `root/p` if it is a regular file
//! 2. `root/p/<index>`
//! 3. `root/p.html` when clean URLs are enabled
//! 4. `root/<index>` when SPA fallback is enabled
//!
//! The first candidate that exists and can be read wins.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Response, StatusCode};
use percent_encoding::percent_decode_str;

use crate::http::response::RouteError;

/// A compiled static route.
#[derive(Debug, Clone)]
pub struct StaticSite {
    pub root: PathBuf,
    pub index: String,
    pub clean_urls: bool,
    pub spa_fallback: bool,
    pub immutable_prefixes: Vec<String>,
    pub immutable_max_age_secs: u64,
}

/// Which step of the lookup produced the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact,
    DirectoryIndex,
    CleanUrl,
    SpaFallback,
}

/// A file found by the lookup chain.
#[derive(Debug)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub resolution: Resolution,
}

impl StaticSite {
    /// Candidate paths in lookup order.
    fn candidates(&self, relative: &Path) -> Vec<(PathBuf, Resolution)> {
        let mut candidates = Vec::with_capacity(4);
        let target = self.root.join(relative);

        if !relative.as_os_str().is_empty() {
            candidates.push((target.clone(), Resolution::Exact));
        }
        candidates.push((target.join(&self.index), Resolution::DirectoryIndex));
        if self.clean_urls && !relative.as_os_str().is_empty() {
            let mut html = target.into_os_string();
            html.push(".html");
            candidates.push((PathBuf::from(html), Resolution::CleanUrl));
        }
        if self.spa_fallback {
            candidates.push((self.root.join(&self.index), Resolution::SpaFallback));
        }
        candidates
    }

    /// Walk the lookup chain for a raw request path.
    pub async fn resolve(&self, request_path: &str) -> Result<ResolvedFile, RouteError> {
        let relative = match normalize_path(request_path) {
            Some(relative) => relative,
            None => {
                tracing::debug!(path = %request_path, "Rejected static path");
                return Err(RouteError::FileNotFound(request_path.to_string()));
            }
        };

        for (path, resolution) in self.candidates(&relative) {
            match read_regular_file(&path).await {
                Ok(Some(contents)) => {
                    return Ok(ResolvedFile {
                        path,
                        contents,
                        resolution,
                    })
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(path = ?path, error = %e, "Static candidate unreadable");
                }
            }
        }

        Err(RouteError::FileNotFound(request_path.to_string()))
    }

    /// True when `request_path` sits under a long-cache prefix.
    pub fn is_immutable(&self, request_path: &str) -> bool {
        self.immutable_prefixes
            .iter()
            .any(|prefix| request_path.starts_with(prefix.as_str()))
    }
}

/// Serve a static request, bounded by `read_timeout`.
pub async fn serve(
    site: &StaticSite,
    method: &Method,
    request_path: &str,
    read_timeout: Duration,
) -> Result<Response<Body>, RouteError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(RouteError::MethodNotAllowed(method.clone()));
    }

    let file = tokio::time::timeout(read_timeout, site.resolve(request_path))
        .await
        .map_err(|_| RouteError::StaticTimeout(read_timeout))??;

    tracing::debug!(
        path = ?file.path,
        resolution = ?file.resolution,
        "Serving static file"
    );

    let mime = mime_guess::from_path(&file.path).first_or_octet_stream();
    let length = file.contents.len();
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(file.contents)
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    // The SPA document must stay revalidatable even when requested under an asset prefix.
    if file.resolution != Resolution::SpaFallback && site.is_immutable(request_path) {
        let value = format!("public, max-age={}, immutable", site.immutable_max_age_secs);
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }

    Ok(response)
}

/// Read `path` if it is a regular file. `Ok(None)` when missing or not a file.
async fn read_regular_file(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }
    match tokio::fs::read(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decode a request path into a root-relative path.
///
/// Returns `None` for traversal attempts, encoded separators and invalid UTF-8.
pub fn normalize_path(request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(request_path).decode_utf8().ok()?;
    if decoded.contains('\\') || decoded.contains('\0') {
        return None;
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) => normalized.push(segment),
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}
