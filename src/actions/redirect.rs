//! Redirect action.
//!
//! Templates are parsed once at configuration load into literal and variable
//! segments, so rendering is a single pass with no string searching.

use std::str::FromStr;

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use thiserror::Error;

use crate::http::request::RequestMeta;
use crate::http::response::RouteError;

/// Errors in a redirect template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,

    #[error("'$' at byte {0} is not followed by a variable name")]
    DanglingDollar(usize),

    #[error("unknown variable ${0}")]
    UnknownVariable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Scheme,
    Host,
    RequestUri,
    Uri,
    Args,
}

impl Variable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "scheme" => Some(Variable::Scheme),
            "host" => Some(Variable::Host),
            "request_uri" => Some(Variable::RequestUri),
            "uri" => Some(Variable::Uri),
            "args" => Some(Variable::Args),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Variable),
}

/// A parsed redirect target such as `https://$host$request_uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl RedirectTemplate {
    /// The HTTP→HTTPS upgrade used by redirect-only listeners.
    pub fn https_upgrade() -> Self {
        Self {
            source: "https://$host$request_uri".to_string(),
            segments: vec![
                Segment::Literal("https://".to_string()),
                Segment::Var(Variable::Host),
                Segment::Var(Variable::RequestUri),
            ],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitute request values into the template.
    pub fn render(&self, meta: &RequestMeta) -> String {
        let mut out = String::with_capacity(self.source.len() + meta.path.len() + meta.host.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(Variable::Scheme) => out.push_str(meta.scheme.as_str()),
                Segment::Var(Variable::Host) => out.push_str(&meta.host),
                Segment::Var(Variable::RequestUri) => out.push_str(&meta.request_uri()),
                Segment::Var(Variable::Uri) => out.push_str(&meta.path),
                Segment::Var(Variable::Args) => out.push_str(meta.query.as_deref().unwrap_or("")),
            }
        }
        out
    }
}

impl FromStr for RedirectTemplate {
    type Err = TemplateError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        if source.is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((at, c)) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let mut name = String::new();
            while let Some(&(_, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                return Err(TemplateError::DanglingDollar(at));
            }
            let var = Variable::from_name(&name).ok_or(TemplateError::UnknownVariable(name))?;

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Var(var));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }
}

/// Build the 301 response for `template`. No body.
pub fn respond(template: &RedirectTemplate, meta: &RequestMeta) -> Result<Response<Body>, RouteError> {
    if meta.host.is_empty() && template.segments.contains(&Segment::Var(Variable::Host)) {
        return Err(RouteError::BadRequest("missing Host header".to_string()));
    }

    let location = template.render(meta);
    let value = HeaderValue::try_from(location.as_str())
        .map_err(|_| RouteError::BadRequest(format!("unencodable redirect target {location:?}")))?;

    tracing::debug!(location = %location, "Redirecting");

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    response.headers_mut().insert(header::LOCATION, value);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Scheme;

    fn meta(host: &str, path: &str, query: Option<&str>) -> RequestMeta {
        RequestMeta {
            host: host.to_string(),
            client_ip: "198.51.100.4".parse().unwrap(),
            scheme: Scheme::Http,
            path: path.to_string(),
            query: query.map(str::to_string),
        }
    }

    #[test]
    fn https_upgrade_preserves_host_and_uri() {
        let template = RedirectTemplate::https_upgrade();
        assert_eq!(template, "https://$host$request_uri".parse().unwrap());
        assert_eq!(
            template.render(&meta("ops.example.com", "/api/items", Some("page=2"))),
            "https://ops.example.com/api/items?page=2"
        );
    }

    #[test]
    fn apex_redirect_is_verbatim() {
        let template: RedirectTemplate = "https://example.com$request_uri".parse().unwrap();
        let response = respond(&template, &meta("www.example.com", "/a/b.html", None)).unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com/a/b.html");
    }

    #[test]
    fn all_variables_render() {
        let template: RedirectTemplate = "$scheme://$host/new$uri?$args".parse().unwrap();
        assert_eq!(
            template.render(&meta("a.test", "/x", Some("k=v"))),
            "http://a.test/new/x?k=v"
        );
    }

    #[test]
    fn rejects_bad_templates() {
        assert_eq!("".parse::<RedirectTemplate>(), Err(TemplateError::Empty));
        assert_eq!(
            "https://$/".parse::<RedirectTemplate>(),
            Err(TemplateError::DanglingDollar(8))
        );
        assert_eq!(
            "https://$hostname/".parse::<RedirectTemplate>(),
            Err(TemplateError::UnknownVariable("hostname".into()))
        );
    }

    #[test]
    fn missing_host_is_bad_request() {
        let err = respond(&RedirectTemplate::https_upgrade(), &meta("", "/", None)).unwrap_err();
        assert!(matches!(err, RouteError::BadRequest(_)));
    }
}
