use http::Method;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::types::{ErrorKind, Request, Result};

/// A single segment of a [`PathTemplate`]
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed endpoint path such as `/invoices/{invoiceId}/lines`.
///
/// Rendering appends the segments to the path of a base URL, so an
/// endpoint is independent of where a service is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template. Segments written as `{name}` are parameters.
    #[must_use]
    pub fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self { segments }
    }

    /// Render this template onto `base`, substituting path parameters from
    /// `request` and appending its query parameters in order.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MissingPathParam`] if a parameter is absent and
    /// [`ErrorKind::InvalidUrl`] if `base` cannot carry a path.
    pub fn render(&self, base: &Url, request: &Request) -> Result<Url> {
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ErrorKind::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty();
            for segment in &self.segments {
                match segment {
                    Segment::Literal(literal) => {
                        path.push(literal);
                    }
                    Segment::Param(name) => {
                        let value = request
                            .path_params()
                            .get(name)
                            .ok_or_else(|| ErrorKind::MissingPathParam(name.clone()))?;
                        path.push(value);
                    }
                }
            }
        }
        if !request.query().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in request.query() {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => write!(f, "/{literal}")?,
                Segment::Param(name) => write!(f, "/{{{name}}}")?,
            }
        }
        Ok(())
    }
}

/// Describes one remote operation: which service it belongs to, how it is
/// named, and how it maps onto HTTP.
///
/// Endpoints are immutable and cheap to clone; generated stubs usually keep
/// them in statics or long-lived structs and share them across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    service_name: Arc<str>,
    endpoint_name: Arc<str>,
    version: Arc<str>,
    method: Method,
    path: Arc<PathTemplate>,
}

impl Endpoint {
    /// Create a new endpoint
    #[must_use]
    pub fn new(
        service_name: &str,
        endpoint_name: &str,
        version: &str,
        method: Method,
        path: &str,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint_name: endpoint_name.into(),
            version: version.into(),
            method,
            path: Arc::new(PathTemplate::parse(path)),
        }
    }

    /// Name of the service this endpoint belongs to
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Name of the endpoint within its service
    #[must_use]
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    /// Version of the service definition
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// HTTP method of the endpoint
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// The path template of the endpoint
    #[must_use]
    pub fn path(&self) -> &PathTemplate {
        &self.path
    }

    /// Render the full request URL against a base URI.
    ///
    /// # Errors
    ///
    /// See [`PathTemplate::render`].
    pub fn render_url(&self, base: &Url, request: &Request) -> Result<Url> {
        self.path.render(base, request)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service_name, self.endpoint_name)
    }
}
