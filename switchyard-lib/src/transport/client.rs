use futures::TryStreamExt;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::redirect;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;
use url::Url;

use crate::{CallFuture, Channel, ChannelFactory, Endpoint, ErrorKind, Request, Response, Result};

/// Default user agent, `switchyard-<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));
/// Default timeout for the connect phase, 10 seconds.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for a whole exchange, 60 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP keepalive
/// See <https://tldp.org/HOWTO/TCP-Keepalive-HOWTO/overview.html> for more info
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Settings of the underlying HTTP client.
///
/// ```
/// use std::time::Duration;
/// use switchyard_lib::transport::TransportConfig;
///
/// let config = TransportConfig::builder()
///     .user_agent("billing-client/1.0")
///     .timeout(Duration::from_secs(5))
///     .build();
/// assert_eq!(config.connect_timeout, Duration::from_secs(10));
/// ```
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
pub struct TransportConfig {
    /// User agent sent with every request
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    pub user_agent: String,

    /// Timeout for establishing a connection
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,

    /// Timeout for a whole exchange, from sending the request until the
    /// end of the response body
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Headers sent with every request.
    ///
    /// Request headers with the same name take precedence.
    pub default_headers: HeaderMap,

    /// Accept invalid TLS certificates. Only meant for tests.
    pub allow_insecure: bool,
}

impl Default for TransportConfig {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransportConfig {
    fn client(&self) -> Result<reqwest::Client> {
        let mut headers = self.default_headers.clone();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_str(&self.user_agent)?,
        );

        // Redirects are answers the layers above need to see
        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.allow_insecure)
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(TCP_KEEPALIVE)
            .timeout(self.timeout)
            .redirect(redirect::Policy::none());

        Ok(builder.build()?)
    }
}

/// Sends calls to one base URI over a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestChannel {
    base: Url,
    client: reqwest::Client,
}

impl ReqwestChannel {
    /// Create a channel sending requests to `base` with `client`
    #[must_use]
    pub const fn new(base: Url, client: reqwest::Client) -> Self {
        Self { base, client }
    }

    /// The base URI requests are sent to
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn request(&self, endpoint: &Endpoint, request: &Request) -> Result<reqwest::Request> {
        let url = endpoint.render_url(&self.base, request)?;
        let mut builder = self
            .client
            .request(endpoint.method().clone(), url)
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder
                .header(CONTENT_TYPE, body.content_type().clone())
                .body(body.bytes().clone());
        }
        Ok(builder.build()?)
    }
}

impl Channel for ReqwestChannel {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        let request = match self.request(endpoint, &request) {
            Ok(request) => request,
            Err(e) => return CallFuture::failed(e),
        };
        let client = self.client.clone();
        CallFuture::new(async move {
            let response = client.execute(request).await?;
            let status = response.status();
            let headers = response.headers().clone();
            // Dropping the stream returns the connection to the pool
            let body = response.bytes_stream().map_err(io::Error::other);
            Ok(Response::new(status, headers, body))
        })
    }
}

/// Creates a [`ReqwestChannel`] per base URI, all sharing one client
#[derive(Debug, Clone)]
pub struct ReqwestChannelFactory {
    client: reqwest::Client,
}

impl ReqwestChannelFactory {
    /// Create a factory whose channels use a client built from `config`
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidRequest`] if the user agent is not a
    /// valid header value or the client cannot be initialized.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            client: config.client()?,
        })
    }

    /// Create a factory from an existing client
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ChannelFactory for ReqwestChannelFactory {
    fn create(&self, uri: &Url) -> Result<Arc<dyn Channel>> {
        if uri.cannot_be_a_base() {
            return Err(ErrorKind::InvalidUrl(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        Ok(Arc::new(ReqwestChannel::new(uri.clone(), self.client.clone())))
    }
}
