use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::{ErrorKind, Result};

/// A normalized `host[:port]` identifying one backend node.
///
/// Keys are lowercase. An explicit, non-default port is kept, so two
/// servers on the same machine stay distinct.
///
/// # Examples
///
/// ```
/// use switchyard_lib::HostKey;
/// use url::Url;
///
/// let url = Url::parse("https://Billing.Example:8443/api").unwrap();
/// let host_key = HostKey::try_from(&url).unwrap();
/// assert_eq!(host_key.as_str(), "billing.example:8443");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey(String);

impl HostKey {
    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&Url> for HostKey {
    type Error = ErrorKind;

    fn try_from(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or(ErrorKind::InvalidUrl(url::ParseError::EmptyHost))?
            .to_lowercase();
        Ok(match url.port() {
            Some(port) => HostKey(format!("{host}:{port}")),
            None => HostKey(host),
        })
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HostKey {
    fn from(host: String) -> Self {
        HostKey(host.to_lowercase())
    }
}

impl From<&str> for HostKey {
    fn from(host: &str) -> Self {
        HostKey(host.to_lowercase())
    }
}
