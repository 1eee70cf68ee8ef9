//! Unix socket endpoints
//!
//! Accepted forms: `unix:///abs/path`, `unix:/abs/path`, `unix://relative`
//! and a bare filesystem path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::TransportError;

const SCHEME: &str = "unix:";

/// Address of a Unix domain socket
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    /// Endpoint for a socket path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse a `unix:` URI or a bare path
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidArgument` for an empty path or a
    /// scheme other than `unix`.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let uri = uri.trim();

        let path = if let Some(rest) = uri.strip_prefix(SCHEME) {
            rest.strip_prefix("//").unwrap_or(rest)
        } else if let Some((scheme, _)) = uri.split_once("://") {
            return Err(TransportError::InvalidArgument(format!(
                "unsupported endpoint scheme '{scheme}' in '{uri}' (expected unix)"
            )));
        } else {
            uri
        };

        if path.is_empty() {
            return Err(TransportError::InvalidArgument(format!(
                "endpoint '{uri}' has no socket path"
            )));
        }

        Ok(Self::new(path))
    }

    /// The socket path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unix://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let expected = Path::new("/run/duplex.sock");
        assert_eq!(Endpoint::parse("unix:///run/duplex.sock").unwrap().path(), expected);
        assert_eq!(Endpoint::parse("unix:/run/duplex.sock").unwrap().path(), expected);
        assert_eq!(Endpoint::parse("/run/duplex.sock").unwrap().path(), expected);
        assert_eq!(
            Endpoint::parse("unix://relative.sock").unwrap().path(),
            Path::new("relative.sock")
        );
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let result = Endpoint::parse("tcp://127.0.0.1:80");
        assert!(matches!(result, Err(TransportError::InvalidArgument(_))));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse("unix://").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let endpoint: Endpoint = "/tmp/a.sock".parse().unwrap();
        assert_eq!(endpoint.to_string(), "unix:///tmp/a.sock");
        assert_eq!(Endpoint::parse(&endpoint.to_string()).unwrap(), endpoint);
    }
}
