//! Endpoint and link identity.
//!
//! Storage URLs are normalised down to `scheme://host[:port]` so that every
//! path on the same storage element shares one endpoint (and therefore one
//! set of ingress/egress limits and one optimizer state per link).

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A storage endpoint, e.g. `gsiftp://se.example.org` or `https://dav.example.org:8443`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    /// Construct an endpoint from a transfer URL (path and query are dropped).
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed =
            url::Url::parse(url).with_context(|| format!("invalid storage URL: {url}"))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("storage URL missing host: {url}"))?;
        // `port()` is None when the URL uses the scheme's default port.
        let name = match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        };
        Ok(Self(name))
    }

    /// Wrap an already-normalised endpoint name (as stored in the database).
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source → destination pair; the unit of capacity allocation and optimization.
///
/// Ordering is lexicographic on (source, destination), which gives the
/// optimizer a stable processing order across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    pub source: Endpoint,
    pub destination: Endpoint,
}

impl Link {
    pub fn new(source: Endpoint, destination: Endpoint) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Derive the link a transfer between two URLs travels over.
    pub fn from_urls(source_url: &str, destination_url: &str) -> Result<Self> {
        Ok(Self {
            source: Endpoint::from_url(source_url)?,
            destination: Endpoint::from_url(destination_url)?,
        })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}
