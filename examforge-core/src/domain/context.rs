use serde::{Deserialize, Serialize};

/// Geo signals a client request carries; used only for region selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientContext {
    /// ISO 3166-1 alpha-2 country code, e.g. `DE`.
    pub country: Option<String>,
    /// IANA timezone, e.g. `Europe/Berlin`.
    pub timezone: Option<String>,
}

impl ClientContext {
    pub fn from_country(country: impl Into<String>) -> Self {
        Self {
            country: Some(country.into()),
            timezone: None,
        }
    }

    pub fn from_timezone(timezone: impl Into<String>) -> Self {
        Self {
            country: None,
            timezone: Some(timezone.into()),
        }
    }
}

/// Staleness tolerance for a routed read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadOptions {
    /// When false the read must be served by the primary region.
    pub allow_stale: bool,
    /// Upper bound on how old a replica's health data may be.
    pub max_stale_seconds: Option<u64>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            allow_stale: true,
            max_stale_seconds: None,
        }
    }
}

impl ReadOptions {
    pub fn primary_only() -> Self {
        Self {
            allow_stale: false,
            max_stale_seconds: None,
        }
    }

    pub fn with_max_stale(mut self, seconds: u64) -> Self {
        self.max_stale_seconds = Some(seconds);
        self
    }
}
