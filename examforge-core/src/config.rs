//! Deployment environments and per-environment connection settings.
//!
//! Each environment names the connection parameters for every region it
//! serves. A region without its own entry reads through the primary's
//! endpoint. Only the development environment may fall back to a local
//! database when nothing is configured at all.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::RegionId;
use crate::error::{CoreError, Result};

/// Endpoint used in development when no connection is configured.
pub const DEVELOPMENT_FALLBACK_ENDPOINT: &str = "sqlite://examforge-dev.db";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Default staleness tolerance for replica reads, in seconds.
    pub fn default_max_stale_seconds(&self) -> u64 {
        match self {
            Environment::Development => 300,
            Environment::Test => 60,
            Environment::Staging => 30,
            Environment::Production => 10,
        }
    }

    /// Default latency ceiling for the preferred read region, in milliseconds.
    pub fn default_latency_ceiling_ms(&self) -> u64 {
        match self {
            Environment::Development => 2_000,
            Environment::Test => 1_000,
            Environment::Staging => 250,
            Environment::Production => 150,
        }
    }

    pub fn allows_fallback(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(CoreError::Configuration(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

/// Endpoint and credential for one (environment, region) pair.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionParams {
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ConnectionParams {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn has_credential(&self) -> bool {
        self.auth_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

// Keeps tokens out of logs.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Static description of a region, loaded at process start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionConfig {
    pub id: RegionId,
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
}

impl RegionConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, is_primary: bool) -> Self {
        Self {
            id: RegionId::new(id),
            name: name.into(),
            is_primary,
        }
    }
}

/// Region list plus connection parameters per environment and region.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub environments: BTreeMap<Environment, BTreeMap<RegionId, ConnectionParams>>,
}

impl ConnectionSettings {
    pub fn new(regions: Vec<RegionConfig>) -> Self {
        Self {
            regions,
            environments: BTreeMap::new(),
        }
    }

    pub fn with_connection(
        mut self,
        environment: Environment,
        region: impl Into<String>,
        params: ConnectionParams,
    ) -> Self {
        self.environments
            .entry(environment)
            .or_default()
            .insert(RegionId::new(region), params);
        self
    }

    /// Checks that exactly one region is primary and ids are unique.
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(CoreError::Configuration("no regions configured".to_string()));
        }
        let primaries = self.regions.iter().filter(|r| r.is_primary).count();
        if primaries != 1 {
            return Err(CoreError::Configuration(format!(
                "exactly one primary region required, found {}",
                primaries
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for region in &self.regions {
            if !seen.insert(&region.id) {
                return Err(CoreError::Configuration(format!(
                    "region '{}' configured twice",
                    region.id
                )));
            }
        }
        Ok(())
    }

    pub fn primary(&self) -> Result<&RegionConfig> {
        self.regions
            .iter()
            .find(|r| r.is_primary)
            .ok_or_else(|| CoreError::Configuration("no primary region configured".to_string()))
    }

    /// Resolves the connection parameters for `region` in `environment`.
    ///
    /// Missing endpoints or credentials are fatal everywhere except
    /// development, which falls back to [`DEVELOPMENT_FALLBACK_ENDPOINT`].
    /// Development also lends an unconfigured replica the primary's
    /// parameters; every other environment must configure each region.
    pub fn resolve(&self, environment: Environment, region: &RegionId) -> Result<ConnectionParams> {
        if !self.regions.iter().any(|r| &r.id == region) {
            return Err(CoreError::Configuration(format!(
                "region '{}' is not configured",
                region
            )));
        }
        let primary = self.primary()?;
        let params = self.environments.get(&environment).and_then(|by_region| {
            by_region.get(region).cloned().or_else(|| {
                let borrowed = by_region.get(&primary.id).filter(|_| environment.allows_fallback())?;
                tracing::warn!(
                    region = %region,
                    primary = %primary.id,
                    "No connection configured for replica, using the primary's"
                );
                Some(borrowed.clone())
            })
        });

        match params {
            Some(p) if !p.endpoint.trim().is_empty() && (p.has_credential() || environment.allows_fallback()) => {
                Ok(p)
            }
            Some(p) if p.endpoint.trim().is_empty() && environment.allows_fallback() => {
                Ok(ConnectionParams::new(DEVELOPMENT_FALLBACK_ENDPOINT))
            }
            None if environment.allows_fallback() => {
                tracing::warn!(
                    region = %region,
                    endpoint = DEVELOPMENT_FALLBACK_ENDPOINT,
                    "No connection configured for development, using local fallback"
                );
                Ok(ConnectionParams::new(DEVELOPMENT_FALLBACK_ENDPOINT))
            }
            Some(p) if p.endpoint.trim().is_empty() => Err(CoreError::Configuration(format!(
                "missing endpoint for region '{}' in {}",
                region, environment
            ))),
            Some(_) => Err(CoreError::Configuration(format!(
                "missing credential for region '{}' in {}",
                region, environment
            ))),
            None => Err(CoreError::Configuration(format!(
                "no connection parameters for region '{}' in {}",
                region, environment
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn settings() -> ConnectionSettings {
        ConnectionSettings::new(vec![
            RegionConfig::new("iad", "Virginia", true),
            RegionConfig::new("lhr", "London", false),
        ])
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("test".parse::<Environment>().unwrap(), Environment::Test);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_profiles_tighten_towards_production() {
        assert!(
            Environment::Production.default_latency_ceiling_ms()
                < Environment::Development.default_latency_ceiling_ms()
        );
        assert!(
            Environment::Production.default_max_stale_seconds()
                < Environment::Staging.default_max_stale_seconds()
        );
    }

    #[test]
    fn test_validate_requires_single_primary() {
        assert!(settings().validate().is_ok());

        let none = ConnectionSettings::new(vec![RegionConfig::new("iad", "Virginia", false)]);
        assert!(none.validate().is_err());

        let two = ConnectionSettings::new(vec![
            RegionConfig::new("iad", "Virginia", true),
            RegionConfig::new("lhr", "London", true),
        ]);
        assert!(two.validate().is_err());
    }

    #[test]
    fn test_resolve_replica_borrows_primary_only_in_development() {
        let settings = settings().with_connection(
            Environment::Development,
            "iad",
            ConnectionParams::new("sqlite:///srv/primary.db"),
        );
        let params = settings
            .resolve(Environment::Development, &RegionId::new("lhr"))
            .unwrap();
        assert_eq!(params.endpoint, "sqlite:///srv/primary.db");
    }

    #[rstest]
    #[case(Environment::Test)]
    #[case(Environment::Staging)]
    #[case(Environment::Production)]
    fn test_resolve_unconfigured_replica_is_fatal(#[case] environment: Environment) {
        let settings = settings().with_connection(
            environment,
            "iad",
            ConnectionParams::new("sqlite:///srv/primary.db").with_auth_token("secret"),
        );
        assert!(settings.resolve(environment, &RegionId::new("iad")).is_ok());

        let err = settings
            .resolve(environment, &RegionId::new("lhr"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(ref m) if m.contains("lhr")));
    }

    #[test]
    fn test_resolve_missing_credential_is_fatal_outside_development() {
        let settings = settings().with_connection(
            Environment::Staging,
            "iad",
            ConnectionParams::new("sqlite:///srv/staging.db"),
        );
        let err = settings
            .resolve(Environment::Staging, &RegionId::new("iad"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_resolve_missing_environment_is_fatal_outside_development() {
        let err = settings()
            .resolve(Environment::Production, &RegionId::new("iad"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_resolve_development_fallback() {
        let params = settings()
            .resolve(Environment::Development, &RegionId::new("iad"))
            .unwrap();
        assert_eq!(params.endpoint, DEVELOPMENT_FALLBACK_ENDPOINT);
    }

    #[test]
    fn test_resolve_unknown_region() {
        assert!(settings()
            .resolve(Environment::Development, &RegionId::new("gru"))
            .is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let params = ConnectionParams::new("sqlite://x.db").with_auth_token("hunter2");
        let printed = format!("{:?}", params);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
