use std::time::Duration;

use anyhow::ensure;
use serde::Deserialize;

use crate::url::ApiUrl;

/// Cached key sets older than this are refreshed before the next lookup.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Tolerated disagreement between this host's clock and the provider's.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Token verification engine configuration.
///
/// Durations deserialize from humantime strings (`"600s"`, `"10m"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// The provider's published key-set endpoint.
    pub provider_keyset_url: ApiUrl,

    /// The provider's token-introspection endpoint.
    /// Required when `fallback_enabled` is set.
    #[serde(default)]
    pub introspection_url: Option<ApiUrl>,

    /// Tokens must carry exactly this `iss` claim.
    pub expected_issuer: String,

    /// Tokens must list this audience in their `aud` claim.
    pub expected_audience: String,

    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    #[serde(default = "default_clock_skew", with = "humantime_serde")]
    pub clock_skew_tolerance: Duration,

    /// Consult the provider's introspection endpoint after the primary
    /// verification path is exhausted on a key-identity failure.
    #[serde(default)]
    pub fallback_enabled: bool,
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

fn default_clock_skew() -> Duration {
    DEFAULT_CLOCK_SKEW
}

impl AuthConfig {
    pub fn new(
        provider_keyset_url: ApiUrl,
        expected_issuer: impl Into<String>,
        expected_audience: impl Into<String>,
    ) -> Self {
        AuthConfig {
            provider_keyset_url,
            introspection_url: None,
            expected_issuer: expected_issuer.into(),
            expected_audience: expected_audience.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            clock_skew_tolerance: DEFAULT_CLOCK_SKEW,
            fallback_enabled: false,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.expected_issuer.is_empty(), "expected_issuer is empty");
        ensure!(
            !self.expected_audience.is_empty(),
            "expected_audience is empty"
        );
        ensure!(
            !self.fallback_enabled || self.introspection_url.is_some(),
            "fallback_enabled requires introspection_url"
        );
        Ok(())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "provider_keyset_url": "https://provider.example.com/auth/v1/keys",
            "expected_issuer": "https://provider.example.com/auth/v1",
            "expected_audience": "authenticated",
        }))
        .unwrap();

        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.clock_skew_tolerance, DEFAULT_CLOCK_SKEW);
        assert!(!config.fallback_enabled);
        assert!(config.introspection_url.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn humantime_durations() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "provider_keyset_url": "https://provider.example.com/auth/v1/keys",
            "expected_issuer": "https://provider.example.com/auth/v1",
            "expected_audience": "authenticated",
            "cache_ttl": "10m",
            "clock_skew_tolerance": "2s",
        }))
        .unwrap();

        assert_eq!(config.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.clock_skew_tolerance, Duration::from_secs(2));
    }

    #[test]
    fn fallback_requires_introspection_url() {
        let mut config = AuthConfig::new(
            "https://provider.example.com/auth/v1/keys".parse().unwrap(),
            "https://provider.example.com/auth/v1",
            "authenticated",
        );
        config.fallback_enabled = true;
        config.validate().unwrap_err();

        config.introspection_url =
            Some("https://provider.example.com/auth/v1/introspect".parse().unwrap());
        config.validate().unwrap();
    }
}
