//! Bearer-token authentication: guards on top of one shared verification
//! flow (key-set cache, rotation recovery, introspection fallback).

pub mod fallback;
mod flow;
pub mod identity;
pub mod jwks;
pub mod token;
pub mod verify;

#[cfg(test)]
#[expect(clippy::unwrap_used)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::http;

use fallback::{HttpIntrospector, Introspect};
use identity::{AssuranceLevel, IdentityContext};
use jwks::{FetchKeySet, HttpKeySetFetcher, KeySetCache};
use verify::ClaimRules;

/// Entry point for request authentication.
///
/// Both guards interpret the result of the same core verification flow; only
/// the treatment of a missing credential differs between them.
pub struct AuthGateway<F = HttpKeySetFetcher, I = HttpIntrospector> {
    verifier: flow::Verifier<F, I>,
}

impl AuthGateway {
    /// Construct a gateway backed by the provider's HTTP endpoints.
    pub fn new(config: AuthConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let client = http::new_client();
        let fetcher =
            HttpKeySetFetcher::with_client(config.provider_keyset_url.clone(), client.clone());

        // validate() guarantees the introspection url is present when
        // fallback is enabled
        let fallback = config
            .fallback_enabled
            .then(|| config.introspection_url.clone())
            .flatten()
            .map(|url| HttpIntrospector::with_client(url, client));

        Ok(Self::with_parts(
            &config,
            fetcher,
            fallback,
            Arc::new(SystemClock),
        ))
    }
}

impl<F: FetchKeySet, I: Introspect> AuthGateway<F, I> {
    /// Assemble a gateway from explicit parts. This is the seam for swapping
    /// in a non-HTTP fetcher or introspector, or a non-wall clock.
    pub fn with_parts(
        config: &AuthConfig,
        fetcher: F,
        fallback: Option<I>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = KeySetCache::new(fetcher, Arc::clone(&clock), config.cache_ttl);
        let rules = ClaimRules::from_config(config);
        AuthGateway {
            verifier: flow::Verifier::new(cache, fallback, rules, clock),
        }
    }

    /// Fetch the provider key set now instead of on the first request.
    /// Purely an optimization; the cache also populates itself lazily.
    pub async fn warm_up(&self) -> Result<(), AuthError> {
        self.verifier.warm_up().await
    }

    /// Authenticate the request or fail closed.
    pub async fn require_identity(
        &self,
        authorization: Option<&str>,
    ) -> Result<IdentityContext, AuthError> {
        let raw = bearer_token(authorization)?;
        let claims = self.verifier.verify(raw).await?;
        Ok(IdentityContext::from_claims(&claims))
    }

    /// Authenticate the request if a credential is present.
    ///
    /// Only the absence of a credential maps to `None`; a credential that is
    /// present but malformed, expired, or otherwise rejected still propagates
    /// as an error rather than downgrading to anonymous.
    pub async fn optional_identity(
        &self,
        authorization: Option<&str>,
    ) -> Result<Option<IdentityContext>, AuthError> {
        match self.require_identity(authorization).await {
            Ok(identity) => Ok(Some(identity)),
            Err(AuthError::NoCredential) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Authenticate the request and require a minimum assurance level.
    pub async fn require_assurance(
        &self,
        authorization: Option<&str>,
        required: AssuranceLevel,
    ) -> Result<IdentityContext, AuthError> {
        let identity = self.require_identity(authorization).await?;
        if !identity.meets_assurance(required) {
            return Err(AuthError::InsufficientAssurance {
                required,
                actual: identity.assurance,
            });
        }
        Ok(identity)
    }
}

/// Extract the raw token from an `Authorization` header value.
/// A missing header is a distinct no-credential condition, not a parse error.
fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthError> {
    let header = authorization.ok_or(AuthError::NoCredential)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(token::TokenEncodingError::NotBearer)?;
    Ok(token)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::testing::{RSA_PEM, jwks_server, live_body, new_ec_jwk, new_rsa_jwk, sign_ec, sign_rsa};
    use super::*;

    fn test_config(jwks_url: &str) -> AuthConfig {
        AuthConfig::new(
            jwks_url.parse().unwrap(),
            "https://provider.example.com/auth/v1",
            "authenticated",
        )
    }

    #[tokio::test]
    async fn missing_header_is_no_credential() {
        let (_, jwk) = new_ec_jwk("k1");
        let jwks_addr = jwks_server(vec![jwk]).await;
        let gateway =
            AuthGateway::new(test_config(&format!("http://{jwks_addr}/keys"))).unwrap();

        let err = gateway.require_identity(None).await.unwrap_err();
        assert!(matches!(err, AuthError::NoCredential), "got {err:?}");

        let optional = gateway.optional_identity(None).await.unwrap();
        assert!(optional.is_none());
    }

    #[tokio::test]
    async fn bad_scheme_is_malformed_even_for_optional() {
        let (_, jwk) = new_ec_jwk("k1");
        let jwks_addr = jwks_server(vec![jwk]).await;
        let gateway =
            AuthGateway::new(test_config(&format!("http://{jwks_addr}/keys"))).unwrap();

        let err = gateway
            .optional_identity(Some("Basic dXNlcjpwYXNz"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn require_identity_end_to_end() {
        let (sk, jwk) = new_ec_jwk("k1");
        let jwks_addr = jwks_server(vec![jwk]).await;
        let gateway =
            AuthGateway::new(test_config(&format!("http://{jwks_addr}/keys"))).unwrap();

        let token = sign_ec("k1", &sk, live_body("user-1", "aal1"));
        let header = format!("Bearer {token}");

        let identity = gateway.require_identity(Some(&header)).await.unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.email.as_deref(), Some("user-1@example.com"));
        assert_eq!(identity.assurance, AssuranceLevel::SingleFactor);
        assert!(!identity.is_anonymous);
    }

    #[tokio::test]
    async fn require_identity_rsa_end_to_end() {
        let (sk, jwk) = new_rsa_jwk(RSA_PEM, "r1");
        let jwks_addr = jwks_server(vec![jwk]).await;
        let gateway =
            AuthGateway::new(test_config(&format!("http://{jwks_addr}/keys"))).unwrap();

        let token = sign_rsa("r1", sk, live_body("user-9", "aal1"));
        let header = format!("Bearer {token}");

        let identity = gateway.require_identity(Some(&header)).await.unwrap();
        assert_eq!(identity.user_id, "user-9");
    }

    #[tokio::test]
    async fn assurance_guard() {
        let (sk, jwk) = new_ec_jwk("k1");
        let jwks_addr = jwks_server(vec![jwk]).await;
        let gateway =
            AuthGateway::new(test_config(&format!("http://{jwks_addr}/keys"))).unwrap();

        let single = format!("Bearer {}", sign_ec("k1", &sk, live_body("user-1", "aal1")));
        let multi = format!("Bearer {}", sign_ec("k1", &sk, live_body("user-1", "aal2")));

        let err = gateway
            .require_assurance(Some(&single), AssuranceLevel::MultiFactor)
            .await
            .unwrap_err();
        assert!(
            matches!(err, AuthError::InsufficientAssurance { .. }),
            "got {err:?}"
        );

        let identity = gateway
            .require_assurance(Some(&multi), AssuranceLevel::MultiFactor)
            .await
            .unwrap();
        assert_eq!(identity.assurance, AssuranceLevel::MultiFactor);
    }
}
