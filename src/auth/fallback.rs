use std::future::Future;

use thiserror::Error;

use crate::http::{Endpoint, ReadBodyError, read_body_with_limit};
use crate::url::ApiUrl;

use super::token::Claims;

const MAX_INTROSPECTION_BODY_SIZE: usize = 16 * 1024;

/// The provider's answer for one raw token.
pub struct IntrospectedToken {
    /// whether the provider considers the token currently valid
    pub active: bool,
    pub claims: Claims,
    pub raw: serde_json::Map<String, serde_json::Value>,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FallbackError {
    #[error("introspection request failed: {0}")]
    Http(#[from] reqwest_middleware::Error),

    #[error("introspection endpoint returned status {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("could not read introspection response: {0}")]
    Read(#[from] ReadBodyError<reqwest::Error>),

    #[error("could not decode introspection response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The secondary, provider-hosted verification path. Independent of the
/// key-set cache: it must keep working when the cache cannot.
pub trait Introspect: Clone + Send + Sync + 'static {
    fn introspect(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<IntrospectedToken, FallbackError>> + Send;
}

/// Posts the raw token to the provider's introspection endpoint.
#[derive(Clone)]
pub struct HttpIntrospector {
    endpoint: Endpoint,
}

impl HttpIntrospector {
    pub fn new(url: ApiUrl) -> Self {
        Self::with_client(url, crate::http::new_client())
    }

    pub(crate) fn with_client(
        url: ApiUrl,
        client: reqwest_middleware::ClientWithMiddleware,
    ) -> Self {
        HttpIntrospector {
            endpoint: Endpoint::new(url, client),
        }
    }
}

#[derive(serde::Deserialize)]
struct ActiveFlag {
    #[serde(default)]
    active: bool,
}

impl Introspect for HttpIntrospector {
    async fn introspect(&self, token: &str) -> Result<IntrospectedToken, FallbackError> {
        let resp = self.endpoint.post().form(&[("token", token)]).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FallbackError::UnexpectedStatus(status));
        }

        let resp: http::Response<reqwest::Body> = resp.into();
        let bytes = read_body_with_limit(resp.into_body(), MAX_INTROSPECTION_BODY_SIZE).await?;

        let flag = serde_json::from_slice::<ActiveFlag>(&bytes)?;
        let claims = serde_json::from_slice::<Claims>(&bytes)?;
        let raw = serde_json::from_slice(&bytes)?;

        Ok(IntrospectedToken {
            active: flag.active,
            claims,
            raw,
        })
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_rfc7662_shape() {
        let body = serde_json::json!({
            "active": true,
            "sub": "user-1",
            "iss": "https://provider.example.com/auth/v1",
            "aud": "authenticated",
            "exp": 1_700_003_600u64,
            "iat": 1_700_000_000u64,
            "aal": "aal2",
        });
        let bytes = serde_json::to_vec(&body).unwrap();

        let flag = serde_json::from_slice::<ActiveFlag>(&bytes).unwrap();
        let claims = serde_json::from_slice::<Claims>(&bytes).unwrap();
        assert!(flag.active);
        assert_eq!(claims.subject.as_deref(), Some("user-1"));
    }

    #[test]
    fn inactive_by_default() {
        let flag = serde_json::from_slice::<ActiveFlag>(b"{}").unwrap();
        assert!(!flag.active);
    }
}
